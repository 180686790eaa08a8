//! LLM handle - the model capability passed to agents
//!
//! The engine never talks to the model itself. It resolves the configured
//! provider, model and API key once and hands the result to the agent factory.

use std::fmt;
use tether_foundation::{Error, LlmConfig, Result};
use tracing::{debug, warn};

/// Resolved model capability
#[derive(Clone, PartialEq, Eq)]
pub struct LlmHandle {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    api_key: Option<String>,
}

impl LlmHandle {
    /// Handle with nothing configured
    pub fn unconfigured() -> Self {
        Self {
            provider: None,
            model: None,
            base_url: None,
            api_key: None,
        }
    }

    /// Resolve from configuration, reading the API key from the process environment
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::from_config_with(config, |name| std::env::var(name).ok())
    }

    /// Resolve with a custom environment lookup
    pub fn from_config_with<F>(config: &LlmConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if config.model.is_some() && config.provider.is_none() {
            return Err(Error::Config(
                "llm.model is set but llm.provider is missing".to_string(),
            ));
        }

        let api_key = match &config.api_key_env {
            Some(name) => {
                let key = lookup(name).filter(|k| !k.is_empty());
                if key.is_none() {
                    warn!("LLM API key variable {} is not set", name);
                }
                key
            }
            None => None,
        };

        let handle = Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            api_key,
        };
        debug!("Resolved LLM handle: {:?}", handle);
        Ok(handle)
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// `provider/model` label for status output
    pub fn label(&self) -> String {
        match (&self.provider, &self.model) {
            (Some(provider), Some(model)) => format!("{}/{}", provider, model),
            (Some(provider), None) => provider.clone(),
            _ => "none".to_string(),
        }
    }
}

impl fmt::Debug for LlmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmHandle")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_default() {
        let handle = LlmHandle::from_config(&LlmConfig::default()).unwrap();
        assert!(!handle.is_configured());
        assert_eq!(handle.label(), "none");
    }

    #[test]
    fn test_api_key_lookup_and_redaction() {
        let config = LlmConfig {
            provider: Some("anthropic".into()),
            model: Some("claude".into()),
            base_url: None,
            api_key_env: Some("TETHER_TEST_KEY".into()),
        };

        let handle = LlmHandle::from_config_with(&config, |name| {
            (name == "TETHER_TEST_KEY").then(|| "secret".to_string())
        })
        .unwrap();

        assert_eq!(handle.api_key(), Some("secret"));
        assert_eq!(handle.label(), "anthropic/claude");
        assert!(!format!("{:?}", handle).contains("secret"));

        let missing = LlmHandle::from_config_with(&config, |_| None).unwrap();
        assert_eq!(missing.api_key(), None);
    }

    #[test]
    fn test_model_without_provider() {
        let config = LlmConfig {
            model: Some("claude".into()),
            ..Default::default()
        };
        assert!(matches!(LlmHandle::from_config(&config), Err(Error::Config(_))));
    }
}
