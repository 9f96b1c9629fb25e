//! Provider configuration grouped by integration.

use serde::{Deserialize, Serialize};

use crate::integration::clickup::ClickUpConfig;
use crate::integration::google_fit::GoogleFitConfig;
use crate::integration::open_meteo::OpenMeteoConfig;

use super::validation::ConfigError;

/// Settings for each built-in provider. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub google_fit: GoogleFitConfig,

    #[serde(default)]
    pub open_meteo: OpenMeteoConfig,

    #[serde(default)]
    pub clickup: ClickUpConfig,
}

impl ProvidersConfig {
    /// Validate all provider sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |provider: &str, e: String| {
            ConfigError::ValidationError(format!("providers.{provider}: {e}"))
        };

        self.google_fit
            .validate()
            .map_err(|e| invalid("google_fit", e))?;
        self.open_meteo
            .validate()
            .map_err(|e| invalid("open_meteo", e))?;
        self.clickup.validate().map_err(|e| invalid("clickup", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_provider_sections() {
        let yaml = r#"
open_meteo:
  latitude: 40.71
  longitude: -74.0
  timezone: America/New_York
clickup:
  timeout: 5s
  retry:
    max_attempts: 5
"#;
        let config: ProvidersConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.open_meteo.latitude, 40.71);
        assert_eq!(config.clickup.timeout.as_secs(), 5);
        assert_eq!(config.clickup.retry.max_attempts, 5);
        assert_eq!(config.google_fit.base_url, GoogleFitConfig::default().base_url);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_provider_is_named() {
        let config: ProvidersConfig =
            serde_yaml::from_str("open_meteo:\n  longitude: 200\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("providers.open_meteo"));
    }
}
