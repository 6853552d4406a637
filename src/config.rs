//! YAML configuration: per-service timeout, extra excluded parameters and
//! link template services.
//!
//! ```yaml
//! timeout_secs: 20
//! excluded_params: [utm_source]
//! services:
//!   - id: doi_link
//!     type_tags: [fulltext]
//!     url: "https://doi.org/{id:doi}"
//!     display_text: "Publisher site"
//! ```

use crate::lookup::KeyBuilder;
use crate::service::{LinkTemplateService, LinkTemplateSpec, ServiceRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

fn default_timeout_secs() -> u64 {
    30
}

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Per-service timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Parameters excluded from canonical keys, on top of the defaults
    #[serde(default)]
    pub excluded_params: Vec<String>,
    #[serde(default)]
    pub services: Vec<LinkTemplateSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            excluded_params: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
        }
        let mut seen = HashSet::new();
        for spec in &self.services {
            if !seen.insert(spec.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate service id: {}", spec.id)));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn key_builder(&self) -> KeyBuilder {
        KeyBuilder::new().with_excluded(self.excluded_params.iter().cloned())
    }

    /// Build the configured services, in file order
    pub fn service_registry(&self) -> Result<ServiceRegistry, ConfigError> {
        let mut registry = ServiceRegistry::new();
        for spec in &self.services {
            let tier = spec.tier;
            let service = LinkTemplateService::new(spec.clone())
                .map_err(|e| ConfigError::Invalid(format!("service {}: {}", spec.id, e)))?;
            registry.register(Arc::new(service), tier);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::REQUEST_ID_PARAM;
    use crate::model::TypeTag;
    use crate::service::Tier;
    use std::io::Write;

    const SAMPLE: &str = r#"
timeout_secs: 5
excluded_params: [utm_source]
services:
  - id: doi_link
    type_tags: [fulltext]
    url: "https://doi.org/{id:doi}"
    display_text: "Publisher site"
  - id: catalog
    type_tags: [holding]
    url: "https://catalog.example.org/?issn={id:issn}"
    tier: background
"#;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.service_registry().unwrap().is_empty());
    }

    #[test]
    fn sample_builds_services_and_keys() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));

        let keys = config.key_builder();
        assert!(keys.is_excluded("utm_source"));
        assert!(keys.is_excluded(REQUEST_ID_PARAM));

        let registry = config.service_registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("catalog").unwrap().tier, Tier::Background);
        assert_eq!(
            registry.get("doi_link").unwrap().service.type_tags(),
            &[TypeTag::Fulltext]
        );
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(matches!(
            Config::from_yaml("timeout_secs: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("services: [{id: a, url: x}, {id: a, url: y}]"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("timeout_secs: [1]"),
            Err(ConfigError::Yaml(_))
        ));

        let broken = Config::from_yaml("services: [{id: a, url: \"https://x/{doi\"}]").unwrap();
        assert!(matches!(broken.service_registry(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.services.len(), 2);

        assert!(matches!(
            Config::load("/nonexistent/openlink.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
