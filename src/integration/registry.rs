//! Metric type to integration mapping.
//!
//! Built once at startup and never mutated, so it is shared across sync
//! tasks behind an `Arc` without locking.

use std::sync::Arc;

use super::clickup::ClickUpFactory;
use super::google_fit::GoogleFitFactory;
use super::open_meteo::OpenMeteoFactory;
use super::{IntegrationError, IntegrationFactory};
use crate::config::ProvidersConfig;

/// Daily step count from Google Fit.
pub const METRIC_STEPS: &str = "steps";
/// Daily weather from Open-Meteo.
pub const METRIC_WEATHER: &str = "weather";
/// Daily hours worked from ClickUp.
pub const METRIC_TASKS: &str = "tasks";

/// Metric types with a built-in integration, in registration order.
pub const BUILTIN_METRICS: [&str; 3] = [METRIC_STEPS, METRIC_WEATHER, METRIC_TASKS];

/// Immutable registry of integration factories keyed by metric type.
#[derive(Clone, Default)]
pub struct IntegrationRegistry {
    entries: Vec<(String, Arc<dyn IntegrationFactory>)>,
}

impl std::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRegistry")
            .field("metric_types", &self.metric_types())
            .finish()
    }
}

impl IntegrationRegistry {
    pub fn builder() -> IntegrationRegistryBuilder {
        IntegrationRegistryBuilder::default()
    }

    /// Build the built-in table, keeping only `enabled` metrics when non-empty.
    ///
    /// # Errors
    /// Returns `IntegrationError::UnknownMetric` for an enabled metric without
    /// a built-in integration, or `Config` if a provider client cannot be built.
    pub fn from_config(
        providers: &ProvidersConfig,
        enabled: &[String],
    ) -> Result<Self, IntegrationError> {
        if let Some(unknown) = enabled
            .iter()
            .find(|m| !BUILTIN_METRICS.contains(&m.as_str()))
        {
            return Err(IntegrationError::UnknownMetric(unknown.clone()));
        }
        let wanted = |metric: &str| enabled.is_empty() || enabled.iter().any(|m| m == metric);

        let mut builder = Self::builder();
        if wanted(METRIC_STEPS) {
            builder = builder.register(
                METRIC_STEPS,
                GoogleFitFactory::new(providers.google_fit.clone())?,
            );
        }
        if wanted(METRIC_WEATHER) {
            builder = builder.register(
                METRIC_WEATHER,
                OpenMeteoFactory::new(providers.open_meteo.clone())?,
            );
        }
        if wanted(METRIC_TASKS) {
            builder = builder.register(
                METRIC_TASKS,
                ClickUpFactory::new(providers.clickup.clone())?,
            );
        }

        let registry = builder.build()?;
        tracing::debug!(metric_types = ?registry.metric_types(), "Integration registry built");
        Ok(registry)
    }

    /// Look up the factory for `metric_type`.
    ///
    /// # Errors
    /// Returns `IntegrationError::UnknownMetric` if nothing is registered.
    pub fn resolve(
        &self,
        metric_type: &str,
    ) -> Result<Arc<dyn IntegrationFactory>, IntegrationError> {
        self.entries
            .iter()
            .find(|(key, _)| key == metric_type)
            .map(|(_, factory)| Arc::clone(factory))
            .ok_or_else(|| IntegrationError::UnknownMetric(metric_type.to_string()))
    }

    pub fn contains(&self, metric_type: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == metric_type)
    }

    /// Registered metric types in registration order.
    pub fn metric_types(&self) -> Vec<&str> {
        self.entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects factories before freezing them into an [`IntegrationRegistry`].
#[derive(Default)]
pub struct IntegrationRegistryBuilder {
    entries: Vec<(String, Arc<dyn IntegrationFactory>)>,
}

impl IntegrationRegistryBuilder {
    /// Register `factory` under `metric_type`.
    pub fn register(
        self,
        metric_type: impl Into<String>,
        factory: impl IntegrationFactory + 'static,
    ) -> Self {
        self.register_arc(metric_type, Arc::new(factory))
    }

    /// Register an already shared factory.
    pub fn register_arc(
        mut self,
        metric_type: impl Into<String>,
        factory: Arc<dyn IntegrationFactory>,
    ) -> Self {
        self.entries.push((metric_type.into(), factory));
        self
    }

    /// Freeze the registry.
    ///
    /// # Errors
    /// Returns `IntegrationError::Config` for an empty or duplicate metric type.
    pub fn build(self) -> Result<IntegrationRegistry, IntegrationError> {
        for (index, (key, _)) in self.entries.iter().enumerate() {
            if key.trim().is_empty() {
                return Err(IntegrationError::Config(
                    "metric type cannot be empty".to_string(),
                ));
            }
            if self.entries[..index].iter().any(|(seen, _)| seen == key) {
                return Err(IntegrationError::Config(format!(
                    "duplicate metric type: '{key}'"
                )));
            }
        }
        Ok(IntegrationRegistry {
            entries: self.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{DataPoint, FetchWindow, Integration};
    use crate::secrets::SecretSource;

    struct NoopFactory;

    struct NoopIntegration;

    #[async_trait::async_trait]
    impl Integration for NoopIntegration {
        fn provider(&self) -> &str {
            "noop"
        }

        async fn fetch_data(
            &self,
            _window: &FetchWindow,
        ) -> Result<Vec<DataPoint>, IntegrationError> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl IntegrationFactory for NoopFactory {
        fn provider(&self) -> &str {
            "noop"
        }

        async fn connect(
            &self,
            _user_id: &str,
            _secrets: &dyn SecretSource,
        ) -> Result<Box<dyn Integration>, IntegrationError> {
            Ok(Box::new(NoopIntegration))
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = IntegrationRegistry::from_config(&ProvidersConfig::default(), &[]).unwrap();
        assert_eq!(registry.metric_types(), vec!["steps", "weather", "tasks"]);
        assert_eq!(registry.resolve("steps").unwrap().provider(), "google_fit");
        assert_eq!(registry.resolve("weather").unwrap().provider(), "open_meteo");
        assert_eq!(registry.resolve("tasks").unwrap().provider(), "clickup");
    }

    #[test]
    fn test_enabled_metrics_narrow_registry() {
        let enabled = vec!["tasks".to_string(), "steps".to_string()];
        let registry =
            IntegrationRegistry::from_config(&ProvidersConfig::default(), &enabled).unwrap();
        assert_eq!(registry.metric_types(), vec!["steps", "tasks"]);
        assert!(!registry.contains("weather"));

        let unknown = vec!["sleep".to_string()];
        let err =
            IntegrationRegistry::from_config(&ProvidersConfig::default(), &unknown).unwrap_err();
        assert!(matches!(err, IntegrationError::UnknownMetric(ref m) if m == "sleep"));
    }

    #[test]
    fn test_resolve_unknown_metric() {
        let registry = IntegrationRegistry::builder()
            .register("steps", NoopFactory)
            .build()
            .unwrap();
        let err = registry.resolve("sleep").err().unwrap();
        assert!(matches!(err, IntegrationError::UnknownMetric(ref m) if m == "sleep"));
    }

    #[test]
    fn test_builder_rejects_duplicates_and_empty_keys() {
        let err = IntegrationRegistry::builder()
            .register("steps", NoopFactory)
            .register("steps", NoopFactory)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate metric type"));

        let err = IntegrationRegistry::builder()
            .register(" ", NoopFactory)
            .build()
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Config(_)));
    }
}
