//! Integration Layer
//!
//! Provider clients that fetch dated metric values for one user over a time
//! window.
//!
//! # Architecture
//!
//! - [`Integration`]: Connected client returning [`DataPoint`]s for a [`FetchWindow`]
//! - [`IntegrationFactory`]: Builds an `Integration` from a user's credentials
//! - [`IntegrationRegistry`]: Immutable metric type to factory mapping
//!
//! Built-in providers: [`google_fit`] (`steps`), [`open_meteo`] (`weather`),
//! and [`clickup`] (`tasks`).
//!
//! # Example
//!
//! ```rust,no_run
//! use metric_sync::config::ProvidersConfig;
//! use metric_sync::integration::{FetchWindow, IntegrationRegistry};
//! use metric_sync::secrets::EnvSecretSource;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = IntegrationRegistry::from_config(&ProvidersConfig::default(), &[])?;
//! let factory = registry.resolve("weather")?;
//! let integration = factory.connect("u1", &EnvSecretSource::default()).await?;
//! let points = integration
//!     .fetch_data(&FetchWindow::backfill(chrono::Utc::now(), 7))
//!     .await?;
//! println!("{} days", points.len());
//! # Ok(())
//! # }
//! ```

pub mod clickup;
pub mod google_fit;
pub mod http;
pub mod open_meteo;
mod registry;
mod traits;

pub use registry::{
    BUILTIN_METRICS, IntegrationRegistry, IntegrationRegistryBuilder, METRIC_STEPS, METRIC_TASKS,
    METRIC_WEATHER,
};
pub use traits::{
    DEFAULT_BACKFILL_DAYS, DataPoint, FetchWindow, Integration, IntegrationError,
    IntegrationFactory, day_start,
};
