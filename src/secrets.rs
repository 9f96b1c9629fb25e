//! Credential lookup for provider integrations.
//!
//! Credentials are addressed by `(provider, user_id, key)`, e.g.
//! `("google_fit", "u1", "token")`. Three backends are available:
//!
//! - [`EnvSecretSource`]: `{PREFIX}_{PROVIDER}_{USER}_{KEY}` environment variables
//! - [`FileSecretSource`]: `<root>/<provider>/<user>/<key>` files
//! - [`StaticSecretSource`]: In-memory map, mostly for tests

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Default prefix for environment variable secrets.
pub const DEFAULT_ENV_PREFIX: &str = "METRIC_SYNC";

/// Errors returned by secret backends.
#[derive(Debug, Error)]
pub enum SecretError {
    /// No credential stored under the requested key.
    #[error("credential not found: {0}")]
    NotFound(String),

    /// The backend itself failed (unreadable file, bad encoding).
    #[error("secret backend error: {0}")]
    Backend(String),
}

/// Keyed credential lookup.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Look up a credential. `Ok(None)` means nothing is stored for the key.
    async fn get_secret(
        &self,
        provider: &str,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, SecretError>;
}

/// Look up a credential that must exist.
pub async fn require_secret(
    source: &dyn SecretSource,
    provider: &str,
    user_id: &str,
    key: &str,
) -> Result<String, SecretError> {
    source
        .get_secret(provider, user_id, key)
        .await?
        .ok_or_else(|| SecretError::NotFound(format!("{provider}/{user_id}/{key}")))
}

/// Look up a credential stored under any of `keys`, trying them in order.
///
/// The error names the first key.
pub async fn require_secret_any(
    source: &dyn SecretSource,
    provider: &str,
    user_id: &str,
    keys: &[&str],
) -> Result<String, SecretError> {
    for key in keys {
        if let Some(value) = source.get_secret(provider, user_id, key).await? {
            return Ok(value);
        }
    }
    let first = keys.first().copied().unwrap_or_default();
    Err(SecretError::NotFound(format!("{provider}/{user_id}/{first}")))
}

// =============================================================================
// Environment
// =============================================================================

/// Reads credentials from environment variables.
#[derive(Debug, Clone)]
pub struct EnvSecretSource {
    prefix: String,
}

impl EnvSecretSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Variable name for a credential, upper-cased with non-alphanumerics as `_`.
    pub fn var_name(&self, provider: &str, user_id: &str, key: &str) -> String {
        [self.prefix.as_str(), provider, user_id, key]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() {
                            c.to_ascii_uppercase()
                        } else {
                            '_'
                        }
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl Default for EnvSecretSource {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn get_secret(
        &self,
        provider: &str,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, SecretError> {
        let name = self.var_name(provider, user_id, key);
        match std::env::var(&name) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::Backend(format!(
                "environment variable {name} is not valid unicode"
            ))),
        }
    }
}

// =============================================================================
// Files
// =============================================================================

/// Reads credentials from a `<root>/<provider>/<user>/<key>` directory tree.
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    root: PathBuf,
}

impl FileSecretSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, provider: &str, user_id: &str, key: &str) -> Result<PathBuf, SecretError> {
        for part in [provider, user_id, key] {
            if part.is_empty() || part.contains(['/', '\\']) || part == "." || part == ".." {
                return Err(SecretError::Backend(format!(
                    "invalid secret path component: '{part}'"
                )));
            }
        }
        Ok(self.root.join(provider).join(user_id).join(key))
    }
}

#[async_trait]
impl SecretSource for FileSecretSource {
    async fn get_secret(
        &self,
        provider: &str,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, SecretError> {
        let path = self.path_for(provider, user_id, key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content.trim_end_matches(['\r', '\n']).to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SecretError::Backend(format!(
                "failed to read '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}

// =============================================================================
// Static
// =============================================================================

/// Fixed in-memory credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretSource {
    secrets: BTreeMap<(String, String, String), String>,
}

impl StaticSecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential.
    pub fn with_secret(
        mut self,
        provider: impl Into<String>,
        user_id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secrets
            .insert((provider.into(), user_id.into(), key.into()), value.into());
        self
    }
}

#[async_trait]
impl SecretSource for StaticSecretSource {
    async fn get_secret(
        &self,
        provider: &str,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, SecretError> {
        Ok(self
            .secrets
            .get(&(provider.to_string(), user_id.to_string(), key.to_string()))
            .cloned())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Secret backend selection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SecretBackend {
    #[default]
    Env,
    File,
}

fn default_prefix() -> String {
    DEFAULT_ENV_PREFIX.to_string()
}

/// Secrets configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Backend to read credentials from (default: env).
    #[serde(default)]
    pub backend: SecretBackend,
    /// Environment variable prefix (default: "METRIC_SYNC").
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Root directory for the file backend.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretBackend::Env,
            prefix: default_prefix(),
            path: None,
        }
    }
}

impl SecretsConfig {
    /// Check backend-specific requirements.
    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            SecretBackend::Env if self.prefix.trim().is_empty() => {
                Err("secrets prefix cannot be empty".to_string())
            }
            SecretBackend::File if self.path.as_deref().is_none_or(str::is_empty) => {
                Err("secrets path is required for the file backend".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Build the configured secret source.
    pub fn build(&self) -> Arc<dyn SecretSource> {
        match self.backend {
            SecretBackend::Env => Arc::new(EnvSecretSource::new(self.prefix.clone())),
            SecretBackend::File => Arc::new(FileSecretSource::new(
                self.path.clone().unwrap_or_default(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_name() {
        let source = EnvSecretSource::default();
        assert_eq!(
            source.var_name("google_fit", "user-1", "token"),
            "METRIC_SYNC_GOOGLE_FIT_USER_1_TOKEN"
        );
        assert_eq!(
            EnvSecretSource::new("").var_name("clickup", "u1", "list_id"),
            "CLICKUP_U1_LIST_ID"
        );
    }

    #[tokio::test]
    async fn test_env_source_reads_variable() {
        let source = EnvSecretSource::new("SECRETS_TEST_7731");
        // SAFETY: This test runs in isolation and only modifies a test-specific variable.
        unsafe {
            std::env::set_var("SECRETS_TEST_7731_CLICKUP_U1_TOKEN", "pk_123");
        }
        assert_eq!(
            source.get_secret("clickup", "u1", "token").await.unwrap(),
            Some("pk_123".to_string())
        );
        assert_eq!(source.get_secret("clickup", "u2", "token").await.unwrap(), None);
        // SAFETY: Cleanup test variable.
        unsafe {
            std::env::remove_var("SECRETS_TEST_7731_CLICKUP_U1_TOKEN");
        }
    }

    #[tokio::test]
    async fn test_require_secret_any_tries_keys_in_order() {
        let source = StaticSecretSource::new()
            .with_secret("clickup", "u1", "list-id", "dashed")
            .with_secret("clickup", "u2", "list_id", "plain")
            .with_secret("clickup", "u2", "list-id", "dashed");

        let keys = ["list_id", "list-id"];
        assert_eq!(
            require_secret_any(&source, "clickup", "u1", &keys).await.unwrap(),
            "dashed"
        );
        assert_eq!(
            require_secret_any(&source, "clickup", "u2", &keys).await.unwrap(),
            "plain"
        );
        let err = require_secret_any(&source, "clickup", "u3", &keys)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("clickup/u3/list_id"), "{err}");
    }

    #[tokio::test]
    async fn test_file_source_layout() {
        let dir = tempfile::tempdir().unwrap();
        let user_dir = dir.path().join("google_fit").join("u1");
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::write(user_dir.join("token"), "{\"token\":\"abc\"}\n").unwrap();

        let source = FileSecretSource::new(dir.path());
        assert_eq!(
            source.get_secret("google_fit", "u1", "token").await.unwrap(),
            Some("{\"token\":\"abc\"}".to_string())
        );
        assert_eq!(source.get_secret("google_fit", "u2", "token").await.unwrap(), None);
        assert!(source.get_secret("google_fit", "../u1", "token").await.is_err());
    }

    #[tokio::test]
    async fn test_require_secret_missing() {
        let source = StaticSecretSource::new().with_secret("clickup", "u1", "token", "t");
        assert_eq!(
            require_secret(&source, "clickup", "u1", "token").await.unwrap(),
            "t"
        );

        let err = require_secret(&source, "clickup", "u1", "team_id")
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::NotFound(ref key) if key == "clickup/u1/team_id"));
    }

    #[test]
    fn test_secrets_config_validation() {
        assert!(SecretsConfig::default().validate().is_ok());

        let file_without_path = SecretsConfig {
            backend: SecretBackend::File,
            ..Default::default()
        };
        assert!(file_without_path.validate().is_err());

        let backend: SecretBackend = "FILE".parse().unwrap();
        assert_eq!(backend, SecretBackend::File);
    }
}
