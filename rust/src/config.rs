//! Configuration for the key subsystem. The master secret is resolved from its
//! source at every operation, and the service settings are read from a JSON
//! file so operators can adjust them without rebuilding.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use zeroize::Zeroize;

/// Environment variable that holds the master secret unless the config file
/// names another one.
pub const DEFAULT_SECRET_ENV: &str = "FORPROMPT_ENCRYPTION_SECRET";

/// Shortest master secret accepted, in characters.
pub const MIN_SECRET_CHARS: usize = 32;

/// Lowest PBKDF2 iteration count accepted for key derivation.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("master secret is not configured (expected environment variable {0})")]
    MissingSecret(String),
    #[error("master secret must be at least {MIN_SECRET_CHARS} characters, got {0}")]
    SecretTooShort(usize),
    #[error("pbkdf2 iteration count {0} is below the minimum of {MIN_PBKDF2_ITERATIONS}")]
    WeakIterationCount(u32),
    #[error("config file unreadable: {0}")]
    Io(String),
    #[error("config parse failed: {0}")]
    Parse(String),
}

/// Validated master secret. Construction is the only place the length rule is
/// enforced, so holding one proves the rule was checked.
pub struct MasterSecret {
    value: String,
}

impl MasterSecret {
    pub fn new(value: impl Into<String>) -> Result<Self, ConfigError> {
        let mut value = value.into();
        let chars = value.chars().count();
        if chars < MIN_SECRET_CHARS {
            value.zeroize();
            return Err(ConfigError::SecretTooShort(chars));
        }
        Ok(Self { value })
    }

    pub fn expose(&self) -> &[u8] {
        self.value.as_bytes()
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSecret")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

/// Where the master secret comes from. Resolution happens on demand rather
/// than once at startup.
#[derive(Clone)]
pub enum SecretSource {
    Env(String),
    Inline(String),
}

impl SecretSource {
    pub fn resolve(&self) -> Result<MasterSecret, ConfigError> {
        match self {
            SecretSource::Env(var) => {
                let value = std::env::var(var)
                    .ok()
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| ConfigError::MissingSecret(var.clone()))?;
                MasterSecret::new(value)
            }
            SecretSource::Inline(value) => MasterSecret::new(value.clone()),
        }
    }
}

impl Default for SecretSource {
    fn default() -> Self {
        SecretSource::Env(DEFAULT_SECRET_ENV.to_string())
    }
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::Env(var) => f.debug_tuple("Env").field(var).finish(),
            SecretSource::Inline(_) => f.debug_tuple("Inline").field(&"[REDACTED]").finish(),
        }
    }
}

/// Token bucket settings for the inbound boundary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_per_second: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub canonical_origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["https://forprompt.dev".to_string()],
            canonical_origin: "https://forprompt.dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub database_path: PathBuf,
    pub secret_env: String,
    pub pbkdf2_iterations: u32,
    pub migration_batch_size: usize,
    /// Argon2id PHC string for the operator passphrase that unlocks reveal.
    pub admin_password_hash: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("project_keys.db"),
            secret_env: DEFAULT_SECRET_ENV.to_string(),
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            migration_batch_size: 200,
            admin_password_hash: None,
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn secret_source(&self) -> SecretSource {
        SecretSource::Env(self.secret_env.clone())
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(ConfigError::WeakIterationCount(self.pbkdf2_iterations));
        }
        if self.migration_batch_size == 0 {
            return Err(ConfigError::Parse(
                "migrationBatchSize must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Loads the JSON service configuration. Missing fields fall back to defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<ServiceConfig, ConfigError> {
    let raw_json = fs::read_to_string(&path).map_err(|e| ConfigError::Io(format!("{e}")))?;
    let config: ServiceConfig =
        serde_json::from_str(&raw_json).map_err(|e| ConfigError::Parse(format!("{e}")))?;
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn rejects_short_secret() {
        let err = MasterSecret::new("a".repeat(20)).unwrap_err();
        assert!(matches!(err, ConfigError::SecretTooShort(20)));
    }

    #[test]
    fn accepts_minimum_length_secret() {
        let secret = MasterSecret::new("s".repeat(MIN_SECRET_CHARS)).expect("32 chars is enough");
        assert_eq!(secret.expose().len(), MIN_SECRET_CHARS);
    }

    #[test]
    fn missing_env_var_is_a_config_error() {
        let source = SecretSource::Env("FORPROMPT_KEYS_TEST_UNSET_SECRET".to_string());
        let err = source.resolve().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingSecret(var) if var == "FORPROMPT_KEYS_TEST_UNSET_SECRET"
        ));
    }

    #[test]
    fn resolves_secret_from_env() {
        let var = "FORPROMPT_KEYS_TEST_ENV_SECRET";
        std::env::set_var(var, "0123456789abcdef0123456789abcdef");
        let secret = SecretSource::Env(var.to_string())
            .resolve()
            .expect("secret should resolve");
        assert_eq!(secret.expose(), b"0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = MasterSecret::new("x".repeat(40)).expect("valid secret");
        assert!(!format!("{secret:?}").contains("xxxx"));
        let source = SecretSource::Inline("y".repeat(40));
        assert!(!format!("{source:?}").contains("yyyy"));
    }

    #[test]
    fn loads_config_with_defaults() {
        let payload = json!({
            "databasePath": "/var/lib/forprompt/keys.db",
            "migrationBatchSize": 50,
            "cors": { "allowedOrigins": ["https://app.forprompt.dev"] }
        });
        let file = NamedTempFile::new().expect("temp file");
        fs::write(file.path(), serde_json::to_vec(&payload).unwrap()).unwrap();

        let config = load_config(file.path()).expect("config should load");
        assert_eq!(config.database_path, PathBuf::from("/var/lib/forprompt/keys.db"));
        assert_eq!(config.migration_batch_size, 50);
        assert_eq!(config.secret_env, DEFAULT_SECRET_ENV);
        assert_eq!(config.pbkdf2_iterations, MIN_PBKDF2_ITERATIONS);
        assert_eq!(config.cors.allowed_origins, vec!["https://app.forprompt.dev"]);
        assert_eq!(config.cors.canonical_origin, "https://forprompt.dev");
        assert_eq!(config.rate_limit, RateLimitConfig::default());
    }

    #[test]
    fn rejects_weak_iteration_count() {
        let file = NamedTempFile::new().expect("temp file");
        fs::write(file.path(), br#"{"pbkdf2Iterations": 1000}"#).unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::WeakIterationCount(1000)));
    }
}
