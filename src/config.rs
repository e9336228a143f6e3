//! Configuration loading.
//!
//! [`DatabaseConfig`] is deserialized from the `database` section of
//! `config/config.toml`, with `GANTRY`-prefixed environment variables
//! layered on top (`GANTRY_DATABASE__URL` overrides `database.url`). Every
//! field has a default, so a partial section is enough.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Connection settings for [`SqliteConnection::connect`].
///
/// [`SqliteConnection::connect`]: crate::SqliteConnection::connect
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database location: `:memory:`, `sqlite::memory:`, `sqlite://<path>`
    /// or a bare filesystem path.
    #[serde(default = "default_db_url")]
    pub url: String,
    /// How long a statement waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_url() -> String {
    ":memory:".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    /// Load the database configuration from `config/config.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        // Read the TOML file (optional) and layer environment variables on top
        let builder = Config::builder()
            .add_source(File::with_name("config/config.toml").required(false))
            .add_source(Environment::with_prefix("GANTRY").separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // A present but unreadable file should not take the process down;
                // warn and retry with env vars only
                if std::path::Path::new("config/config.toml").exists() {
                    eprintln!(
                        "Warning: failed to load config file, falling back to env. Error: {}",
                        err
                    );
                }
                Config::builder()
                    .add_source(Environment::with_prefix("GANTRY").separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        let db_config: DatabaseConfig =
            settings.get::<DatabaseConfig>("database").map_err(|e| {
                ConfigError::Message(format!(
                    "Database configuration could not be loaded from file or environment: {}",
                    e
                ))
            })?;

        Ok(db_config)
    }
}
