//! Connection configuration.
//!
//! A [`ConnectConfig`] can be built in code, read from a TOML file or
//! taken from `LEMKPG_DB_*` environment variables:
//!
//! ```toml
//! [postgres]
//! db_name = "demo_db"
//! db_user = "postgres"
//! db_password = "pass"
//! db_host = "127.0.0.1"
//! db_port = 5432
//!
//! [postgres.pool]
//! max_connections = 5
//! acquire_timeout_ms = 30000
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

use crate::error::{LemkPgError, LemkPgResult};

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "lemkpg.toml";

pub const DEFAULT_PORT: u16 = 5432;

/// Connection parameters held by a client for its whole lifetime.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectConfig {
    pub db_name: String,
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default = "default_host")]
    pub db_host: String,
    #[serde(default = "default_port")]
    pub db_port: u16,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Settings handed to the driver's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    fn validate(&self) -> LemkPgResult<()> {
        if self.max_connections == 0 {
            return Err(LemkPgError::Config("max_connections must be at least 1".to_string()));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(LemkPgError::Config(
                "acquire_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

#[derive(Deserialize)]
struct ConfigFile {
    postgres: ConnectConfig,
}

impl ConnectConfig {
    /// Create a configuration on the default port.
    ///
    /// ```
    /// use lemkpg::ConnectConfig;
    ///
    /// let config = ConnectConfig::new("demo_db", "pass", "postgres", "127.0.0.1");
    /// assert_eq!(
    ///     config.dsn(),
    ///     "dbname=demo_db user=postgres password=pass host=127.0.0.1 port=5432"
    /// );
    /// ```
    pub fn new(
        db_name: impl Into<String>,
        db_password: impl Into<String>,
        db_user: impl Into<String>,
        db_host: impl Into<String>,
    ) -> Self {
        Self {
            db_name: db_name.into(),
            db_user: db_user.into(),
            db_password: db_password.into(),
            db_host: db_host.into(),
            db_port: DEFAULT_PORT,
            pool: PoolConfig::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.db_port = port;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.pool.max_connections = max_connections;
        self
    }

    /// Millisecond precision; anything shorter than 1ms becomes 1ms.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool.acquire_timeout_ms = u64::try_from(timeout.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        self
    }

    /// libpq keyword/value connection string.
    pub fn dsn(&self) -> String {
        self.dsn_with_password(&self.db_password)
    }

    /// [`dsn`](Self::dsn) with the password masked, for logs.
    pub fn redacted_dsn(&self) -> String {
        self.dsn_with_password("***")
    }

    fn dsn_with_password(&self, password: &str) -> String {
        format!(
            "dbname={} user={} password={} host={} port={}",
            self.db_name, self.db_user, password, self.db_host, self.db_port
        )
    }

    /// Driver options for this configuration.
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .username(&self.db_user)
            .database(&self.db_name);
        if self.db_password.is_empty() {
            options
        } else {
            options.password(&self.db_password)
        }
    }

    /// Parse the `[postgres]` table of a TOML document.
    pub fn from_toml(content: &str) -> LemkPgResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| LemkPgError::Config(e.to_string()))?;
        file.postgres.pool.validate()?;
        Ok(file.postgres)
    }

    /// Read a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> LemkPgResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LemkPgError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Find and load a configuration file.
    ///
    /// An explicit `path` must exist. Otherwise `./lemkpg.toml` and then
    /// `<config dir>/lemkpg/config.toml` are tried; `None` when neither exists.
    pub fn discover(path: Option<&Path>) -> LemkPgResult<Option<Self>> {
        Self::discover_in(path, &Self::search_paths())
    }

    fn discover_in(path: Option<&Path>, candidates: &[PathBuf]) -> LemkPgResult<Option<Self>> {
        if let Some(path) = path {
            return Self::load(path).map(Some);
        }
        match candidates.iter().find(|candidate| candidate.exists()) {
            Some(candidate) => Self::load(candidate).map(Some),
            None => Ok(None),
        }
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("lemkpg").join("config.toml"));
        }
        paths
    }

    /// Build from `LEMKPG_DB_NAME`, `LEMKPG_DB_USER`, `LEMKPG_DB_PASSWORD`,
    /// `LEMKPG_DB_HOST` and `LEMKPG_DB_PORT`. Name and user are required.
    pub fn from_env() -> LemkPgResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay whichever `LEMKPG_DB_*` variables are set.
    pub fn apply_env(&mut self) -> LemkPgResult<()> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> LemkPgResult<Self> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| LemkPgError::Config(format!("{} is not set", key)))
        };
        let mut config = Self::new(
            required("LEMKPG_DB_NAME")?,
            String::new(),
            required("LEMKPG_DB_USER")?,
            default_host(),
        );
        config.apply_lookup(&lookup)?;
        Ok(config)
    }

    fn apply_lookup(&mut self, lookup: impl Fn(&str) -> Option<String>) -> LemkPgResult<()> {
        if let Some(v) = lookup("LEMKPG_DB_NAME") {
            self.db_name = v;
        }
        if let Some(v) = lookup("LEMKPG_DB_USER") {
            self.db_user = v;
        }
        if let Some(v) = lookup("LEMKPG_DB_PASSWORD") {
            self.db_password = v;
        }
        if let Some(v) = lookup("LEMKPG_DB_HOST") {
            self.db_host = v;
        }
        if let Some(v) = lookup("LEMKPG_DB_PORT") {
            self.db_port = v
                .parse()
                .map_err(|_| LemkPgError::Config(format!("LEMKPG_DB_PORT is not a port: '{}'", v)))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &"***")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("pool", &self.pool)
            .finish()
    }
}
