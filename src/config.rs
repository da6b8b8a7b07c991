use std::path::{Path, PathBuf};

use chrono::Duration;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mongodb::Client as MongoClient;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::MongoStore;

/// File the configuration is read from, relative to the working directory.
pub const CONFIG_FILE: &str = "Palmvote.toml";

/// Prefix of environment variables that override the configuration file.
pub const ENV_PREFIX: &str = "PALMVOTE_";

/// Application configuration, derived from `Palmvote.toml` and `PALMVOTE_*`
/// environment variables on top of built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // non-secrets
    receipt_dir: PathBuf,
    receipt_retry_secs: u32,
    receipt_max_attempts: u32,
    db_name: String,
    // secrets
    db_uri: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            receipt_dir: PathBuf::from("receipts"),
            receipt_retry_secs: 300,
            receipt_max_attempts: 5,
            db_name: "palmvote".to_string(),
            db_uri: None,
        }
    }
}

impl Config {
    /// The layered configuration sources: defaults, then file, then environment.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the configuration from the standard sources.
    pub fn load() -> Result<Self> {
        Self::from_figment(&Self::figment())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }

    /// Directory rendered receipts are written to.
    /// Configured via `RECEIPT_DIR`.
    pub fn receipt_dir(&self) -> &Path {
        &self.receipt_dir
    }

    /// Delay before a failed receipt is rendered again.
    /// Configured via `RECEIPT_RETRY_SECS`.
    pub fn receipt_retry_interval(&self) -> Duration {
        Duration::seconds(self.receipt_retry_secs.into())
    }

    /// Number of failed renders after which a receipt is given up on.
    /// Configured via `RECEIPT_MAX_ATTEMPTS`.
    pub fn receipt_max_attempts(&self) -> u32 {
        self.receipt_max_attempts
    }

    /// Database connection settings.
    /// Configured via `DB_URI` and `DB_NAME`; fails if no URI is set.
    pub fn db(&self) -> Result<DbConfig> {
        let db_uri = self
            .db_uri
            .clone()
            .ok_or_else(|| figment::Error::from("`db_uri` not set".to_string()))?;
        Ok(DbConfig {
            db_uri,
            db_name: self.db_name.clone(),
        })
    }
}

/// Configuration for the database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    db_uri: String,
    db_name: String,
}

impl DbConfig {
    pub fn new(db_uri: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            db_uri: db_uri.into(),
            db_name: db_name.into(),
        }
    }

    /// A config for the given server with a random database name,
    /// to avoid collisions between tests.
    #[cfg(test)]
    pub(crate) fn for_tests(db_uri: impl Into<String>) -> Self {
        let random: u32 = rand::random();
        let db_name = format!("test{random}");
        info!("Using database {db_name}");
        Self::new(db_uri, db_name)
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Connect to the database, ensure the required indexes exist, and wrap
    /// the result up as a store.
    pub async fn connect(&self) -> Result<MongoStore> {
        info!("Connecting to database {}...", self.db_name);
        let client = MongoClient::with_uri_str(&self.db_uri).await?;
        let db = client.database(&self.db_name);
        let store = MongoStore::new(client, db).await?;
        info!("...database connection online!");
        Ok(store)
    }
}
