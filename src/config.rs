//! Layered configuration.
//!
//! Files are read in precedence order (explicit path, `SNACKTRACK_CONFIG`,
//! `~/.config/snacktrack.toml`, `./snacktrack.toml`) and the first file that
//! sets a field wins. Environment variables (including a `.env` file) then
//! override whatever the files set.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::DbError;
use crate::query::{DuplicateKeys, OperatorPolicy, TranslateOptions};

pub const DEFAULT_DATABASE: &str = "snack-track";
pub const DEFAULT_USERS_COLLECTION: &str = "users";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub mongo_uri: Option<String>,
    pub database: String,
    pub users_collection: String,
    pub strict_operators: bool,
    pub duplicate_filter_keys: DuplicateKeys,
    pub timeout_ms: Option<u64>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: None,
            database: DEFAULT_DATABASE.to_string(),
            users_collection: DEFAULT_USERS_COLLECTION.to_string(),
            strict_operators: false,
            duplicate_filter_keys: DuplicateKeys::default(),
            timeout_ms: None,
            log_dir: None,
            log_level: None,
        }
    }
}

/// One config file; every field optional so layers can be merged.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    mongo_uri: Option<String>,
    database: Option<String>,
    users_collection: Option<String>,
    strict_operators: Option<bool>,
    duplicate_filter_keys: Option<DuplicateKeys>,
    timeout_ms: Option<u64>,
    log_dir: Option<PathBuf>,
    log_level: Option<String>,
}

impl FileConfig {
    fn fill_from(&mut self, other: Self) {
        self.mongo_uri = self.mongo_uri.take().or(other.mongo_uri);
        self.database = self.database.take().or(other.database);
        self.users_collection = self.users_collection.take().or(other.users_collection);
        self.strict_operators = self.strict_operators.or(other.strict_operators);
        self.duplicate_filter_keys = self.duplicate_filter_keys.or(other.duplicate_filter_keys);
        self.timeout_ms = self.timeout_ms.or(other.timeout_ms);
        self.log_dir = self.log_dir.take().or(other.log_dir);
        self.log_level = self.log_level.take().or(other.log_level);
    }
}

fn parse_bool(key: &str, s: &str) -> Result<bool, DbError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DbError::Config(format!("{key}: expected a boolean, got {other:?}"))),
    }
}

/// Candidate config files, highest precedence first.
#[must_use]
pub fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = explicit {
        paths.push(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("SNACKTRACK_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Some(home) = dirs_next::home_dir() {
        paths.push(home.join(".config").join("snacktrack.toml"));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join("snacktrack.toml"));
    }
    paths
}

impl Config {
    /// Loads `.env`, the config files and the process environment.
    ///
    /// # Errors
    /// An explicit path that does not exist, unreadable or malformed files,
    /// and malformed environment values.
    pub fn load(explicit: Option<&Path>) -> Result<Self, DbError> {
        if let Some(p) = explicit
            && !p.exists()
        {
            return Err(DbError::Config(format!("config file not found: {}", p.display())));
        }
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("loaded environment from {}", path.display());
        }
        Self::from_sources(&config_paths(explicit), |k| std::env::var(k).ok())
    }

    /// Merges `files` (highest precedence first, missing ones skipped), then
    /// applies overrides read through `env`.
    ///
    /// # Errors
    /// Unreadable or malformed files and malformed environment values.
    pub fn from_sources<F>(files: &[PathBuf], env: F) -> Result<Self, DbError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = FileConfig::default();
        for path in files {
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let layer: FileConfig = toml::from_str(&text)
                .map_err(|e| DbError::Config(format!("{}: {e}", path.display())))?;
            log::debug!("config layer {}", path.display());
            merged.fill_from(layer);
        }

        let defaults = Self::default();
        let mut cfg = Self {
            mongo_uri: merged.mongo_uri,
            database: merged.database.unwrap_or(defaults.database),
            users_collection: merged.users_collection.unwrap_or(defaults.users_collection),
            strict_operators: merged.strict_operators.unwrap_or(defaults.strict_operators),
            duplicate_filter_keys: merged.duplicate_filter_keys.unwrap_or(defaults.duplicate_filter_keys),
            timeout_ms: merged.timeout_ms,
            log_dir: merged.log_dir,
            log_level: merged.log_level,
        };

        if let Some(uri) = env("MONGO_CONNECTION_URI") {
            cfg.mongo_uri = Some(uri);
        }
        if let Some(db) = env("SNACKTRACK_DATABASE") {
            cfg.database = db;
        }
        if let Some(s) = env("SNACKTRACK_STRICT") {
            cfg.strict_operators = parse_bool("SNACKTRACK_STRICT", &s)?;
        }
        if let Some(s) = env("SNACKTRACK_TIMEOUT_MS") {
            let ms = s
                .trim()
                .parse::<u64>()
                .map_err(|e| DbError::Config(format!("SNACKTRACK_TIMEOUT_MS: {e}")))?;
            cfg.timeout_ms = Some(ms);
        }
        Ok(cfg)
    }

    #[must_use]
    pub fn translate_options(&self) -> TranslateOptions {
        TranslateOptions {
            operators: if self.strict_operators { OperatorPolicy::Strict } else { OperatorPolicy::Lenient },
            duplicate_keys: self.duplicate_filter_keys,
        }
    }

    /// The connection string, required by the MongoDB backend.
    ///
    /// # Errors
    /// `DbError::Config` when no URI was configured.
    pub fn require_mongo_uri(&self) -> Result<&str, DbError> {
        self.mongo_uri
            .as_deref()
            .ok_or_else(|| DbError::Config("MONGO_CONNECTION_URI is not set".into()))
    }
}
