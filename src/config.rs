//! Environment-driven configuration
//!
//! The engine recognizes a fixed set of environment keys; everything else is
//! compiled-in. `CLASSIFIER_MODEL_PATH` is the only key whose absence changes
//! runtime behavior: the service starts degraded and predict endpoints
//! return 503 until the artifact is configured.

use std::path::PathBuf;

pub const DEFAULT_EMBEDDING_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_PREDICTION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PARSER_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_QUEUE_WAIT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_CONCURRENT_PREDICTIONS: usize = 6;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4850";
pub const DEFAULT_DATA_DIR: &str = ".shortlist-engine";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base directory for everything the engine writes (database, log,
    /// uploads) unless an explicit override points elsewhere
    pub data_dir: PathBuf,
    /// Path to the serialized classifier artifact. None = degraded service.
    pub classifier_model_path: Option<PathBuf>,
    /// Identifier of the sentence-embedding model the embedding worker loads
    pub embedding_model_id: String,
    /// Wall-clock budget for one classifier call
    pub prediction_timeout_ms: u64,
    /// Wall-clock budget for one resume-parser run
    pub parser_timeout_ms: u64,
    /// Wall-clock budget for one embedding call
    pub embedding_timeout_ms: u64,
    /// Debugging switch: bypass the per-job embedding cache entirely
    pub embedding_cache_disabled: bool,
    /// SQLite database file; defaults to the app data directory
    pub database_path: Option<PathBuf>,
    /// Directory uploaded resume files are stored in
    pub upload_dir: Option<PathBuf>,
    pub bind_addr: String,
    /// Size of the prediction admission pool
    pub max_concurrent_predictions: usize,
    /// How long a request may wait for a pool permit before failing
    pub queue_wait_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            classifier_model_path: None,
            embedding_model_id: DEFAULT_EMBEDDING_MODEL_ID.to_string(),
            prediction_timeout_ms: DEFAULT_PREDICTION_TIMEOUT_MS,
            parser_timeout_ms: DEFAULT_PARSER_TIMEOUT_MS,
            embedding_timeout_ms: DEFAULT_EMBEDDING_TIMEOUT_MS,
            embedding_cache_disabled: false,
            database_path: None,
            upload_dir: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_concurrent_predictions: DEFAULT_MAX_CONCURRENT_PREDICTIONS,
            queue_wait_timeout_ms: DEFAULT_QUEUE_WAIT_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env_path("DATA_DIR").unwrap_or(defaults.data_dir),
            classifier_model_path: env_path("CLASSIFIER_MODEL_PATH"),
            embedding_model_id: env_string("EMBEDDING_MODEL_ID")
                .unwrap_or(defaults.embedding_model_id),
            prediction_timeout_ms: env_u64("PREDICTION_TIMEOUT_MS")
                .unwrap_or(defaults.prediction_timeout_ms),
            parser_timeout_ms: env_u64("PARSER_TIMEOUT_MS").unwrap_or(defaults.parser_timeout_ms),
            embedding_timeout_ms: env_u64("EMBEDDING_TIMEOUT_MS")
                .unwrap_or(defaults.embedding_timeout_ms),
            embedding_cache_disabled: env_bool("EMBEDDING_CACHE_DISABLED"),
            database_path: env_path("DATABASE_PATH"),
            upload_dir: env_path("UPLOAD_DIR"),
            bind_addr: env_string("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_concurrent_predictions: env_u64("MAX_CONCURRENT_PREDICTIONS")
                .map(|n| (n as usize).max(1))
                .unwrap_or(defaults.max_concurrent_predictions),
            queue_wait_timeout_ms: defaults.queue_wait_timeout_ms,
        }
    }

    /// Database file: explicit override, else `<data_dir>/shortlist.db`
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("shortlist.db"))
    }

    /// Upload directory: explicit override, else `<data_dir>/uploads`
    pub fn resolved_upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("uploads"))
    }

    /// Log file lives next to the database
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("shortlist-engine.log")
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_u64(key: &str) -> Option<u64> {
    match env_string(key) {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("[Config] Ignoring unparseable value for {}: {}", key, raw);
                None
            }
        },
        None => None,
    }
}

fn env_bool(key: &str) -> bool {
    match env_string(key) {
        Some(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        None => false,
    }
}
