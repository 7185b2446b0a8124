//! Configuration loaded once at startup.
//!
//! All knobs live in a single immutable [`Settings`] value. Environment
//! variables are read at construction time only; nothing re-reads the
//! environment afterwards.

use std::path::PathBuf;

/// Remote embedding provider settings.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// Model identifier sent to the provider.
    pub model: String,
    /// API key. `None` disables the remote path entirely.
    pub api_key: Option<String>,
    /// Provider endpoint URL.
    pub endpoint: String,
    /// Whether the deterministic local encoder may stand in on failure.
    pub fallback_enabled: bool,
    /// Identifier recorded for fallback-produced vectors.
    pub fallback_model: String,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Maximum retry attempts after a rate-limit response.
    pub max_retries: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "voyage-code-3".to_string(),
            api_key: None,
            endpoint: "https://api.voyageai.com/v1/embeddings".to_string(),
            fallback_enabled: true,
            fallback_model: "loci-hash-v1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
        }
    }
}

/// Embedding cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Hard maximum entry count for the LRU layer.
    pub max_entries: usize,
    /// Entries older than this are treated as absent.
    pub ttl_days: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_days: 30,
        }
    }
}

/// Normalizer settings.
#[derive(Debug, Clone)]
pub struct NormalizerSettings {
    /// Cosine similarity at which two memories count as duplicates.
    pub conflict_threshold: f32,
    /// Days a soft-deleted memory is retained before cleanup.
    pub soft_delete_retention_days: i64,
    /// Upper bound on snapshot size; normalization refuses beyond this.
    pub max_snapshot_entries: usize,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            conflict_threshold: 0.95,
            soft_delete_retention_days: 30,
            max_snapshot_entries: 100_000,
        }
    }
}

/// Sync drainer settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Seconds between drainer passes.
    pub interval_seconds: u64,
    /// Pending entries processed per pass.
    pub batch_size: usize,
    /// Attempts before a pending entry is marked failed.
    pub max_retries: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            batch_size: 50,
            max_retries: 3,
        }
    }
}

/// Query engine settings.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// Result limit applied when the caller gives none.
    pub default_limit: usize,
    /// Silent clamp for caller-supplied limits.
    pub max_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

/// Immutable process-wide configuration.
///
/// `project_id` cannot change after startup; switching projects means
/// restarting the server with different arguments.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project identifier, immutable after start.
    pub project_id: String,
    /// Containment root for all tool-supplied paths.
    pub project_path: PathBuf,
    /// Where the store databases live. `None` keeps both stores in memory.
    pub data_dir: Option<PathBuf>,
    pub embedding: EmbeddingSettings,
    pub cache: CacheSettings,
    pub normalizer: NormalizerSettings,
    pub sync: SyncSettings,
    pub query: QuerySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            project_path: PathBuf::from("."),
            data_dir: None,
            embedding: EmbeddingSettings::default(),
            cache: CacheSettings::default(),
            normalizer: NormalizerSettings::default(),
            sync: SyncSettings::default(),
            query: QuerySettings::default(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

impl Settings {
    /// Load settings from `LOCI_*` environment variables on top of defaults.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();

        if let Some(v) = env_var("LOCI_PROJECT_ID") {
            settings.project_id = v;
        }
        if let Some(v) = env_var("LOCI_PROJECT_PATH") {
            settings.project_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("LOCI_DATA_DIR") {
            settings.data_dir = Some(PathBuf::from(v));
        }

        if let Some(v) = env_var("LOCI_EMBEDDING_MODEL") {
            settings.embedding.model = v;
        }
        settings.embedding.api_key = env_var("LOCI_EMBEDDING_API_KEY");
        if let Some(v) = env_var("LOCI_EMBEDDING_ENDPOINT") {
            settings.embedding.endpoint = v;
        }
        if let Some(v) = env_parse::<bool>("LOCI_EMBEDDING_FALLBACK_ENABLED") {
            settings.embedding.fallback_enabled = v;
        }
        if let Some(v) = env_var("LOCI_EMBEDDING_FALLBACK_MODEL") {
            settings.embedding.fallback_model = v;
        }

        if let Some(v) = env_parse("LOCI_CACHE_MAX_ENTRIES") {
            settings.cache.max_entries = v;
        }
        if let Some(v) = env_parse("LOCI_CACHE_TTL_DAYS") {
            settings.cache.ttl_days = v;
        }

        if let Some(v) = env_parse("LOCI_CONFLICT_THRESHOLD") {
            settings.normalizer.conflict_threshold = v;
        }
        if let Some(v) = env_parse("LOCI_SOFT_DELETE_RETENTION_DAYS") {
            settings.normalizer.soft_delete_retention_days = v;
        }
        if let Some(v) = env_parse("LOCI_MAX_SNAPSHOT_ENTRIES") {
            settings.normalizer.max_snapshot_entries = v;
        }

        if let Some(v) = env_parse("LOCI_SYNC_INTERVAL_SECONDS") {
            settings.sync.interval_seconds = v;
        }
        if let Some(v) = env_parse("LOCI_SYNC_BATCH_SIZE") {
            settings.sync.batch_size = v;
        }

        settings
    }
}
