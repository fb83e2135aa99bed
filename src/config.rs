//! Runtime configuration for the upload core.
//!
//! Configuration *loading* mechanics (file formats, interactive wizards)
//! are an external collaborator per spec.md §1 — this module only defines
//! the shape of the config and loads it from environment variables,
//! grounded on the teacher's `Config::from_env` in `config.rs`.

use std::net::SocketAddr;
use std::time::Duration;

/// Object-store connection details. Two endpoints because ROUTE/PUC must be
/// able to hand out presigned URLs on either the internal network endpoint
/// or a browser-reachable public one (spec.md §4.1, §4.3).
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Endpoint reachable only from the service's own network. `None` means
    /// use the object-store SDK's default (real AWS S3).
    pub internal_endpoint: Option<String>,
    /// Endpoint reachable by browsers/clients directly, if configured (e.g.
    /// a CDN or public object-store endpoint). `None` disables the
    /// presigned-public route in ROUTE.
    pub public_endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Top-level service configuration (spec.md §6 "Required config").
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub object_store: ObjectStoreConfig,

    /// CDN_SAFE_LIMIT — declared_size at or below this routes to the public
    /// presigned path (default 100 MiB).
    pub large_file_threshold_bytes: u64,
    /// MAX_UPLOAD_BYTES — hard ceiling on any single upload (default 5 GiB).
    pub max_upload_bytes: u64,
    /// Single-part request policy cap — declared sizes above this require a
    /// multipart session regardless of CDN_SAFE_LIMIT or endpoint
    /// reachability (spec.md §4.3 row 3, default 1 GiB).
    pub single_part_max_bytes: u64,
    /// SESSION_TIMEOUT — multipart sessions idle longer than this are
    /// reaped (default 24h).
    pub session_timeout: Duration,
    /// UPLOAD_MAX_CONCURRENT_PROXY — ZMP concurrency-slot capacity (default 5).
    pub upload_max_concurrent_proxy: usize,
    /// UPLOAD_MAX_CONCURRENT — MSM admission-slot capacity (default 1, for
    /// constrained deployments).
    pub upload_max_concurrent: usize,
    /// BATCH_THRESHOLD — minimum batch size to emit batch-level
    /// notifications (default 2).
    pub batch_threshold: usize,
    /// Default presigned URL TTL (default 1h, bounded to [1min, 24h]).
    pub presigned_ttl: Duration,
    /// At most this many entries in a single `/upload/presigned-batch` call.
    pub batch_max: usize,
    /// Origins allowed through CORS for browser-reachable endpoints.
    pub cors_allowed_origins: Vec<String>,
    /// Override for tokio's blocking-thread pool size; `None` uses the
    /// runtime default.
    pub blocking_threads: Option<usize>,
}

fn default_large_file_threshold_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_upload_bytes() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_single_part_max_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_upload_max_concurrent_proxy() -> usize {
    5
}

fn default_upload_max_concurrent() -> usize {
    1
}

fn default_batch_threshold() -> usize {
    2
}

fn default_presigned_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_batch_max() -> usize {
    50
}

/// Lower/upper bound for a presigned URL TTL (spec.md §4.1: "TTL is bounded
/// to [1 min, 24 h]").
pub const PRESIGNED_TTL_MIN: Duration = Duration::from_secs(60);
pub const PRESIGNED_TTL_MAX: Duration = Duration::from_secs(24 * 60 * 60);

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            internal_endpoint: None,
            public_endpoint: None,
            bucket: "uploads".to_string(),
            region: "us-east-1".to_string(),
            force_path_style: true,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            object_store: ObjectStoreConfig::default(),
            large_file_threshold_bytes: default_large_file_threshold_bytes(),
            max_upload_bytes: default_max_upload_bytes(),
            single_part_max_bytes: default_single_part_max_bytes(),
            session_timeout: default_session_timeout(),
            upload_max_concurrent_proxy: default_upload_max_concurrent_proxy(),
            upload_max_concurrent: default_upload_max_concurrent(),
            batch_threshold: default_batch_threshold(),
            presigned_ttl: default_presigned_ttl(),
            batch_max: default_batch_max(),
            cors_allowed_origins: vec!["*".to_string()],
            blocking_threads: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("UPLOADER_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        config.object_store.internal_endpoint = std::env::var("UPLOADER_S3_INTERNAL_ENDPOINT").ok();
        config.object_store.public_endpoint = std::env::var("UPLOADER_S3_PUBLIC_ENDPOINT").ok();
        if let Ok(bucket) = std::env::var("UPLOADER_S3_BUCKET") {
            config.object_store.bucket = bucket;
        }
        if let Ok(region) = std::env::var("UPLOADER_S3_REGION") {
            config.object_store.region = region;
        }
        if let Ok(fps) = std::env::var("UPLOADER_S3_FORCE_PATH_STYLE") {
            config.object_store.force_path_style = fps == "true" || fps == "1";
        }
        config.object_store.access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
        config.object_store.secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();

        if let Ok(v) = std::env::var("UPLOADER_LARGE_FILE_THRESHOLD_BYTES") {
            if let Ok(parsed) = v.parse() {
                config.large_file_threshold_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_MAX_UPLOAD_BYTES") {
            if let Ok(parsed) = v.parse() {
                config.max_upload_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_SINGLE_PART_MAX_BYTES") {
            if let Ok(parsed) = v.parse() {
                config.single_part_max_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_SESSION_TIMEOUT") {
            if let Ok(parsed) = humantime::parse_duration(&v) {
                config.session_timeout = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_MAX_CONCURRENT_PROXY") {
            if let Ok(parsed) = v.parse() {
                config.upload_max_concurrent_proxy = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_MAX_CONCURRENT") {
            if let Ok(parsed) = v.parse() {
                config.upload_max_concurrent = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_BATCH_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                config.batch_threshold = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_PRESIGNED_TTL") {
            if let Ok(parsed) = humantime::parse_duration(&v) {
                config.presigned_ttl = parsed.clamp(PRESIGNED_TTL_MIN, PRESIGNED_TTL_MAX);
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_BATCH_MAX") {
            if let Ok(parsed) = v.parse() {
                config.batch_max = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOADER_CORS_ALLOWED_ORIGINS") {
            config.cors_allowed_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("UPLOADER_BLOCKING_THREADS") {
            if let Ok(parsed) = v.parse() {
                config.blocking_threads = Some(parsed);
            }
        }

        config
    }

    /// Whether a public, browser-reachable endpoint is configured (gates
    /// the presigned-public ROUTE branch).
    pub fn has_public_endpoint(&self) -> bool {
        self.object_store.public_endpoint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.large_file_threshold_bytes, 100 * 1024 * 1024);
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.single_part_max_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.upload_max_concurrent_proxy, 5);
        assert_eq!(config.upload_max_concurrent, 1);
        assert_eq!(config.batch_threshold, 2);
        assert_eq!(config.batch_max, 50);
        assert_eq!(config.presigned_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn presigned_ttl_env_is_clamped() {
        std::env::set_var("UPLOADER_PRESIGNED_TTL", "48h");
        let config = Config::from_env();
        assert_eq!(config.presigned_ttl, PRESIGNED_TTL_MAX);
        std::env::remove_var("UPLOADER_PRESIGNED_TTL");
    }
}
