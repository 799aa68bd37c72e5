use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Similarity knobs for the face pipeline. The defaults are the tuned
/// values the matching behavior was calibrated against; every one of them
/// can be overridden through the environment.
#[derive(Clone, Copy, Debug)]
pub struct ClusterParams {
    /// Minimum centroid similarity for joining an existing cluster.
    pub assign_threshold: f32,
    /// Minimum centroid similarity for folding two clusters together.
    pub merge_threshold: f32,
    /// Minimum mean similarity for naming a cluster after an enrolled user.
    pub identity_threshold: f32,
    /// Maximum cosine distance for a per-face user match.
    pub face_match_distance: f32,
    /// DBSCAN eps (cosine distance) for the backfill pass.
    pub recluster_eps: f32,
    /// DBSCAN minimum neighborhood size for the backfill pass.
    pub recluster_min_samples: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            assign_threshold: 0.65,
            merge_threshold: 0.72,
            identity_threshold: 0.72,
            face_match_distance: 0.6,
            recluster_eps: 0.32,
            recluster_min_samples: 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data: PathBuf,
    pub embed_api: String,
    pub embed_timeout: Duration,
    pub embed_retries: u32,
    pub embed_retry_delay: Duration,
    pub face_threads: usize,
    pub task_retries: u32,
    pub task_retry_delay: Duration,
    pub sweep_interval: Duration,
    pub params: ClusterParams,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let data = env::var("GATHER_DATA").unwrap_or_else(|_| "/gather-data".to_string());
        let embed_api =
            env::var("GATHER_EMBED_API").unwrap_or_else(|_| "http://127.0.0.1:8290".to_string());
        let defaults = ClusterParams::default();
        Self {
            data: PathBuf::from(data),
            embed_api,
            embed_timeout: Duration::from_secs(env_parse("GATHER_EMBED_TIMEOUT_SECS", 30u64)),
            embed_retries: env_parse("GATHER_EMBED_RETRIES", 3),
            embed_retry_delay: Duration::from_millis(env_parse("GATHER_EMBED_RETRY_DELAY_MS", 500u64)),
            face_threads: env_parse("GATHER_FACE_THREADS", 2),
            task_retries: env_parse("GATHER_TASK_RETRIES", 3),
            task_retry_delay: Duration::from_secs(env_parse("GATHER_TASK_RETRY_DELAY_SECS", 20u64)),
            sweep_interval: Duration::from_secs(env_parse("GATHER_SWEEP_INTERVAL_SECS", 300u64)),
            params: ClusterParams {
                assign_threshold: env_parse("GATHER_ASSIGN_THRESHOLD", defaults.assign_threshold),
                merge_threshold: env_parse("GATHER_MERGE_THRESHOLD", defaults.merge_threshold),
                identity_threshold: env_parse("GATHER_IDENTITY_THRESHOLD", defaults.identity_threshold),
                face_match_distance: env_parse("GATHER_FACE_MATCH_DISTANCE", defaults.face_match_distance),
                recluster_eps: env_parse("GATHER_RECLUSTER_EPS", defaults.recluster_eps),
                recluster_min_samples: env_parse("GATHER_RECLUSTER_MIN_SAMPLES", defaults.recluster_min_samples),
            },
        }
    }
}
