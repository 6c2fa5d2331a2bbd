//! Configuration for the pixeltriage core, loaded from environment
//! variables with defaults (teacher precedent: `mcp-agent-mail-core::config`'s
//! layered env/default approach, scaled down to this repo's surface).

use std::path::PathBuf;
use std::time::Duration;

/// `AM_`-style prefix for this repo's env vars.
const ENV_PREFIX: &str = "PIXELTRIAGE_";

fn env_value(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_value(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_value(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env_value(key).map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// Top-level configuration. Every field has a documented default so the
/// process can start with zero configuration, no setup required.
#[derive(Debug, Clone)]
pub struct Config {
    /// Analyzer poll interval (spec §4.1 "Loop"). Default 60s.
    pub poll_interval: Duration,
    /// Number of master-cache shards for the ExpectationsStore read path
    /// (spec §4.2, §9 "Fixed key-space sharding"). Default 32.
    pub expectations_master_shards: usize,
    /// Number of shards for a per-CL overlay read (spec §4.2). Default 4.
    pub expectations_cl_shards: usize,
    /// Canonical bound on writes per backend transaction (spec §4.2 step
    /// 3: `2*batchSize + 1 <= maxDocsPerTransaction`). Default 500.
    pub max_docs_per_transaction: usize,
    /// Upper bound on a single durable operation's retry budget (spec
    /// §4.2, §5). Default 120s.
    pub max_operation_time: Duration,
    /// Base delay before a failed snapshot shard reconnects (spec §4.2
    /// read path). Default 30s.
    pub snapshot_recover_time: Duration,
    /// Fixed DiffStore worker-pool size (spec §4.3). Default 2000.
    pub diffstore_worker_count: usize,
    /// Max attempts per digest download (spec §4.3). Default 4.
    pub max_uri_get_tries: u32,
    /// Root directory for DiffStore's on-disk artifact layout (spec §6).
    pub diffstore_base_dir: PathBuf,
    /// Max entries held in the in-memory `DiffMetrics` LRU.
    pub diffstore_lru_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_u64("POLL_INTERVAL_SECS", 60)),
            expectations_master_shards: env_usize("EXPECTATIONS_MASTER_SHARDS", 32),
            expectations_cl_shards: env_usize("EXPECTATIONS_CL_SHARDS", 4),
            max_docs_per_transaction: env_usize("MAX_DOCS_PER_TRANSACTION", 500),
            max_operation_time: Duration::from_secs(env_u64("MAX_OPERATION_TIME_SECS", 120)),
            snapshot_recover_time: Duration::from_secs(env_u64("SNAPSHOT_RECOVER_TIME_SECS", 30)),
            diffstore_worker_count: env_usize("DIFFSTORE_WORKER_COUNT", 2000),
            max_uri_get_tries: u32::try_from(env_usize("MAX_URI_GET_TRIES", 4)).unwrap_or(4),
            diffstore_base_dir: env_path("DIFFSTORE_BASE_DIR", "./diffstore-data"),
            diffstore_lru_capacity: env_usize("DIFFSTORE_LRU_CAPACITY", 16_384),
        }
    }
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // SAFETY-free: no process-wide env mutation here, just asserting
        // the documented defaults hold when no override is set.
        let cfg = Config::default();
        assert_eq!(cfg.expectations_master_shards, 32);
        assert_eq!(cfg.expectations_cl_shards, 4);
        assert_eq!(cfg.max_docs_per_transaction, 500);
        assert_eq!(cfg.diffstore_worker_count, 2000);
        assert_eq!(cfg.max_uri_get_tries, 4);
    }
}
