//! Configuration options recognized by the core.
//!
//! Env-driven rather than a JSON file on disk, since a worker invocation has
//! no persistent data directory to read one from between invocations.

use std::env;
use std::time::Duration;

use crate::lmm_gateway::ModelName;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: ModelName,
    pub session_store_prefix: String,
    pub presign_ttl: Duration,
    pub max_presigned_url_video_bytes: u64,
    pub upload_poll_interval: Duration,
    pub upload_poll_timeout: Duration,
    pub triage_batch_size: usize,
    pub selection_batch_size: usize,
    pub short_video_threshold: Duration,
    pub context_cache_ttl: Duration,
    pub min_cache_tokens: u64,
    pub thumbnail_max_dim: u32,
}

impl EngineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            model: env::var("CURATION_MODEL")
                .ok()
                .and_then(|s| ModelName::parse(&s))
                .unwrap_or(ModelName::FastMultimodal),
            session_store_prefix: env::var("CURATION_SESSION_STORE_PREFIX")
                .unwrap_or_else(|_| "sessions/".to_string()),
            presign_ttl: Duration::from_secs(env_u64("CURATION_PRESIGN_TTL", 900)),
            max_presigned_url_video_bytes: env_u64(
                "CURATION_MAX_PRESIGNED_URL_VIDEO_BYTES",
                10 * 1024 * 1024,
            ),
            upload_poll_interval: Duration::from_secs(env_u64(
                "CURATION_UPLOAD_POLL_INTERVAL_SECS",
                5,
            )),
            upload_poll_timeout: Duration::from_secs(env_u64(
                "CURATION_UPLOAD_POLL_TIMEOUT_SECS",
                300,
            )),
            triage_batch_size: env_u64("CURATION_TRIAGE_BATCH_SIZE", 20) as usize,
            selection_batch_size: env_u64("CURATION_SELECTION_BATCH_SIZE", 20) as usize,
            short_video_threshold: Duration::from_secs(env_u64(
                "CURATION_SHORT_VIDEO_THRESHOLD_SECS",
                2,
            )),
            context_cache_ttl: Duration::from_secs(env_u64("CURATION_CONTEXT_CACHE_TTL_SECS", 3600)),
            min_cache_tokens: env_u64("CURATION_MIN_CACHE_TOKENS", 4096),
            thumbnail_max_dim: env_u64("CURATION_THUMBNAIL_MAX_DIM", 1024) as u32,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        // SAFETY: test-only, no concurrent env mutation in this process.
        for key in [
            "CURATION_MODEL",
            "CURATION_PRESIGN_TTL",
            "CURATION_TRIAGE_BATCH_SIZE",
        ] {
            env::remove_var(key);
        }

        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.presign_ttl, Duration::from_secs(900));
        assert_eq!(cfg.triage_batch_size, 20);
        assert_eq!(cfg.selection_batch_size, 20);
        assert_eq!(cfg.short_video_threshold, Duration::from_secs(2));
        assert_eq!(cfg.thumbnail_max_dim, 1024);
        assert!(matches!(cfg.model, ModelName::FastMultimodal));
    }
}
