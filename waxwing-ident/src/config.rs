//! Engine configuration
//!
//! A read-only snapshot taken per batch run. Values resolve from the common
//! TOML config with environment-variable overrides for credentials; anything
//! unset falls back to compiled defaults.

use crate::types::TieBreak;
use std::path::PathBuf;
use tracing::warn;
use waxwing_common::config::TomlConfig;

/// Environment override for the fingerprint lookup credential
pub const LOOKUP_API_KEY_ENV: &str = "WAXWING_LOOKUP_API_KEY";

/// Remote fingerprint lookup settings
#[derive(Debug, Clone)]
pub struct FingerprintLookupConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for FingerprintLookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.acoustid.org/v2/lookup".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Local spectral comparison settings
#[derive(Debug, Clone)]
pub struct SpectralConfig {
    pub enabled: bool,
    /// JSON reference index of labeled feature vectors; missing index means
    /// the adapter always reports a negative result
    pub index_path: Option<PathBuf>,
    pub min_similarity: f64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_path: None,
            min_similarity: 0.6,
        }
    }
}

/// Remote metadata enrichment settings
#[derive(Debug, Clone)]
pub struct MetadataEnrichConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for MetadataEnrichConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://musicbrainz.org/ws/2/recording".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Cache sizing and persistence
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// SQLite file; `None` runs memory-only
    pub path: Option<PathBuf>,
    pub max_entries: usize,
    pub max_age_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_entries: 50_000,
            max_age_days: 180,
        }
    }
}

/// Read-only configuration snapshot for one batch run
#[derive(Debug, Clone)]
pub struct IdentifyConfig {
    /// Minimum confidence to short-circuit remaining adapters
    pub acceptance_threshold: f64,
    /// Minimum confidence below which a candidate is discarded
    pub usefulness_floor: f64,
    /// Bound on concurrently processed files
    pub worker_limit: usize,
    /// Attempts per adapter before a transient error reads as no-match
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub tie_break: TieBreak,
    pub fingerprint_lookup: FingerprintLookupConfig,
    pub spectral: SpectralConfig,
    pub metadata_enrich: MetadataEnrichConfig,
    pub cache: CacheConfig,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.85,
            usefulness_floor: 0.25,
            worker_limit: 4,
            max_attempts: 3,
            backoff_base_ms: 250,
            backoff_cap_ms: 5_000,
            tie_break: TieBreak::default(),
            fingerprint_lookup: FingerprintLookupConfig::default(),
            spectral: SpectralConfig::default(),
            metadata_enrich: MetadataEnrichConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl IdentifyConfig {
    /// Build a snapshot from the TOML config plus environment overrides
    pub fn from_toml(toml: &TomlConfig) -> Self {
        let mut config = Self::default();
        let id = &toml.identify;

        if let Some(v) = id.acceptance_threshold {
            config.acceptance_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = id.usefulness_floor {
            config.usefulness_floor = v.clamp(0.0, 1.0);
        }
        if config.usefulness_floor > config.acceptance_threshold {
            warn!(
                floor = config.usefulness_floor,
                threshold = config.acceptance_threshold,
                "usefulness floor above acceptance threshold, clamping floor"
            );
            config.usefulness_floor = config.acceptance_threshold;
        }
        if let Some(v) = id.worker_limit {
            config.worker_limit = v.max(1);
        }
        if let Some(v) = id.max_attempts {
            config.max_attempts = v.max(1);
        }
        if let Some(v) = id.backoff_base_ms {
            config.backoff_base_ms = v;
        }
        if let Some(v) = id.backoff_cap_ms {
            config.backoff_cap_ms = v;
        }
        if let Some(v) = id.tie_break.as_deref() {
            config.tie_break = match v {
                "latest-adapter" => TieBreak::LatestAdapter,
                "source-priority" => TieBreak::SourcePriority,
                other => {
                    warn!(value = other, "unknown tie_break value, using source-priority");
                    TieBreak::SourcePriority
                }
            };
        }

        if let Some(v) = id.lookup_enabled {
            config.fingerprint_lookup.enabled = v;
        }
        if let Some(v) = id.lookup_endpoint.clone() {
            config.fingerprint_lookup.endpoint = v;
        }
        if let Some(v) = id.lookup_api_key.clone() {
            config.fingerprint_lookup.api_key = v;
        }
        if let Some(v) = id.lookup_timeout_secs {
            config.fingerprint_lookup.timeout_secs = v;
        }
        // Environment wins over TOML for credentials
        if let Ok(key) = std::env::var(LOOKUP_API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.fingerprint_lookup.api_key = key;
            }
        }

        if let Some(v) = id.spectral_enabled {
            config.spectral.enabled = v;
        }
        if let Some(v) = id.spectral_index_path.clone() {
            config.spectral.index_path = Some(PathBuf::from(v));
        }
        if let Some(v) = id.spectral_min_similarity {
            config.spectral.min_similarity = v.clamp(0.0, 1.0);
        }

        if let Some(v) = id.enrich_enabled {
            config.metadata_enrich.enabled = v;
        }
        if let Some(v) = id.enrich_endpoint.clone() {
            config.metadata_enrich.endpoint = v;
        }
        if let Some(v) = id.enrich_timeout_secs {
            config.metadata_enrich.timeout_secs = v;
        }

        if let Some(v) = toml.cache_path.clone() {
            config.cache.path = Some(PathBuf::from(v));
        }
        if let Some(v) = id.cache_max_entries {
            config.cache.max_entries = v.max(1);
        }
        if let Some(v) = id.cache_max_age_days {
            config.cache.max_age_days = v.max(1);
        }

        config
    }

    /// Version stamp for cache invalidation
    ///
    /// Encodes the enabled adapter set and each adapter's algorithm version;
    /// cache entries written under a different stamp read as misses.
    pub fn adapter_versions(&self) -> String {
        let mut parts = Vec::new();
        if self.fingerprint_lookup.enabled {
            parts.push(format!("lookup/{}", crate::sources::fingerprint_lookup::ADAPTER_VERSION));
        }
        if self.spectral.enabled {
            parts.push(format!("spectral/{}", crate::sources::spectral::ADAPTER_VERSION));
        }
        if self.metadata_enrich.enabled {
            parts.push(format!("enrich/{}", crate::sources::metadata_enrich::ADAPTER_VERSION));
        }
        parts.join(":")
    }
}
