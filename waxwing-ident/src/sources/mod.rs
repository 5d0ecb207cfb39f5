//! Source adapters
//!
//! Uniform capability wrapping each identification technique. Adapters run
//! in fixed priority order (fingerprint lookup, spectral comparison,
//! metadata enrichment); each declares its cost class and the highest
//! confidence it will ever report, which the resolver's stopping rule uses.

pub mod fingerprint_lookup;
pub mod metadata_enrich;
pub mod spectral;

pub use fingerprint_lookup::FingerprintLookupSource;
pub use metadata_enrich::MetadataEnrichSource;
pub use spectral::SpectralCompareSource;

use crate::config::IdentifyConfig;
use crate::error::SourceError;
use crate::types::{CostClass, FileHandle, IdentificationCandidate, SourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Uniform identification capability
///
/// `prior` carries the candidates earlier adapters produced for the same
/// file, letting a later adapter disambiguate with their hints.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn cost(&self) -> CostClass;

    /// Highest confidence this adapter ever reports
    fn confidence_ceiling(&self) -> f64;

    async fn identify(
        &self,
        file: &FileHandle,
        prior: &[IdentificationCandidate],
    ) -> Result<IdentificationCandidate, SourceError>;
}

/// Build the enabled adapter set in fixed priority order
///
/// The set is selected once per batch from the configuration snapshot and
/// never mutated mid-batch.
pub fn build_adapters(config: &IdentifyConfig) -> Vec<Arc<dyn SourceAdapter>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if config.fingerprint_lookup.enabled {
        adapters.push(Arc::new(FingerprintLookupSource::new(
            &config.fingerprint_lookup,
        )));
    }
    if config.spectral.enabled {
        adapters.push(Arc::new(SpectralCompareSource::from_config(&config.spectral)));
    }
    if config.metadata_enrich.enabled {
        adapters.push(Arc::new(MetadataEnrichSource::new(&config.metadata_enrich)));
    }

    info!(
        adapters = adapters.len(),
        order = ?adapters.iter().map(|a| a.kind()).collect::<Vec<_>>(),
        "source adapter set built"
    );
    adapters
}

/// Map a reqwest transport error into the adapter error taxonomy
pub(crate) fn classify_transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SourceError::Unreachable(e.to_string())
    } else if e.is_decode() {
        SourceError::InvalidResponse(e.to_string())
    } else {
        SourceError::Unreachable(e.to_string())
    }
}

/// Map an HTTP status into the adapter error taxonomy
pub(crate) fn classify_status(status: reqwest::StatusCode) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    Some(if status.as_u16() == 429 {
        SourceError::RateLimited
    } else if status.is_server_error() {
        SourceError::Unreachable(format!("HTTP {}", status))
    } else if status.as_u16() == 404 {
        SourceError::NotFound
    } else {
        SourceError::InvalidResponse(format!("HTTP {}", status))
    })
}
