//! Remote fingerprint lookup adapter
//!
//! Posts the content fingerprint and duration to a lookup service and maps
//! the best-scoring recording into a candidate. First in the pipeline: the
//! most precise source when it matches, and the one whose hit rate the
//! early-exit rule is designed around.

use crate::config::FingerprintLookupConfig;
use crate::error::SourceError;
use crate::sources::{classify_status, classify_transport_error, SourceAdapter};
use crate::types::{CostClass, FileHandle, IdentificationCandidate, SourceKind, TrackFields};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Bumped whenever the wire contract or mapping changes; part of the
/// cache's adapter-version stamp
pub const ADAPTER_VERSION: u32 = 2;

/// Requests per second the lookup service tolerates
const RATE_LIMIT_PER_SEC: u32 = 3;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    id: String,
    score: f64,
    recording: Option<LookupRecording>,
}

#[derive(Debug, Deserialize)]
struct LookupRecording {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    year: Option<u32>,
    track_number: Option<u32>,
    genre: Option<String>,
}

/// Remote fingerprint lookup source
pub struct FingerprintLookupSource {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl FingerprintLookupSource {
    pub fn new(config: &FingerprintLookupConfig) -> Self {
        // Safe: RATE_LIMIT_PER_SEC is a non-zero constant
        let quota =
            governor::Quota::per_second(std::num::NonZeroU32::new(RATE_LIMIT_PER_SEC).unwrap());

        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .expect("failed to build HTTP client"),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            rate_limiter: governor::RateLimiter::direct(quota),
        }
    }

    fn best_candidate(&self, response: LookupResponse) -> Result<IdentificationCandidate, SourceError> {
        let best = response
            .results
            .into_iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or(SourceError::NotFound)?;

        let recording = best.recording.ok_or(SourceError::NotFound)?;
        let fields = TrackFields {
            title: recording.title,
            artist: recording.artist,
            album: recording.album,
            year: recording.year,
            track_number: recording.track_number,
            genre: recording.genre,
        };
        if fields.is_empty() {
            return Err(SourceError::NotFound);
        }

        let confidence = best.score.clamp(0.0, 1.0).min(self.confidence_ceiling());
        Ok(
            IdentificationCandidate::new(SourceKind::FingerprintLookup, fields, confidence)
                .with_source_ref(best.id),
        )
    }
}

#[async_trait]
impl SourceAdapter for FingerprintLookupSource {
    fn kind(&self) -> SourceKind {
        SourceKind::FingerprintLookup
    }

    fn cost(&self) -> CostClass {
        CostClass::Remote
    }

    fn confidence_ceiling(&self) -> f64 {
        0.99
    }

    async fn identify(
        &self,
        file: &FileHandle,
        _prior: &[IdentificationCandidate],
    ) -> Result<IdentificationCandidate, SourceError> {
        self.rate_limiter.until_ready().await;

        let duration = format!("{:.0}", file.duration_secs);
        let params = [
            ("client", self.api_key.as_str()),
            ("fingerprint", file.fingerprint.as_str()),
            ("duration", duration.as_str()),
            ("meta", "recordings"),
        ];

        debug!(
            fingerprint = %file.fingerprint,
            duration = %duration,
            "querying fingerprint lookup service"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .form(&params)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        if body.status != "ok" {
            return Err(SourceError::InvalidResponse(format!(
                "service status {}",
                body.status
            )));
        }

        self.best_candidate(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> FingerprintLookupSource {
        FingerprintLookupSource::new(&FingerprintLookupConfig::default())
    }

    fn result(score: f64, title: Option<&str>) -> LookupResult {
        LookupResult {
            id: "ref-1".to_string(),
            score,
            recording: Some(LookupRecording {
                title: title.map(str::to_string),
                artist: Some("Artist".to_string()),
                album: None,
                year: Some(1999),
                track_number: None,
                genre: None,
            }),
        }
    }

    #[test]
    fn test_best_candidate_picks_highest_score() {
        let response = LookupResponse {
            status: "ok".to_string(),
            results: vec![result(0.4, Some("Low")), result(0.92, Some("High"))],
        };
        let candidate = source().best_candidate(response).unwrap();
        assert_eq!(candidate.fields.title.as_deref(), Some("High"));
        assert!((candidate.confidence - 0.92).abs() < 1e-9);
        assert_eq!(candidate.source, SourceKind::FingerprintLookup);
        assert_eq!(candidate.source_ref.as_deref(), Some("ref-1"));
    }

    #[test]
    fn test_empty_results_is_not_found() {
        let response = LookupResponse {
            status: "ok".to_string(),
            results: vec![],
        };
        assert_eq!(source().best_candidate(response).unwrap_err(), SourceError::NotFound);
    }

    #[test]
    fn test_result_without_recording_is_not_found() {
        let response = LookupResponse {
            status: "ok".to_string(),
            results: vec![LookupResult {
                id: "ref-2".to_string(),
                score: 0.9,
                recording: None,
            }],
        };
        assert_eq!(source().best_candidate(response).unwrap_err(), SourceError::NotFound);
    }

    #[test]
    fn test_confidence_capped_by_ceiling() {
        let response = LookupResponse {
            status: "ok".to_string(),
            results: vec![result(1.0, Some("Exact"))],
        };
        let candidate = source().best_candidate(response).unwrap();
        assert!(candidate.confidence <= 0.99);
    }

    #[test]
    fn test_response_parses_without_results_field() {
        let body: LookupResponse = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(body.results.is_empty());
    }
}
