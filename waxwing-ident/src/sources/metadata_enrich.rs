//! Remote metadata enrichment adapter
//!
//! Last in the pipeline. Searches a collaborative metadata service by text
//! query rather than by audio content, so it leans on hints: the best prior
//! candidate's title/artist when earlier adapters produced one, the file's
//! embedded tags otherwise, and the filename stem as a last resort.
//! Returned candidates are validated against the hint by string similarity
//! before their score is believed; its strength is filling long-tail fields
//! (genre, year, track number) the audio-content sources leave empty.

use crate::config::MetadataEnrichConfig;
use crate::error::SourceError;
use crate::sources::{classify_status, classify_transport_error, SourceAdapter};
use crate::types::{CostClass, FileHandle, IdentificationCandidate, SourceKind, TrackFields};
use async_trait::async_trait;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::Accessor;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Part of the cache's adapter-version stamp
pub const ADAPTER_VERSION: u32 = 1;

/// Requests per second the metadata service tolerates
const RATE_LIMIT_PER_SEC: u32 = 1;

/// Search hint for the text query
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryHint {
    title: String,
    artist: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: String,
    /// Service-reported relevance in [0, 100]
    score: f64,
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    year: Option<u32>,
    track_number: Option<u32>,
    genre: Option<String>,
}

/// Remote metadata enrichment source
pub struct MetadataEnrichSource {
    client: reqwest::Client,
    endpoint: String,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl MetadataEnrichSource {
    pub fn new(config: &MetadataEnrichConfig) -> Self {
        // Safe: RATE_LIMIT_PER_SEC is a non-zero constant
        let quota =
            governor::Quota::per_second(std::num::NonZeroU32::new(RATE_LIMIT_PER_SEC).unwrap());

        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .user_agent("waxwing/0.1 (https://github.com/waxwing/waxwing)")
                .build()
                .expect("failed to build HTTP client"),
            endpoint: config.endpoint.clone(),
            rate_limiter: governor::RateLimiter::direct(quota),
        }
    }

    /// Pick the best validated candidate from a search response
    fn best_candidate(
        &self,
        response: SearchResponse,
        hint: &QueryHint,
    ) -> Result<IdentificationCandidate, SourceError> {
        let mut best: Option<(f64, SearchResult)> = None;

        for result in response.results {
            let Some(title) = result.title.as_deref() else {
                continue;
            };
            // The service ranks by text relevance; a confident-looking score
            // on the wrong recording is common, so the hint gets a veto.
            let similarity = strsim::jaro_winkler(
                &title.to_lowercase(),
                &hint.title.to_lowercase(),
            );
            let artist_similarity = match (&result.artist, &hint.artist) {
                (Some(a), Some(b)) => strsim::jaro_winkler(&a.to_lowercase(), &b.to_lowercase()),
                _ => 1.0,
            };
            let confidence =
                (result.score / 100.0).clamp(0.0, 1.0) * similarity * artist_similarity;

            if best.as_ref().map(|(c, _)| confidence > *c).unwrap_or(true) {
                best = Some((confidence, result));
            }
        }

        let (confidence, result) = best.ok_or(SourceError::NotFound)?;
        let fields = TrackFields {
            title: result.title,
            artist: result.artist,
            album: result.album,
            year: result.year,
            track_number: result.track_number,
            genre: result.genre,
        };
        if fields.is_empty() {
            return Err(SourceError::NotFound);
        }

        let confidence = confidence.min(self.confidence_ceiling());
        Ok(
            IdentificationCandidate::new(SourceKind::MetadataEnrich, fields, confidence)
                .with_source_ref(result.id),
        )
    }
}

#[async_trait]
impl SourceAdapter for MetadataEnrichSource {
    fn kind(&self) -> SourceKind {
        SourceKind::MetadataEnrich
    }

    fn cost(&self) -> CostClass {
        CostClass::Remote
    }

    fn confidence_ceiling(&self) -> f64 {
        0.85
    }

    async fn identify(
        &self,
        file: &FileHandle,
        prior: &[IdentificationCandidate],
    ) -> Result<IdentificationCandidate, SourceError> {
        let hint = query_hint(&file.path, prior).ok_or(SourceError::NotFound)?;

        self.rate_limiter.until_ready().await;

        let mut query = vec![("title".to_string(), hint.title.clone())];
        if let Some(artist) = &hint.artist {
            query.push(("artist".to_string(), artist.clone()));
        }

        debug!(
            path = %file.path.display(),
            title = %hint.title,
            artist = ?hint.artist,
            "querying metadata enrichment service"
        );

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        self.best_candidate(body, &hint)
    }
}

/// Derive the search hint: prior candidates, embedded tags, filename stem
fn query_hint(path: &Path, prior: &[IdentificationCandidate]) -> Option<QueryHint> {
    // Best prior candidate with a usable title
    let best_prior = prior
        .iter()
        .filter(|c| c.fields.title.is_some())
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    if let Some(candidate) = best_prior {
        return Some(QueryHint {
            title: candidate.fields.title.clone()?,
            artist: candidate.fields.artist.clone(),
        });
    }

    // Embedded tags; unreadable tags are just an absent hint
    if let Some(hint) = tag_hint(path) {
        return Some(hint);
    }

    // Filename stem as a last resort
    let stem = path.file_stem()?.to_str()?.trim();
    if stem.is_empty() {
        return None;
    }
    Some(QueryHint {
        title: stem.replace(['_', '.'], " "),
        artist: None,
    })
}

fn tag_hint(path: &Path) -> Option<QueryHint> {
    let tagged = Probe::open(path).ok()?.read().ok()?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    let title = tag.title()?.trim().to_string();
    if title.is_empty() {
        return None;
    }
    Some(QueryHint {
        title,
        artist: tag.artist().map(|a| a.trim().to_string()),
    })
}
