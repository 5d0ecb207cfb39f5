//! Identification resolver
//!
//! Drives the ordered adapter pipeline for one file: consult each source in
//! fixed priority order, merge partial results field-wise, stop early once a
//! candidate clears the acceptance threshold. Transient source errors are
//! retried with exponential backoff; every error is converted into a state
//! transition here, so nothing reaches the batch coordinator except a final
//! per-file status.

use crate::config::IdentifyConfig;
use crate::error::SourceError;
use crate::sources::SourceAdapter;
use crate::types::{
    FileHandle, IdentificationCandidate, MergedTrack, ResolutionStatus, ResolvedIdentification,
    SourceKind, TieBreak,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Resolver policy knobs, extracted from the batch configuration snapshot
#[derive(Debug, Clone)]
pub struct ResolverParams {
    pub acceptance_threshold: f64,
    pub usefulness_floor: f64,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub tie_break: TieBreak,
}

impl From<&IdentifyConfig> for ResolverParams {
    fn from(config: &IdentifyConfig) -> Self {
        Self {
            acceptance_threshold: config.acceptance_threshold,
            usefulness_floor: config.usefulness_floor,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            tie_break: config.tie_break,
        }
    }
}

/// Outcome of one resolver run
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub resolution: ResolvedIdentification,
    /// False when cancellation cut the consultation short; such results
    /// must not be cached or served to other requesters
    pub complete: bool,
}

/// Per-file state machine over the ordered adapter list
pub struct Resolver {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    params: ResolverParams,
}

enum AdapterOutcome {
    Candidate(IdentificationCandidate),
    NoMatch,
    Cancelled,
}

impl Resolver {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, params: ResolverParams) -> Self {
        Self { adapters, params }
    }

    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    /// Resolve one file
    ///
    /// Adapters run strictly sequentially; the cancellation token is
    /// checked at every state-transition boundary and during backoff waits,
    /// never pre-empting a call already in progress.
    pub async fn resolve(&self, file: &FileHandle, cancel: &CancellationToken) -> ResolutionOutcome {
        let mut consulted: Vec<SourceKind> = Vec::new();
        let mut candidates: Vec<IdentificationCandidate> = Vec::new();
        let mut merged = MergedTrack::default();
        let mut best: Option<IdentificationCandidate> = None;

        for adapter in &self.adapters {
            if cancel.is_cancelled() {
                debug!(
                    path = %file.path.display(),
                    "cancellation observed between adapter steps"
                );
                return self.finalize(file, best, merged, consulted, false);
            }

            // An adapter whose ceiling cannot beat the current best can
            // neither replace the chosen candidate nor win a field merge
            // once no field remains empty.
            if let Some(current) = &best {
                if current.confidence >= adapter.confidence_ceiling() && merged.is_complete() {
                    debug!(
                        path = %file.path.display(),
                        adapter = %adapter.kind(),
                        best = current.confidence,
                        ceiling = adapter.confidence_ceiling(),
                        "skipping adapter, ceiling cannot improve result"
                    );
                    continue;
                }
            }

            consulted.push(adapter.kind());
            match self.consult(adapter.as_ref(), file, &candidates, cancel).await {
                AdapterOutcome::Cancelled => {
                    return self.finalize(file, best, merged, consulted, false);
                }
                AdapterOutcome::NoMatch => continue,
                AdapterOutcome::Candidate(candidate) => {
                    if candidate.confidence < self.params.usefulness_floor {
                        debug!(
                            path = %file.path.display(),
                            adapter = %adapter.kind(),
                            confidence = candidate.confidence,
                            floor = self.params.usefulness_floor,
                            "candidate below usefulness floor, discarded"
                        );
                        continue;
                    }

                    merged.absorb(&candidate, self.params.tie_break);

                    let accepted = candidate.confidence >= self.params.acceptance_threshold;
                    let improves = best
                        .as_ref()
                        .map(|b| candidate.confidence > b.confidence)
                        .unwrap_or(true);
                    if improves {
                        best = Some(candidate.clone());
                    }
                    candidates.push(candidate);

                    if accepted {
                        debug!(
                            path = %file.path.display(),
                            adapter = %adapter.kind(),
                            "acceptance threshold met, skipping remaining adapters"
                        );
                        return ResolutionOutcome {
                            resolution: ResolvedIdentification {
                                fingerprint: file.fingerprint.clone(),
                                status: ResolutionStatus::Resolved,
                                chosen: best,
                                merged,
                                consulted,
                            },
                            complete: true,
                        };
                    }
                }
            }
        }

        self.finalize(file, best, merged, consulted, true)
    }

    /// One adapter with bounded retry and exponential backoff
    async fn consult(
        &self,
        adapter: &dyn SourceAdapter,
        file: &FileHandle,
        prior: &[IdentificationCandidate],
        cancel: &CancellationToken,
    ) -> AdapterOutcome {
        for attempt in 0..self.params.max_attempts {
            match adapter.identify(file, prior).await {
                Ok(candidate) => return AdapterOutcome::Candidate(candidate),
                Err(SourceError::NotFound) => return AdapterOutcome::NoMatch,
                Err(SourceError::InvalidResponse(reason)) => {
                    // Malformed remote data reads as a negative result
                    debug!(
                        path = %file.path.display(),
                        adapter = %adapter.kind(),
                        reason = %reason,
                        "invalid response treated as no match"
                    );
                    return AdapterOutcome::NoMatch;
                }
                Err(SourceError::Cancelled) => return AdapterOutcome::Cancelled,
                Err(e) if e.is_transient() => {
                    let remaining = self.params.max_attempts - attempt - 1;
                    if remaining == 0 {
                        warn!(
                            path = %file.path.display(),
                            adapter = %adapter.kind(),
                            error = %e,
                            attempts = self.params.max_attempts,
                            "transient errors exhausted retries, treating as no match"
                        );
                        return AdapterOutcome::NoMatch;
                    }
                    let backoff = self.backoff_for(attempt);
                    debug!(
                        path = %file.path.display(),
                        adapter = %adapter.kind(),
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient source error, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return AdapterOutcome::Cancelled,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    // Closed taxonomy; only NotFound can remain, but keep
                    // degradation graceful if a variant is ever added.
                    warn!(
                        path = %file.path.display(),
                        adapter = %adapter.kind(),
                        error = %e,
                        "unexpected source error treated as no match"
                    );
                    return AdapterOutcome::NoMatch;
                }
            }
        }
        AdapterOutcome::NoMatch
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let backoff = self
            .params
            .backoff_base
            .saturating_mul(factor.min(u32::MAX as u64) as u32);
        backoff.min(self.params.backoff_cap)
    }

    fn finalize(
        &self,
        file: &FileHandle,
        best: Option<IdentificationCandidate>,
        merged: MergedTrack,
        consulted: Vec<SourceKind>,
        complete: bool,
    ) -> ResolutionOutcome {
        let status = match &best {
            Some(candidate) if candidate.confidence >= self.params.acceptance_threshold => {
                ResolutionStatus::Resolved
            }
            Some(_) => ResolutionStatus::PartiallyResolved,
            None => ResolutionStatus::Unresolved,
        };
        ResolutionOutcome {
            resolution: ResolvedIdentification {
                fingerprint: file.fingerprint.clone(),
                status,
                chosen: best,
                merged,
                consulted,
            },
            complete,
        }
    }
}
