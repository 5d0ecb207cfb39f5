//! Batch coordinator
//!
//! Fans scanned files out to concurrent resolver executions bounded by the
//! configured worker limit, tracks progress counters, and honors cooperative
//! cancellation. Failures are isolated per file; a batch always completes
//! (or is cleanly cancelled) and reports a results manifest.

use crate::cache::{FingerprintCache, Reservation};
use crate::config::IdentifyConfig;
use crate::probe::{AudioInspector, ProbeVerdict};
use crate::resolver::{Resolver, ResolverParams};
use crate::sources::SourceAdapter;
use crate::types::{
    BypassReason, FileHandle, ResolutionStatus, ResolvedIdentification, ScannedFile,
};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use waxwing_common::events::{BatchEvent, EventBus};

/// Final outcome for one file in a batch
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: std::path::PathBuf,
    pub resolution: ResolvedIdentification,
}

/// Aggregate counts per terminal status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub resolved: usize,
    pub partially_resolved: usize,
    pub unresolved: usize,
    pub bypassed: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, status: &ResolutionStatus) {
        match status {
            ResolutionStatus::Resolved => self.resolved += 1,
            ResolutionStatus::PartiallyResolved => self.partially_resolved += 1,
            ResolutionStatus::Unresolved => self.unresolved += 1,
            ResolutionStatus::Bypassed { .. } => self.bypassed += 1,
            ResolutionStatus::Failed { .. } => self.failed += 1,
        }
    }
}

/// Results manifest handed downstream (organizer, CLI)
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Outcomes in input order
    pub outcomes: Vec<FileOutcome>,
    pub summary: BatchSummary,
    pub cancelled: bool,
}

/// Progress counters shared across workers
struct BatchJob {
    batch_id: Uuid,
    total: usize,
    processed: AtomicUsize,
}

/// Concurrency-bounded executor over the per-file pipeline
pub struct BatchCoordinator {
    config: IdentifyConfig,
    cache: FingerprintCache,
    inspector: Arc<dyn AudioInspector>,
    resolver: Arc<Resolver>,
    events: EventBus,
}

impl BatchCoordinator {
    /// Build a coordinator around an explicit cache handle and adapter set
    ///
    /// Dependencies are injected rather than global: the cache lifecycle is
    /// tied to the coordinator, and tests substitute their own inspector
    /// and adapters.
    pub fn new(
        config: IdentifyConfig,
        cache: FingerprintCache,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        inspector: Arc<dyn AudioInspector>,
        events: EventBus,
    ) -> Self {
        let params = ResolverParams::from(&config);
        Self {
            config,
            cache,
            inspector,
            resolver: Arc::new(Resolver::new(adapters, params)),
            events,
        }
    }

    /// Run the identification pipeline over a set of scanned files
    ///
    /// Always returns a complete manifest: every input file appears exactly
    /// once with a terminal status, whatever happened to it.
    pub async fn run(&self, files: Vec<ScannedFile>, cancel: CancellationToken) -> BatchReport {
        let started = Instant::now();
        let job = Arc::new(BatchJob {
            batch_id: Uuid::new_v4(),
            total: files.len(),
            processed: AtomicUsize::new(0),
        });

        info!(
            batch_id = %job.batch_id,
            files = job.total,
            workers = self.config.worker_limit,
            "batch started"
        );
        self.events.emit_lossy(BatchEvent::BatchStarted {
            batch_id: job.batch_id,
            total: job.total,
            timestamp: Utc::now(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.worker_limit.max(1)));
        let mut tasks: JoinSet<(usize, FileOutcome)> = JoinSet::new();

        for (index, file) in files.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let job = Arc::clone(&job);
            let cache = self.cache.clone();
            let inspector = Arc::clone(&self.inspector);
            let resolver = Arc::clone(&self.resolver);
            let events = self.events.clone();

            tasks.spawn(async move {
                // Closing the semaphore is never done here; acquire can
                // only fail if the semaphore is dropped, which outlives us.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");

                let path_display = file.path.display().to_string();

                // Files not yet started when cancellation lands are
                // bypassed without entering the pipeline.
                let resolution = if cancel.is_cancelled() {
                    ResolvedIdentification::bypassed("", BypassReason::Cancelled)
                } else {
                    events.emit_lossy(BatchEvent::FileStarted {
                        batch_id: job.batch_id,
                        path: path_display.clone(),
                        timestamp: Utc::now(),
                    });
                    process_file(&file, &cache, &inspector, &resolver, &cancel).await
                };

                let processed = job.processed.fetch_add(1, Ordering::SeqCst) + 1;
                events.emit_lossy(BatchEvent::FileCompleted {
                    batch_id: job.batch_id,
                    path: path_display,
                    status: resolution.status.label().to_string(),
                    processed,
                    total: job.total,
                    timestamp: Utc::now(),
                });

                (
                    index,
                    FileOutcome {
                        path: file.path,
                        resolution,
                    },
                )
            });
        }

        let mut outcomes: Vec<Option<FileOutcome>> = (0..job.total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => {
                    // A panicked worker loses its index; surfaced below as
                    // a missing outcome turned Failed.
                    warn!(batch_id = %job.batch_id, error = %e, "worker task failed");
                }
            }
        }

        let mut summary = BatchSummary {
            total: job.total,
            ..Default::default()
        };
        let outcomes: Vec<FileOutcome> = outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| FileOutcome {
                    path: std::path::PathBuf::from(format!("<lost file #{index}>")),
                    resolution: ResolvedIdentification::failed("", "worker task panicked"),
                })
            })
            .collect();
        for outcome in &outcomes {
            summary.record(&outcome.resolution.status);
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            self.events.emit_lossy(BatchEvent::BatchCancelled {
                batch_id: job.batch_id,
                timestamp: Utc::now(),
            });
        }

        info!(
            batch_id = %job.batch_id,
            resolved = summary.resolved,
            partially_resolved = summary.partially_resolved,
            unresolved = summary.unresolved,
            bypassed = summary.bypassed,
            failed = summary.failed,
            cancelled,
            duration_secs = started.elapsed().as_secs(),
            "batch completed"
        );
        self.events.emit_lossy(BatchEvent::BatchCompleted {
            batch_id: job.batch_id,
            resolved: summary.resolved,
            partially_resolved: summary.partially_resolved,
            unresolved: summary.unresolved,
            bypassed: summary.bypassed,
            failed: summary.failed,
            duration_seconds: started.elapsed().as_secs(),
            timestamp: Utc::now(),
        });

        BatchReport {
            batch_id: job.batch_id,
            outcomes,
            summary,
            cancelled,
        }
    }
}

/// One file's full pipeline: probe, fingerprint, cache, resolve
async fn process_file(
    file: &ScannedFile,
    cache: &FingerprintCache,
    inspector: &Arc<dyn AudioInspector>,
    resolver: &Resolver,
    cancel: &CancellationToken,
) -> ResolvedIdentification {
    // Decodability probe; mandatory before any fingerprinting
    let verdict = match blocking_probe(inspector, file.path.clone()).await {
        Ok(verdict) => verdict,
        Err(reason) => return ResolvedIdentification::failed("", reason),
    };

    let duration_secs = match verdict {
        ProbeVerdict::Corrupt { reason } => {
            warn!(path = %file.path.display(), reason = %reason, "corrupt file bypassed");
            return ResolvedIdentification::bypassed("", BypassReason::Corrupt { detail: reason });
        }
        ProbeVerdict::Healthy { duration_secs } => duration_secs,
    };

    if cancel.is_cancelled() {
        return ResolvedIdentification::bypassed("", BypassReason::Cancelled);
    }

    // Content fingerprint
    let fingerprint = match blocking_fingerprint(inspector, file.path.clone()).await {
        Ok(fp) => fp,
        Err(reason) => {
            warn!(path = %file.path.display(), reason = %reason, "fingerprinting failed");
            return ResolvedIdentification::failed("", reason);
        }
    };

    let handle = FileHandle {
        path: file.path.clone(),
        fingerprint: fingerprint.clone(),
        size_bytes: file.size_bytes,
        duration_secs,
    };

    loop {
        if cancel.is_cancelled() {
            return ResolvedIdentification::bypassed(fingerprint, BypassReason::Cancelled);
        }

        // Served locally when a prior run already resolved this content
        if let Some(resolution) = cache.get(&fingerprint) {
            return resolution;
        }

        match cache.reserve(&fingerprint) {
            Reservation::Owner(token) => {
                let outcome = resolver.resolve(&handle, cancel).await;
                if !outcome.complete {
                    // Cancel-truncated: waiters are woken empty by the
                    // token drop and the result is never cached.
                    drop(token);
                    if outcome.resolution.consulted.is_empty() {
                        return ResolvedIdentification::bypassed(
                            fingerprint,
                            BypassReason::Cancelled,
                        );
                    }
                    return outcome.resolution;
                }
                if matches!(
                    outcome.resolution.status,
                    ResolutionStatus::Resolved
                        | ResolutionStatus::PartiallyResolved
                        | ResolutionStatus::Unresolved
                ) {
                    cache.put(&fingerprint, outcome.resolution.clone()).await;
                }
                token.complete(outcome.resolution.clone());
                return outcome.resolution;
            }
            Reservation::InFlight(wait) => {
                // Identical content already resolving elsewhere in the
                // batch; share its result instead of re-querying.
                match wait.wait().await {
                    Some(resolution) => return resolution,
                    // Owner abandoned (cancelled); loop re-checks the
                    // token and takes ownership if the batch is still live.
                    None => continue,
                }
            }
        }
    }
}

// Probing and fingerprinting decode audio; keep them off the async workers.

async fn blocking_probe(
    inspector: &Arc<dyn AudioInspector>,
    path: std::path::PathBuf,
) -> Result<ProbeVerdict, String> {
    let inspector = Arc::clone(inspector);
    tokio::task::spawn_blocking(move || inspector.check(&path))
        .await
        .map_err(|e| format!("probe task failed: {e}"))
}

async fn blocking_fingerprint(
    inspector: &Arc<dyn AudioInspector>,
    path: std::path::PathBuf,
) -> Result<String, String> {
    let inspector = Arc::clone(inspector);
    tokio::task::spawn_blocking(move || inspector.fingerprint(&path))
        .await
        .map_err(|e| format!("fingerprint task failed: {e}"))?
        .map_err(|e| e.to_string())
}
