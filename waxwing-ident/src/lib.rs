//! waxwing identification engine
//!
//! Multi-source audio identification: an ordered pipeline of source
//! adapters (fingerprint lookup, spectral comparison, metadata enrichment)
//! with per-field confidence merging, a persistent fingerprint cache with
//! in-flight deduplication, and a cancellable, concurrency-bounded batch
//! coordinator. The organizer consumes the batch manifest to rename and
//! relocate files.

pub mod audio;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod organizer;
pub mod probe;
pub mod resolver;
pub mod scanner;
pub mod sources;
pub mod types;

pub use batch::{BatchCoordinator, BatchReport, BatchSummary, FileOutcome};
pub use cache::FingerprintCache;
pub use config::IdentifyConfig;
pub use error::SourceError;
pub use resolver::{Resolver, ResolverParams};
pub use types::{
    FileHandle, IdentificationCandidate, ResolutionStatus, ResolvedIdentification, ScannedFile,
    SourceKind,
};
