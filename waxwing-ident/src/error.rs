//! Error types for the identification engine
//!
//! Adapter errors form a closed taxonomy the resolver converts into state
//! transitions; nothing below the batch coordinator surfaces an error other
//! than a per-file terminal status.

use thiserror::Error;

/// Outcome taxonomy for a single adapter call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// No match; a legitimate negative result, not a failure
    #[error("no match found")]
    NotFound,

    /// Remote service asked us to slow down; retryable with backoff
    #[error("rate limited by remote service")]
    RateLimited,

    /// Transport-level failure; retryable with backoff, bounded attempts
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// Malformed remote data; treated as a negative result
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Batch cancellation propagated into the adapter; never retried
    #[error("cancelled")]
    Cancelled,
}

impl SourceError {
    /// Transient errors are retried with exponential backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unreachable(_))
    }
}

/// Errors from decoding audio content
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open file: {0}")]
    Open(#[from] std::io::Error),

    #[error("unrecognized or unsupported container: {0}")]
    Probe(String),

    #[error("no decodable audio track")]
    NoAudioTrack,

    #[error("decoder setup failed: {0}")]
    DecoderSetup(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("file contains no audio samples")]
    Empty,
}

/// Errors from directory scanning
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("path not found: {0}")]
    PathNotFound(std::path::PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(std::path::PathBuf),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors from the organizer's move application
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("destination exists and collision retries exhausted: {0}")]
    DestinationOccupied(std::path::PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SourceError::RateLimited.is_transient());
        assert!(SourceError::Unreachable("connect refused".into()).is_transient());
        assert!(!SourceError::NotFound.is_transient());
        assert!(!SourceError::InvalidResponse("bad json".into()).is_transient());
        assert!(!SourceError::Cancelled.is_transient());
    }
}
