//! Core types for the identification pipeline
//!
//! Data contracts between the scanner, corruption guard, source adapters,
//! resolver, cache, and batch coordinator. Everything that crosses the cache
//! boundary is serde-serializable so resolutions survive in the persistent
//! store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file discovered by the scanner, before the corruption probe has run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// An audio file admitted to the pipeline
///
/// Immutable once constructed. The fingerprint is a digest of decoded audio
/// content, stable across tag-only edits, so two files with identical audio
/// share a handle's identity even when their metadata differs.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHandle {
    pub path: PathBuf,
    pub fingerprint: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
}

/// Identification technique, in fixed pipeline priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    FingerprintLookup,
    SpectralCompare,
    MetadataEnrich,
}

impl SourceKind {
    /// Position in the fixed pipeline order (lower consults first)
    pub fn priority(self) -> usize {
        match self {
            Self::FingerprintLookup => 0,
            Self::SpectralCompare => 1,
            Self::MetadataEnrich => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FingerprintLookup => "fingerprint-lookup",
            Self::SpectralCompare => "spectral-compare",
            Self::MetadataEnrich => "metadata-enrich",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether an adapter touches the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostClass {
    /// Synchronous-fast local work (decode, index lookup)
    Local,
    /// Remote service call; rate-limited and retried
    Remote,
}

/// Track metadata fields as a single source reports them
///
/// All fields optional; adapters return only what they can provide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackFields {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub genre: Option<String>,
}

impl TrackFields {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none()
            && self.album.is_none()
            && self.title.is_none()
            && self.year.is_none()
            && self.track_number.is_none()
            && self.genre.is_none()
    }
}

/// One source's answer for a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationCandidate {
    pub source: SourceKind,
    pub fields: TrackFields,
    /// Self-reported certainty, normalized to [0, 1]
    pub confidence: f64,
    /// Opaque identifier in the source's own namespace (recording id,
    /// reference-index key, ...)
    pub source_ref: Option<String>,
}

impl IdentificationCandidate {
    pub fn new(source: SourceKind, fields: TrackFields, confidence: f64) -> Self {
        Self {
            source,
            fields,
            confidence: confidence.clamp(0.0, 1.0),
            source_ref: None,
        }
    }

    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }
}

/// A metadata value with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedField<T> {
    pub value: T,
    pub confidence: f64,
    pub source: SourceKind,
}

/// Equal-confidence tie-break rule for the field-wise merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Keep the field from the source earlier in the pipeline order
    #[default]
    SourcePriority,
    /// Let the most recently consulted adapter overwrite
    LatestAdapter,
}

/// Field-wise merged view across all consulted sources
///
/// Each field independently carries the highest-confidence non-empty value
/// seen so far; a later low-confidence source fills gaps without displacing
/// better data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedTrack {
    pub title: Option<MergedField<String>>,
    pub artist: Option<MergedField<String>>,
    pub album: Option<MergedField<String>>,
    pub genre: Option<MergedField<String>>,
    pub year: Option<MergedField<u32>>,
    pub track_number: Option<MergedField<u32>>,
}

impl MergedTrack {
    /// Absorb a candidate's non-empty fields
    pub fn absorb(&mut self, candidate: &IdentificationCandidate, tie_break: TieBreak) {
        let source = candidate.source;
        let confidence = candidate.confidence;
        let fields = &candidate.fields;

        merge_field(&mut self.title, fields.title.clone(), confidence, source, tie_break);
        merge_field(&mut self.artist, fields.artist.clone(), confidence, source, tie_break);
        merge_field(&mut self.album, fields.album.clone(), confidence, source, tie_break);
        merge_field(&mut self.genre, fields.genre.clone(), confidence, source, tie_break);
        merge_field(&mut self.year, fields.year, confidence, source, tie_break);
        merge_field(
            &mut self.track_number,
            fields.track_number,
            confidence,
            source,
            tie_break,
        );
    }

    /// True when every field holds a value
    pub fn is_complete(&self) -> bool {
        self.title.is_some()
            && self.artist.is_some()
            && self.album.is_some()
            && self.genre.is_some()
            && self.year.is_some()
            && self.track_number.is_some()
    }
}

fn merge_field<T>(
    slot: &mut Option<MergedField<T>>,
    incoming: Option<T>,
    confidence: f64,
    source: SourceKind,
    tie_break: TieBreak,
) {
    let Some(value) = incoming else {
        return;
    };
    let replace = match slot {
        None => true,
        Some(existing) => {
            if confidence > existing.confidence {
                true
            } else if confidence < existing.confidence {
                false
            } else {
                match tie_break {
                    TieBreak::SourcePriority => source.priority() < existing.source.priority(),
                    TieBreak::LatestAdapter => true,
                }
            }
        }
    };
    if replace {
        *slot = Some(MergedField {
            value,
            confidence,
            source,
        });
    }
}

/// Why a file was routed around the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BypassReason {
    /// Decodability probe failed; the file never reached an adapter
    Corrupt { detail: String },
    /// Batch cancellation observed before this file started
    Cancelled,
}

/// Terminal status of one file's resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// A candidate met the acceptance threshold
    Resolved,
    /// Best candidate cleared the usefulness floor but not the threshold
    PartiallyResolved,
    /// No candidate cleared even the usefulness floor
    Unresolved,
    /// Routed around the pipeline entirely
    Bypassed { reason: BypassReason },
    /// Per-file infrastructure failure, isolated from the batch
    Failed { reason: String },
}

impl ResolutionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::PartiallyResolved => "partially_resolved",
            Self::Unresolved => "unresolved",
            Self::Bypassed { .. } => "bypassed",
            Self::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The resolver's final decision for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIdentification {
    pub fingerprint: String,
    pub status: ResolutionStatus,
    /// The chosen candidate; `None` for unresolved/bypassed/failed files
    pub chosen: Option<IdentificationCandidate>,
    /// Field-wise merged view with provenance
    pub merged: MergedTrack,
    /// Sources consulted, in consultation order
    pub consulted: Vec<SourceKind>,
}

impl ResolvedIdentification {
    /// A resolution for a file that never entered the pipeline
    pub fn bypassed(fingerprint: impl Into<String>, reason: BypassReason) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            status: ResolutionStatus::Bypassed { reason },
            chosen: None,
            merged: MergedTrack::default(),
            consulted: Vec::new(),
        }
    }

    /// A resolution for a per-file infrastructure failure
    pub fn failed(fingerprint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            status: ResolutionStatus::Failed {
                reason: reason.into(),
            },
            chosen: None,
            merged: MergedTrack::default(),
            consulted: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(source: SourceKind, confidence: f64, fields: TrackFields) -> IdentificationCandidate {
        IdentificationCandidate::new(source, fields, confidence)
    }

    #[test]
    fn test_merge_prefers_higher_confidence_per_field() {
        let mut merged = MergedTrack::default();

        merged.absorb(
            &candidate(
                SourceKind::FingerprintLookup,
                0.95,
                TrackFields {
                    title: Some("Blue Train".to_string()),
                    artist: Some("John Coltrane".to_string()),
                    ..Default::default()
                },
            ),
            TieBreak::SourcePriority,
        );
        merged.absorb(
            &candidate(
                SourceKind::MetadataEnrich,
                0.7,
                TrackFields {
                    title: Some("Blue Train (Remastered)".to_string()),
                    genre: Some("Jazz".to_string()),
                    ..Default::default()
                },
            ),
            TieBreak::SourcePriority,
        );

        // Title keeps the higher-confidence source, genre fills the gap
        let title = merged.title.unwrap();
        assert_eq!(title.value, "Blue Train");
        assert_eq!(title.source, SourceKind::FingerprintLookup);

        let genre = merged.genre.unwrap();
        assert_eq!(genre.value, "Jazz");
        assert_eq!(genre.source, SourceKind::MetadataEnrich);
    }

    #[test]
    fn test_merge_tie_break_source_priority() {
        let mut merged = MergedTrack::default();
        merged.absorb(
            &candidate(
                SourceKind::SpectralCompare,
                0.5,
                TrackFields {
                    title: Some("From Spectral".to_string()),
                    ..Default::default()
                },
            ),
            TieBreak::SourcePriority,
        );
        merged.absorb(
            &candidate(
                SourceKind::MetadataEnrich,
                0.5,
                TrackFields {
                    title: Some("From Enrich".to_string()),
                    ..Default::default()
                },
            ),
            TieBreak::SourcePriority,
        );

        // Equal confidence: the earlier-priority source keeps the field
        assert_eq!(merged.title.unwrap().value, "From Spectral");
    }

    #[test]
    fn test_merge_tie_break_latest_adapter() {
        let mut merged = MergedTrack::default();
        merged.absorb(
            &candidate(
                SourceKind::SpectralCompare,
                0.5,
                TrackFields {
                    title: Some("From Spectral".to_string()),
                    ..Default::default()
                },
            ),
            TieBreak::LatestAdapter,
        );
        merged.absorb(
            &candidate(
                SourceKind::MetadataEnrich,
                0.5,
                TrackFields {
                    title: Some("From Enrich".to_string()),
                    ..Default::default()
                },
            ),
            TieBreak::LatestAdapter,
        );

        assert_eq!(merged.title.unwrap().value, "From Enrich");
    }

    #[test]
    fn test_lower_confidence_never_displaces() {
        let mut merged = MergedTrack::default();
        merged.absorb(
            &candidate(
                SourceKind::FingerprintLookup,
                0.9,
                TrackFields {
                    artist: Some("Nina Simone".to_string()),
                    ..Default::default()
                },
            ),
            TieBreak::LatestAdapter,
        );
        merged.absorb(
            &candidate(
                SourceKind::MetadataEnrich,
                0.3,
                TrackFields {
                    artist: Some("N. Simone".to_string()),
                    ..Default::default()
                },
            ),
            TieBreak::LatestAdapter,
        );

        assert_eq!(merged.artist.unwrap().value, "Nina Simone");
    }

    #[test]
    fn test_candidate_confidence_clamped() {
        let c = IdentificationCandidate::new(
            SourceKind::FingerprintLookup,
            TrackFields::default(),
            1.7,
        );
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_status_roundtrips_through_json() {
        let status = ResolutionStatus::Bypassed {
            reason: BypassReason::Corrupt {
                detail: "no audio track".to_string(),
            },
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: ResolutionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, back);
    }

    #[test]
    fn test_source_kind_priority_order() {
        assert!(SourceKind::FingerprintLookup.priority() < SourceKind::SpectralCompare.priority());
        assert!(SourceKind::SpectralCompare.priority() < SourceKind::MetadataEnrich.priority());
    }
}
