//! Local spectral comparison adapter
//!
//! Computes a banded spectral envelope of the opening of the file and
//! compares it by cosine similarity against a reference index of labeled
//! feature vectors. Cheap and fully local; useful when the fingerprint
//! service has no match, at a markedly lower confidence ceiling.

use crate::audio::decode_to_mono;
use crate::config::SpectralConfig;
use crate::error::SourceError;
use crate::sources::SourceAdapter;
use crate::types::{CostClass, FileHandle, IdentificationCandidate, SourceKind, TrackFields};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;
use tracing::{debug, warn};

/// Part of the cache's adapter-version stamp
pub const ADAPTER_VERSION: u32 = 1;

/// Seconds of audio analyzed from the start of the file
const ANALYSIS_WINDOW_SECS: f64 = 45.0;

/// Analysis frame length in samples
const FRAME_LEN: usize = 2048;

/// Hop between frames in samples
const HOP_LEN: usize = 1024;

/// Number of log-spaced frequency bands in the feature vector
pub const FEATURE_BANDS: usize = 16;

const BAND_MIN_HZ: f32 = 50.0;
const BAND_MAX_HZ: f32 = 8_000.0;

/// One labeled reference track in the comparison index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceTrack {
    pub key: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub genre: Option<String>,
    /// Banded spectral envelope, FEATURE_BANDS values
    pub features: Vec<f32>,
}

/// Local spectral comparison source
pub struct SpectralCompareSource {
    index: Vec<ReferenceTrack>,
    min_similarity: f64,
}

impl SpectralCompareSource {
    pub fn new(index: Vec<ReferenceTrack>, min_similarity: f64) -> Self {
        Self {
            index,
            min_similarity,
        }
    }

    /// Load the reference index per configuration
    ///
    /// A missing or unreadable index is not fatal: the adapter then reports
    /// a negative result for every file.
    pub fn from_config(config: &SpectralConfig) -> Self {
        let index = match &config.index_path {
            Some(path) => match load_index(path) {
                Ok(index) => index,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "spectral reference index unavailable, adapter will report no matches"
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Self::new(index, config.min_similarity)
    }

    fn best_match(&self, features: &[f32]) -> Option<(&ReferenceTrack, f64)> {
        self.index
            .iter()
            .filter(|r| r.features.len() == features.len())
            .map(|r| (r, cosine_similarity(features, &r.features)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }
}

#[async_trait]
impl SourceAdapter for SpectralCompareSource {
    fn kind(&self) -> SourceKind {
        SourceKind::SpectralCompare
    }

    fn cost(&self) -> CostClass {
        CostClass::Local
    }

    fn confidence_ceiling(&self) -> f64 {
        0.75
    }

    async fn identify(
        &self,
        file: &FileHandle,
        _prior: &[IdentificationCandidate],
    ) -> Result<IdentificationCandidate, SourceError> {
        if self.index.is_empty() {
            return Err(SourceError::NotFound);
        }

        let path = file.path.clone();
        let features = tokio::task::spawn_blocking(move || extract_features(&path))
            .await
            .map_err(|e| SourceError::InvalidResponse(format!("analysis task failed: {e}")))?
            .map_err(|e| SourceError::InvalidResponse(format!("analysis failed: {e}")))?;

        let (reference, similarity) = self.best_match(&features).ok_or(SourceError::NotFound)?;
        debug!(
            path = %file.path.display(),
            reference = %reference.key,
            similarity,
            "spectral comparison best match"
        );

        if similarity < self.min_similarity {
            return Err(SourceError::NotFound);
        }

        let fields = TrackFields {
            artist: reference.artist.clone(),
            album: reference.album.clone(),
            title: reference.title.clone(),
            year: reference.year,
            track_number: reference.track_number,
            genre: reference.genre.clone(),
        };
        let confidence = similarity.min(self.confidence_ceiling());
        Ok(
            IdentificationCandidate::new(SourceKind::SpectralCompare, fields, confidence)
                .with_source_ref(reference.key.clone()),
        )
    }
}

fn load_index(path: &Path) -> waxwing_common::Result<Vec<ReferenceTrack>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| waxwing_common::Error::Config(format!("spectral index parse failed: {e}")))
}

/// Banded spectral envelope of the opening of a file
///
/// Frames the signal, measures per-band magnitude via Goertzel probes at
/// log-spaced center frequencies, averages over frames, and L2-normalizes.
pub fn extract_features(path: &Path) -> Result<Vec<f32>, crate::error::DecodeError> {
    let audio = decode_to_mono(path, Some(ANALYSIS_WINDOW_SECS))?;
    Ok(features_from_samples(&audio.samples, audio.sample_rate))
}

/// Feature extraction over raw mono samples; exposed for index building
pub fn features_from_samples(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let mut bands = vec![0.0f64; FEATURE_BANDS];
    if samples.len() < FRAME_LEN || sample_rate == 0 {
        return vec![0.0; FEATURE_BANDS];
    }

    let nyquist = sample_rate as f32 / 2.0;
    let max_hz = BAND_MAX_HZ.min(nyquist * 0.95);
    let log_min = BAND_MIN_HZ.ln();
    let log_step = (max_hz.ln() - log_min) / (FEATURE_BANDS - 1) as f32;
    let center_freqs: Vec<f32> = (0..FEATURE_BANDS)
        .map(|i| (log_min + log_step * i as f32).exp())
        .collect();

    let mut frames = 0usize;
    let mut start = 0usize;
    while start + FRAME_LEN <= samples.len() {
        let frame = &samples[start..start + FRAME_LEN];
        for (band, &freq) in center_freqs.iter().enumerate() {
            bands[band] += goertzel_magnitude(frame, freq, sample_rate) as f64;
        }
        frames += 1;
        start += HOP_LEN;
    }

    if frames == 0 {
        return vec![0.0; FEATURE_BANDS];
    }

    let mut features: Vec<f32> = bands.iter().map(|b| (*b / frames as f64) as f32).collect();
    let norm = features.iter().map(|f| f * f).sum::<f32>().sqrt();
    if norm > 0.0 {
        for f in &mut features {
            *f /= norm;
        }
    }
    features
}

/// Single-bin magnitude probe at `freq` over one frame
fn goertzel_magnitude(frame: &[f32], freq: f32, sample_rate: u32) -> f32 {
    let k = (0.5 + frame.len() as f32 * freq / sample_rate as f32).floor();
    let omega = 2.0 * PI * k / frame.len() as f32;
    let coeff = 2.0 * omega.cos();

    let mut s_prev = 0.0f32;
    let mut s_prev2 = 0.0f32;
    for &sample in frame {
        let s = sample + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }

    let power = s_prev2 * s_prev2 + s_prev * s_prev - coeff * s_prev * s_prev2;
    power.max(0.0).sqrt() / frame.len() as f32
}

/// Cosine similarity of two equal-length vectors, in [0, 1] for
/// non-negative magnitude features
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, seconds: f32, rate: u32) -> Vec<f32> {
        let total = (rate as f32 * seconds) as usize;
        (0..total)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.8)
            .collect()
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_same_tone_features_match() {
        let a = features_from_samples(&sine(440.0, 2.0, 44_100), 44_100);
        let b = features_from_samples(&sine(440.0, 2.0, 44_100), 44_100);
        assert!(cosine_similarity(&a, &b) > 0.999);
    }

    #[test]
    fn test_distant_tones_differ() {
        let low = features_from_samples(&sine(110.0, 2.0, 44_100), 44_100);
        let high = features_from_samples(&sine(5_000.0, 2.0, 44_100), 44_100);
        assert!(cosine_similarity(&low, &high) < 0.9);
    }

    #[test]
    fn test_features_are_normalized() {
        let features = features_from_samples(&sine(440.0, 1.0, 44_100), 44_100);
        assert_eq!(features.len(), FEATURE_BANDS);
        let norm: f32 = features.iter().map(|f| f * f).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_short_input_yields_zero_vector() {
        let features = features_from_samples(&[0.1; 100], 44_100);
        assert_eq!(features, vec![0.0; FEATURE_BANDS]);
    }

    #[tokio::test]
    async fn test_empty_index_reports_not_found() {
        let source = SpectralCompareSource::new(Vec::new(), 0.6);
        let file = FileHandle {
            path: "/nonexistent.flac".into(),
            fingerprint: "fp".into(),
            size_bytes: 0,
            duration_secs: 0.0,
        };
        let err = source.identify(&file, &[]).await.unwrap_err();
        assert_eq!(err, SourceError::NotFound);
    }

    #[test]
    fn test_best_match_skips_mismatched_vector_lengths() {
        let source = SpectralCompareSource::new(
            vec![
                ReferenceTrack {
                    key: "short".into(),
                    artist: None,
                    album: None,
                    title: None,
                    year: None,
                    track_number: None,
                    genre: None,
                    features: vec![1.0; 4],
                },
                ReferenceTrack {
                    key: "full".into(),
                    artist: None,
                    album: None,
                    title: Some("Match".into()),
                    year: None,
                    track_number: None,
                    genre: None,
                    features: {
                        let mut v = vec![0.0; FEATURE_BANDS];
                        v[3] = 1.0;
                        v
                    },
                },
            ],
            0.5,
        );

        let mut query = vec![0.0; FEATURE_BANDS];
        query[3] = 1.0;
        let (reference, similarity) = source.best_match(&query).unwrap();
        assert_eq!(reference.key, "full");
        assert!(similarity > 0.999);
    }

    #[test]
    fn test_from_config_with_missing_index_is_empty() {
        let config = SpectralConfig {
            enabled: true,
            index_path: Some("/no/such/index.json".into()),
            min_similarity: 0.6,
        };
        let source = SpectralCompareSource::from_config(&config);
        assert!(source.index.is_empty());
    }

    #[test]
    fn test_index_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = vec![ReferenceTrack {
            key: "ref-1".into(),
            artist: Some("Artist".into()),
            album: None,
            title: Some("Title".into()),
            year: Some(2001),
            track_number: Some(3),
            genre: Some("Ambient".into()),
            features: vec![0.25; FEATURE_BANDS],
        }];
        std::fs::write(&path, serde_json::to_string(&index).unwrap()).unwrap();

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, "ref-1");
        assert_eq!(loaded[0].features.len(), FEATURE_BANDS);
    }
}
