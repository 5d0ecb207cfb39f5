//! Corruption guard and the audio inspection seam
//!
//! A lightweight decodability probe runs before any fingerprinting: a
//! corrupt file produces undefined fingerprint results rather than an error,
//! so it must never reach a source adapter. Corrupt files bypass the
//! pipeline and are counted in batch statistics.

use crate::audio::open_track;
use crate::error::DecodeError;
use crate::fingerprint;
use std::path::Path;
use tracing::debug;

/// Result of the decodability probe
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeVerdict {
    /// File decodes; duration extracted from the container where declared
    Healthy { duration_secs: f64 },
    /// File is unreadable or undecodable
    Corrupt { reason: String },
}

/// Pre-flight decodability check
///
/// Probes the container, sets up a decoder, and decodes the first few
/// packets. At least one packet must decode cleanly; scattered bad packets
/// beyond that are tolerated the way players tolerate minor damage.
#[derive(Debug, Clone)]
pub struct CorruptionGuard {
    /// Packets attempted before declaring a verdict
    probe_packets: usize,
}

impl Default for CorruptionGuard {
    fn default() -> Self {
        Self { probe_packets: 8 }
    }
}

impl CorruptionGuard {
    pub fn new(probe_packets: usize) -> Self {
        Self {
            probe_packets: probe_packets.max(1),
        }
    }

    /// Check a file for decodability
    pub fn check(&self, path: &Path) -> ProbeVerdict {
        match self.try_check(path) {
            Ok(duration_secs) => ProbeVerdict::Healthy { duration_secs },
            Err(e) => {
                debug!(path = %path.display(), reason = %e, "corruption probe failed");
                ProbeVerdict::Corrupt {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn try_check(&self, path: &Path) -> Result<f64, DecodeError> {
        let mut opened = open_track(path)?;

        let duration_secs = match (opened.n_frames, opened.sample_rate) {
            (Some(frames), Some(rate)) if rate > 0 => frames as f64 / rate as f64,
            _ => 0.0,
        };

        let mut attempted = 0usize;
        let mut decoded_ok = 0usize;

        while attempted < self.probe_packets {
            let packet = match opened.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    if decoded_ok > 0 {
                        break;
                    }
                    return Err(DecodeError::Decode(e.to_string()));
                }
            };

            if packet.track_id() != opened.track_id {
                continue;
            }

            attempted += 1;
            match opened.decoder.decode(&packet) {
                Ok(_) => decoded_ok += 1,
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => {
                    if decoded_ok > 0 {
                        break;
                    }
                    return Err(DecodeError::Decode(e.to_string()));
                }
            }
        }

        if decoded_ok == 0 {
            return Err(DecodeError::Decode(
                "no packet decoded during probe".to_string(),
            ));
        }

        Ok(duration_secs)
    }
}

/// Probe + fingerprint seam the batch coordinator depends on
///
/// Injected at coordinator construction so tests can substitute scripted
/// verdicts and fingerprints without synthesizing audio.
pub trait AudioInspector: Send + Sync {
    /// Decodability check; mandatory before fingerprinting
    fn check(&self, path: &Path) -> ProbeVerdict;

    /// Content fingerprint of a file that passed the check
    fn fingerprint(&self, path: &Path) -> Result<String, DecodeError>;
}

/// Production inspector backed by symphonia decoding
#[derive(Debug, Default)]
pub struct SymphoniaInspector {
    guard: CorruptionGuard,
}

impl SymphoniaInspector {
    pub fn new(guard: CorruptionGuard) -> Self {
        Self { guard }
    }
}

impl AudioInspector for SymphoniaInspector {
    fn check(&self, path: &Path) -> ProbeVerdict {
        self.guard.check(path)
    }

    fn fingerprint(&self, path: &Path) -> Result<String, DecodeError> {
        fingerprint::content_fingerprint(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn write_tone(path: &Path, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total = (44_100.0 * seconds) as usize;
        for i in 0..total {
            let t = i as f32 / 44_100.0;
            let sample = ((2.0 * PI * 330.0 * t).sin() * 12_000.0) as i16;
            writer.write_sample(sample).unwrap();
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_healthy_wav_passes_with_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.wav");
        write_tone(&path, 2.0);

        let guard = CorruptionGuard::default();
        match guard.check(&path) {
            ProbeVerdict::Healthy { duration_secs } => {
                assert!((duration_secs - 2.0).abs() < 0.1, "duration = {duration_secs}");
            }
            ProbeVerdict::Corrupt { reason } => panic!("unexpected corrupt: {reason}"),
        }
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.mp3");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let guard = CorruptionGuard::default();
        assert!(matches!(guard.check(&path), ProbeVerdict::Corrupt { .. }));
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ok.wav");
        write_tone(&good, 1.0);

        // Keep only the first 16 bytes of a valid file
        let bytes = std::fs::read(&good).unwrap();
        let bad = dir.path().join("truncated.wav");
        std::fs::write(&bad, &bytes[..16]).unwrap();

        let guard = CorruptionGuard::default();
        assert!(matches!(guard.check(&bad), ProbeVerdict::Corrupt { .. }));
    }

    #[test]
    fn test_missing_file_is_corrupt() {
        let guard = CorruptionGuard::default();
        assert!(matches!(
            guard.check(Path::new("/no/such/file.flac")),
            ProbeVerdict::Corrupt { .. }
        ));
    }
}
