//! Content fingerprinting
//!
//! Digest of decoded audio samples rather than raw file bytes, so the
//! fingerprint survives tag-only edits: two copies of the same recording
//! with different metadata hash identically, while any change to the audio
//! itself produces a new fingerprint.

use crate::audio::decode_to_mono;
use crate::error::DecodeError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Seconds of audio hashed from the start of the file
///
/// Long enough to distinguish real-world recordings, short enough to keep
/// fingerprinting cheap on large libraries.
pub const FINGERPRINT_WINDOW_SECS: f64 = 120.0;

/// Compute the content fingerprint of an audio file
///
/// Samples are quantized to i16 before hashing so the digest does not
/// depend on float rounding in intermediate buffers.
pub fn content_fingerprint(path: &Path) -> Result<String, DecodeError> {
    let audio = decode_to_mono(path, Some(FINGERPRINT_WINDOW_SECS))?;

    let mut hasher = Sha256::new();
    hasher.update(audio.sample_rate.to_le_bytes());
    for &sample in &audio.samples {
        let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        hasher.update(quantized.to_le_bytes());
    }

    let digest = hasher.finalize();
    Ok(hex_string(&digest))
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
