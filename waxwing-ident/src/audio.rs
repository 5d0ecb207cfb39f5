//! Audio decoding helpers
//!
//! PCM extraction via symphonia, downmixed to mono f32. Used by the content
//! fingerprinter and the spectral comparison adapter; the corruption guard
//! shares the probe/decoder setup but stops after a handful of packets.

use crate::error::DecodeError;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Decoded mono PCM
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples, normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Opened format reader plus decoder for the default audio track
pub(crate) struct OpenedTrack {
    pub format: Box<dyn FormatReader>,
    pub decoder: Box<dyn Decoder>,
    pub track_id: u32,
    pub sample_rate: Option<u32>,
    /// Total frames if the container declares them
    pub n_frames: Option<u64>,
}

/// Probe the container and set up a decoder for the default audio track
pub(crate) fn open_track(path: &Path) -> Result<OpenedTrack, DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Probe(e.to_string()))?;

    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate;
    let n_frames = track.codec_params.n_frames;

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::DecoderSetup(e.to_string()))?;

    Ok(OpenedTrack {
        format,
        decoder,
        track_id,
        sample_rate,
        n_frames,
    })
}

/// Decode a file to mono PCM
///
/// `max_seconds` bounds how much audio is decoded from the start of the
/// file; `None` decodes everything. Corrupt packets inside an otherwise
/// decodable stream are skipped, matching how players treat minor damage.
pub fn decode_to_mono(path: &Path, max_seconds: Option<f64>) -> Result<DecodedAudio, DecodeError> {
    let mut opened = open_track(path)?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = opened.sample_rate.unwrap_or(0);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match opened.format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Decode(e.to_string())),
        };

        if packet.track_id() != opened.track_id {
            continue;
        }

        let decoded = match opened.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(_)) => {
                skipped_packets += 1;
                continue;
            }
            Err(e) => return Err(DecodeError::Decode(e.to_string())),
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            sample_rate = spec.rate;
            let capacity = decoded.capacity() as u64;
            sample_buf = Some(SampleBuffer::<f32>::new(capacity, spec));
        }

        let channels = decoded.spec().channels.count().max(1);
        let buf = sample_buf
            .as_mut()
            .ok_or_else(|| DecodeError::Decode("sample buffer missing".to_string()))?;
        buf.copy_interleaved_ref(decoded);

        // Downmix interleaved frames to mono by averaging channels
        for frame in buf.samples().chunks_exact(channels) {
            let sum: f32 = frame.iter().sum();
            samples.push(sum / channels as f32);
        }

        if let Some(limit) = max_seconds {
            if sample_rate > 0 && samples.len() as f64 >= limit * sample_rate as f64 {
                samples.truncate((limit * sample_rate as f64) as usize);
                break;
            }
        }
    }

    if skipped_packets > 0 {
        debug!(
            path = %path.display(),
            skipped_packets,
            "skipped undecodable packets"
        );
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn write_sine_wav(path: &Path, seconds: f32, freq: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total = (44_100.0 * seconds) as usize;
        for i in 0..total {
            let t = i as f32 / 44_100.0;
            let sample = (2.0 * PI * freq * t).sin();
            writer.write_sample((sample * i16::MAX as f32 * 0.8) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_wav_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 1.0, 440.0);

        let audio = decode_to_mono(&path, None).unwrap();
        assert_eq!(audio.sample_rate, 44_100);
        assert!((audio.duration_seconds() - 1.0).abs() < 0.05);
        assert!(audio.samples.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_decode_respects_max_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 2.0, 440.0);

        let audio = decode_to_mono(&path, Some(0.5)).unwrap();
        assert!(audio.duration_seconds() <= 0.6);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not audio at all, not even close").unwrap();

        assert!(decode_to_mono(&path, None).is_err());
    }

    #[test]
    fn test_decode_missing_file_fails() {
        let err = decode_to_mono(Path::new("/nonexistent/file.flac"), None).unwrap_err();
        assert!(matches!(err, DecodeError::Open(_)));
    }
}
