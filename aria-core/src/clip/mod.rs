//! Audio clip encoding.
//!
//! The pipeline persists one encoded clip per detected frame. Codec choice
//! walks a preference-ordered list and takes the first codec this build can
//! encode; with no match the listening session fails to start with a
//! distinct error. This build ships the portable WAV encoder; the compressed
//! codecs stay in the preference list for builds that link an encoder for
//! them.

use std::io::Cursor;

use tracing::debug;

use crate::buffering::frame::AudioFrame;
use crate::error::{AriaError, Result};
use crate::store::EncodedClip;

/// Known clip container/codec combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipCodec {
    OpusOgg,
    OpusMp4,
    Ogg,
    Mp4,
    Wav,
}

impl ClipCodec {
    pub fn mime(&self) -> &'static str {
        match self {
            ClipCodec::OpusOgg => "audio/ogg; codecs=opus",
            ClipCodec::OpusMp4 => "audio/mp4; codecs=opus",
            ClipCodec::Ogg => "audio/ogg",
            ClipCodec::Mp4 => "audio/mp4",
            ClipCodec::Wav => "audio/wav",
        }
    }
}

/// Default preference order: compressed codecs first, WAV as the portable
/// fallback.
pub const DEFAULT_CODEC_PREFERENCE: &[ClipCodec] = &[
    ClipCodec::OpusOgg,
    ClipCodec::OpusMp4,
    ClipCodec::Ogg,
    ClipCodec::Mp4,
    ClipCodec::Wav,
];

/// Encodes one analysis frame into an immutable clip blob.
pub trait ClipEncoder: Send {
    fn codec(&self) -> ClipCodec;

    fn encode(&self, frame: &AudioFrame) -> Result<EncodedClip>;
}

/// Walk `preference` and return an encoder for the first supported codec.
///
/// `target_bitrate` applies to compressed codecs; the WAV encoder ignores it
/// and reports its actual PCM bitrate.
///
/// # Errors
/// `AriaError::NoSupportedCodec` when nothing in the list is supported.
pub fn negotiate_encoder(
    preference: &[ClipCodec],
    target_bitrate: u32,
) -> Result<Box<dyn ClipEncoder>> {
    let _ = target_bitrate;
    for &codec in preference {
        match codec {
            ClipCodec::Wav => {
                debug!(?codec, "negotiated clip codec");
                return Ok(Box::new(WavClipEncoder));
            }
            // no opus/ogg/mp4 encoder linked in this build
            ClipCodec::OpusOgg | ClipCodec::OpusMp4 | ClipCodec::Ogg | ClipCodec::Mp4 => continue,
        }
    }
    Err(AriaError::NoSupportedCodec)
}

/// 16-bit PCM WAV encoder.
pub struct WavClipEncoder;

impl ClipEncoder for WavClipEncoder {
    fn codec(&self) -> ClipCodec {
        ClipCodec::Wav
    }

    fn encode(&self, frame: &AudioFrame) -> Result<EncodedClip> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: frame.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).map_err(|e| AriaError::Other(e.into()))?;
            for &sample in &frame.samples {
                let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                writer
                    .write_sample(v)
                    .map_err(|e| AriaError::Other(e.into()))?;
            }
            writer.finalize().map_err(|e| AriaError::Other(e.into()))?;
        }

        Ok(EncodedClip {
            bytes: cursor.into_inner(),
            mime: ClipCodec::Wav.mime().to_string(),
            sample_rate: frame.sample_rate,
            bitrate: frame.sample_rate * 16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_falls_through_to_wav() {
        let encoder = negotiate_encoder(DEFAULT_CODEC_PREFERENCE, 96_000).unwrap();
        assert_eq!(encoder.codec(), ClipCodec::Wav);
    }

    #[test]
    fn negotiation_fails_without_a_supported_codec() {
        let result = negotiate_encoder(&[ClipCodec::OpusOgg, ClipCodec::Mp4], 96_000);
        assert!(matches!(result, Err(AriaError::NoSupportedCodec)));
        assert!(matches!(
            negotiate_encoder(&[], 96_000),
            Err(AriaError::NoSupportedCodec)
        ));
    }

    #[test]
    fn wav_clip_round_trips_through_hound() {
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let frame = AudioFrame::new(samples.clone(), 48_000);
        let clip = WavClipEncoder.encode(&frame).unwrap();

        assert_eq!(clip.mime, "audio/wav");
        assert_eq!(clip.sample_rate, 48_000);
        assert_eq!(&clip.bytes[..4], b"RIFF");

        let mut reader = hound::WavReader::new(Cursor::new(clip.bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 48_000);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), samples.len());
        for (d, s) in decoded.iter().zip(&samples) {
            let back = *d as f32 / i16::MAX as f32;
            assert!((back - s).abs() < 1e-3);
        }
    }
}
