//! `FrameAssembler` — turns an arbitrarily-chunked sample stream into
//! fixed-length, non-overlapping analysis frames.
//!
//! The assembler owns one buffer of exactly the frame length and a write
//! cursor (`seeker`). Chunks are copied at the cursor; when a chunk fills the
//! buffer, the completed frame is emitted in stream order and the chunk's
//! remainder seeds the reset buffer at offset 0. At most one frame is emitted
//! per `add` call.

use tracing::warn;

use crate::buffering::frame::AudioFrame;
use crate::error::{AriaError, Result};

pub struct FrameAssembler {
    buf: Vec<f32>,
    /// Next free slot. Invariant: samples accepted minus samples emitted
    /// equals `seeker` (as long as no oversized chunk forced a drop).
    seeker: usize,
    sample_rate: u32,
}

impl FrameAssembler {
    pub fn new(frame_len: usize, sample_rate: u32) -> Result<Self> {
        if frame_len == 0 {
            return Err(AriaError::Config("frame length must be non-zero".into()));
        }
        if sample_rate == 0 {
            return Err(AriaError::Config("sample rate must be non-zero".into()));
        }
        Ok(Self {
            buf: vec![0.0; frame_len],
            seeker: 0,
            sample_rate,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.buf.len()
    }

    /// Samples currently buffered and not yet emitted.
    pub fn buffered(&self) -> usize {
        self.seeker
    }

    /// Feed one chunk of samples, in call order.
    ///
    /// Returns a completed frame once enough samples have accumulated. The
    /// single-emission contract means a chunk spanning more than one whole
    /// frame beyond the emitted one cannot be represented; those excess
    /// frames are dropped with a warning and the newest partial tail is kept
    /// so stream alignment survives. Real capture chunks are a few
    /// milliseconds, so this only fires on a misbehaving source.
    pub fn add(&mut self, chunk: &[f32]) -> Option<AudioFrame> {
        let frame_len = self.buf.len();

        if self.seeker + chunk.len() >= frame_len {
            let take = frame_len - self.seeker;
            self.buf[self.seeker..].copy_from_slice(&chunk[..take]);
            let frame = AudioFrame::new(self.buf.clone(), self.sample_rate);

            let mut rest = &chunk[take..];
            if rest.len() >= frame_len {
                let dropped = rest.len() / frame_len;
                warn!(
                    chunk_len = chunk.len(),
                    frame_len,
                    dropped_frames = dropped,
                    "oversized chunk exceeds single-frame emission; dropping whole excess frames"
                );
                rest = &rest[dropped * frame_len..];
            }
            self.buf[..rest.len()].copy_from_slice(rest);
            self.seeker = rest.len();
            Some(frame)
        } else {
            self.buf[self.seeker..self.seeker + chunk.len()].copy_from_slice(chunk);
            self.seeker += chunk.len();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut FrameAssembler, samples: &[f32], chunk_size: usize) -> Vec<AudioFrame> {
        samples
            .chunks(chunk_size)
            .filter_map(|chunk| assembler.add(chunk))
            .collect()
    }

    #[test]
    fn emits_identical_frames_regardless_of_chunk_slicing() {
        let samples: Vec<f32> = (0..3000).map(|i| i as f32).collect();

        let mut one_shot = FrameAssembler::new(1000, 48_000).unwrap();
        let mut tiny = FrameAssembler::new(1000, 48_000).unwrap();

        let frames_a = feed(&mut one_shot, &samples, 3000);
        let frames_b = feed(&mut tiny, &samples, 10);

        assert_eq!(frames_a.len(), 3);
        assert_eq!(frames_b.len(), 3);
        for (a, b) in frames_a.iter().zip(&frames_b) {
            assert_eq!(a.samples, b.samples);
        }

        let emitted: Vec<f32> = frames_a.into_iter().flat_map(|f| f.samples).collect();
        assert_eq!(emitted, samples);
    }

    #[test]
    fn exact_fill_emits_and_resets_cursor() {
        let mut assembler = FrameAssembler::new(4, 48_000).unwrap();
        assert!(assembler.add(&[1.0, 2.0]).is_none());
        let frame = assembler.add(&[3.0, 4.0]).expect("frame on exact fill");
        assert_eq!(frame.samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn overflow_carries_remainder_in_stream_order() {
        let mut assembler = FrameAssembler::new(4, 48_000).unwrap();
        assert!(assembler.add(&[1.0, 2.0, 3.0]).is_none());
        assert_eq!(assembler.buffered(), 3);

        let frame = assembler.add(&[4.0, 5.0, 6.0]).expect("overflow emits");
        assert_eq!(frame.samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(assembler.buffered(), 2);

        let next = assembler.add(&[7.0, 8.0]).expect("remainder continues");
        assert_eq!(next.samples, vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn accepted_minus_emitted_equals_seeker() {
        let mut assembler = FrameAssembler::new(7, 48_000).unwrap();
        let mut accepted = 0usize;
        let mut emitted = 0usize;
        for chunk_len in [1usize, 5, 3, 6, 2, 4, 1, 1] {
            let chunk = vec![0.5f32; chunk_len];
            accepted += chunk_len;
            if let Some(frame) = assembler.add(&chunk) {
                emitted += frame.len();
            }
            assert_eq!(accepted - emitted, assembler.buffered());
        }
    }

    #[test]
    fn oversized_chunk_drops_whole_frames_and_keeps_newest_tail() {
        let mut assembler = FrameAssembler::new(4, 48_000).unwrap();
        // 10 samples: one frame emitted, one whole frame dropped, 2 kept.
        let chunk: Vec<f32> = (1..=10).map(|i| i as f32).collect();
        let frame = assembler.add(&chunk).expect("first frame emitted");
        assert_eq!(frame.samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(assembler.buffered(), 2);

        let next = assembler.add(&[11.0, 12.0]).expect("tail stays aligned");
        assert_eq!(next.samples, vec![9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn zero_frame_len_is_a_config_error() {
        assert!(matches!(
            FrameAssembler::new(0, 48_000),
            Err(AriaError::Config(_))
        ));
    }
}
