//! Fixed-size frame accumulation
//!
//! Callers deliver PCM in whatever chunk sizes their capture path produces;
//! the encoder consumes exactly one frame's worth of bytes at a time. The
//! [`FrameBuffer`] bridges the two: it is filled incrementally and the
//! pipeline encodes whenever it reaches capacity.

/// Rolling byte buffer holding at most one codec frame of PCM in the
/// requested input format.
///
/// Capacity never changes after construction. The owner is responsible for
/// calling [`FrameBuffer::reset`] after consuming a full buffer; until then
/// further input is not accepted.
pub struct FrameBuffer {
    buf: Vec<u8>,
    cursor: usize,
}

impl FrameBuffer {
    /// Create a buffer sized to exactly one frame's bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            cursor: 0,
        }
    }

    /// Copy as much of `input` as fits and return the uncopied remainder.
    ///
    /// When the buffer is already full nothing is copied and `input` is
    /// returned unchanged.
    pub fn fill<'a>(&mut self, input: &'a [u8]) -> &'a [u8] {
        let take = input.len().min(self.buf.len() - self.cursor);
        self.buf[self.cursor..self.cursor + take].copy_from_slice(&input[..take]);
        self.cursor += take;
        &input[take..]
    }

    /// Whether the buffer holds exactly one full frame.
    pub fn is_full(&self) -> bool {
        self.cursor == self.buf.len()
    }

    /// Discard the buffered bytes, making room for the next frame.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// The currently buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.cursor]
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.cursor
    }

    /// Whether no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// One frame's worth of bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `input` through the buffer the way the pipeline does, counting
    /// emitted frames.
    fn drive(fb: &mut FrameBuffer, mut input: &[u8]) -> usize {
        let mut frames = 0;
        loop {
            input = fb.fill(input);
            if fb.is_full() {
                frames += 1;
                fb.reset();
            }
            if input.is_empty() {
                break;
            }
        }
        frames
    }

    #[test]
    fn test_partial_fill_emits_nothing() {
        let mut fb = FrameBuffer::new(8);
        assert_eq!(drive(&mut fb, &[1, 2, 3]), 0);
        assert_eq!(fb.len(), 3);
        assert_eq!(fb.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_exact_fill_emits_one() {
        let mut fb = FrameBuffer::new(4);
        assert_eq!(drive(&mut fb, &[1, 2, 3, 4]), 1);
        assert!(fb.is_empty());
    }

    #[test]
    fn test_large_chunk_emits_many_and_retains_remainder() {
        let mut fb = FrameBuffer::new(4);
        // 11 bytes = 2 full frames + 3 remainder
        let input: Vec<u8> = (0..11).collect();
        assert_eq!(drive(&mut fb, &input), 2);
        assert_eq!(fb.as_slice(), &[8, 9, 10]);
    }

    #[test]
    fn test_frame_alignment_across_calls() {
        // k full frames plus remainder r, then a top-up of capacity - r
        // fires exactly one more frame
        let mut fb = FrameBuffer::new(10);
        let mut frames = 0;
        for chunk in [7usize, 7, 7, 7] {
            frames += drive(&mut fb, &vec![0u8; chunk]);
        }
        // 28 bytes = 2 frames + 8 remainder
        assert_eq!(frames, 2);
        assert_eq!(fb.len(), 8);
        assert_eq!(drive(&mut fb, &[0u8; 2]), 1);
        assert!(fb.is_empty());
    }

    #[test]
    fn test_fill_preserves_byte_order() {
        let mut fb = FrameBuffer::new(6);
        let rest = fb.fill(&[1, 2, 3, 4]);
        assert!(rest.is_empty());
        let rest = fb.fill(&[5, 6, 7, 8]);
        assert_eq!(rest, &[7, 8]);
        assert!(fb.is_full());
        assert_eq!(fb.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }
}
