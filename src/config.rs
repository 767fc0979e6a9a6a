//! Stream configuration

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::format::sample::Sample;
use serde::{Deserialize, Serialize};

/// Bit rate used when the caller passes a non-positive value
pub const DEFAULT_BIT_RATE: i64 = 64_000;

/// Sample rate used by the convenience constructor
pub const DEFAULT_SAMPLE_RATE: i32 = 44_100;

/// The fixed PCM layout callers feed into the pipeline: 16-bit signed,
/// interleaved.
pub const INPUT_SAMPLE_FORMAT: Sample = Sample::I16(ffmpeg::util::format::sample::Type::Packed);

/// Bytes per sample of [`INPUT_SAMPLE_FORMAT`]
pub const INPUT_BYTES_PER_SAMPLE: usize = 2;

/// Requested PCM stream layout, immutable once the pipeline is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Channel count; 1 maps to mono, anything else to stereo
    pub channels: u16,

    /// Requested sample rate in Hz
    pub sample_rate: i32,

    /// Requested bit rate in bps; values <= 0 fall back to [`DEFAULT_BIT_RATE`]
    pub bit_rate: i64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bit_rate: DEFAULT_BIT_RATE,
        }
    }
}

impl StreamConfig {
    /// Create a config from the caller's requested parameters.
    pub fn new(bit_rate: i64, channels: u16, sample_rate: i32) -> Self {
        Self {
            channels,
            sample_rate,
            bit_rate,
        }
    }

    /// Convenience constructor defaulting the sample rate to 44.1 kHz.
    pub fn with_default_rate(bit_rate: i64, channels: u16) -> Self {
        Self::new(bit_rate, channels, DEFAULT_SAMPLE_RATE)
    }

    /// The bit rate actually handed to the encoder.
    pub fn effective_bit_rate(&self) -> usize {
        if self.bit_rate > 0 {
            self.bit_rate as usize
        } else {
            DEFAULT_BIT_RATE as usize
        }
    }

    /// Bytes occupied by one interleaved S16 sample across all channels.
    pub fn bytes_per_sample(&self) -> usize {
        INPUT_BYTES_PER_SAMPLE * self.channels as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.channels, 2);
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.bit_rate, DEFAULT_BIT_RATE);
    }

    #[test]
    fn test_bit_rate_fallback() {
        assert_eq!(
            StreamConfig::new(0, 2, 48_000).effective_bit_rate(),
            DEFAULT_BIT_RATE as usize
        );
        assert_eq!(
            StreamConfig::new(-1, 2, 48_000).effective_bit_rate(),
            DEFAULT_BIT_RATE as usize
        );
        assert_eq!(
            StreamConfig::new(128_000, 2, 48_000).effective_bit_rate(),
            128_000
        );
    }

    #[test]
    fn test_convenience_rate() {
        let cfg = StreamConfig::with_default_rate(96_000, 1);
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.channels, 1);
    }

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(StreamConfig::new(0, 1, 44_100).bytes_per_sample(), 2);
        assert_eq!(StreamConfig::new(0, 2, 44_100).bytes_per_sample(), 4);
    }
}
