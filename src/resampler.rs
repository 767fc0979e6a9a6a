//! Resampling bridge between the caller's PCM layout and the codec's
//!
//! Built only when negotiation changed the sample rate, sample format or
//! channel layout. Wraps FFmpeg's `SwrContext`; each conversion runs one
//! fixed-size frame through the context and reproduces the converted planes
//! into the reusable codec-side frame.

use crate::config::{StreamConfig, INPUT_SAMPLE_FORMAT};
use crate::error::{AudioError, Result};
use crate::negotiate::{layout_for, NegotiatedFormat};
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::frame;

/// PCM converter from the requested input domain to the negotiated codec
/// domain, fixed to one frame of `frame_size` samples per call.
pub struct Resampler {
    context: resampling::Context,
    /// Conversion target; `SwrContext` writes here before the plane copy.
    scratch: frame::Audio,
    frame_size: usize,
    channels: usize,
    bytes_per_sample: usize,
    planar: bool,
}

impl Resampler {
    /// Build the bridge for one pipeline.
    ///
    /// Fails with [`AudioError::FormatIncompatible`] when the underlying
    /// resampling context cannot be allocated or initialized; the caller
    /// treats that as fatal.
    pub fn new(
        requested: &StreamConfig,
        negotiated: &NegotiatedFormat,
        frame_size: usize,
    ) -> Result<Self> {
        let context = resampling::Context::get(
            INPUT_SAMPLE_FORMAT,
            layout_for(requested.channels),
            requested.sample_rate as u32,
            negotiated.format,
            negotiated.channel_layout(),
            negotiated.sample_rate as u32,
        )
        .map_err(|e| {
            AudioError::FormatIncompatible(format!(
                "cannot bridge {:?}@{} -> {:?}@{}: {}",
                INPUT_SAMPLE_FORMAT, requested.sample_rate, negotiated.format, negotiated.sample_rate, e
            ))
        })?;

        let mut scratch =
            frame::Audio::new(negotiated.format, frame_size, negotiated.channel_layout());
        scratch.set_rate(negotiated.sample_rate as u32);

        Ok(Self {
            context,
            scratch,
            frame_size,
            channels: negotiated.channels as usize,
            bytes_per_sample: negotiated.format.bytes(),
            planar: negotiated.format.is_planar(),
        })
    }

    /// Convert one input frame and copy the result into `codec_frame`.
    ///
    /// `codec_frame` keeps its configured sample count regardless of how many
    /// samples the `SwrContext` produced this call; whatever the context
    /// withholds (rate conversion routinely produces more than one frame's
    /// worth) is reported by [`backlog`](Self::backlog) and pulled out with
    /// [`drain`](Self::drain). Returns the number of samples copied.
    pub fn convert(
        &mut self,
        input: &frame::Audio,
        codec_frame: &mut frame::Audio,
    ) -> Result<usize> {
        // run() overwrites nb_samples with the produced count, so restore the
        // full capacity before each conversion.
        self.scratch.set_samples(self.frame_size);

        self.context
            .run(input, &mut self.scratch)
            .map_err(|e| AudioError::Encode(format!("resampling error: {}", e)))?;

        let produced = self.scratch.samples().min(self.frame_size);
        self.copy_planes(codec_frame, produced);
        Ok(produced)
    }

    /// Pull buffered samples out of the context without feeding new input.
    ///
    /// Returns the number of samples copied into `codec_frame`, zero when
    /// nothing is buffered. When source and output rates match the context
    /// has nothing buffered and `flush()` reports an error instead; that is
    /// not a real error, it just means empty.
    pub fn drain(&mut self, codec_frame: &mut frame::Audio) -> usize {
        self.scratch.set_samples(self.frame_size);
        match self.context.flush(&mut self.scratch) {
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("resampler drain returned non-fatal error: {}", e);
                return 0;
            }
        }

        let produced = self.scratch.samples().min(self.frame_size);
        if produced > 0 {
            self.copy_planes(codec_frame, produced);
        }
        produced
    }

    /// Samples currently buffered inside the context, in output-rate units.
    pub fn backlog(&self) -> usize {
        self.context
            .delay()
            .map(|d| d.output.max(0) as usize)
            .unwrap_or(0)
    }

    /// Reproduce converted samples into the encode-ready frame, one channel
    /// plane at a time for planar formats, a single interleaved plane
    /// otherwise. The unfilled tail is zeroed so a short conversion never
    /// leaks stale samples into the encoder.
    fn copy_planes(&self, codec_frame: &mut frame::Audio, produced: usize) {
        if self.planar {
            let filled = produced * self.bytes_per_sample;
            let full = self.frame_size * self.bytes_per_sample;
            for ch in 0..self.channels {
                let dst = &mut codec_frame.data_mut(ch)[..full];
                dst[..filled].copy_from_slice(&self.scratch.data(ch)[..filled]);
                dst[filled..].fill(0);
            }
        } else {
            let filled = produced * self.bytes_per_sample * self.channels;
            let full = self.frame_size * self.bytes_per_sample * self.channels;
            let dst = &mut codec_frame.data_mut(0)[..full];
            dst[..filled].copy_from_slice(&self.scratch.data(0)[..filled]);
            dst[filled..].fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use ffmpeg_next::util::format::sample::{Sample, Type};

    fn fltp_target(rate: i32, channels: u16) -> NegotiatedFormat {
        NegotiatedFormat {
            sample_rate: rate,
            format: Sample::F32(Type::Planar),
            channels,
        }
    }

    #[test]
    fn test_stereo_s16_to_fltp() {
        ffmpeg::init().ok();
        let requested = StreamConfig::new(0, 2, 44_100);
        let negotiated = fltp_target(44_100, 2);
        let mut bridge = Resampler::new(&requested, &negotiated, 1024).expect("bridge");

        let mut input = frame::Audio::new(INPUT_SAMPLE_FORMAT, 1024, layout_for(2));
        input.set_rate(44_100);
        // A constant full-scale-ish value survives the s16 -> f32 conversion
        // recognizably.
        for b in input.data_mut(0)[..1024 * 4].chunks_exact_mut(2) {
            b.copy_from_slice(&0x4000i16.to_le_bytes());
        }

        let mut out = frame::Audio::new(negotiated.format, 1024, negotiated.channel_layout());
        out.set_rate(44_100);
        let produced = bridge.convert(&input, &mut out).expect("convert");
        assert_eq!(produced, 1024);

        let plane = out.data(0);
        let first = f32::from_le_bytes([plane[0], plane[1], plane[2], plane[3]]);
        assert!((first - 0.5).abs() < 0.01, "got {}", first);
    }

    #[test]
    fn test_mono_bridge_stays_in_bounds() {
        // A mono bridge must only ever touch one channel plane.
        ffmpeg::init().ok();
        let requested = StreamConfig::new(0, 1, 44_100);
        let negotiated = fltp_target(48_000, 1);
        let mut bridge = Resampler::new(&requested, &negotiated, 1024).expect("bridge");

        let mut input = frame::Audio::new(INPUT_SAMPLE_FORMAT, 1024, layout_for(1));
        input.set_rate(44_100);

        let mut out = frame::Audio::new(negotiated.format, 1024, negotiated.channel_layout());
        out.set_rate(48_000);
        let produced = bridge.convert(&input, &mut out).expect("convert");
        assert!(produced <= 1024);
    }

    #[test]
    fn test_upsampling_keeps_frames_full() {
        // 44.1 kHz -> 48 kHz produces more samples than fit in one frame;
        // the overflow stays buffered in the SwrContext and keeps every
        // subsequent conversion full.
        ffmpeg::init().ok();
        let requested = StreamConfig::new(0, 2, 44_100);
        let negotiated = fltp_target(48_000, 2);
        let mut bridge = Resampler::new(&requested, &negotiated, 1024).expect("bridge");

        let mut input = frame::Audio::new(INPUT_SAMPLE_FORMAT, 1024, layout_for(2));
        input.set_rate(44_100);
        let mut out = frame::Audio::new(negotiated.format, 1024, negotiated.channel_layout());
        out.set_rate(48_000);

        // The very first call may come up a little short while the filter
        // primes; after that the backlog keeps every frame full.
        let first = bridge.convert(&input, &mut out).expect("convert");
        assert!(first >= 900 && first <= 1024, "got {}", first);
        for _ in 0..3 {
            let produced = bridge.convert(&input, &mut out).expect("convert");
            assert_eq!(produced, 1024);
        }
    }

    #[test]
    fn test_rate_conversion_conserves_samples() {
        // Every input sample must come out scaled by the rate ratio once the
        // backlog and the trailing remainder are pulled out. Without the
        // drain calls roughly 90 samples per frame would pile up in the
        // context and the output would run ~8% short.
        ffmpeg::init().ok();
        let requested = StreamConfig::new(0, 2, 44_100);
        let negotiated = fltp_target(48_000, 2);
        let mut bridge = Resampler::new(&requested, &negotiated, 1024).expect("bridge");

        let mut input = frame::Audio::new(INPUT_SAMPLE_FORMAT, 1024, layout_for(2));
        input.set_rate(44_100);
        let mut out = frame::Audio::new(negotiated.format, 1024, negotiated.channel_layout());
        out.set_rate(48_000);

        let frames = 50usize;
        let mut total = 0usize;
        for _ in 0..frames {
            total += bridge.convert(&input, &mut out).expect("convert");
            while bridge.backlog() >= 1024 {
                total += bridge.drain(&mut out);
            }
        }
        // Trailing remainder, shorter than one frame
        loop {
            let produced = bridge.drain(&mut out);
            if produced == 0 {
                break;
            }
            total += produced;
        }

        let expected = frames * 1024 * 48_000 / 44_100;
        assert!(
            total.abs_diff(expected) <= 256,
            "got {} samples, expected ~{}",
            total,
            expected
        );
    }
}
