//! Format negotiation between the requested PCM layout and a codec's
//! capability set
//!
//! Encoders rarely accept interleaved S16 at an arbitrary rate; the AAC
//! encoder for instance wants planar float at one of a fixed list of rates.
//! Negotiation picks the closest supported rate and a supported sample
//! format, and the result decides whether a resampling bridge is built.

use crate::config::{StreamConfig, INPUT_SAMPLE_FORMAT};
use crate::error::{AudioError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

/// Capability set a codec declares for audio encoding.
///
/// `None` means the codec declares no list for that axis and the requested
/// value is assumed acceptable.
#[derive(Debug, Clone, Default)]
pub struct CodecCaps {
    pub formats: Option<Vec<Sample>>,
    pub rates: Option<Vec<i32>>,
}

impl CodecCaps {
    /// Read the capability lists off a resolved encoder codec.
    pub fn probe(codec: &ffmpeg::Codec) -> Self {
        match codec.audio() {
            Ok(audio) => Self {
                formats: audio.formats().map(|f| f.collect()),
                rates: audio.rates().map(|r| r.collect()),
            },
            Err(_) => Self::default(),
        }
    }
}

/// The sample rate, sample format and channel count the codec will actually
/// process. Derived once per pipeline, immutable afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedFormat {
    pub sample_rate: i32,
    pub format: Sample,
    pub channels: u16,
}

impl NegotiatedFormat {
    /// Mono for one channel, stereo otherwise.
    pub fn channel_layout(&self) -> ChannelLayout {
        layout_for(self.channels)
    }

    /// Whether the codec-side format differs from the requested PCM layout
    /// in any field, i.e. whether a resampling bridge is required.
    pub fn differs_from(&self, requested: &StreamConfig) -> bool {
        self.sample_rate != requested.sample_rate
            || self.format != INPUT_SAMPLE_FORMAT
            || self.channels != requested.channels
    }
}

/// Mono for one channel, stereo otherwise.
pub fn layout_for(channels: u16) -> ChannelLayout {
    if channels == 1 {
        ChannelLayout::MONO
    } else {
        ChannelLayout::STEREO
    }
}

/// Negotiate the codec-side format for a requested layout.
///
/// Pure function of the request and the capability set:
/// - format: requested if listed (or no list), else the first listed format
/// - rate: closest listed rate by absolute distance, first seen wins ties;
///   no list keeps the requested rate
/// - channels: passed through untouched, the codec is not queried
pub fn negotiate(requested: &StreamConfig, caps: &CodecCaps) -> NegotiatedFormat {
    let format = match caps.formats {
        Some(ref formats) if !formats.contains(&INPUT_SAMPLE_FORMAT) => {
            formats.first().copied().unwrap_or(INPUT_SAMPLE_FORMAT)
        }
        _ => INPUT_SAMPLE_FORMAT,
    };

    let sample_rate = match caps.rates {
        Some(ref rates) if !rates.is_empty() => {
            let mut best = rates[0];
            let mut best_dist = (requested.sample_rate - rates[0]).abs();
            for &rate in &rates[1..] {
                let dist = (requested.sample_rate - rate).abs();
                if dist < best_dist {
                    best_dist = dist;
                    best = rate;
                }
            }
            best
        }
        _ => requested.sample_rate,
    };

    NegotiatedFormat {
        sample_rate,
        format,
        channels: requested.channels,
    }
}

/// Resolve an encoder by name and negotiate against its capabilities.
pub fn resolve(
    codec_name: &str,
    requested: &StreamConfig,
) -> Result<(ffmpeg::Codec, NegotiatedFormat)> {
    let codec = ffmpeg::encoder::find_by_name(codec_name)
        .ok_or_else(|| AudioError::CodecNotFound(codec_name.to_string()))?;

    let caps = CodecCaps::probe(&codec);
    let negotiated = negotiate(requested, &caps);

    tracing::debug!(
        codec = codec_name,
        requested_rate = requested.sample_rate,
        negotiated_rate = negotiated.sample_rate,
        negotiated_format = ?negotiated.format,
        "negotiated codec format"
    );

    Ok((codec, negotiated))
}
