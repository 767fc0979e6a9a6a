//! PCM audio encoding pipeline
//!
//! Takes raw interleaved 16-bit PCM in arbitrarily sized chunks, negotiates
//! a format the chosen codec actually accepts, buffers input into fixed-size
//! codec frames (bridging through a resampler when needed), and muxes the
//! compressed packets into a container file with correct duration metadata.
//!
//! ```no_run
//! use audio_writer::{AudioWriter, StreamConfig};
//!
//! let config = StreamConfig::new(64_000, 2, 44_100);
//! let mut writer = AudioWriter::create(&config, "out.aac", "aac")?;
//! writer.encode(&[0u8; 4096]); // feed capture chunks as they arrive
//! writer.finish();
//! # Ok::<(), audio_writer::AudioError>(())
//! ```

pub mod config;
pub mod error;
pub mod framing;
pub mod negotiate;
pub mod resampler;
pub mod writer;

pub use config::StreamConfig;
pub use error::{AudioError, Result};
pub use negotiate::NegotiatedFormat;
pub use writer::{AudioWriter, PipelineStats};

use ffmpeg_next as ffmpeg;

/// Initialize the FFmpeg library.
///
/// Safe to call more than once; [`AudioWriter::create`] calls it on your
/// behalf.
pub fn init() -> Result<()> {
    ffmpeg::init().map_err(|e| AudioError::Init(format!("ffmpeg::init() failed: {}", e)))
}
