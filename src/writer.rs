//! Encode-and-mux pipeline
//!
//! [`AudioWriter`] owns the whole chain for one output file: the container
//! context, the opened encoder, the rolling frame buffer, the reusable
//! frames and the optional resampling bridge. Construction runs the
//! strictly-forward init sequence (container → stream → codec → frames →
//! header); a constructed writer is always in the encoding state, and
//! [`AudioWriter::finish`] tears everything down in dependency order.

use std::path::Path;
use std::time::{Duration, Instant};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::frame;

use crate::config::{StreamConfig, INPUT_SAMPLE_FORMAT};
use crate::error::{AudioError, Result};
use crate::framing::FrameBuffer;
use crate::negotiate::{self, layout_for, NegotiatedFormat};
use crate::resampler::Resampler;

/// Fallback frame size for codecs that do not declare one
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/// Running diagnostics for one pipeline instance.
///
/// `duration_secs` is correctness-relevant (it becomes the container
/// duration); the time counters are informational only.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Packets successfully handed to the muxer
    pub packets_written: u64,
    /// Rescaled timestamp of the last muxed packet, in seconds
    pub duration_secs: f64,
    /// Total time spent in the encoder
    pub encode_time: Duration,
    /// Total time spent in the resampling bridge
    pub resample_time: Duration,
}

/// Synchronous PCM-to-container encoding pipeline.
///
/// Feed interleaved S16 PCM with [`encode`](Self::encode) in chunks of any
/// size; call [`finish`](Self::finish) exactly once when done. Dropping the
/// writer finalizes it as well. Single-threaded by design — the caller
/// serializes all access.
pub struct AudioWriter {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Audio,
    stream_index: usize,
    stream_time_base: ffmpeg::Rational,
    encoder_time_base: ffmpeg::Rational,
    negotiated: NegotiatedFormat,
    frame_size: usize,
    frame_buf: FrameBuffer,
    /// Reusable frame in the caller's requested format
    input_frame: frame::Audio,
    /// Bridge plus its reusable codec-format frame, present iff negotiation
    /// changed the format
    bridge: Option<(Resampler, frame::Audio)>,
    next_pts: i64,
    stats: PipelineStats,
    finished: bool,
}

impl AudioWriter {
    /// Open the container at `path`, resolve `codec_name`, negotiate formats
    /// and write the container header.
    ///
    /// Every failure here is fatal and returns before a partially-built
    /// pipeline can exist; resources acquired up to that point are released
    /// by their own destructors.
    pub fn create<P: AsRef<Path>>(
        config: &StreamConfig,
        path: P,
        codec_name: &str,
    ) -> Result<Self> {
        crate::init()?;

        let path = path.as_ref();
        let mut output = ffmpeg::format::output(path)
            .map_err(|e| AudioError::ContainerOpen(format!("{}: {}", path.display(), e)))?;

        let (codec, negotiated) = negotiate::resolve(codec_name, config)?;
        let encoder_time_base = ffmpeg::Rational::new(1, negotiated.sample_rate);

        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        let mut ost = output
            .add_stream(codec)
            .map_err(|e| AudioError::StreamConfig(format!("add_stream: {}", e)))?;
        let stream_index = ost.index();

        // Configure the encoder context before opening, as the codec requires
        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(encoder_time_base);
        let mut audio_enc = context
            .encoder()
            .audio()
            .map_err(|e| AudioError::StreamConfig(format!("not an audio encoder: {}", e)))?;

        audio_enc.set_rate(negotiated.sample_rate);
        audio_enc.set_format(negotiated.format);
        audio_enc.set_channel_layout(negotiated.channel_layout());
        audio_enc.set_bit_rate(config.effective_bit_rate());
        if global_header {
            audio_enc.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }

        let encoder = audio_enc
            .open_as(codec)
            .map_err(|e| AudioError::StreamConfig(format!("cannot open {}: {}", codec_name, e)))?;

        let frame_size = match encoder.frame_size() as usize {
            0 => DEFAULT_FRAME_SIZE,
            n => n,
        };

        ost.set_parameters(encoder_parameters(&encoder));
        ost.set_time_base(encoder_time_base);
        drop(ost);

        // Input-side frame wired to the requested layout; the frame buffer
        // holds exactly the bytes of one such frame.
        let mut input_frame =
            frame::Audio::new(INPUT_SAMPLE_FORMAT, frame_size, layout_for(config.channels));
        input_frame.set_rate(config.sample_rate as u32);
        let frame_buf = FrameBuffer::new(frame_size * config.bytes_per_sample());

        let bridge = if negotiated.differs_from(config) {
            let resampler = Resampler::new(config, &negotiated, frame_size)?;
            let mut codec_frame =
                frame::Audio::new(negotiated.format, frame_size, negotiated.channel_layout());
            codec_frame.set_rate(negotiated.sample_rate as u32);
            tracing::info!(
                requested_rate = config.sample_rate,
                negotiated_rate = negotiated.sample_rate,
                negotiated_format = ?negotiated.format,
                "resampling bridge constructed"
            );
            Some((resampler, codec_frame))
        } else {
            None
        };

        output
            .write_header()
            .map_err(|e| AudioError::HeaderWrite(format!("{}: {}", path.display(), e)))?;

        // The muxer may have overridden the stream timebase during the
        // header write; read back what it settled on.
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(encoder_time_base);

        tracing::info!(
            path = %path.display(),
            codec = codec_name,
            frame_size,
            bridged = bridge.is_some(),
            "audio writer ready"
        );

        Ok(Self {
            output,
            encoder,
            stream_index,
            stream_time_base,
            encoder_time_base,
            negotiated,
            frame_size,
            frame_buf,
            input_frame,
            bridge,
            next_pts: 0,
            stats: PipelineStats::default(),
            finished: false,
        })
    }

    /// Feed raw interleaved S16 PCM bytes.
    ///
    /// Every time the internal buffer reaches one full frame an encode cycle
    /// runs; whatever is left over stays buffered for the next call. Encode
    /// and mux failures are logged and that cycle's output dropped — the
    /// pipeline keeps going.
    pub fn encode(&mut self, pcm: &[u8]) {
        if self.finished {
            tracing::debug!("encode called after finish, ignoring");
            return;
        }

        let mut rest = pcm;
        loop {
            rest = self.frame_buf.fill(rest);
            if self.frame_buf.is_full() {
                if let Err(e) = self.encode_buffered_frame() {
                    tracing::warn!(error = %e, "encode cycle failed, dropping frame");
                }
                self.frame_buf.reset();
            }
            if rest.is_empty() {
                break;
            }
        }
    }

    /// Run one full frame from the buffer through bridge, encoder and muxer.
    ///
    /// A rate-converting bridge produces more than one frame's worth of
    /// samples per input frame; the overflow stays buffered inside the
    /// `SwrContext`. After the converted frame is sent, further full frames
    /// are drained from that backlog and sent as extra encode cycles, so no
    /// converted audio is held back past the input that produced it.
    fn encode_buffered_frame(&mut self) -> Result<()> {
        let frame_bytes = self.frame_buf.capacity();
        self.input_frame.data_mut(0)[..frame_bytes].copy_from_slice(self.frame_buf.as_slice());

        let mut converted = false;
        loop {
            let frame = match self.bridge.as_mut() {
                Some((resampler, codec_frame)) => {
                    let started = Instant::now();
                    if converted {
                        resampler.drain(codec_frame);
                    } else {
                        resampler.convert(&self.input_frame, codec_frame)?;
                        converted = true;
                    }
                    self.stats.resample_time += started.elapsed();
                    codec_frame
                }
                None => &mut self.input_frame,
            };

            frame.set_pts(Some(self.next_pts));
            self.next_pts += self.frame_size as i64;

            let started = Instant::now();
            self.encoder
                .send_frame(frame)
                .map_err(|e| AudioError::Encode(format!("send_frame: {}", e)))?;
            self.drain_packets()?;
            self.stats.encode_time += started.elapsed();

            let backlog = match self.bridge.as_ref() {
                Some((resampler, _)) => resampler.backlog(),
                None => 0,
            };
            if backlog < self.frame_size {
                return Ok(());
            }
        }
    }

    /// Pull every packet the encoder has ready and hand it to the muxer.
    ///
    /// The codec buffering input for a while (EAGAIN) is expected and not an
    /// error; a cycle that produces no packet leaves all state untouched.
    fn drain_packets(&mut self) -> Result<()> {
        loop {
            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => self.mux_packet(packet),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => {
                    return Err(AudioError::Encode(format!("receive_packet: {}", e)));
                }
            }
        }
    }

    /// Timestamp, flag and write one compressed packet.
    ///
    /// A failed container write is logged and the packet dropped; losing one
    /// packet must not prevent finalization later.
    fn mux_packet(&mut self, mut packet: ffmpeg::codec::packet::Packet) {
        if packet.pts().is_none() {
            let fallback = self.stats.packets_written as i64 * self.frame_size as i64;
            packet.set_pts(Some(fallback));
            packet.set_dts(Some(fallback));
        }

        packet.set_stream(self.stream_index);
        // Audio packets are independently decodable
        packet.set_flags(ffmpeg::packet::Flags::KEY);
        packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
        let pts = packet.pts();

        match packet.write_interleaved(&mut self.output) {
            Ok(()) => {
                self.stats.packets_written += 1;
                // Duration tracks the last packet the muxer actually took
                if let Some(pts) = pts {
                    self.stats.duration_secs = pts as f64 * f64::from(self.stream_time_base);
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to write packet, dropping"),
        }
    }

    /// Flush the encoder, stamp the tracked duration on the container and
    /// write the trailer.
    ///
    /// Idempotent and infallible outward: every step is best-effort and a
    /// repeated call is a no-op. Called from `Drop` as well, so an early
    /// return in the caller still finalizes the file.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        // A trailing partial frame (less than one frame's bytes) is dropped.
        if !self.frame_buf.is_empty() {
            tracing::debug!(
                bytes = self.frame_buf.len(),
                "discarding trailing partial frame"
            );
        }

        // The bridge empties before the encoder: samples the resampler still
        // holds have to reach the codec ahead of its EOF.
        self.flush_bridge();

        match self.encoder.send_eof() {
            Ok(()) => {
                if let Err(e) = self.drain_packets() {
                    tracing::warn!(error = %e, "error draining encoder at finish");
                }
            }
            Err(e) => tracing::warn!(error = %e, "encoder flush failed"),
        }

        // Reaching this point implies the header write succeeded (a writer
        // is never constructed otherwise), so the trailer is always valid.
        unsafe {
            (*self.output.as_mut_ptr()).duration =
                (self.stats.duration_secs * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        }
        if let Err(e) = self.output.write_trailer() {
            tracing::warn!(error = %AudioError::TrailerWrite(e.to_string()), "trailer not written");
        }

        tracing::info!(
            packets = self.stats.packets_written,
            duration_secs = self.stats.duration_secs,
            encode_ms = self.stats.encode_time.as_millis() as u64,
            resample_ms = self.stats.resample_time.as_millis() as u64,
            "audio writer finalized"
        );
    }

    /// Push any samples still buffered in the resampling bridge through the
    /// encoder.
    ///
    /// The final short frame comes out zero-padded to the codec frame size,
    /// which adds at most one frame of silence. Best-effort like the rest of
    /// teardown: failures are logged, never surfaced.
    fn flush_bridge(&mut self) {
        loop {
            let produced = match self.bridge.as_mut() {
                Some((resampler, codec_frame)) => {
                    let started = Instant::now();
                    let produced = resampler.drain(codec_frame);
                    self.stats.resample_time += started.elapsed();
                    produced
                }
                None => return,
            };
            if produced == 0 {
                return;
            }

            let pts = self.next_pts;
            self.next_pts += self.frame_size as i64;
            let sent = match self.bridge.as_mut() {
                Some((_, codec_frame)) => {
                    codec_frame.set_pts(Some(pts));
                    self.encoder.send_frame(codec_frame)
                }
                None => return,
            };
            match sent {
                Ok(()) => {
                    if let Err(e) = self.drain_packets() {
                        tracing::warn!(error = %e, "error draining encoder during bridge flush");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "bridge flush send_frame failed"),
            }

            if produced < self.frame_size {
                return;
            }
        }
    }

    /// The codec-side format negotiation result.
    pub fn negotiated(&self) -> &NegotiatedFormat {
        &self.negotiated
    }

    /// Samples per channel the codec consumes per encode cycle.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Cumulative stream duration in seconds, from the last muxed packet.
    pub fn duration(&self) -> f64 {
        self.stats.duration_secs
    }

    /// Diagnostic counters for this pipeline.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

impl Drop for AudioWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Codec parameters for the muxer stream, copied from the opened encoder's
/// AVCodecContext into a fresh AVCodecParameters struct.
fn encoder_parameters(encoder: &ffmpeg::encoder::Audio) -> ffmpeg::codec::Parameters {
    use std::ops::Deref;
    use std::sync::Arc;
    let ctx: &codec::Context = encoder.deref();
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Arc<dyn std::any::Any + Send + Sync>>)
    }
}
