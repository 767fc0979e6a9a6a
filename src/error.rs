use thiserror::Error;

/// Main error type for the audio writer pipeline.
///
/// Variants split into two families: fatal initialization errors surfaced by
/// [`crate::writer::AudioWriter::create`] (the caller must not feed PCM after
/// one of these), and steady-state errors (`Encode`, `MuxWrite`,
/// `TrailerWrite`) that are logged and swallowed so a single bad cycle never
/// halts the stream.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("FFmpeg initialization failed: {0}")]
    Init(String),

    #[error("Codec not found: {0}")]
    CodecNotFound(String),

    #[error("Requested PCM format cannot be bridged to the codec format: {0}")]
    FormatIncompatible(String),

    #[error("Failed to open output container: {0}")]
    ContainerOpen(String),

    #[error("Stream configuration failed: {0}")]
    StreamConfig(String),

    #[error("Failed to write container header: {0}")]
    HeaderWrite(String),

    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Failed to write packet: {0}")]
    MuxWrite(String),

    #[error("Failed to write container trailer: {0}")]
    TrailerWrite(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AudioError>;
