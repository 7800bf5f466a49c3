//! Error types for minwebm

use thiserror::Error;

/// Result type alias for minwebm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for minwebm operations
#[derive(Error, Debug)]
pub enum Error {
    /// Neither a frame duration nor a frame rate was configured
    #[error("Missing frame timing: set either frame_duration_ms or frame_rate")]
    MissingFrameTiming,

    /// Frame duration must be a positive, finite number of milliseconds
    #[error("Bad frame duration: {0} ms")]
    BadFrameDuration(f64),

    /// Matroska track numbers are limited to [1, 126]
    #[error("Bad track number {0}: must be in [1, 126]")]
    BadTrackNumber(u64),

    /// WebP parse failed or no VP8 keyframe chunk was found
    #[error("Bad WebP data: {0}")]
    BadWebp(&'static str),

    /// An overwrite touched bytes belonging to more than one buffered chunk
    #[error("Overwrite of {length} bytes at offset {offset} crosses chunk boundaries")]
    OverwriteCrossesChunkBoundaries { offset: u64, length: usize },

    /// Seek target past the end of everything written so far
    #[error("Seek to offset {offset} is beyond end of data (length {length})")]
    SeekBeyondEnd { offset: u64, length: u64 },

    /// The muxer has been completed; no further calls are accepted
    #[error("Muxer already completed")]
    Completed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
