//! minwebm - Minimal incremental WebM muxer
//!
//! Assembles pre-encoded VP8 keyframes (raw WebP byte strings, or RGBA
//! images run through a host-supplied [`WebpEncoder`]) into a playable WebM
//! container. Output is produced incrementally, either buffered in memory or
//! streamed to a seekable target, so arbitrarily long videos never hold
//! their encoded bytes in memory at once.
//!
//! ```no_run
//! use minwebm::{WebmWriter, WriterOptions};
//!
//! # fn main() -> minwebm::Result<()> {
//! # let first_webp_frame: Vec<u8> = vec![];
//! let mut writer = WebmWriter::new(WriterOptions {
//!     frame_rate: Some(30.0),
//!     ..WriterOptions::default()
//! })?;
//!
//! writer.add_webp_frame(&first_webp_frame, None, None)?;
//! let blob = writer.complete()?;
//! # Ok(())
//! # }
//! ```

pub mod ebml;
pub mod encoder;
pub mod error;
pub mod muxer;
pub mod sink;
pub mod stream;
pub mod webp;

pub use encoder::WebpEncoder;
pub use error::{Error, Result};
pub use muxer::{WebmWriter, WriterOptions};
pub use sink::Blob;
