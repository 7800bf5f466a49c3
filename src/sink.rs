//! Append-or-overwrite byte sink backing the muxer
//!
//! Memory mode keeps every write as an opaque chunk so large payloads are
//! never recopied on append; seeking back and rewriting is only legal inside
//! a single existing chunk. Target mode streams to any seekable writer.

use crate::{Error, Result};
use std::io::{Seek, SeekFrom, Write};

/// MIME type attached to materialized in-memory output
pub const WEBM_MIME_TYPE: &str = "video/webm";

/// Seekable write target for streaming output (a `File` in practice)
pub trait WriteSeek: Write + Seek {}

impl<T: Write + Seek> WriteSeek for T {}

/// One buffered write at an absolute offset
#[derive(Debug)]
struct Chunk {
    offset: u64,
    data: Vec<u8>,
}

impl Chunk {
    fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

enum Backend {
    /// Ordered, non-overlapping chunks
    Memory { chunks: Vec<Chunk> },
    /// Positional writes against a host-supplied target
    Target { target: Box<dyn WriteSeek> },
}

/// Finalized in-memory output: the concatenated bytes plus their MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Byte sink with an absolute write cursor
///
/// `length` is one past the highest byte ever written and never decreases;
/// the cursor may be moved backwards into already-written territory to patch
/// reserved fields.
pub struct BlobSink {
    backend: Backend,
    pos: u64,
    length: u64,
}

impl BlobSink {
    /// Sink that buffers chunks in memory until [`BlobSink::complete`]
    pub fn new_memory() -> Self {
        Self {
            backend: Backend::Memory { chunks: Vec::new() },
            pos: 0,
            length: 0,
        }
    }

    /// Sink that streams to a seekable writer
    pub fn new_target(target: Box<dyn WriteSeek>) -> Self {
        Self {
            backend: Backend::Target { target },
            pos: 0,
            length: 0,
        }
    }

    /// Current write cursor
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Total bytes ever addressed
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Move the write cursor; anywhere in `[0, length]` is legal
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.length {
            return Err(Error::SeekBeyondEnd {
                offset,
                length: self.length,
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// Write `data` at the cursor and advance it
    ///
    /// A write that starts before `length` is an overwrite and must land
    /// entirely inside one existing chunk.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let offset = self.pos;
        match &mut self.backend {
            Backend::Memory { chunks } => {
                if offset < self.length {
                    overwrite_chunk(chunks, offset, data)?;
                } else {
                    chunks.push(Chunk {
                        offset,
                        data: data.to_vec(),
                    });
                }
            }
            Backend::Target { target } => {
                target.seek(SeekFrom::Start(offset))?;
                // write_all loops until the full payload is on the target
                target.write_all(data)?;
            }
        }
        self.pos = offset + data.len() as u64;
        self.length = self.length.max(self.pos);
        Ok(())
    }

    /// Finalize the sink
    ///
    /// Memory mode concatenates all chunks in positional order into a
    /// [`Blob`]; target mode flushes and yields `None`.
    pub fn complete(&mut self) -> Result<Option<Blob>> {
        match &mut self.backend {
            Backend::Memory { chunks } => {
                let mut data = Vec::with_capacity(self.length as usize);
                for chunk in chunks.iter() {
                    data.extend_from_slice(&chunk.data);
                }
                Ok(Some(Blob {
                    data,
                    mime_type: WEBM_MIME_TYPE.to_string(),
                }))
            }
            Backend::Target { target } => {
                target.flush()?;
                Ok(None)
            }
        }
    }
}

/// Splice `data` into the single chunk that contains `[offset, offset+len)`
fn overwrite_chunk(chunks: &mut [Chunk], offset: u64, data: &[u8]) -> Result<()> {
    let end = offset + data.len() as u64;
    for chunk in chunks.iter_mut() {
        if chunk.end() <= offset || chunk.offset >= end {
            continue;
        }
        // Overlapping chunk found: the write must be contained by it
        if offset < chunk.offset || end > chunk.end() {
            return Err(Error::OverwriteCrossesChunkBoundaries {
                offset,
                length: data.len(),
            });
        }
        let rel = (offset - chunk.offset) as usize;
        chunk.data[rel..rel + data.len()].copy_from_slice(data);
        return Ok(());
    }
    // Chunks tile [0, length) with no gaps, so an overwrite below length
    // always overlaps something
    unreachable!("overwrite below length found no chunk");
}
