//! Common test utilities

#![allow(dead_code)]

use image::RgbaImage;
use minwebm::{Result, WebpEncoder};
use std::ops::Range;

/// VP8 keyframe start code
const VP8_START_CODE: [u8; 3] = [0x9D, 0x01, 0x2A];

/// Build a synthetic VP8 keyframe bitstream with a valid uncompressed header
pub fn make_vp8(width: u16, height: u16, payload_len: usize) -> Vec<u8> {
    let mut frame = vec![0x30, 0x00, 0x00];
    frame.extend_from_slice(&VP8_START_CODE);
    frame.extend_from_slice(&width.to_le_bytes());
    frame.extend_from_slice(&height.to_le_bytes());
    frame.extend((0..payload_len).map(|i| (i * 31 % 251) as u8));
    frame
}

/// Wrap chunks into a RIFF/WebP container
pub fn make_webp_container(chunks: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"WEBP");
    for (fourcc, data) in chunks {
        body.extend_from_slice(*fourcc);
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(data);
        if data.len() % 2 == 1 {
            body.push(0);
        }
    }
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// A lossy WebP byte string holding one synthetic VP8 keyframe
pub fn make_webp(width: u16, height: u16, payload_len: usize) -> Vec<u8> {
    let vp8 = make_vp8(width, height, payload_len);
    make_webp_container(&[(b"VP8 ", &vp8)])
}

/// Test encoder that fabricates WebP containers instead of encoding pixels
///
/// Records every image it is handed so tests can inspect the alpha pathway.
#[derive(Default)]
pub struct StubEncoder {
    pub calls: Vec<(RgbaImage, f32)>,
}

impl WebpEncoder for StubEncoder {
    fn encode(&mut self, image: &RgbaImage, quality: f32) -> Result<Vec<u8>> {
        self.calls.push((image.clone(), quality));
        let (width, height) = image.dimensions();
        Ok(make_webp(width as u16, height as u16, 48))
    }
}

// Minimal EBML reading, enough to verify muxer output

/// Decode an element id at `pos`; width comes from the leading marker bits
pub fn read_id(bytes: &[u8], pos: usize) -> (u32, usize) {
    let width = bytes[pos].leading_zeros() as usize + 1;
    let mut id = 0u32;
    for b in &bytes[pos..pos + width] {
        id = id << 8 | u32::from(*b);
    }
    (id, width)
}

/// Decode an EBML varint (size field) at `pos`
pub fn read_size(bytes: &[u8], pos: usize) -> (u64, usize) {
    let width = bytes[pos].leading_zeros() as usize + 1;
    let mut value = u64::from(bytes[pos]) & (0xFFu64 >> width);
    for b in &bytes[pos + 1..pos + width] {
        value = value << 8 | u64::from(*b);
    }
    (value, width)
}

/// Parse the sibling elements inside `range` as `(id, payload_range)` pairs
pub fn children(bytes: &[u8], range: Range<usize>) -> Vec<(u32, Range<usize>)> {
    let mut out = Vec::new();
    let mut pos = range.start;
    while pos < range.end {
        let (id, id_width) = read_id(bytes, pos);
        pos += id_width;
        let (size, size_width) = read_size(bytes, pos);
        pos += size_width;
        let end = pos + size as usize;
        out.push((id, pos..end));
        pos = end;
    }
    out
}

/// Descend through nested master elements by id, returning the payload range
/// of the last path entry (first match at each level)
pub fn find(bytes: &[u8], range: Range<usize>, path: &[u32]) -> Option<Range<usize>> {
    let mut range = range;
    'path: for &id in path {
        for (child_id, child_range) in children(bytes, range.clone()) {
            if child_id == id {
                range = child_range;
                continue 'path;
            }
        }
        return None;
    }
    Some(range)
}

/// All matches of `id` directly inside `range`
pub fn find_all(bytes: &[u8], range: Range<usize>, id: u32) -> Vec<Range<usize>> {
    children(bytes, range)
        .into_iter()
        .filter(|(child_id, _)| *child_id == id)
        .map(|(_, child_range)| child_range)
        .collect()
}

/// Big-endian unsigned integer payload
pub fn read_uint(bytes: &[u8], range: Range<usize>) -> u64 {
    let mut value = 0u64;
    for b in &bytes[range] {
        value = value << 8 | u64::from(*b);
    }
    value
}

/// Big-endian IEEE-754 double payload
pub fn read_float64(bytes: &[u8], range: Range<usize>) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[range]);
    f64::from_be_bytes(raw)
}

/// Payload range of the top-level Segment element
pub fn segment_payload(bytes: &[u8]) -> Range<usize> {
    find(bytes, 0..bytes.len(), &[minwebm::ebml::SEGMENT]).expect("output has a Segment")
}
