//! Chunk-level WebP parsing
//!
//! Locates the lossy `VP8 ` bitstream inside a RIFF/WebP container without
//! decoding any pixels, and reads the keyframe's uncompressed header for the
//! pixel dimensions the track header needs.

use crate::{Error, Result};

/// Byte length of `"RIFF" <u32 size> "WEBP"`
const RIFF_HEADER_LEN: usize = 12;

/// VP8 keyframe start code, bytes 3..6 of every keyframe bitstream
const VP8_KEYFRAME_START_CODE: [u8; 3] = [0x9D, 0x01, 0x2A];

/// VP8 keyframe extracted from a WebP container
#[derive(Debug, Clone)]
pub struct Keyframe {
    /// Raw VP8 bitstream bytes
    pub frame: Vec<u8>,
    /// Whether the container carried an `ALPH` chunk
    pub has_alpha: bool,
}

/// Locate the `VP8 ` chunk in a WebP byte string
///
/// Walks the RIFF chunk list starting after the container header. An `ALPH`
/// chunk anywhere before the bitstream flags the keyframe as carrying alpha.
/// Lossless (`VP8L`) input has no `VP8 ` chunk and is rejected.
pub fn extract_keyframe(webp: &[u8]) -> Result<Keyframe> {
    if webp.len() < RIFF_HEADER_LEN || &webp[..4] != b"RIFF" || &webp[8..12] != b"WEBP" {
        return Err(Error::BadWebp("not a RIFF/WebP container"));
    }

    let mut has_alpha = false;
    let mut cursor = RIFF_HEADER_LEN;

    while cursor + 8 <= webp.len() {
        let fourcc = &webp[cursor..cursor + 4];
        let len = u32::from_le_bytes([
            webp[cursor + 4],
            webp[cursor + 5],
            webp[cursor + 6],
            webp[cursor + 7],
        ]) as usize;
        cursor += 8;

        match fourcc {
            b"VP8 " => {
                if cursor + len > webp.len() {
                    return Err(Error::BadWebp("truncated VP8 chunk"));
                }
                return Ok(Keyframe {
                    frame: webp[cursor..cursor + len].to_vec(),
                    has_alpha,
                });
            }
            b"ALPH" => has_alpha = true,
            _ => {}
        }

        // Chunks are padded to even lengths
        cursor += len + (len & 1);
    }

    Err(Error::BadWebp(
        "no VP8 chunk found (VP8L lossless is not supported)",
    ))
}

/// Pixel dimensions from a VP8 keyframe's uncompressed header
///
/// The keyframe layout is a 3-byte frame tag, the start code `9D 01 2A`, then
/// 16-bit little-endian width and height (14 value bits plus 2 scale bits).
pub fn vp8_dimensions(frame: &[u8]) -> Option<(u32, u32)> {
    if frame.len() < 10 || frame[3..6] != VP8_KEYFRAME_START_CODE {
        return None;
    }
    let width = u32::from(u16::from_le_bytes([frame[6], frame[7]]) & 0x3FFF);
    let height = u32::from(u16::from_le_bytes([frame[8], frame[9]]) & 0x3FFF);
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riff_webp(chunks: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
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

    fn vp8_payload(width: u16, height: u16) -> Vec<u8> {
        let mut payload = vec![0x30, 0x00, 0x00];
        payload.extend_from_slice(&VP8_KEYFRAME_START_CODE);
        payload.extend_from_slice(&width.to_le_bytes());
        payload.extend_from_slice(&height.to_le_bytes());
        payload.extend_from_slice(&[0xAB; 24]);
        payload
    }

    #[test]
    fn test_extracts_vp8_chunk() {
        let vp8 = vp8_payload(320, 240);
        let webp = riff_webp(&[(b"VP8 ", &vp8)]);

        let keyframe = extract_keyframe(&webp).unwrap();
        assert_eq!(keyframe.frame, vp8);
        assert!(!keyframe.has_alpha);
    }

    #[test]
    fn test_detects_alpha_chunk() {
        let vp8 = vp8_payload(64, 64);
        let alpha = [0u8; 7];
        let webp = riff_webp(&[
            (b"VP8X", &[0x10, 0, 0, 0, 0x3F, 0, 0, 0x3F, 0, 0]),
            (b"ALPH", &alpha),
            (b"VP8 ", &vp8),
        ]);

        let keyframe = extract_keyframe(&webp).unwrap();
        assert_eq!(keyframe.frame, vp8);
        assert!(keyframe.has_alpha);
    }

    #[test]
    fn test_skips_odd_length_chunks() {
        let vp8 = vp8_payload(16, 16);
        let webp = riff_webp(&[(b"EXIF", &[1, 2, 3]), (b"VP8 ", &vp8)]);

        let keyframe = extract_keyframe(&webp).unwrap();
        assert_eq!(keyframe.frame, vp8);
    }

    #[test]
    fn test_rejects_non_riff() {
        assert!(matches!(
            extract_keyframe(b"JFIF blah blah"),
            Err(Error::BadWebp(_))
        ));
    }

    #[test]
    fn test_rejects_lossless() {
        let webp = riff_webp(&[(b"VP8L", &[0x2F, 0, 0, 0])]);
        assert!(matches!(extract_keyframe(&webp), Err(Error::BadWebp(_))));
    }

    #[test]
    fn test_rejects_truncated_vp8_chunk() {
        let vp8 = vp8_payload(16, 16);
        let mut webp = riff_webp(&[(b"VP8 ", &vp8)]);
        webp.truncate(webp.len() - 8);
        assert!(matches!(extract_keyframe(&webp), Err(Error::BadWebp(_))));
    }

    #[test]
    fn test_vp8_dimensions() {
        let vp8 = vp8_payload(1920, 1080);
        assert_eq!(vp8_dimensions(&vp8), Some((1920, 1080)));
    }

    #[test]
    fn test_vp8_dimensions_rejects_missing_start_code() {
        let mut vp8 = vp8_payload(16, 16);
        vp8[4] = 0x00;
        assert_eq!(vp8_dimensions(&vp8), None);
    }
}
