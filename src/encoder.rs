//! Host-provided WebP encoding seam
//!
//! The muxer never encodes pixels itself; it hands RGBA frames to a
//! [`WebpEncoder`] supplied by the host and consumes the lossy WebP bytes it
//! returns.

use crate::Result;
use image::{Rgba, RgbaImage};

/// Encodes an RGBA image to lossy WebP bytes at a quality in `[0, 1)`
///
/// Implementations typically wrap a native encoder (libwebp bindings, a
/// browser canvas bridge, or similar). The returned bytes must be a complete
/// RIFF/WebP container holding a `VP8 ` keyframe chunk.
pub trait WebpEncoder {
    fn encode(&mut self, image: &RgbaImage, quality: f32) -> Result<Vec<u8>>;
}

/// Synthesize the alpha plane of `image` as a grayscale RGBA frame
///
/// Each output pixel's luminance equals the source pixel's alpha, with the
/// output itself fully opaque. Encoding this through the regular lossy
/// pipeline yields the VP8 bitstream carried as the frame's BlockAdditional.
/// `scratch` is reused across frames while dimensions are stable.
pub fn alpha_plane<'a>(image: &RgbaImage, scratch: &'a mut Option<RgbaImage>) -> &'a RgbaImage {
    let (width, height) = image.dimensions();

    let needs_new = !matches!(scratch, Some(existing) if existing.dimensions() == (width, height));
    if needs_new {
        *scratch = Some(RgbaImage::new(width, height));
    }
    let plane = scratch.as_mut().unwrap();

    for (source, target) in image.pixels().zip(plane.pixels_mut()) {
        let alpha = source[3];
        *target = Rgba([alpha, alpha, alpha, 255]);
    }

    plane
}
