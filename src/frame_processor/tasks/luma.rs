// SPDX-License-Identifier: GPL-3.0-only

//! Luma preparation shared by the decoders
//!
//! Decoders only look at luminance. Large frames are downscaled first so a
//! decode pass stays cheap enough to keep up with the camera.

use crate::backends::camera::CameraFrame;
use crate::backends::camera::format_converters::luma_plane;
use crate::frame_processor::types::DecodeError;

/// Gray8 plane ready for a decoder
pub struct PreparedLuma {
    pub plane: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Source pixels per processed pixel
    pub scale: f32,
}

impl PreparedLuma {
    /// Map a processing-space point back to source pixels
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale, y * self.scale)
    }
}

/// Reduce `frame` to luma no larger than `max_dimension` on either side
///
/// Empty frames are `NotFound`; a buffer shorter than its geometry is fatal.
pub fn prepare(frame: &CameraFrame, max_dimension: u32) -> Result<PreparedLuma, DecodeError> {
    let (width, height) = (frame.width, frame.height);
    if width == 0 || height == 0 {
        return Err(DecodeError::NotFound);
    }

    let gray = luma_plane(frame).ok_or_else(|| {
        DecodeError::Fatal(format!(
            "Frame buffer too short for {}x{} {:?}",
            width, height, frame.format
        ))
    })?;

    if width <= max_dimension && height <= max_dimension {
        return Ok(PreparedLuma {
            plane: gray,
            width,
            height,
            scale: 1.0,
        });
    }

    let scale = (width as f32 / max_dimension as f32).max(height as f32 / max_dimension as f32);
    let new_width = ((width as f32 / scale) as u32).max(1);
    let new_height = ((height as f32 / scale) as u32).max(1);
    Ok(PreparedLuma {
        plane: downscale_gray(&gray, width, height, new_width, new_height),
        width: new_width,
        height: new_height,
        scale,
    })
}

/// Downscale a Gray8 plane using bilinear interpolation
pub fn downscale_gray(src: &[u8], src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Vec<u8> {
    let src_w = src_width as usize;
    let mut output = Vec::with_capacity((dst_width * dst_height) as usize);

    let x_ratio = src_width as f32 / dst_width as f32;
    let y_ratio = src_height as f32 / dst_height as f32;

    for y in 0..dst_height {
        let src_y = y as f32 * y_ratio;
        let y0 = src_y as usize;
        let y1 = (y0 + 1).min(src_height as usize - 1);
        let y_frac = src_y - y0 as f32;

        for x in 0..dst_width {
            let src_x = x as f32 * x_ratio;
            let x0 = src_x as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let x_frac = src_x - x0 as f32;

            let p00 = src[y0 * src_w + x0] as f32;
            let p10 = src[y0 * src_w + x1] as f32;
            let p01 = src[y1 * src_w + x0] as f32;
            let p11 = src[y1 * src_w + x1] as f32;

            let top = p00 * (1.0 - x_frac) + p10 * x_frac;
            let bottom = p01 * (1.0 - x_frac) + p11 * x_frac;
            let value = top * (1.0 - y_frac) + bottom * y_frac;

            output.push(value.round().clamp(0.0, 255.0) as u8);
        }
    }

    output
}
