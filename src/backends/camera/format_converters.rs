// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion to 8-bit luma
//!
//! Barcode decoders only look at luminance, so every capture format is
//! reduced to a tightly packed Gray8 plane as early as possible.

use super::types::{CameraFrame, PixelFormat};

/// Extract the Y channel from packed YUYV (Y0 U Y1 V)
///
/// `stride` is the source row length in bytes; padding is skipped.
pub fn yuyv_to_gray(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    let w = width as usize;
    let mut gray = Vec::with_capacity(w * height as usize);

    for row in data.chunks(stride as usize).take(height as usize) {
        gray.extend(row.iter().step_by(2).take(w));
    }

    gray
}

/// Convert RGBA to luma using BT.601 weights
pub fn rgba_to_gray(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    let w = width as usize;
    let mut gray = Vec::with_capacity(w * height as usize);

    for row in data.chunks(stride as usize).take(height as usize) {
        for px in row.chunks_exact(4).take(w) {
            let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            gray.push(luma.round().clamp(0.0, 255.0) as u8);
        }
    }

    gray
}

/// Copy a Gray8 plane, dropping row padding
pub fn gray_without_stride(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    let w = width as usize;
    let mut gray = Vec::with_capacity(w * height as usize);

    for row in data.chunks(stride as usize).take(height as usize) {
        gray.extend_from_slice(&row[..w.min(row.len())]);
    }

    gray
}

/// Decode an MJPEG frame straight to luma
pub fn mjpeg_to_gray(data: &[u8]) -> Result<(u32, u32, Vec<u8>), image::ImageError> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?;
    let luma = img.to_luma8();
    let (width, height) = luma.dimensions();
    Ok((width, height, luma.into_raw()))
}

/// Tightly packed luma plane for any supported frame format
///
/// Returns `None` when the buffer is shorter than the frame geometry claims.
pub fn luma_plane(frame: &CameraFrame) -> Option<Vec<u8>> {
    if !frame.is_complete() {
        return None;
    }
    let plane = match frame.format {
        PixelFormat::Gray8 => {
            gray_without_stride(&frame.data, frame.width, frame.height, frame.stride)
        }
        PixelFormat::YUYV => yuyv_to_gray(&frame.data, frame.width, frame.height, frame.stride),
        PixelFormat::RGBA => rgba_to_gray(&frame.data, frame.width, frame.height, frame.stride),
    };
    Some(plane)
}
