//! Colour conversion, rotation, cropping and resizing for reference and live frames.

use crate::types::{BoundingBox, PixelLayout, RawFrame, Rotation};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImagingError {
    #[error("invalid {layout:?} buffer length: expected {expected}, got {actual}")]
    InvalidLength {
        layout: PixelLayout,
        expected: usize,
        actual: usize,
    },
    #[error("image dimensions are zero")]
    ZeroDimensions,
    #[error("{layout:?} requires even dimensions, got {width}x{height}")]
    OddDimensions {
        layout: PixelLayout,
        width: u32,
        height: u32,
    },
    #[error("face box {0:?} has no area inside the image")]
    DegenerateCrop(BoundingBox),
    #[error("failed to decode image: {0}")]
    Decode(String),
}

/// Decode encoded image bytes (JPEG, PNG, ...) to RGB.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, ImagingError> {
    let img = image::load_from_memory(bytes).map_err(|e| ImagingError::Decode(e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Convert a raw camera frame of any supported layout to RGB.
pub fn to_rgb(frame: &RawFrame) -> Result<RgbImage, ImagingError> {
    let (w, h) = (frame.width, frame.height);
    if w == 0 || h == 0 {
        return Err(ImagingError::ZeroDimensions);
    }
    let pixels = w as usize * h as usize;

    let expected = match frame.layout {
        PixelLayout::Rgb8 => pixels * 3,
        PixelLayout::Rgba8 => pixels * 4,
        PixelLayout::Gray8 => pixels,
        PixelLayout::Yuyv => pixels * 2,
        PixelLayout::Nv21 => pixels + pixels / 2,
    };
    if frame.data.len() < expected {
        return Err(ImagingError::InvalidLength {
            layout: frame.layout,
            expected,
            actual: frame.data.len(),
        });
    }
    let data = &frame.data[..expected];

    let rgb = match frame.layout {
        PixelLayout::Rgb8 => data.to_vec(),
        PixelLayout::Rgba8 => data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelLayout::Gray8 => data.iter().flat_map(|&y| [y, y, y]).collect(),
        PixelLayout::Yuyv => {
            if w % 2 != 0 {
                return Err(ImagingError::OddDimensions { layout: frame.layout, width: w, height: h });
            }
            yuyv_to_rgb(data)
        }
        PixelLayout::Nv21 => {
            if w % 2 != 0 || h % 2 != 0 {
                return Err(ImagingError::OddDimensions { layout: frame.layout, width: w, height: h });
            }
            nv21_to_rgb(data, w as usize, h as usize)
        }
    };

    // Length is exact by construction above.
    RgbImage::from_raw(w, h, rgb).ok_or(ImagingError::ZeroDimensions)
}

/// BT.601 limited-range YUV to RGB, fixed-point.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as i32 - 16).max(0);
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [r.clamp(0, 255) as u8, g.clamp(0, 255) as u8, b.clamp(0, 255) as u8]
}

/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(yuyv.len() / 2 * 3);
    for quad in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        out.extend_from_slice(&yuv_to_rgb(y0, u, v));
        out.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    out
}

/// NV21: Y plane then interleaved [V, U] pairs, one pair per 2x2 block.
fn nv21_to_rgb(data: &[u8], width: usize, height: usize) -> Vec<u8> {
    let (luma, chroma) = data.split_at(width * height);
    let mut out = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        let chroma_row = (row / 2) * width;
        for col in 0..width {
            let y = luma[row * width + col];
            let pair = chroma_row + (col & !1);
            let v = chroma[pair];
            let u = chroma[pair + 1];
            out.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    out
}

/// Rotate clockwise by `rotation`. `Deg0` returns the image untouched.
pub fn rotate(image: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg180 => imageops::rotate180(&image),
        Rotation::Deg270 => imageops::rotate270(&image),
    }
}

/// Clamp `bbox` to the image and copy out the face region.
pub fn crop_to_box(image: &RgbImage, bbox: &BoundingBox) -> Result<RgbImage, ImagingError> {
    let rect = bbox
        .clamp(image.width(), image.height())
        .ok_or(ImagingError::DegenerateCrop(*bbox))?;
    Ok(imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Resize to exactly `width x height` with bilinear filtering.
pub fn resize_exact(image: &RgbImage, width: u32, height: u32) -> Result<RgbImage, ImagingError> {
    if width == 0 || height == 0 || image.width() == 0 || image.height() == 0 {
        return Err(ImagingError::ZeroDimensions);
    }
    if image.width() == width && image.height() == height {
        return Ok(image.clone());
    }
    Ok(imageops::resize(image, width, height, FilterType::Triangle))
}

/// Crop the face and scale it to the embedding model's input size.
pub fn face_input(
    image: &RgbImage,
    bbox: &BoundingBox,
    input_size: (u32, u32),
) -> Result<RgbImage, ImagingError> {
    let crop = crop_to_box(image, bbox)?;
    resize_exact(&crop, input_size.0, input_size.1)
}

/// Average luminance (0.0–255.0), used for frame diagnostics.
pub fn avg_brightness(image: &RgbImage) -> f32 {
    let pixels = image.width() as usize * image.height() as usize;
    if pixels == 0 {
        return 0.0;
    }
    let sum: f32 = image
        .pixels()
        .map(|Rgb([r, g, b])| 0.299 * *r as f32 + 0.587 * *g as f32 + 0.114 * *b as f32)
        .sum();
    sum / pixels as f32
}
