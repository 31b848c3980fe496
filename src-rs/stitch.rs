//! Composites captured frames into one image.
//!
//! Document mode places every frame at its true content offset. Container
//! mode cannot: the frames are whole-viewport shots in which chrome outside
//! the container repeats, so full frames are stacked and only the last one is
//! cropped at the click row.

use image::imageops;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::{debug, info};

use crate::error::CaptureError;
use crate::scroll::{ScrollContext, ScrollKind};
use crate::sequencer::CaptureFrame;

/// Everything the stitcher needs besides the frames themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StitchRequest {
    pub kind: ScrollKind,
    /// Content-space Y of the click.
    pub target: f64,
    pub viewport_width: f64,
    pub pixel_density: f64,
    pub viewport_offset: f64,
}

impl StitchRequest {
    pub fn new(ctx: &ScrollContext, target: f64, viewport_width: f64, pixel_density: f64) -> Self {
        Self {
            kind: ctx.kind,
            target,
            viewport_width,
            pixel_density,
            viewport_offset: ctx.viewport_offset,
        }
    }
}

/// PNG bytes plus their pixel dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Returns `Ok(None)` when there are no frames to stitch.
pub fn stitch(
    frames: &[CaptureFrame],
    request: &StitchRequest,
) -> Result<Option<StitchedImage>, CaptureError> {
    if frames.is_empty() {
        return Ok(None);
    }

    let decoded = frames
        .iter()
        .enumerate()
        .map(|(index, frame)| {
            image::load_from_memory(&frame.image)
                .map(|img| img.to_rgba8())
                .map_err(|source| CaptureError::DecodeFailure { index, source })
        })
        .collect::<Result<Vec<RgbaImage>, CaptureError>>()?;

    let canvas = match request.kind {
        ScrollKind::Document => composite_offsets(&decoded, frames, request),
        ScrollKind::Container => composite_stacked(&decoded, frames, request),
    };
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return Ok(None);
    }

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(CaptureError::Encode)?;
    info!(
        width,
        height,
        frames = frames.len(),
        kind = ?request.kind,
        "stitched image"
    );
    Ok(Some(StitchedImage { png, width, height }))
}

/// Height of the document-mode surface: `ceil(target × density)`.
pub fn document_height(target: f64, density: f64) -> u32 {
    (target * density).ceil().max(0.0) as u32
}

/// Rows of the final container-mode frame that are kept.
pub fn last_crop_height(
    viewport_offset: f64,
    target: f64,
    last_offset: f64,
    density: f64,
    frame_height: u32,
) -> u32 {
    let row = ((viewport_offset + (target - last_offset)) * density).round();
    row.clamp(0.0, frame_height as f64) as u32
}

fn frame_top(offset: f64, density: f64) -> u32 {
    (offset * density).round().max(0.0) as u32
}

fn composite_offsets(
    images: &[RgbaImage],
    frames: &[CaptureFrame],
    request: &StitchRequest,
) -> RgbaImage {
    // The surface never extends past what the frames actually cover.
    let covered_width = images.iter().map(RgbaImage::width).max().unwrap_or(0);
    let covered_height = images
        .iter()
        .zip(frames)
        .map(|(img, frame)| {
            frame_top(frame.offset, request.pixel_density).saturating_add(img.height())
        })
        .max()
        .unwrap_or(0);
    let width = ((request.viewport_width * request.pixel_density).round().max(0.0) as u32)
        .min(covered_width);
    let height = document_height(request.target, request.pixel_density).min(covered_height);
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

    for (index, (img, frame)) in images.iter().zip(frames).enumerate() {
        let y = frame_top(frame.offset, request.pixel_density);
        if y >= height {
            debug!(index, y, height, "frame starts below the surface; dropped");
            continue;
        }
        let rows = img.height().min(height - y);
        let cols = img.width().min(width);
        let slab = imageops::crop_imm(img, 0, 0, cols, rows).to_image();
        imageops::replace(&mut canvas, &slab, 0, i64::from(y));
    }
    canvas
}

fn composite_stacked(
    images: &[RgbaImage],
    frames: &[CaptureFrame],
    request: &StitchRequest,
) -> RgbaImage {
    let (width, frame_height) = images[0].dimensions();
    let last = frames.len() - 1;
    let crop = last_crop_height(
        request.viewport_offset,
        request.target,
        frames[last].offset,
        request.pixel_density,
        frame_height,
    );
    let height = last as u32 * frame_height + crop;
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

    for (index, img) in images.iter().enumerate() {
        let y = index as u32 * frame_height;
        let rows = if index == last { crop } else { frame_height };
        let rows = rows.min(img.height());
        let cols = img.width().min(width);
        if rows == 0 || cols == 0 {
            continue;
        }
        let slab = imageops::crop_imm(img, 0, 0, cols, rows).to_image();
        imageops::replace(&mut canvas, &slab, 0, i64::from(y));
    }
    debug!(frame_height, crop, "stacked container frames");
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_png(w: u32, h: u32, shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([shade, shade, shade, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn frame(w: u32, h: u32, shade: u8, offset: f64) -> CaptureFrame {
        CaptureFrame {
            image: solid_png(w, h, shade),
            offset,
        }
    }

    fn decode(stitched: &StitchedImage) -> RgbaImage {
        image::load_from_memory(&stitched.png).unwrap().to_rgba8()
    }

    fn document_request(target: f64, density: f64) -> StitchRequest {
        StitchRequest {
            kind: ScrollKind::Document,
            target,
            viewport_width: 100.0,
            pixel_density: density,
            viewport_offset: 0.0,
        }
    }

    #[test]
    fn document_mode_places_frames_at_their_offsets() {
        let frames = vec![
            frame(100, 800, 10, 0.0),
            frame(100, 800, 20, 800.0),
            frame(100, 800, 30, 1600.0),
        ];
        let out = stitch(&frames, &document_request(1850.0, 1.0))
            .unwrap()
            .unwrap();
        assert_eq!((out.width, out.height), (100, 1850));

        let img = decode(&out);
        assert_eq!(img.get_pixel(5, 0)[0], 10);
        assert_eq!(img.get_pixel(5, 799)[0], 10);
        assert_eq!(img.get_pixel(5, 800)[0], 20);
        assert_eq!(img.get_pixel(5, 1849)[0], 30);
    }

    #[test]
    fn document_height_scales_with_density() {
        let frames = vec![frame(200, 1600, 10, 0.0), frame(200, 1600, 20, 800.0)];
        let out = stitch(&frames, &document_request(1000.5, 2.0))
            .unwrap()
            .unwrap();
        assert_eq!(out.height, 2001);
        assert_eq!(out.width, 200);
        assert_eq!(document_height(1850.0, 1.5), 2775);
    }

    #[test]
    fn clamped_final_frame_overlaps_and_out_of_range_frames_drop() {
        let frames = vec![
            frame(100, 800, 10, 0.0),
            frame(100, 800, 20, 700.0),
            frame(100, 800, 30, 1700.0),
        ];
        let out = stitch(&frames, &document_request(1200.0, 1.0))
            .unwrap()
            .unwrap();
        let img = decode(&out);
        assert_eq!(out.height, 1200);
        assert_eq!(img.get_pixel(0, 699)[0], 10);
        assert_eq!(img.get_pixel(0, 700)[0], 20);
        assert_eq!(img.get_pixel(0, 1199)[0], 20);
    }

    #[test]
    fn surface_never_outgrows_the_frames() {
        let frames = vec![frame(100, 800, 10, 0.0), frame(100, 800, 20, 800.0)];
        let request = StitchRequest {
            viewport_width: 1e9,
            ..document_request(1e30, 1.0)
        };
        let out = stitch(&frames, &request).unwrap().unwrap();
        assert_eq!((out.width, out.height), (100, 1600));
    }

    #[test]
    fn container_mode_stacks_full_frames_and_crops_the_last() {
        let frames = vec![frame(100, 600, 10, 0.0), frame(100, 600, 20, 500.0)];
        let request = StitchRequest {
            kind: ScrollKind::Container,
            target: 740.0,
            viewport_width: 100.0,
            pixel_density: 1.0,
            viewport_offset: 100.0,
        };
        let out = stitch(&frames, &request).unwrap().unwrap();
        assert_eq!(out.height, 600 + 340);

        let img = decode(&out);
        assert_eq!(img.get_pixel(0, 599)[0], 10);
        assert_eq!(img.get_pixel(0, 600)[0], 20);
        assert_eq!(img.get_pixel(0, 939)[0], 20);
    }

    #[test]
    fn container_crop_never_exceeds_frame_height() {
        assert_eq!(last_crop_height(100.0, 5000.0, 0.0, 2.0, 1200), 1200);
        assert_eq!(last_crop_height(0.0, 10.0, 40.0, 1.0, 600), 0);
        assert_eq!(last_crop_height(50.0, 150.0, 0.0, 2.0, 1200), 400);
    }

    #[test]
    fn zero_frames_yield_nothing() {
        assert!(stitch(&[], &document_request(100.0, 1.0)).unwrap().is_none());
    }

    #[test]
    fn undecodable_frame_is_a_decode_failure() {
        let frames = vec![
            frame(100, 800, 10, 0.0),
            CaptureFrame {
                image: b"not an image".to_vec(),
                offset: 800.0,
            },
        ];
        let err = stitch(&frames, &document_request(1000.0, 1.0)).unwrap_err();
        assert!(matches!(err, CaptureError::DecodeFailure { index: 1, .. }));
    }
}
