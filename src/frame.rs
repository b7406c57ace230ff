//! Captured still frames.
//!
//! A `Frame` is an encoded JPEG plus a description of which part of the
//! source picture it covers. Frames are created per capture, handed to the
//! classifier, optionally persisted as a snapshot, and then dropped.
//!
//! - `CropBounds`: fractional region of the source frame (left/right/top/bottom in [0, 1]).
//! - `Region`: full frame or a crop.
//! - `CapturedFrame`: the full frame plus the optional gate crop from one capture.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;

/// Width every capture is resized to before encoding.
pub const FRAME_WIDTH: u32 = 640;
/// Height every capture is resized to before encoding.
pub const FRAME_HEIGHT: u32 = 480;

const FULL_FRAME_QUALITY: u8 = 85;
const CROP_QUALITY: u8 = 90;

/// Region of a source frame expressed as fractions of its width and height.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct CropBounds {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl CropBounds {
    /// The whole frame.
    pub const FULL: CropBounds = CropBounds {
        left: 0.0,
        right: 1.0,
        top: 0.0,
        bottom: 1.0,
    };

    /// Default gate region: upper-left corner of the camera view.
    pub const GATE: CropBounds = CropBounds {
        left: 0.0,
        right: 0.25,
        top: 0.10,
        bottom: 0.55,
    };

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(self.left) && in_unit(self.right) && in_unit(self.top) && in_unit(self.bottom))
        {
            return Err(anyhow!("crop bounds must lie within [0, 1]: {:?}", self));
        }
        if self.left >= self.right || self.top >= self.bottom {
            return Err(anyhow!("crop bounds are empty: {:?}", self));
        }
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Pixel rectangle `(x, y, width, height)` for a frame of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x1 = (width as f64 * self.left) as u32;
        let x2 = (width as f64 * self.right) as u32;
        let y1 = (height as f64 * self.top) as u32;
        let y2 = (height as f64 * self.bottom) as u32;
        (x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
    }
}

impl Default for CropBounds {
    fn default() -> Self {
        Self::GATE
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Region {
    Full,
    Crop(CropBounds),
}

/// Encoded still image.
#[derive(Clone, Debug)]
pub struct Frame {
    jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub region: Region,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>, width: u32, height: u32, region: Region) -> Self {
        Self {
            jpeg,
            width,
            height,
            region,
        }
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }
}

/// Output of one capture: the full frame (used for snapshots) and the gate crop
/// (used for classification).
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub full: Frame,
    pub crop: Option<Frame>,
}

impl CapturedFrame {
    /// Frame the classifier should look at.
    pub fn analysis_frame(&self) -> &Frame {
        self.crop.as_ref().unwrap_or(&self.full)
    }

    /// Resize a decoded picture to the fixed capture resolution, then encode the
    /// full frame and the gate crop.
    pub fn from_rgb(image: &RgbImage, crop: &CropBounds) -> Result<Self> {
        let resized = if image.dimensions() == (FRAME_WIDTH, FRAME_HEIGHT) {
            image.clone()
        } else {
            imageops::resize(image, FRAME_WIDTH, FRAME_HEIGHT, FilterType::Triangle)
        };

        let full = Frame::new(
            encode_jpeg(&resized, FULL_FRAME_QUALITY)?,
            FRAME_WIDTH,
            FRAME_HEIGHT,
            Region::Full,
        );

        if crop.is_full() {
            return Ok(Self { full, crop: None });
        }

        let (x, y, w, h) = crop.to_pixels(FRAME_WIDTH, FRAME_HEIGHT);
        if w == 0 || h == 0 {
            return Err(anyhow!("gate crop is empty at {}x{}", FRAME_WIDTH, FRAME_HEIGHT));
        }
        let cropped = imageops::crop_imm(&resized, x, y, w, h).to_image();
        let crop_frame = Frame::new(
            encode_jpeg(&cropped, CROP_QUALITY)?,
            w,
            h,
            Region::Crop(*crop),
        );
        log::info!(
            "frame captured: full {}x{}, gate crop {}x{}",
            FRAME_WIDTH,
            FRAME_HEIGHT,
            w,
            h
        );

        Ok(Self {
            full,
            crop: Some(crop_frame),
        })
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .map_err(|e| anyhow!("jpeg encode failed: {}", e))?;
    Ok(out)
}
