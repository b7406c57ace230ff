//! Camera frame source.
//!
//! This module provides `RtspSource`, which grabs one still from the camera on
//! every `capture()` call. The backend is chosen by URL scheme:
//! - `stub://` synthetic frames for tests and dry runs
//! - `http(s)://` single JPEG snapshot endpoints
//! - `rtsp(s)://` GStreamer pipeline (feature `rtsp-gstreamer`)
//!
//! No connection is held between captures: each call opens the source, reads
//! one frame and releases it again.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::io::Read;
use std::time::Duration;
use url::Url;

use super::FrameSource;
use crate::frame::{CapturedFrame, CropBounds};

const MAX_JPEG_BYTES: u64 = 10 * 1024 * 1024;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Source URL (e.g., "rtsp://192.168.1.100:554/stream")
    pub url: String,
    /// Region of the frame handed to the classifier.
    pub crop: CropBounds,
    /// Upper bound on opening the source and reading one frame.
    pub timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            crop: CropBounds::GATE,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Camera source.
pub struct RtspSource {
    config: RtspConfig,
    backend: RtspBackend,
    frames_captured: u64,
}

enum RtspBackend {
    Synthetic(SyntheticSource),
    Snapshot(SnapshotSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        config.crop.validate()?;
        let backend = if config.url.starts_with("stub://") {
            RtspBackend::Synthetic(SyntheticSource::new())
        } else {
            let url = Url::parse(&config.url).context("parse camera url")?;
            match url.scheme() {
                "http" | "https" => {
                    RtspBackend::Snapshot(SnapshotSource::new(&config.url, config.timeout))
                }
                "rtsp" | "rtsps" => {
                    #[cfg(feature = "rtsp-gstreamer")]
                    {
                        RtspBackend::Gstreamer(GstreamerSource::new(&config.url, config.timeout)?)
                    }
                    #[cfg(not(feature = "rtsp-gstreamer"))]
                    {
                        anyhow::bail!(
                            "rtsp:// cameras need a build with `--features rtsp-gstreamer`; \
                             use an http(s) snapshot URL otherwise"
                        )
                    }
                }
                other => {
                    return Err(anyhow!(
                        "unsupported camera scheme '{}'; expected rtsp, http(s) or stub",
                        other
                    ))
                }
            }
        };
        Ok(Self {
            config,
            backend,
            frames_captured: 0,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    fn grab(&mut self) -> Result<RgbImage> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => Ok(source.grab()),
            RtspBackend::Snapshot(source) => source.grab(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.grab(),
        }
    }
}

impl FrameSource for RtspSource {
    fn capture(&mut self) -> Result<CapturedFrame> {
        log::info!("capturing frame from camera");
        let image = self.grab().context("camera capture failed")?;
        let captured = CapturedFrame::from_rgb(&image, &self.config.crop)?;
        self.frames_captured += 1;
        Ok(captured)
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticSource {
    frame_count: u64,
}

impl SyntheticSource {
    fn new() -> Self {
        Self { frame_count: 0 }
    }

    /// Gradient that shifts a little every frame.
    fn grab(&mut self) -> RgbImage {
        self.frame_count += 1;
        let shift = (self.frame_count % 256) as u32;
        RgbImage::from_fn(crate::frame::FRAME_WIDTH, crate::frame::FRAME_HEIGHT, |x, y| {
            image::Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }
}

// ----------------------------------------------------------------------------
// HTTP snapshot source
// ----------------------------------------------------------------------------

struct SnapshotSource {
    url: String,
    agent: ureq::Agent,
}

impl SnapshotSource {
    fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn grab(&mut self) -> Result<RgbImage> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        decode_jpeg(&bytes)
    }
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSource {
    url: String,
    timeout: Duration,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSource {
    fn new(url: &str, timeout: Duration) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            url: url.to_string(),
            timeout,
        })
    }

    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink`, pull one RGB
    /// sample, then tear the pipeline down.
    fn grab(&mut self) -> Result<RgbImage> {
        use gstreamer::prelude::*;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("failed to open RTSP stream")?;

        let timeout = gstreamer::ClockTime::from_mseconds(self.timeout.as_millis() as u64);
        let sample = appsink.try_pull_sample(timeout);
        let _ = pipeline.set_state(gstreamer::State::Null);

        let sample = sample.ok_or_else(|| anyhow!("no frame available from RTSP stream"))?;
        let (pixels, width, height) = sample_to_pixels(&sample)?;
        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RTSP frame size does not match {}x{}", width, height))
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let pixels = pack_rows(map.as_slice(), row_bytes, stride, height as usize)?;
    Ok((pixels, width, height))
}

/// Copy `height` rows of `row_bytes` each out of a buffer laid out with `stride`.
#[cfg(any(feature = "rtsp-gstreamer", test))]
fn pack_rows(data: &[u8], row_bytes: usize, stride: usize, height: usize) -> Result<Vec<u8>> {
    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height)
            .context("RTSP buffer is shorter than expected")?;
        return Ok(packed.to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }
    Ok(pixels)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
