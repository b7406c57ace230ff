//! Frame capture sources.
//!
//! This module provides the `FrameSource` seam the poll loop captures through,
//! plus the camera implementation:
//! - RTSP streams (feature: rtsp-gstreamer)
//! - HTTP JPEG snapshot endpoints
//! - Stub source (testing)
//!
//! A capture either yields a `CapturedFrame` or an error. Callers treat the
//! error as "no frame this time", never as fatal.

use anyhow::Result;

use crate::frame::CapturedFrame;

pub mod rtsp;

pub use rtsp::{RtspConfig, RtspSource};

/// Something that can produce a still frame on demand.
pub trait FrameSource {
    fn capture(&mut self) -> Result<CapturedFrame>;
}

impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    fn capture(&mut self) -> Result<CapturedFrame> {
        (**self).capture()
    }
}
