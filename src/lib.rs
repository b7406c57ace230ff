//! Gate Monitor
//!
//! Periodically captures a frame from a fixed security camera, asks a remote
//! vision model whether the gate in view is open or closed, and publishes the
//! result to MQTT for Home Assistant.
//!
//! # Pipeline
//!
//! ```text
//! monitor ─► ingest (capture) ─► classify (oracle + gating) ─► confirm ─► transport
//!                                                                  └─► storage (snapshot)
//! ```
//!
//! An `Open` result is only published after a confirmation capture agrees (or a
//! tiebreak capture decides); `Closed` and `Unknown` are published after a
//! single observation.
//!
//! # Cargo Features
//!
//! - `rtsp-gstreamer`: capture from `rtsp://` cameras through GStreamer. Off by
//!   default; without it only `http(s)://` snapshot URLs and `stub://` work, and
//!   an `rtsp://` URL fails at startup.
//!
//! # Module Structure
//!
//! - `config`: immutable settings loaded once at startup
//! - `frame`: encoded frames and crop regions
//! - `ingest`: camera capture sources
//! - `classify`: oracle client, reply parsing, threshold gating, retry
//! - `confirm`: open-transition confirmation state machine
//! - `storage`: alert snapshots on disk
//! - `transport`: MQTT publishing
//! - `monitor`: the poll loop and shutdown handling

pub mod classify;
pub mod config;
pub mod confirm;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod storage;
pub mod transport;

pub use classify::{
    Classification, Classify, ClassifyError, GateClassifier, GateStatus, GeminiClient,
    ReferenceSet, VisionOracle,
};
pub use config::GateMonitorConfig;
pub use confirm::{evaluate, CycleOutcome, GateDecision};
pub use frame::{CapturedFrame, CropBounds, Frame, Region};
pub use ingest::{FrameSource, RtspConfig, RtspSource};
pub use monitor::{CycleReport, Monitor, MonitorSettings, Phase, RunState};
pub use storage::SnapshotStore;
pub use transport::{Availability, GateAlert, MqttPublisher, MqttSettings, Publisher, Topics};
