//! Message bus publishing.
//!
//! This module defines the `Publisher` seam the poll loop reports through and
//! the topic layout consumed by Home Assistant:
//! - `{prefix}/status`: retained liveness, `online` / `offline`
//! - `{prefix}/{camera}/status`: retained gate state, `open` / `closed` / `unknown`
//! - `{prefix}/{camera}/alert`: non-retained JSON alert for a confirmed open gate

use anyhow::Result;
use serde::Serialize;

use crate::classify::GateStatus;

pub mod mqtt;

pub use mqtt::{MqttPublisher, MqttSettings};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";
pub const ALERT_EVENT_GATE_OPEN: &str = "gate_open";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Online => PAYLOAD_ONLINE,
            Availability::Offline => PAYLOAD_OFFLINE,
        }
    }
}

/// Alert payload published when the gate is confirmed open.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GateAlert {
    pub event: String,
    pub camera: String,
    /// ISO-8601 local time.
    pub timestamp: String,
    /// URL-style path of the saved snapshot, `null` if saving failed.
    pub snapshot: Option<String>,
}

impl GateAlert {
    pub fn gate_open(camera: &str, timestamp: String, snapshot: Option<String>) -> Self {
        Self {
            event: ALERT_EVENT_GATE_OPEN.to_string(),
            camera: camera.to_string(),
            timestamp,
            snapshot,
        }
    }
}

/// Topic names for one camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    camera: String,
}

impl Topics {
    pub fn new(prefix: &str, camera: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            camera: camera.to_string(),
        }
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn availability(&self) -> String {
        format!("{}/status", self.prefix)
    }

    pub fn status(&self) -> String {
        format!("{}/{}/status", self.prefix, self.camera)
    }

    pub fn alert(&self) -> String {
        format!("{}/{}/alert", self.prefix, self.camera)
    }
}

/// Delivery of monitor output to the bus.
///
/// Publishing is best-effort: callers log errors and carry on.
pub trait Publisher {
    fn publish_availability(&mut self, availability: Availability) -> Result<()>;

    /// Retained last-known gate state.
    fn publish_status(&mut self, status: GateStatus) -> Result<()>;

    fn publish_alert(&mut self, alert: &GateAlert) -> Result<()>;

    /// Flush and close the bus connection.
    fn close(&mut self) -> Result<()>;
}

impl<T: Publisher + ?Sized> Publisher for &mut T {
    fn publish_availability(&mut self, availability: Availability) -> Result<()> {
        (**self).publish_availability(availability)
    }

    fn publish_status(&mut self, status: GateStatus) -> Result<()> {
        (**self).publish_status(status)
    }

    fn publish_alert(&mut self, alert: &GateAlert) -> Result<()> {
        (**self).publish_alert(alert)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
