//! MQTT publisher.
//!
//! Uses the rumqttc v5 client with QoS 1. A background thread drives the
//! connection and keeps reconnecting until `close()`; the broker being down at
//! startup is logged, not fatal. A retained `offline` last will covers crashes.

use anyhow::{anyhow, Result};
use rumqttc::v5::mqttbytes::v5::{LastWill, Packet};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Availability, GateAlert, Publisher, Topics, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use crate::classify::GateStatus;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 10;

/// Broker connection settings.
#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    /// Home Assistant discovery prefix; `None` disables discovery.
    pub discovery_prefix: Option<String>,
}

/// Home Assistant MQTT discovery config for the gate binary sensor.
#[derive(Serialize)]
struct HaBinarySensorConfig {
    name: String,
    unique_id: String,
    state_topic: String,
    value_template: String,
    device_class: String,
    json_attributes_topic: String,
    availability_topic: String,
    payload_available: String,
    payload_not_available: String,
    device: HaDeviceInfo,
}

#[derive(Clone, Serialize)]
struct HaDeviceInfo {
    identifiers: Vec<String>,
    name: String,
    model: String,
    sw_version: String,
}

struct MqttRuntime {
    client: Client,
    stop: Arc<AtomicBool>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttRuntime {
    fn new(client: Client, mut connection: Connection, endpoint: String) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        log::info!("connected to MQTT broker {}", endpoint);
                    }
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        if stop_flag.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("MQTT connection error ({}): {}", endpoint, e);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
        });

        Self {
            client,
            stop,
            connection_handle: Some(handle),
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let result = self.client.try_disconnect();
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        result.map_err(|e| anyhow!("MQTT disconnect failed: {}", e))
    }
}

pub struct MqttPublisher {
    runtime: MqttRuntime,
    topics: Topics,
    closed: bool,
}

impl MqttPublisher {
    /// Create the client and start the connection thread. Never blocks on the
    /// network.
    pub fn connect(settings: &MqttSettings, topics: Topics) -> Self {
        let endpoint = format!("{}:{}", settings.broker, settings.port);
        log::info!("connecting to MQTT broker {}", endpoint);

        let mut options = MqttOptions::new(&settings.client_id, &settings.broker, settings.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            topics.availability(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let mut publisher = Self {
            runtime: MqttRuntime::new(client, connection, endpoint),
            topics,
            closed: false,
        };

        if let Some(prefix) = settings.discovery_prefix.as_deref() {
            if let Err(e) = publisher.publish_discovery(prefix) {
                log::warn!("failed to publish discovery config: {}", e);
            }
        }
        publisher
    }

    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        self.runtime
            .client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|e| anyhow!("MQTT publish to {} failed: {}", topic, e))
    }

    fn publish_discovery(&self, discovery_prefix: &str) -> Result<()> {
        let object_id = format!("{}_gate", sanitize_for_id(self.topics.camera()));
        let config = discovery_config(&self.topics, &object_id);
        let topic = format!("{}/binary_sensor/{}/config", discovery_prefix, object_id);
        let json = serde_json::to_vec(&config)?;
        self.publish(&topic, &json, true)?;
        log::info!("published discovery config to {}", topic);
        Ok(())
    }
}

impl Publisher for MqttPublisher {
    fn publish_availability(&mut self, availability: Availability) -> Result<()> {
        let topic = self.topics.availability();
        self.publish(&topic, availability.as_str().as_bytes(), true)?;
        log::info!("monitor status: {}", availability.as_str());
        Ok(())
    }

    fn publish_status(&mut self, status: GateStatus) -> Result<()> {
        let topic = self.topics.status();
        self.publish(&topic, status.as_str().as_bytes(), true)?;
        log::info!("published to {}: {}", topic, status);
        Ok(())
    }

    fn publish_alert(&mut self, alert: &GateAlert) -> Result<()> {
        let topic = self.topics.alert();
        let json = serde_json::to_vec(alert)?;
        self.publish(&topic, &json, false)?;
        log::info!(
            "published alert to {} with snapshot: {}",
            topic,
            alert.snapshot.as_deref().unwrap_or("none")
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.runtime.disconnect()
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::debug!("{}", e);
        }
    }
}

fn discovery_config(topics: &Topics, object_id: &str) -> HaBinarySensorConfig {
    HaBinarySensorConfig {
        name: format!("Gate {}", topics.camera()),
        unique_id: format!("gate_monitor_{}", object_id),
        state_topic: topics.status(),
        value_template: "{{ 'ON' if value == 'open' else ('OFF' if value == 'closed' else None) }}"
            .to_string(),
        device_class: "opening".to_string(),
        json_attributes_topic: topics.alert(),
        availability_topic: topics.availability(),
        payload_available: PAYLOAD_ONLINE.to_string(),
        payload_not_available: PAYLOAD_OFFLINE.to_string(),
        device: HaDeviceInfo {
            identifiers: vec![format!("gate_monitor_{}", sanitize_for_id(topics.camera()))],
            name: "Gate Monitor".to_string(),
            model: "Gate Monitor".to_string(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

fn sanitize_for_id(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_for_id_replaces_special_chars() {
        assert_eq!(sanitize_for_id("exterior-frente"), "exterior_frente");
        assert_eq!(sanitize_for_id("cam:1"), "cam_1");
        assert_eq!(sanitize_for_id("camera_1"), "camera_1");
    }

    #[test]
    fn discovery_config_points_at_gate_topics() {
        let topics = Topics::new("homeassistant/gate", "exterior_frente");
        let config = discovery_config(&topics, "exterior_frente_gate");
        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["state_topic"], "homeassistant/gate/exterior_frente/status");
        assert_eq!(json["availability_topic"], "homeassistant/gate/status");
        assert_eq!(json["device_class"], "opening");
        assert_eq!(json["payload_not_available"], "offline");
        assert_eq!(json["unique_id"], "gate_monitor_exterior_frente_gate");
    }
}
