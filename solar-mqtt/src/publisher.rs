//! Maps decoded values and device metadata onto bus topics: discovery
//! announcements, per-entity state, availability, and command results.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::homeassistant;
use crate::modbus::device::{Device, Measurement};
use crate::mqtt;

pub struct Publisher {
    mqtt: mqtt::Handle,
    base_topic: String,
    discovery_prefix: String,
    /// `<device>/<key>` pairs already announced this broker session.
    announced: Mutex<HashSet<String>>,
    reconnects: Mutex<broadcast::Receiver<()>>,
}

/// Terminal result of a remote write command.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandOutcome {
    Ok { attempts: u32 },
    Rejected { reason: String },
    Failed { attempts: u32 },
}

impl Publisher {
    pub fn new(
        mqtt: mqtt::Handle,
        base_topic: String,
        discovery_prefix: String,
        reconnects: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            mqtt,
            base_topic,
            discovery_prefix,
            announced: Mutex::new(HashSet::new()),
            reconnects: Mutex::new(reconnects),
        }
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    /// Forget announced state if the broker connection was re-established
    /// since the last call; discovery is not assumed to survive the broker's
    /// own state loss. Returns whether a reconnect was observed.
    pub fn resync(&self) -> bool {
        let mut rx = self.reconnects.lock().unwrap();
        let mut reconnected = false;
        loop {
            match rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => reconnected = true,
                Err(_) => break,
            }
        }
        drop(rx);

        if reconnected {
            info!("MQTT session was re-established; re-announcing discovery");
            self.announced.lock().unwrap().clear();
        }
        reconnected
    }

    /// Emit one discovery message per not-yet-announced entity. Safe to call
    /// every cycle; already-announced entities are skipped.
    pub async fn announce(&self, device: &Device) -> crate::Result<()> {
        let info = homeassistant::device_info(device);

        for spec in &device.registers {
            let id = format!("{}/{}", device.name, spec.key);
            if !self.announced.lock().unwrap().insert(id) {
                continue;
            }

            let config = homeassistant::entity_config(&self.base_topic, device, &info, spec);
            let topic = homeassistant::discovery_topic(&self.discovery_prefix, &device.name, spec);
            self.mqtt
                .publish_retained(topic, serde_json::to_vec(&config)?)
                .await?;
            debug!(device = %device.name, entity = spec.key, "announced");
        }

        Ok(())
    }

    pub async fn availability(&self, device: &Device, online: bool) -> crate::Result<()> {
        let topic = format!("{}/{}/availability", self.base_topic, device.name);
        self.mqtt
            .publish_retained(topic, if online { "online" } else { "offline" })
            .await
    }

    /// Current values on per-entity state topics. Absent values publish the
    /// literal `unavailable` payload rather than being omitted.
    pub async fn publish(&self, device: &Device, measurements: &[Measurement]) -> crate::Result<()> {
        for measurement in measurements {
            let topic = format!("{}/{}/{}", self.base_topic, device.name, measurement.key);
            self.mqtt.publish(topic, measurement.value.payload()).await?;
        }
        Ok(())
    }

    pub async fn command_result(
        &self,
        device_name: &str,
        key: &str,
        outcome: &CommandOutcome,
    ) -> crate::Result<()> {
        let topic = format!("{}/{}/{}/result", self.base_topic, device_name, key);
        self.mqtt.publish(topic, serde_json::to_vec(outcome)?).await
    }

    /// Bridge lifecycle status; the MQTT last-will publishes the `offline`
    /// counterpart if the process dies without saying goodbye.
    pub async fn status(&self, online: bool) -> crate::Result<()> {
        let topic = format!("{}/status", self.base_topic);
        self.mqtt
            .publish_retained(topic, if online { "online" } else { "offline" })
            .await
    }
}
