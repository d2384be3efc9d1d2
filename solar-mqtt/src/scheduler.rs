//! The main control loop: drives periodic reads across all configured
//! devices, enforces cycle pacing and the nightly quiet window, and hands
//! decoded values to the publisher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use tokio::{select, time::sleep};
use tracing::{error, info, warn};

use crate::config::{Poll, QuietWindow};
use crate::modbus::device::Device;
use crate::publisher::Publisher;
use crate::shutdown::Shutdown;
use crate::Error;

/// Polling already stops this long before midnight, matching devices that
/// wind down or reset counters around the day boundary.
const QUIET_LEAD: Duration = Duration::from_secs(3 * 60);

pub struct Scheduler {
    devices: Vec<Arc<Device>>,
    publisher: Arc<Publisher>,
    poll: Poll,
    shutdown: Shutdown,
    /// Last availability published per device, to only publish transitions.
    online: HashMap<String, bool>,
}

impl Scheduler {
    pub(crate) fn new(
        devices: Vec<Arc<Device>>,
        publisher: Arc<Publisher>,
        poll: Poll,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            devices,
            publisher,
            poll,
            shutdown,
            online: HashMap::new(),
        }
    }

    pub async fn run(mut self) -> crate::Result<()> {
        self.verify_identities().await;

        loop {
            if self.shutdown.is_shutdown() {
                return Ok(());
            }

            if let Some(wait) = quiet_wait(chrono::Local::now().time(), &self.poll.quiet_window) {
                info!(resume_in = ?wait, "quiet window: polling suspended");
                self.release_transports().await;
                select! {
                    _ = sleep(wait) => {}
                    _ = self.shutdown.recv() => return Ok(()),
                }
                // Re-check the clock before polling again.
                continue;
            }

            self.sweep().await;

            select! {
                _ = sleep(self.poll.pause_interval) => {}
                _ = self.shutdown.recv() => return Ok(()),
            }
        }
    }

    /// One-shot serial verification per device. A mismatch disables that
    /// device only; a connection failure leaves it enabled for normal
    /// polling to retry.
    async fn verify_identities(&mut self) {
        for device in self.devices.clone() {
            match device.verify_identity().await {
                Ok(()) => {}
                Err(error @ Error::IdentityMismatch { .. }) => {
                    error!(device = %device.name, %error, "disabling device for this session");
                    self.set_availability(&device, false).await;
                }
                Err(error) => {
                    warn!(device = %device.name, %error, "identity check did not complete; polling will retry");
                }
            }
        }
    }

    /// Poll every available device once. Failures are isolated: one device
    /// erroring never stops the sweep of the others.
    async fn sweep(&mut self) {
        if self.publisher.resync() {
            // Retained availability may be gone along with the session.
            self.online.clear();
        }

        for device in self.devices.clone() {
            if !device.is_available() {
                continue;
            }

            if let Err(error) = self.publisher.announce(&device).await {
                warn!(device = %device.name, %error, "discovery announcement failed");
            }

            match device.poll().await {
                Ok(measurements) => {
                    if let Err(error) = self.publisher.publish(&device, &measurements).await {
                        warn!(device = %device.name, %error, "publishing measurements failed");
                        continue;
                    }
                    self.set_availability(&device, true).await;
                }
                Err(error) => {
                    warn!(device = %device.name, %error, "poll failed; skipping device this cycle");
                    self.set_availability(&device, false).await;
                }
            }
        }
    }

    async fn set_availability(&mut self, device: &Device, online: bool) {
        if self.online.get(&device.name) == Some(&online) {
            return;
        }
        match self.publisher.availability(device, online).await {
            Ok(()) => {
                self.online.insert(device.name.clone(), online);
            }
            Err(error) => warn!(device = %device.name, %error, "publishing availability failed"),
        }
    }

    /// Quiet window: devices stop responding overnight anyway, so release
    /// the lines instead of hammering them.
    async fn release_transports(&self) {
        for device in &self.devices {
            device.transport().lock().await.close().await;
        }
    }
}

/// How long polling must stay suspended, given the local wall-clock time.
/// The window runs from [`QUIET_LEAD`] before midnight until `wake_after`
/// past midnight.
fn quiet_wait(now: NaiveTime, policy: &QuietWindow) -> Option<Duration> {
    if !policy.enabled {
        return None;
    }

    let day = Duration::from_secs(24 * 60 * 60);
    let since_midnight = Duration::from_secs(now.num_seconds_from_midnight() as u64);

    if since_midnight < policy.wake_after {
        Some(policy.wake_after - since_midnight)
    } else if day - since_midnight <= QUIET_LEAD {
        Some(day - since_midnight + policy.wake_after)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::modbus::register::RegisterKind;
    use crate::modbus::transport::testing::FakeTransport;
    use crate::modbus::transport::SharedTransport;
    use crate::mqtt::{self, Message};
    use crate::publisher::tests::{drain, topics};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::{broadcast, mpsc::Receiver};

    fn device(name: &str, transport: SharedTransport) -> Arc<Device> {
        let config: DeviceConfig = serde_json::from_value(json!({
            "name": name, "type": "inverter", "transport": "Client1", "unit": 1
        }))
        .unwrap();
        Arc::new(Device::new(&config, transport).unwrap())
    }

    fn scheduler(devices: Vec<Arc<Device>>) -> (Scheduler, Receiver<Message>) {
        let (handle, rx) = mqtt::Handle::for_testing();
        let (_reconnect_tx, reconnect_rx) = broadcast::channel(4);
        let publisher = Arc::new(Publisher::new(
            handle,
            "modbus".to_owned(),
            "homeassistant".to_owned(),
            reconnect_rx,
        ));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = Scheduler::new(
            devices,
            publisher,
            Poll::default(),
            Shutdown::new(shutdown_rx),
        );
        (scheduler, rx)
    }

    #[tokio::test]
    async fn end_to_end_read_decode_publish() {
        let mut fake = FakeTransport::new("Client1");
        // nominal active power: raw 150, scale 0.1 → 15 kW
        fake.load(1, RegisterKind::Input, 5001, &[150]);
        let sg1 = device("SG1", fake.shared());

        let (mut scheduler, mut rx) = scheduler(vec![sg1.clone()]);
        scheduler.sweep().await;

        let messages = drain(&mut rx);
        let topics = topics(&messages);

        // discovery once per entity, then state per entity, then availability
        let discovery: Vec<_> = topics
            .iter()
            .filter(|t| t.starts_with("homeassistant/"))
            .collect();
        assert_eq!(discovery.len(), sg1.registers.len());

        let power = messages
            .iter()
            .find_map(|m| match m {
                Message::Publish { topic, payload, .. }
                    if topic == "modbus/SG1/nominal_active_power" =>
                {
                    Some(payload.clone())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(power, b"15");

        assert!(topics.contains(&"modbus/SG1/availability".to_owned()));

        // a second sweep publishes state again but no new discovery
        scheduler.sweep().await;
        let second = drain(&mut rx);
        assert!(!crate::publisher::tests::topics(&second)
            .iter()
            .any(|t| t.starts_with("homeassistant/")));
    }

    #[tokio::test]
    async fn one_failing_device_does_not_stop_the_sweep() {
        let mut bad = FakeTransport::new("Client1");
        bad.fail_reads = 100;
        let broken = device("SG1", bad.shared());

        let mut good = FakeTransport::new("Client2");
        good.load(1, RegisterKind::Input, 5001, &[150]);
        let healthy = device("SG2", good.shared());

        let (mut scheduler, mut rx) = scheduler(vec![broken, healthy]);
        scheduler.sweep().await;

        let messages = drain(&mut rx);

        // the broken device goes offline, the healthy one still publishes
        let offline = messages.iter().any(|m| matches!(
            m,
            Message::Publish { topic, payload, .. }
                if topic == "modbus/SG1/availability" && payload == b"offline"
        ));
        let healthy_state = messages.iter().any(|m| matches!(
            m,
            Message::Publish { topic, .. } if topic == "modbus/SG2/nominal_active_power"
        ));
        assert!(offline);
        assert!(healthy_state);
    }

    #[tokio::test]
    async fn identity_mismatch_excludes_device_from_polling() {
        let mut fake = FakeTransport::new("Client1");
        fake.load(
            1,
            RegisterKind::Input,
            4990,
            &{
                let mut bytes = b"WRONGSERIAL".to_vec();
                bytes.resize(20, 0);
                bytes
                    .chunks(2)
                    .map(|p| u16::from_be_bytes([p[0], p[1]]))
                    .collect::<Vec<u16>>()
            },
        );
        let fake = Arc::new(tokio::sync::Mutex::new(fake));

        let config: DeviceConfig = serde_json::from_value(json!({
            "name": "SG1", "type": "inverter", "serial": "A2290000000",
            "transport": "Client1", "unit": 1
        }))
        .unwrap();
        let transport: SharedTransport = fake.clone();
        let sg1 = Arc::new(Device::new(&config, transport).unwrap());

        let (mut scheduler, mut rx) = scheduler(vec![sg1]);
        scheduler.verify_identities().await;

        let reads_after_verify = fake.lock().await.reads.len();
        scheduler.sweep().await;

        // no further exchanges for a disabled device
        assert_eq!(fake.lock().await.reads.len(), reads_after_verify);

        let messages = drain(&mut rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            Message::Publish { topic, payload, .. }
                if topic == "modbus/SG1/availability" && payload == b"offline"
        )));
    }

    #[test]
    fn quiet_window_disabled_never_waits() {
        let policy = QuietWindow {
            enabled: false,
            wake_after: Duration::from_secs(300),
        };
        let t = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert_eq!(quiet_wait(t, &policy), None);
    }

    #[test]
    fn quiet_window_boundaries() {
        let policy = QuietWindow {
            enabled: true,
            wake_after: Duration::from_secs(300),
        };
        let at = |h, m, s| NaiveTime::from_hms_opt(h, m, s).unwrap();

        // well within the day: no wait
        assert_eq!(quiet_wait(at(12, 0, 0), &policy), None);

        // just before the lead-in starts
        assert_eq!(quiet_wait(at(23, 56, 59), &policy), None);

        // lead-in: wait across midnight plus the wake offset
        assert_eq!(
            quiet_wait(at(23, 57, 0), &policy),
            Some(Duration::from_secs(3 * 60 + 300))
        );

        // midnight: wait the full wake offset
        assert_eq!(
            quiet_wait(at(0, 0, 0), &policy),
            Some(Duration::from_secs(300))
        );

        // one second before waking
        assert_eq!(
            quiet_wait(at(0, 4, 59), &policy),
            Some(Duration::from_secs(1))
        );

        // wake time reached
        assert_eq!(quiet_wait(at(0, 5, 0), &policy), None);
    }
}
