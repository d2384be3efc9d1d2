//! Remote control: resolves write requests received on the bus to a target
//! device and register, performs a bounded-retry write through the device's
//! transport, and reports the outcome.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::{select, time::sleep};
use tracing::{error, info, warn};

use crate::config::Poll;
use crate::modbus::device::Device;
use crate::modbus::register::{EntityKind, RegisterSpec};
use crate::mqtt::{self, Payload};
use crate::publisher::{CommandOutcome, Publisher};
use crate::shutdown::Shutdown;
use crate::Error;

pub struct CommandHandler {
    devices: Vec<Arc<Device>>,
    mqtt: mqtt::Handle,
    publisher: Arc<Publisher>,
    base_topic: String,
    poll: Poll,
    shutdown: Shutdown,
}

/// A resolved write request. Created per inbound message, gone once its
/// terminal outcome is reported.
struct Command {
    device: Arc<Device>,
    spec: RegisterSpec,
    words: Vec<u16>,
}

impl CommandHandler {
    pub(crate) fn new(
        devices: Vec<Arc<Device>>,
        mqtt: mqtt::Handle,
        publisher: Arc<Publisher>,
        base_topic: String,
        poll: Poll,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            devices,
            mqtt,
            publisher,
            base_topic,
            poll,
            shutdown,
        }
    }

    pub async fn run(mut self) -> crate::Result<()> {
        let mut commands = self
            .mqtt
            .subscribe(format!("{}/+/+/set", self.base_topic))
            .await?;

        loop {
            select! {
                message = commands.recv() => match message {
                    None => return Ok(()),
                    Some(Payload { topic, bytes }) => self.handle_message(&topic, &bytes).await,
                },
                _ = self.shutdown.recv() => return Ok(()),
            }
        }
    }

    async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let Some((device_name, key)) = self.parse_topic(topic) else {
            warn!(%topic, "ignoring command on unexpected topic");
            return;
        };

        let outcome = match self.resolve(device_name, key, payload) {
            Ok(command) => self.execute(command).await,
            Err(reason) => {
                warn!(device = device_name, register = key, %reason, "command rejected");
                CommandOutcome::Rejected { reason }
            }
        };

        if let Err(error) = self
            .publisher
            .command_result(device_name, key, &outcome)
            .await
        {
            warn!(device = device_name, register = key, %error, "failed to report command result");
        }
    }

    fn parse_topic<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = topic
            .strip_prefix(self.base_topic.as_str())?
            .strip_prefix('/')?;
        match rest.split('/').collect::<Vec<_>>()[..] {
            [device, key, "set"] => Some((device, key)),
            _ => None,
        }
    }

    /// All validation happens before any transport exchange: an unknown
    /// target, a read-only register, or a malformed payload never touches
    /// the line.
    fn resolve(&self, device_name: &str, key: &str, payload: &[u8]) -> Result<Command, String> {
        let device = self
            .devices
            .iter()
            .find(|d| d.name == device_name)
            .ok_or_else(|| format!("unknown device {device_name}"))?;

        if !device.is_available() {
            return Err(format!("device {device_name} is unavailable"));
        }

        let spec = device
            .writable_register(key)
            .ok_or_else(|| format!("no writable register {key} on {device_name}"))?;

        let text = std::str::from_utf8(payload)
            .map_err(|_| "payload is not UTF-8".to_owned())?
            .trim();
        let words = encode_payload(spec, text)?;

        Ok(Command {
            device: device.clone(),
            spec: spec.clone(),
            words,
        })
    }

    /// Fixed-delay retry up to the configured ceiling, then terminal
    /// failure. The transport lock is released between attempts so polling
    /// can interleave. Success is fire-and-forget: the next poll cycle
    /// refreshes the entity state.
    async fn execute(&self, command: Command) -> CommandOutcome {
        let max = self.poll.write_attempts;

        for attempt in 1..=max {
            match command.device.write(&command.spec, &command.words).await {
                Ok(()) => {
                    info!(
                        device = %command.device.name,
                        register = command.spec.key,
                        attempt,
                        "write succeeded"
                    );
                    return CommandOutcome::Ok { attempts: attempt };
                }
                Err(write_error) => {
                    warn!(
                        device = %command.device.name,
                        register = command.spec.key,
                        attempt,
                        %write_error,
                        "write attempt failed"
                    );
                    if attempt < max {
                        sleep(self.poll.write_retry_delay).await;
                    }
                }
            }
        }

        let terminal = Error::WriteRejected {
            register: command.spec.key.to_owned(),
            attempts: max,
        };
        error!(device = %command.device.name, %terminal, "giving up on command");
        CommandOutcome::Failed { attempts: max }
    }
}

/// Translate a command payload into raw register words, the inverse of the
/// register's decode rule.
fn encode_payload(spec: &RegisterSpec, text: &str) -> Result<Vec<u16>, String> {
    match spec.entity {
        EntityKind::Switch | EntityKind::Select => spec
            .options
            .iter()
            .find(|(label, _)| *label == text)
            .map(|(_, raw)| vec![*raw])
            .ok_or_else(|| format!("{text:?} is not an option for {}", spec.key)),
        EntityKind::Number => {
            let value =
                Decimal::from_str(text).map_err(|e| format!("invalid number {text:?}: {e}"))?;
            if let Some(min) = spec.min {
                if value < min {
                    return Err(format!("{value} is below the minimum {min}"));
                }
            }
            if let Some(max) = spec.max {
                if value > max {
                    return Err(format!("{value} is above the maximum {max}"));
                }
            }
            spec.encode(value).map_err(|e| e.to_string())
        }
        EntityKind::Sensor => Err(format!("{} is not writable", spec.key)),
    }
}
