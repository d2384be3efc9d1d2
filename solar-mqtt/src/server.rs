use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{LastWill, QoS};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::command::CommandHandler;
use crate::config::Config;
use crate::modbus::device::Device;
use crate::modbus::transport::{ModbusLink, SharedTransport};
use crate::mqtt;
use crate::publisher::Publisher;
use crate::scheduler::Scheduler;
use crate::Error;

/// Wire everything together and run until the shutdown future resolves:
/// one MQTT connection, one transport per configured line, one scheduler
/// and one command handler sharing the device list.
pub async fn run(config: Config, shutdown: impl Future) -> crate::Result<()> {
    let base_topic = config.mqtt.base_topic();

    let mut options = config.mqtt.options()?;
    options.set_last_will(LastWill {
        topic: format!("{base_topic}/status"),
        message: "offline".into(),
        qos: QoS::AtLeastOnce,
        retain: true,
    });

    let (notify_shutdown, _) = broadcast::channel(1);

    let mut mqtt_connection = mqtt::new(options, notify_shutdown.subscribe().into());
    let handle = mqtt_connection.handle();
    let reconnects = mqtt_connection.reconnects();

    let transports: HashMap<&str, SharedTransport> = config
        .transports
        .iter()
        .map(|t| (t.name.as_str(), ModbusLink::shared(t)))
        .collect();

    let mut devices = Vec::with_capacity(config.devices.len());
    for device_config in &config.devices {
        let transport = transports
            .get(device_config.transport.as_str())
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "device {} references undefined transport {}",
                    device_config.name, device_config.transport
                ))
            })?;
        devices.push(Arc::new(Device::new(device_config, transport)?));
    }

    info!(
        devices = devices.len(),
        transports = transports.len(),
        %base_topic,
        "starting up"
    );

    let publisher = Arc::new(Publisher::new(
        handle.clone(),
        base_topic.clone(),
        config.mqtt.discovery_prefix.clone(),
        reconnects,
    ));

    publisher.status(true).await?;

    let scheduler = Scheduler::new(
        devices.clone(),
        publisher.clone(),
        config.poll.clone(),
        notify_shutdown.subscribe().into(),
    );
    let commands = CommandHandler::new(
        devices,
        handle,
        publisher.clone(),
        base_topic,
        config.poll.clone(),
        notify_shutdown.subscribe().into(),
    );

    let scheduler_task = tokio::spawn(scheduler.run());
    let command_task = tokio::spawn(commands.run());

    let mut ret = Ok(());

    tokio::select! {
        res = mqtt_connection.run() => {
            if let Err(err) = res {
                error!(cause = %err, "MQTT connection error");
                ret = Err(err);
            } else {
                info!("MQTT connection closed");
            }
        }

        _ = shutdown => {
            info!("shutting down");
        }
    }

    // Say goodbye while the event loop is still around to flush it; the
    // last will covers the non-graceful paths.
    let _ = publisher.status(false).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), mqtt_connection.run()).await;

    drop(notify_shutdown);
    let _ = scheduler_task.await;
    let _ = command_task.await;

    ret
}
