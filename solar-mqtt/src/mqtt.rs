use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{
    mqttbytes::matches as matches_topic, AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS,
};
use tokio::{
    select,
    sync::{
        broadcast,
        mpsc::{channel, Receiver, Sender},
    },
};
use tracing::{debug, info, warn};

use crate::shutdown::Shutdown;

/// A message received on a subscribed topic.
#[derive(Clone, Debug)]
pub struct Payload {
    pub topic: String,
    pub bytes: Bytes,
}

#[derive(Debug)]
pub enum Message {
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    Subscribe {
        filter: String,
        tx: Sender<Payload>,
    },
}

pub(crate) fn new(options: MqttOptions, shutdown: Shutdown) -> Connection {
    let (client, event_loop) = AsyncClient::new(options, 32);
    let (tx, rx) = channel(32);
    let (reconnect_tx, _) = broadcast::channel(4);

    Connection {
        client,
        event_loop,
        subscriptions: HashMap::new(),
        tx,
        rx,
        reconnect_tx,
        connected_before: false,
        shutdown,
    }
}

const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

// Maintain internal subscriptions as well as MQTT subscriptions. Relay all received messages on
// MQTT subscribed topics to internal components with a matching filter. Unsubscribe topics when
// no one is listening anymore.
pub(crate) struct Connection {
    subscriptions: HashMap<String, Vec<Sender<Payload>>>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    client: AsyncClient,
    event_loop: EventLoop,
    reconnect_tx: broadcast::Sender<()>,
    connected_before: bool,
    shutdown: Shutdown,
}

impl Connection {
    pub fn handle(&self) -> Handle {
        Handle {
            tx: self.tx.clone(),
        }
    }

    /// Watchers learn that the broker connection was re-established and any
    /// broker-side state (retained discovery, subscriptions) may be gone.
    pub fn reconnects(&self) -> broadcast::Receiver<()> {
        self.reconnect_tx.subscribe()
    }

    pub async fn run(&mut self) -> crate::Result<()> {
        loop {
            select! {
                event = self.event_loop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(event).await?,
                        Err(error) => {
                            warn!(%error, "MQTT connection error; retrying");
                            tokio::time::sleep(POLL_RETRY_DELAY).await;
                        }
                    }
                }
                request = self.rx.recv() => {
                    match request {
                        None => return Ok(()),
                        Some(req) => self.handle_request(req).await?,
                    }
                }
                _ = self.shutdown.recv() => return Ok(()),
            }
        }
    }

    async fn handle_event(&mut self, event: Event) -> crate::Result<()> {
        match event {
            Event::Incoming(Incoming::ConnAck(_)) => {
                info!("connected to MQTT broker");
                if self.connected_before {
                    // The broker may have dropped our session: put the
                    // subscriptions back and let watchers re-announce.
                    for filter in self.subscriptions.keys() {
                        self.client
                            .subscribe(filter.clone(), QoS::AtLeastOnce)
                            .await?;
                    }
                    let _ = self.reconnect_tx.send(());
                }
                self.connected_before = true;
            }
            Event::Incoming(Incoming::Publish(publish)) => {
                debug!(topic = %publish.topic, payload = ?publish.payload, "publish");
                self.handle_data(publish.topic, publish.payload).await?;
            }
            _ => {}
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(subscriptions = ?self.subscriptions.keys()))]
    async fn handle_data(&mut self, topic: String, payload: Bytes) -> crate::Result<()> {
        let mut targets = vec![];

        // Remove subscriptions whose channels are closed, adding matching
        // channels to the `targets` vec.
        self.subscriptions.retain(|filter, channels| {
            if matches_topic(&topic, filter) {
                channels.retain(|channel| {
                    if channel.is_closed() {
                        warn!(?channel, "closed");
                        false
                    } else {
                        targets.push(channel.clone());
                        true
                    }
                });
                !channels.is_empty()
            } else {
                true
            }
        });

        for target in targets {
            let _ = target
                .send(Payload {
                    topic: topic.clone(),
                    bytes: payload.clone(),
                })
                .await;
        }
        Ok(())
    }

    async fn handle_request(&mut self, request: Message) -> crate::Result<()> {
        match request {
            Message::Publish {
                topic,
                payload,
                qos,
                retain,
            } => self.client.publish(topic, qos, retain, payload).await?,
            Message::Subscribe { filter, tx } => {
                self.subscriptions
                    .entry(filter.clone())
                    .or_default()
                    .push(tx);
                self.client.subscribe(filter, QoS::AtLeastOnce).await?
            }
        }
        Ok(())
    }
}

/// Cheaply cloneable handle for interacting with the shared MQTT connection.
#[derive(Clone, Debug)]
pub struct Handle {
    tx: Sender<Message>,
}

impl Handle {
    #[cfg(test)]
    pub(crate) fn for_testing() -> (Self, Receiver<Message>) {
        let (tx, rx) = channel(1024);
        (Self { tx }, rx)
    }

    /// Fire-and-forget state update.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> crate::Result<()> {
        self.send(Message::Publish {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        })
        .await
    }

    /// Retained, at-least-once: discovery, availability and status messages.
    pub async fn publish_retained(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> crate::Result<()> {
        self.send(Message::Publish {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        })
        .await
    }

    pub async fn subscribe(&self, filter: impl Into<String>) -> crate::Result<Receiver<Payload>> {
        let (tx, rx) = channel(32);
        self.send(Message::Subscribe {
            filter: filter.into(),
            tx,
        })
        .await?;
        Ok(rx)
    }

    async fn send(&self, message: Message) -> crate::Result<()> {
        self.tx.send(message).await.map_err(|_| crate::Error::SendError)
    }
}
