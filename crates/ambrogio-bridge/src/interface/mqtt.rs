//! MQTT broker client over rumqttc
//!
//! `connect` waits (bounded by the configured timeout) for the broker's
//! CONNACK, then hands the rumqttc event loop to a spawned task. The task
//! forwards PUBLISH packets into a channel drained by
//! [`BrokerClient::poll_inbound`] and clears the connected flag on the
//! first error. It does not reconnect on its own; the bridge's
//! supervisor decides when the next attempt happens.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::{BrokerConfig, Credentials};
use crate::error::{BridgeError, Result};
use crate::interface::{BrokerClient, InboundMessage};

/// Capacity of the rumqttc request queue
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// MQTT client for the bridge
pub struct MqttBroker {
    host: String,
    port: u16,
    keep_alive: Duration,
    connect_timeout: Duration,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    inbound_rx: Option<mpsc::UnboundedReceiver<InboundMessage>>,
    task: Option<JoinHandle<()>>,
}

impl MqttBroker {
    /// Create a client for the configured broker
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            keep_alive: config.keep_alive,
            connect_timeout: config.connect_timeout,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbound_rx: None,
            task: None,
        }
    }

    fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(client) = self.client.take() {
            let _ = client.try_disconnect();
        }
        self.inbound_rx = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn await_connack(event_loop: &mut EventLoop) -> Result<()> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(BridgeError::BrokerConnectFailed(format!(
                            "broker refused: {:?}",
                            ack.code
                        )))
                    };
                }
                Ok(_) => continue,
                Err(e) => return Err(BridgeError::BrokerConnectFailed(e.to_string())),
            }
        }
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        connected: Arc<AtomicBool>,
        inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!(topic = %publish.topic, bytes = publish.payload.len(), "Received publish");
                    let msg = InboundMessage::new(publish.topic.clone(), publish.payload.clone());
                    if inbound_tx.send(msg).is_err() {
                        debug!("Inbound receiver dropped, stopping event loop");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(suback))) => {
                    debug!(pkid = suback.pkid, "Subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker closed the session");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT event loop error");
                    break;
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(&mut self, client_id: &str, credentials: &Credentials) -> Result<()> {
        self.teardown();

        info!(host = %self.host, port = self.port, client_id, "Connecting to MQTT broker");

        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        match credentials {
            Credentials::Anonymous => {}
            Credentials::User(username) => {
                options.set_credentials(username.clone(), "");
            }
            Credentials::UserPassword { username, password } => {
                options.set_credentials(username.clone(), password.clone());
            }
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        tokio::time::timeout(self.connect_timeout, Self::await_connack(&mut event_loop))
            .await
            .map_err(|_| BridgeError::ConnectionTimeout {
                duration_ms: self.connect_timeout.as_millis() as u64,
            })??;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.connected.store(true, Ordering::SeqCst);
        self.task = Some(tokio::spawn(Self::run_event_loop(
            event_loop,
            self.connected.clone(),
            inbound_tx,
        )));
        self.client = Some(client);
        self.inbound_rx = Some(inbound_rx);

        info!(host = %self.host, "Connected to MQTT broker");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let client = self.client.as_ref().ok_or(BridgeError::BrokerDisconnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        debug!(topic, "Subscribed");
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::BrokerDisconnected);
        }
        let client = self.client.as_ref().ok_or(BridgeError::BrokerDisconnected)?;
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| BridgeError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn poll_inbound(&mut self) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        if let Some(rx) = self.inbound_rx.as_mut() {
            while let Ok(msg) = rx.try_recv() {
                messages.push(msg);
            }
        }
        messages
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}
