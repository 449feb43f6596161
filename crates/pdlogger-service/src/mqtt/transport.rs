//! MQTT session transport.
//!
//! [`MqttTransport`] is the narrow surface the connectivity manager drives:
//! open a session (with a last will), publish fire-and-forget, close it, and
//! report whether the session is still up. [`RumqttcTransport`] implements it
//! on top of rumqttc; tests use [`MockTransport`](super::MockTransport).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, LastWill, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long an orderly disconnect may take before the driver is aborted.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);
/// Request queue capacity of the rumqttc client.
const REQUEST_CAPACITY: usize = 32;

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MqttError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("refused by broker ({0})")]
    Refused(String),
    #[error("{0}")]
    Connection(String),
    #[error("not connected")]
    NotConnected,
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Everything needed to open one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    /// Username and password, when the broker requires them.
    pub credentials: Option<(String, String)>,
    pub will_topic: String,
    pub will_payload: String,
    pub keep_alive: Duration,
    /// Upper bound for the whole connect handshake.
    pub connect_timeout: Duration,
}

/// An MQTT session the connectivity manager can drive.
#[async_trait]
pub trait MqttTransport: Send {
    /// Open a new session, replacing any existing one.
    ///
    /// Must return within `options.connect_timeout`.
    async fn connect(&mut self, options: &SessionOptions) -> Result<(), MqttError>;

    /// Queue a QoS 0 publish without waiting for the network.
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError>;

    /// Close the current session, if any.
    async fn disconnect(&mut self);

    /// Whether the session is currently up.
    fn is_connected(&self) -> bool;
}

struct Session {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// [`MqttTransport`] backed by a rumqttc client and event loop.
///
/// After the handshake the event loop runs in a driver task that flips the
/// connected flag off as soon as the session ends. Automatic reconnects of
/// the event loop are not used; the manager opens a fresh session instead.
#[derive(Default)]
pub struct RumqttcTransport {
    session: Option<Session>,
}

impl RumqttcTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MqttTransport for RumqttcTransport {
    async fn connect(&mut self, options: &SessionOptions) -> Result<(), MqttError> {
        self.disconnect().await;

        let mut mqtt_options = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);
        if let Some((username, password)) = &options.credentials {
            mqtt_options.set_credentials(username, password);
        }
        mqtt_options.set_last_will(LastWill::new(
            &options.will_topic,
            options.will_payload.as_bytes().to_vec(),
            QoS::AtMostOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return match ack.code {
                            ConnectReturnCode::Success => Ok(()),
                            code => Err(MqttError::Refused(format!("{:?}", code))),
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(MqttError::Connection(e.to_string())),
                }
            }
        };
        match tokio::time::timeout(options.connect_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(MqttError::Timeout(options.connect_timeout)),
        }

        let connected = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&connected);
        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::PingResp)) => {
                        debug!("MQTT ping response received");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        debug!("MQTT broker closed the session");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("MQTT session ended: {}", e);
                        break;
                    }
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        self.session = Some(Session {
            client,
            connected,
            driver,
        });
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.connected.load(Ordering::SeqCst))
            .ok_or(MqttError::NotConnected)?;
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.connected.store(false, Ordering::SeqCst);
        if let Err(e) = session.client.try_disconnect() {
            debug!("Error disconnecting MQTT client: {}", e);
        }
        drop(session.client);
        if tokio::time::timeout(DISCONNECT_GRACE, &mut session.driver)
            .await
            .is_err()
        {
            warn!("MQTT driver did not stop in time, aborting");
            session.driver.abort();
        }
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.connected.load(Ordering::SeqCst))
    }
}
