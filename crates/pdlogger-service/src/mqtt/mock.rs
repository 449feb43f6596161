//! In-memory transport for testing.
//!
//! [`MockTransport`] records every session and publish and lets tests inject
//! connect failures or drop the session. Clones share state, so a test can
//! hand one clone to the manager and inspect another.
//!
//! # Example
//!
//! ```
//! use pdlogger_service::mqtt::{MockTransport, MqttTransport};
//!
//! let mut transport = MockTransport::new();
//! let probe = transport.clone();
//! assert!(transport.publish("t", b"x", false).is_err());
//! assert!(probe.published().is_empty());
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::transport::{MqttError, MqttTransport, SessionOptions};

/// A message captured by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    refuse: bool,
    fail_next: u32,
    connect_attempts: u32,
    disconnects: u32,
    sessions: Vec<SessionOptions>,
    published: Vec<PublishedMessage>,
}

/// Scriptable [`MqttTransport`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Refuse every connect attempt until reset.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Simulate the broker dropping the session.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn disconnects(&self) -> u32 {
        self.lock().disconnects
    }

    /// Options of every successful session, oldest first.
    pub fn sessions(&self) -> Vec<SessionOptions> {
        self.lock().sessions.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Messages published to `topic`, oldest first.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear_published(&self) {
        self.lock().published.clear();
    }
}

#[async_trait]
impl MqttTransport for MockTransport {
    async fn connect(&mut self, options: &SessionOptions) -> Result<(), MqttError> {
        let mut state = self.lock();
        state.connected = false;
        state.connect_attempts += 1;
        if state.refuse {
            return Err(MqttError::Connection("connection refused".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(MqttError::Timeout(options.connect_timeout));
        }
        state.connected = true;
        state.sessions.push(options.clone());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(MqttError::NotConnected);
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.lock();
        if state.connected {
            state.connected = false;
            state.disconnects += 1;
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options() -> SessionOptions {
        SessionOptions {
            client_id: "c".to_string(),
            host: "h".to_string(),
            port: 1883,
            credentials: None,
            will_topic: "t/availability".to_string(),
            will_payload: "offline".to_string(),
            keep_alive: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_connect_and_publish() {
        let mut transport = MockTransport::new();
        transport.connect(&options()).await.unwrap();
        assert!(transport.is_connected());

        transport.publish("a", b"1", true).unwrap();
        assert_eq!(
            transport.published_to("a"),
            vec![PublishedMessage {
                topic: "a".to_string(),
                payload: "1".to_string(),
                retain: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let mut transport = MockTransport::new();
        transport.fail_next_connects(1);

        assert!(transport.connect(&options()).await.is_err());
        assert!(transport.connect(&options()).await.is_ok());
        assert_eq!(transport.connect_attempts(), 2);
        assert_eq!(transport.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_connection() {
        let mut transport = MockTransport::new();
        let probe = transport.clone();
        transport.connect(&options()).await.unwrap();

        probe.drop_connection();
        assert!(!transport.is_connected());
        assert_eq!(
            transport.publish("a", b"1", false),
            Err(MqttError::NotConnected)
        );

        transport.disconnect().await;
        assert_eq!(probe.disconnects(), 0);
    }
}
