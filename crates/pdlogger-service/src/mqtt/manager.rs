//! Connectivity manager state machine.

use std::time::Duration;

use pdlogger_types::{BrokerConfig, DeviceIdentity, MeasurementSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::StatusLine;
use super::messages::{
    AVAILABILITY_OFFLINE, AVAILABILITY_ONLINE, StatePayload, Topics, announcements,
};
use super::transport::{MqttTransport, SessionOptions};
use crate::broker_store::{BrokerConfigStore, BrokerStoreError};
use crate::config::MqttConfig;

/// Timing and naming policy of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub topic_prefix: String,
    pub discovery_prefix: String,
    pub tick_interval: Duration,
    pub config_check_interval: Duration,
    pub reconnect_interval: Duration,
    pub failure_threshold: u8,
    pub backoff: Duration,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub publish_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&MqttConfig::default())
    }
}

impl From<&MqttConfig> for ManagerSettings {
    fn from(config: &MqttConfig) -> Self {
        Self {
            topic_prefix: config.topic_prefix.clone(),
            discovery_prefix: config.discovery_prefix.clone(),
            tick_interval: config.tick_interval(),
            config_check_interval: Duration::from_millis(config.config_check_interval_ms),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            failure_threshold: config.failure_threshold.max(1),
            backoff: Duration::from_secs(config.backoff_secs),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            publish_interval: Duration::from_millis(config.publish_interval_ms),
        }
    }
}

/// Connection state as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable broker configuration.
    Unconfigured,
    /// Configured, not connected, allowed to try when the spacing permits.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// Session is up.
    Connected,
    /// Too many consecutive failures; waiting out the backoff.
    BackoffWait,
}

/// Keeps the broker session alive and publishes measurements.
///
/// All work happens in [`ConnectivityManager::tick`], which never blocks
/// longer than one connect attempt. The manager is the only writer of the
/// status line.
pub struct ConnectivityManager<T> {
    transport: T,
    store: BrokerConfigStore,
    identity: DeviceIdentity,
    settings: ManagerSettings,
    measurements: watch::Receiver<Option<MeasurementSnapshot>>,
    status: StatusLine,
    applied: Option<BrokerConfig>,
    topics: Topics,
    state: ConnectionState,
    failures: u8,
    next_retry_at: Option<Instant>,
    last_config_check: Option<Instant>,
    last_connect_attempt: Option<Instant>,
    last_publish: Option<Instant>,
    discovery_pending: bool,
}

impl<T: MqttTransport> ConnectivityManager<T> {
    pub fn new(
        transport: T,
        store: BrokerConfigStore,
        identity: DeviceIdentity,
        settings: ManagerSettings,
        measurements: watch::Receiver<Option<MeasurementSnapshot>>,
        status: StatusLine,
    ) -> Self {
        let topics = Topics::new(&settings.topic_prefix, &identity);
        Self {
            transport,
            store,
            identity,
            settings,
            measurements,
            status,
            applied: None,
            topics,
            state: ConnectionState::Unconfigured,
            failures: 0,
            next_retry_at: None,
            last_config_check: None,
            last_connect_attempt: None,
            last_publish: None,
            discovery_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed connect attempts since the last success.
    pub fn failures(&self) -> u8 {
        self.failures
    }

    /// End of the current backoff, if one was started.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.next_retry_at
    }

    /// The broker configuration currently applied.
    pub fn applied_config(&self) -> Option<&BrokerConfig> {
        self.applied.as_ref()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one cooperative step.
    pub async fn tick(&mut self, now: Instant) {
        self.reload_config_if_due(now).await;
        if self.applied.is_none() {
            return;
        }

        if !self.ensure_connected(now).await {
            return;
        }

        if self.discovery_pending {
            self.publish_discovery();
        }

        let publish_due = self
            .last_publish
            .is_none_or(|last| now.duration_since(last) >= self.settings.publish_interval);
        if publish_due {
            self.last_publish = Some(now);
            self.publish_state();
        }
    }

    /// Tick until `stop` turns true, then close the session.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            "Starting MQTT connectivity manager for {} (config {:?})",
            self.identity.client_id(),
            self.store.path()
        );

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                now = ticker.tick() => self.tick(now).await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        info!("MQTT connectivity manager received stop signal");
                        break;
                    }
                }
            }
        }

        self.close_session().await;
        self.status.set("[MQTT] stopped");
    }

    /// Spawn [`ConnectivityManager::run`] on the runtime.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()>
    where
        T: 'static,
    {
        tokio::spawn(self.run(stop))
    }

    async fn reload_config_if_due(&mut self, now: Instant) {
        if let Some(last) = self.last_config_check
            && now.duration_since(last) < self.settings.config_check_interval
        {
            return;
        }
        self.last_config_check = Some(now);

        match self.store.load() {
            Ok(doc) => match doc.validate() {
                Ok(config) => self.apply_config(config).await,
                Err(e) => self.unconfigure(format!("[MQTT] {}", e)).await,
            },
            Err(BrokerStoreError::Missing(_)) => {
                self.unconfigure("[MQTT] config missing, disabling").await;
            }
            Err(BrokerStoreError::Parse { source, .. }) => {
                debug!("Broker config parse error: {}", source);
                self.unconfigure("[MQTT] config parse failed").await;
            }
            Err(e) => {
                warn!("{}", e);
                self.unconfigure("[MQTT] config open failed").await;
            }
        }
    }

    async fn apply_config(&mut self, config: BrokerConfig) {
        if self.applied.as_ref() == Some(&config) {
            return;
        }

        self.close_session().await;
        self.topics = Topics::new(&self.settings.topic_prefix, &self.identity);
        self.failures = 0;
        self.next_retry_at = None;
        self.discovery_pending = true;
        self.state = ConnectionState::Idle;
        self.status.set(format!("[MQTT] config loaded: {}", config));
        self.applied = Some(config);
    }

    async fn unconfigure(&mut self, reason: impl Into<String>) {
        let was_configured = self.applied.take().is_some();
        if was_configured {
            self.close_session().await;
        }
        self.failures = 0;
        self.next_retry_at = None;
        self.discovery_pending = false;
        self.state = ConnectionState::Unconfigured;
        self.status.set_if_changed(reason);
    }

    /// Make sure a session is up, connecting if the retry policy allows it.
    async fn ensure_connected(&mut self, now: Instant) -> bool {
        if self.transport.is_connected() {
            return true;
        }

        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Idle;
            self.status.set("[MQTT] connection lost");
        }

        if let Some(retry_at) = self.next_retry_at
            && now < retry_at
        {
            self.state = ConnectionState::BackoffWait;
            return false;
        }

        if let Some(last) = self.last_connect_attempt
            && now.duration_since(last) < self.settings.reconnect_interval
        {
            return false;
        }

        let Some(config) = self.applied.clone() else {
            return false;
        };
        self.last_connect_attempt = Some(now);
        self.state = ConnectionState::Connecting;
        self.status
            .set(format!("[MQTT] connecting to {}:{}...", config.host, config.port));

        let options = self.session_options(&config);
        match self.transport.connect(&options).await {
            Ok(()) => {
                self.failures = 0;
                self.next_retry_at = None;
                self.state = ConnectionState::Connected;
                self.discovery_pending = true;
                let topic = self.topics.availability.clone();
                self.publish_retained(&topic, AVAILABILITY_ONLINE);
                self.status.set("[MQTT] connected, availability=online");
                true
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                self.status.set(format!("[MQTT] connect failed: {}", e));
                if self.failures >= self.settings.failure_threshold {
                    self.next_retry_at = Some(now + self.settings.backoff);
                    self.state = ConnectionState::BackoffWait;
                    self.status.set(format!(
                        "[MQTT] backoff {}s after repeated failures",
                        self.settings.backoff.as_secs()
                    ));
                } else {
                    self.state = ConnectionState::Idle;
                }
                false
            }
        }
    }

    fn session_options(&self, config: &BrokerConfig) -> SessionOptions {
        SessionOptions {
            client_id: self.identity.client_id(),
            host: config.host.clone(),
            port: config.port,
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            will_topic: self.topics.availability.clone(),
            will_payload: AVAILABILITY_OFFLINE.to_string(),
            keep_alive: self.settings.keep_alive,
            connect_timeout: self.settings.connect_timeout,
        }
    }

    fn publish_discovery(&mut self) {
        let docs = announcements(&self.identity, &self.topics, &self.settings.discovery_prefix);
        for doc in docs {
            match serde_json::to_vec(&doc.payload) {
                Ok(payload) => {
                    if let Err(e) = self.transport.publish(&doc.topic, &payload, true) {
                        debug!("Discovery publish to {} failed: {}", doc.topic, e);
                    }
                }
                Err(e) => warn!("Cannot serialize discovery document: {}", e),
            }
        }
        self.discovery_pending = false;
        self.status.set("[MQTT] discovery published");
    }

    fn publish_state(&mut self) {
        let Some(snapshot) = *self.measurements.borrow() else {
            return;
        };
        let payload = match serde_json::to_string(&StatePayload::from_snapshot(&snapshot)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot serialize state document: {}", e);
                return;
            }
        };
        let topic = self.topics.state.clone();
        match self.transport.publish(&topic, payload.as_bytes(), true) {
            Ok(()) => self.status.set(format!("[MQTT] state published: {}", payload)),
            Err(e) => debug!("State publish failed: {}", e),
        }
    }

    fn publish_retained(&mut self, topic: &str, payload: &str) {
        if let Err(e) = self.transport.publish(topic, payload.as_bytes(), true) {
            debug!("Publish to {} failed: {}", topic, e);
        }
    }

    /// Mark the device offline and close the session, if one is up.
    async fn close_session(&mut self) {
        if !self.transport.is_connected() {
            return;
        }
        let topic = self.topics.availability.clone();
        self.publish_retained(&topic, AVAILABILITY_OFFLINE);
        self.transport.disconnect().await;
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Idle;
        }
    }
}
