//! Application state shared across handlers.
//!
//! # Channels
//!
//! - **Measurements**: a `watch` channel holding the latest
//!   [`MeasurementSnapshot`]. The acquisition loop is the single writer; the
//!   web API and the connectivity manager only read the latest value.
//! - **MQTT status**: a `watch` receiver for the status line written by the
//!   connectivity manager.
//! - **Shutdown**: a `watch` flag observed by background tasks.

use std::sync::Arc;

use pdlogger_store::{Catalog, LogExporter, LogStorage};
use pdlogger_types::{DeviceIdentity, MeasurementSnapshot};
use tokio::sync::watch;

use crate::broker_store::BrokerConfigStore;
use crate::clock::WallClock;
use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Configuration, fixed for the lifetime of the process.
    pub config: Config,
    /// Log segment storage.
    pub storage: Arc<dyn LogStorage>,
    /// Broker configuration document.
    pub broker_store: BrokerConfigStore,
    /// Identity of this device.
    pub identity: DeviceIdentity,
    /// Wall clock used for time-window exports.
    pub clock: Arc<dyn WallClock>,
    measurements: watch::Sender<Option<MeasurementSnapshot>>,
    mqtt_status: watch::Receiver<String>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Create new application state.
    ///
    /// `mqtt_status` is the reader side of the connectivity manager's
    /// status line.
    pub fn new(
        config: Config,
        storage: Arc<dyn LogStorage>,
        identity: DeviceIdentity,
        clock: Arc<dyn WallClock>,
        mqtt_status: watch::Receiver<String>,
    ) -> Arc<Self> {
        let broker_store = BrokerConfigStore::new(&config.storage.broker_config);
        let (measurements, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            storage,
            broker_store,
            identity,
            clock,
            measurements,
            mqtt_status,
            shutdown,
        })
    }

    /// Publish a new measurement. Called by the acquisition loop.
    pub fn record_measurement(&self, snapshot: MeasurementSnapshot) {
        self.measurements.send_replace(Some(snapshot));
    }

    pub fn latest_measurement(&self) -> Option<MeasurementSnapshot> {
        *self.measurements.borrow()
    }

    pub fn subscribe_measurements(&self) -> watch::Receiver<Option<MeasurementSnapshot>> {
        self.measurements.subscribe()
    }

    /// Current MQTT status line.
    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.borrow().clone()
    }

    /// Ask background tasks to stop.
    pub fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Build a fresh catalog of the stored log segments.
    pub async fn catalog(&self) -> pdlogger_store::Result<Catalog> {
        Catalog::build(self.storage.as_ref(), self.config.export.max_segments).await
    }

    /// Exporter configured with the export chunk size.
    pub fn exporter(&self) -> LogExporter {
        LogExporter::new(Arc::clone(&self.storage)).with_chunk_size(self.config.export.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::mqtt::StatusLine;
    use pdlogger_store::MemoryLogStorage;

    fn test_state() -> (Arc<AppState>, StatusLine) {
        let (status, rx) = StatusLine::channel();
        let state = AppState::new(
            Config::default(),
            Arc::new(MemoryLogStorage::new()),
            DeviceIdentity::from_chip_id(1),
            Arc::new(FixedClock(None)),
            rx,
        );
        (state, status)
    }

    #[test]
    fn test_measurements_latest_wins() {
        let (state, _status) = test_state();
        assert!(state.latest_measurement().is_none());

        let mut rx = state.subscribe_measurements();
        state.record_measurement(MeasurementSnapshot {
            epoch: 1,
            ..Default::default()
        });
        state.record_measurement(MeasurementSnapshot {
            epoch: 2,
            ..Default::default()
        });

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().map(|s| s.epoch), Some(2));
        assert_eq!(state.latest_measurement().map(|s| s.epoch), Some(2));
    }

    #[test]
    fn test_mqtt_status_reads_latest_line() {
        let (state, status) = test_state();
        assert_eq!(state.mqtt_status(), "");
        status.set("[MQTT] config missing, disabling");
        assert_eq!(state.mqtt_status(), "[MQTT] config missing, disabling");
    }

    #[test]
    fn test_shutdown_signal() {
        let (state, _status) = test_state();
        let rx = state.subscribe_shutdown();
        assert!(!*rx.borrow());
        state.signal_shutdown();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_catalog_uses_configured_bound() {
        let (status, rx) = StatusLine::channel();
        let storage = Arc::new(MemoryLogStorage::new());
        for i in 0..5 {
            storage.insert(&format!("log_{}.csv", i), "epoch;bus_V;curr_mA\n");
        }
        let mut config = Config::default();
        config.export.max_segments = 3;
        let state = AppState::new(
            config,
            storage,
            DeviceIdentity::from_chip_id(1),
            Arc::new(FixedClock(None)),
            rx,
        );

        let catalog = state.catalog().await.unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.truncated(), 2);
        drop(status);
    }
}
