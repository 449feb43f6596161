//! MQTT connectivity manager and HTTP log export API for PD-Logger.
//!
//! This crate provides a service that:
//! - Keeps a Home Assistant compatible MQTT session alive with hot-reloaded
//!   broker credentials, bounded retries and availability tracking
//! - Publishes the latest measurement as a retained JSON state document
//! - Lists, downloads, exports and clears rotated CSV log segments
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/device/info` - Chip id of this device
//! - `GET /api/measure/latest` - Latest measurement snapshot
//! - `GET /api/logs` - Catalog of log segments
//! - `GET /api/logs/download?name=/logs/<file>` - One raw segment
//! - `GET /api/logs/download_all[?debug=1]` - All segments as one CSV
//! - `GET /api/logs/range?sec=<n|unbounded>[&debug=1]` - Rows of the last `n` seconds
//! - `POST /api/logs/clear` - Remove every segment
//! - `GET/POST /api/mqtt/config` - Broker config document
//! - `GET /api/mqtt/status` - Latest MQTT status line
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/pd-logger/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! log_dir = "/var/lib/pd-logger/logs"
//! broker_config = "/var/lib/pd-logger/mqtt.json"
//!
//! [device]
//! hardware_id = "pd-logger-bench-1"
//!
//! [mqtt]
//! topic_prefix = "pd_logger"
//! discovery_prefix = "homeassistant"
//!
//! [export]
//! chunk_size = 512
//! max_segments = 64
//! ```
//!
//! Broker credentials live in the separate `broker_config` JSON document,
//! which the web UI edits and the connectivity manager re-reads every few
//! seconds.

pub mod api;
pub mod broker_store;
pub mod clock;
pub mod config;
pub mod mqtt;
pub mod state;

pub use broker_store::{BrokerConfigStore, BrokerStoreError};
pub use clock::{FixedClock, SystemClock, WallClock};
pub use config::{
    Config, ConfigError, DeviceConfig, ExportConfig, MqttConfig, ServerConfig, StorageConfig,
};
pub use mqtt::{ConnectionState, ConnectivityManager, ManagerSettings, StatusLine};
pub use state::AppState;
