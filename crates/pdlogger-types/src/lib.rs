//! Shared types for the PD-Logger power measurement device.
//!
//! This crate provides the data model shared by the log store
//! (`pdlogger-store`) and the service (`pdlogger-service`).
//!
//! # Features
//!
//! - Measurement snapshot as produced by the acquisition loop
//! - Broker configuration document and its validated form
//! - Device identity derivation from a stable hardware identifier
//! - Log segment descriptors and segment name parsing
//! - Export time windows
//!
//! # Example
//!
//! ```
//! use pdlogger_types::{BrokerConfigDocument, DeviceIdentity, ExportWindow};
//!
//! let identity = DeviceIdentity::from_chip_id(0x1A2B3C);
//! assert_eq!(identity.client_id(), "pd-logger-1A2B3C");
//!
//! let doc = BrokerConfigDocument {
//!     server: "broker.local".to_string(),
//!     ..Default::default()
//! };
//! assert!(doc.validate().is_ok());
//!
//! assert_eq!(ExportWindow::parse(Some("60")).min_epoch(Some(1000)), Some(940));
//! ```

pub mod broker;
pub mod error;
pub mod identity;
pub mod types;
pub mod window;

pub use broker::{BrokerConfig, BrokerConfigDocument, DEFAULT_MQTT_PORT};
pub use error::{ConfigError, ConfigResult};
pub use identity::DeviceIdentity;
pub use types::{
    CSV_DELIMITER, CSV_HEADER, LogSegmentDescriptor, MeasurementSnapshot, parse_segment_index,
};
pub use window::{ExportWindow, MIN_PLAUSIBLE_EPOCH, plausible_epoch};
