//! MQTT connectivity for Home Assistant.
//!
//! The [`ConnectivityManager`] keeps one broker session alive on a
//! cooperative tick:
//!
//! 1. Re-reads the broker config document every few seconds and applies it
//!    when it changed.
//! 2. Connects with a last will of `offline` on the availability topic,
//!    spacing attempts and backing off after repeated failures.
//! 3. Publishes discovery documents for every new session.
//! 4. Publishes the latest measurement as a retained state document.
//!
//! Every transition is reported on the [`StatusLine`], which the web API
//! exposes as `/api/mqtt/status`.
//!
//! # Example Configuration
//!
//! ```toml
//! [mqtt]
//! enabled = true
//! topic_prefix = "pd_logger"
//! discovery_prefix = "homeassistant"
//! backoff_secs = 60
//! ```

mod manager;
mod messages;
mod mock;
mod transport;

pub use manager::{ConnectionState, ConnectivityManager, ManagerSettings};
pub use messages::{
    AVAILABILITY_OFFLINE, AVAILABILITY_ONLINE, Announcement, DiscoveryDevice, DiscoveryPayload,
    METRICS, MILLIVOLT_THRESHOLD, Metric, StatePayload, Topics, announcements, normalize_volts,
};
pub use mock::{MockTransport, PublishedMessage};
pub use transport::{MqttError, MqttTransport, RumqttcTransport, SessionOptions};

use tokio::sync::watch;
use tracing::info;

/// Maximum length of a status line in bytes.
pub const MAX_STATUS_LEN: usize = 200;

/// Writer side of the human-readable MQTT status line.
///
/// Only the latest line is kept. Lines longer than [`MAX_STATUS_LEN`] are
/// cut at a character boundary.
#[derive(Debug)]
pub struct StatusLine {
    tx: watch::Sender<String>,
}

impl StatusLine {
    /// Create a status line and a receiver for readers.
    pub fn channel() -> (Self, watch::Receiver<String>) {
        let (tx, rx) = watch::channel(String::new());
        (Self { tx }, rx)
    }

    /// Replace the current line and log it.
    pub fn set(&self, line: impl Into<String>) {
        let mut line = line.into();
        truncate_at_boundary(&mut line, MAX_STATUS_LEN);
        info!("{}", line);
        self.tx.send_replace(line);
    }

    /// Replace the current line unless it already reads `line`.
    pub fn set_if_changed(&self, line: impl Into<String>) {
        let line = line.into();
        if *self.tx.borrow() != line {
            self.set(line);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

fn truncate_at_boundary(line: &mut String, max: usize) {
    if line.len() <= max {
        return;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_latest_wins() {
        let (status, rx) = StatusLine::channel();
        assert_eq!(*rx.borrow(), "");

        status.set("[MQTT] connecting");
        status.set("[MQTT] connected, availability=online");
        assert_eq!(*rx.borrow(), "[MQTT] connected, availability=online");
        assert_eq!(*status.subscribe().borrow(), "[MQTT] connected, availability=online");
    }

    #[test]
    fn test_status_line_truncates() {
        let (status, rx) = StatusLine::channel();
        status.set("x".repeat(500));
        assert_eq!(rx.borrow().len(), MAX_STATUS_LEN);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let mut line = format!("{}é", "a".repeat(MAX_STATUS_LEN - 1));
        truncate_at_boundary(&mut line, MAX_STATUS_LEN);
        assert_eq!(line.len(), MAX_STATUS_LEN - 1);
    }

    #[test]
    fn test_set_if_changed() {
        let (status, mut rx) = StatusLine::channel();
        status.set("[MQTT] config missing, disabling");
        rx.borrow_and_update();

        status.set_if_changed("[MQTT] config missing, disabling");
        assert!(!rx.has_changed().unwrap());

        status.set_if_changed("[MQTT] config parse failed");
        assert!(rx.has_changed().unwrap());
    }
}
