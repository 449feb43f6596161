//! Topic layout and payloads.
//!
//! # Topic Structure
//!
//! - `{prefix}/{CHIP}/state` - JSON state document (retained)
//! - `{prefix}/{CHIP}/availability` - `online` / `offline` (retained, LWT)
//! - `{discovery}/sensor/{device_id}_{metric}/config` - discovery documents
//!
//! The state document carries the fields `voltage` (V), `current` (mA) and
//! `power` (W). Each discovery document points a sensor entity at one of
//! those fields through a value template.

use pdlogger_types::{DeviceIdentity, MeasurementSnapshot};
use serde::Serialize;

/// Availability payload while a session is up.
pub const AVAILABILITY_ONLINE: &str = "online";
/// Availability payload published as last will and on orderly shutdown.
pub const AVAILABILITY_OFFLINE: &str = "offline";

const DEVICE_MODEL: &str = "PD-Logger";
const DEVICE_MANUFACTURER: &str = "PD-Logger";

/// Bus voltages above this magnitude are taken to be millivolts.
pub const MILLIVOLT_THRESHOLD: f64 = 60.0;

/// One sensor entity announced through discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    /// Field name in the state document and discovery topic suffix.
    pub key: &'static str,
    pub name: &'static str,
    pub device_class: &'static str,
    pub unit: &'static str,
}

/// Sensors announced for every device.
pub const METRICS: [Metric; 3] = [
    Metric {
        key: "voltage",
        name: "Voltage",
        device_class: "voltage",
        unit: "V",
    },
    Metric {
        key: "current",
        name: "Current",
        device_class: "current",
        unit: "mA",
    },
    Metric {
        key: "power",
        name: "Power",
        device_class: "power",
        unit: "W",
    },
];

/// Per-device topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub base: String,
    pub state: String,
    pub availability: String,
}

impl Topics {
    pub fn new(prefix: &str, identity: &DeviceIdentity) -> Self {
        let base = format!("{}/{}", prefix.trim_end_matches('/'), identity.chip_hex());
        Self {
            state: format!("{}/state", base),
            availability: format!("{}/availability", base),
            base,
        }
    }
}

/// Device block shared by all discovery documents.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: &'static str,
    pub manufacturer: &'static str,
}

/// Home Assistant sensor discovery document (abbreviated keys).
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPayload {
    pub name: String,
    #[serde(rename = "uniq_id")]
    pub unique_id: String,
    #[serde(rename = "stat_t")]
    pub state_topic: String,
    #[serde(rename = "avty_t")]
    pub availability_topic: String,
    #[serde(rename = "pl_avail")]
    pub payload_available: &'static str,
    #[serde(rename = "pl_not_avail")]
    pub payload_not_available: &'static str,
    #[serde(rename = "dev_cla")]
    pub device_class: &'static str,
    #[serde(rename = "unit_of_meas")]
    pub unit_of_measurement: &'static str,
    #[serde(rename = "val_tpl")]
    pub value_template: String,
    pub device: DiscoveryDevice,
}

/// A discovery document together with the topic it is published to.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub topic: String,
    pub payload: DiscoveryPayload,
}

/// Build the discovery announcements for all [`METRICS`].
pub fn announcements(
    identity: &DeviceIdentity,
    topics: &Topics,
    discovery_prefix: &str,
) -> Vec<Announcement> {
    let device_id = identity.device_id();
    let device = DiscoveryDevice {
        identifiers: vec![device_id.clone()],
        name: identity.display_name(),
        model: DEVICE_MODEL,
        manufacturer: DEVICE_MANUFACTURER,
    };

    METRICS
        .iter()
        .map(|metric| {
            let unique_id = format!("{}_{}", device_id, metric.key);
            Announcement {
                topic: format!(
                    "{}/sensor/{}/config",
                    discovery_prefix.trim_end_matches('/'),
                    unique_id
                ),
                payload: DiscoveryPayload {
                    name: format!("{} {}", DEVICE_MODEL, metric.name),
                    unique_id,
                    state_topic: topics.state.clone(),
                    availability_topic: topics.availability.clone(),
                    payload_available: AVAILABILITY_ONLINE,
                    payload_not_available: AVAILABILITY_OFFLINE,
                    device_class: metric.device_class,
                    unit_of_measurement: metric.unit,
                    value_template: format!("{{{{ value_json.{} }}}}", metric.key),
                    device: device.clone(),
                },
            }
        })
        .collect()
}

/// State document published on the state topic.
///
/// Fields that are not finite are left out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatePayload {
    /// Bus voltage in volts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    /// Current in milliamperes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    /// Power in watts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
}

impl StatePayload {
    pub fn from_snapshot(snapshot: &MeasurementSnapshot) -> Self {
        let voltage = Some(normalize_volts(snapshot.bus_v)).filter(|v| v.is_finite());
        let current = Some(snapshot.curr_ma).filter(|c| c.is_finite());
        let power = voltage
            .zip(current)
            .map(|(v, c)| v * (c / 1000.0))
            .filter(|p| p.is_finite());
        Self {
            voltage,
            current,
            power,
        }
    }
}

/// Convert a bus voltage that may be in millivolts to volts.
pub fn normalize_volts(value: f64) -> f64 {
    if value.abs() > MILLIVOLT_THRESHOLD {
        value / 1000.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_chip_id(0x00AB12)
    }

    #[test]
    fn test_topics() {
        let topics = Topics::new("pd_logger", &identity());
        assert_eq!(topics.base, "pd_logger/00AB12");
        assert_eq!(topics.state, "pd_logger/00AB12/state");
        assert_eq!(topics.availability, "pd_logger/00AB12/availability");
    }

    #[test]
    fn test_topics_trailing_slash() {
        let topics = Topics::new("lab/", &identity());
        assert_eq!(topics.base, "lab/00AB12");
    }

    #[test]
    fn test_announcements() {
        let identity = identity();
        let topics = Topics::new("pd_logger", &identity);
        let docs = announcements(&identity, &topics, "homeassistant");

        let topics_out: Vec<&str> = docs.iter().map(|a| a.topic.as_str()).collect();
        assert_eq!(
            topics_out,
            vec![
                "homeassistant/sensor/pd_logger_00AB12_voltage/config",
                "homeassistant/sensor/pd_logger_00AB12_current/config",
                "homeassistant/sensor/pd_logger_00AB12_power/config",
            ]
        );
    }

    #[test]
    fn test_discovery_document_fields() {
        let identity = identity();
        let topics = Topics::new("pd_logger", &identity);
        let docs = announcements(&identity, &topics, "homeassistant");
        let json = serde_json::to_value(&docs[1].payload).unwrap();

        assert_eq!(json["name"], "PD-Logger Current");
        assert_eq!(json["uniq_id"], "pd_logger_00AB12_current");
        assert_eq!(json["stat_t"], "pd_logger/00AB12/state");
        assert_eq!(json["avty_t"], "pd_logger/00AB12/availability");
        assert_eq!(json["pl_avail"], "online");
        assert_eq!(json["pl_not_avail"], "offline");
        assert_eq!(json["dev_cla"], "current");
        assert_eq!(json["unit_of_meas"], "mA");
        assert_eq!(json["val_tpl"], "{{ value_json.current }}");
        assert_eq!(json["device"]["identifiers"][0], "pd_logger_00AB12");
        assert_eq!(json["device"]["name"], "PD-Logger 00AB12");
        assert_eq!(json["device"]["model"], "PD-Logger");
    }

    #[test]
    fn test_state_payload_volts() {
        let snapshot = MeasurementSnapshot {
            bus_v: 5.0,
            curr_ma: 500.0,
            ..Default::default()
        };
        let payload = StatePayload::from_snapshot(&snapshot);
        assert_eq!(payload.voltage, Some(5.0));
        assert_eq!(payload.current, Some(500.0));
        assert_eq!(payload.power, Some(2.5));
    }

    #[test]
    fn test_state_payload_millivolts() {
        let snapshot = MeasurementSnapshot {
            bus_v: 3300.0,
            curr_ma: 100.0,
            ..Default::default()
        };
        let payload = StatePayload::from_snapshot(&snapshot);
        assert_eq!(payload.voltage, Some(3.3));
        assert!((payload.power.unwrap() - 0.33).abs() < 1e-9);
    }

    #[test]
    fn test_state_payload_skips_non_finite() {
        let snapshot = MeasurementSnapshot {
            bus_v: 12.0,
            curr_ma: f64::NAN,
            ..Default::default()
        };
        let payload = StatePayload::from_snapshot(&snapshot);
        assert_eq!(payload.voltage, Some(12.0));
        assert_eq!(payload.current, None);
        assert_eq!(payload.power, None);
        assert_eq!(serde_json::to_string(&payload).unwrap(), r#"{"voltage":12.0}"#);
    }

    #[test]
    fn test_normalize_volts_boundary() {
        assert_eq!(normalize_volts(12.0), 12.0);
        assert_eq!(normalize_volts(60.0), 60.0);
        assert_eq!(normalize_volts(-12.0), -12.0);
        assert_eq!(normalize_volts(-5000.0), -5.0);
    }

    #[test]
    fn test_state_payload_json() {
        let payload = StatePayload {
            voltage: Some(5.0),
            current: Some(100.0),
            power: Some(0.5),
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"voltage":5.0,"current":100.0,"power":0.5}"#
        );
    }
}
