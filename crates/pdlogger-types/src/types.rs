//! Core measurement and log segment types.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Canonical header row of every exported CSV document.
pub const CSV_HEADER: &str = "epoch;bus_V;curr_mA";

/// Field delimiter used by log segments.
pub const CSV_DELIMITER: u8 = b';';

/// Latest reading produced by the acquisition loop.
///
/// The acquisition loop is the only writer; everything in this workspace
/// treats a snapshot as read-only.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeasurementSnapshot {
    /// Wall-clock time of the sample (Unix seconds).
    pub epoch: i64,
    /// Monotonic milliseconds since boot when the sample was taken.
    pub ms: u64,
    /// Bus voltage. Depending on the sensor driver this is volts or millivolts.
    #[cfg_attr(feature = "serde", serde(rename = "busV"))]
    pub bus_v: f64,
    /// Current in milliamperes.
    #[cfg_attr(feature = "serde", serde(rename = "currmA"))]
    pub curr_ma: f64,
    /// Power in milliwatts as reported by the sensor.
    #[cfg_attr(feature = "serde", serde(rename = "powermW"))]
    pub power_mw: f64,
    /// Shunt voltage in millivolts.
    #[cfg_attr(feature = "serde", serde(rename = "shuntmV"))]
    pub shunt_mv: f64,
    /// Load voltage in volts.
    #[cfg_attr(feature = "serde", serde(rename = "loadV"))]
    pub load_v: f64,
}

/// One cataloged log segment.
///
/// Descriptors are rebuilt on every catalog request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogSegmentDescriptor {
    /// Ordering key parsed from the file name.
    pub index: u64,
    /// Storage identifier, e.g. `/logs/log_0003.csv`.
    pub id: String,
    /// Size of the segment in bytes.
    pub size: u64,
}

/// Parse the ordering index out of a segment base name.
///
/// Names follow `<prefix>_<digits>.<ext>`. The digit run sits between the
/// last `_` and the last `.`, must be non-empty, must consist only of ASCII
/// digits and must fit in a `u64`. Anything else is a foreign file.
///
/// # Examples
///
/// ```
/// use pdlogger_types::parse_segment_index;
///
/// assert_eq!(parse_segment_index("log_0003.csv"), Some(3));
/// assert_eq!(parse_segment_index("power_log_12.csv"), Some(12));
/// assert_eq!(parse_segment_index("log_.csv"), None);
/// assert_eq!(parse_segment_index("readme.txt"), None);
/// ```
#[must_use]
pub fn parse_segment_index(base: &str) -> Option<u64> {
    let underscore = base.rfind('_')?;
    let dot = base.rfind('.')?;
    if dot <= underscore + 1 {
        return None;
    }
    let digits = &base[underscore + 1..dot];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
