//! Time windows for filtered log exports.

use core::fmt;

/// Epoch values below this are treated as "clock not yet synchronized".
///
/// A freshly booted device without NTP reports seconds since boot, which
/// would otherwise exclude every logged row.
pub const MIN_PLAUSIBLE_EPOCH: i64 = 100_000;

/// How far back a windowed export reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportWindow {
    /// Every row qualifies.
    #[default]
    Unbounded,
    /// Only rows from the last `n` seconds qualify.
    LastSeconds(u64),
}

impl ExportWindow {
    /// Parse the `sec` query argument.
    ///
    /// `unbounded` and `max` (any case) or a missing argument select
    /// [`ExportWindow::Unbounded`]. A positive integer selects a window of
    /// that many seconds. Zero, negative and non-numeric values collapse to
    /// unbounded rather than failing the request.
    ///
    /// # Examples
    ///
    /// ```
    /// use pdlogger_types::ExportWindow;
    ///
    /// assert_eq!(ExportWindow::parse(Some("3600")), ExportWindow::LastSeconds(3600));
    /// assert_eq!(ExportWindow::parse(Some("unbounded")), ExportWindow::Unbounded);
    /// assert_eq!(ExportWindow::parse(Some("-5")), ExportWindow::Unbounded);
    /// assert_eq!(ExportWindow::parse(None), ExportWindow::Unbounded);
    /// ```
    #[must_use]
    pub fn parse(arg: Option<&str>) -> Self {
        let Some(arg) = arg.map(str::trim) else {
            return Self::Unbounded;
        };
        if arg.eq_ignore_ascii_case("unbounded") || arg.eq_ignore_ascii_case("max") {
            return Self::Unbounded;
        }
        match arg.parse::<i64>() {
            Ok(secs) if secs > 0 => Self::LastSeconds(secs.unsigned_abs()),
            _ => Self::Unbounded,
        }
    }

    /// Lowest epoch a row may carry to qualify, given the current time.
    ///
    /// `now` is `None` while the wall clock is unsynchronized, in which case
    /// no lower bound applies.
    #[must_use]
    pub fn min_epoch(&self, now: Option<i64>) -> Option<i64> {
        match (self, now) {
            (Self::LastSeconds(secs), Some(now)) => {
                let secs = i64::try_from(*secs).unwrap_or(i64::MAX);
                Some(now.saturating_sub(secs))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ExportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("unbounded"),
            Self::LastSeconds(secs) => write!(f, "{}s", secs),
        }
    }
}

/// Return `epoch` only if it looks like a synchronized wall-clock time.
#[must_use]
pub fn plausible_epoch(epoch: i64) -> Option<i64> {
    (epoch >= MIN_PLAUSIBLE_EPOCH).then_some(epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_sentinels() {
        assert_eq!(ExportWindow::parse(Some("unbounded")), ExportWindow::Unbounded);
        assert_eq!(ExportWindow::parse(Some("UNBOUNDED")), ExportWindow::Unbounded);
        assert_eq!(ExportWindow::parse(Some("max")), ExportWindow::Unbounded);
        assert_eq!(ExportWindow::parse(None), ExportWindow::Unbounded);
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(ExportWindow::parse(Some("60")), ExportWindow::LastSeconds(60));
        assert_eq!(ExportWindow::parse(Some(" 86400 ")), ExportWindow::LastSeconds(86400));
    }

    #[test]
    fn test_parse_collapses_invalid() {
        assert_eq!(ExportWindow::parse(Some("0")), ExportWindow::Unbounded);
        assert_eq!(ExportWindow::parse(Some("-60")), ExportWindow::Unbounded);
        assert_eq!(ExportWindow::parse(Some("abc")), ExportWindow::Unbounded);
        assert_eq!(ExportWindow::parse(Some("")), ExportWindow::Unbounded);
        assert_eq!(ExportWindow::parse(Some("1.5")), ExportWindow::Unbounded);
    }

    #[test]
    fn test_min_epoch_window() {
        let window = ExportWindow::LastSeconds(60);
        assert_eq!(window.min_epoch(Some(1000)), Some(940));
    }

    #[test]
    fn test_min_epoch_unsynced_clock() {
        let window = ExportWindow::LastSeconds(60);
        assert_eq!(window.min_epoch(None), None);
    }

    #[test]
    fn test_min_epoch_unbounded() {
        assert_eq!(ExportWindow::Unbounded.min_epoch(Some(1_700_000_000)), None);
    }

    #[test]
    fn test_min_epoch_huge_window_saturates() {
        let window = ExportWindow::LastSeconds(u64::MAX);
        assert_eq!(window.min_epoch(Some(10)), Some(10 - i64::MAX));
    }

    #[test]
    fn test_plausible_epoch() {
        assert_eq!(plausible_epoch(42), None);
        assert_eq!(plausible_epoch(99_999), None);
        assert_eq!(plausible_epoch(100_000), Some(100_000));
        assert_eq!(plausible_epoch(1_700_000_000), Some(1_700_000_000));
    }

    #[test]
    fn test_display() {
        assert_eq!(ExportWindow::Unbounded.to_string(), "unbounded");
        assert_eq!(ExportWindow::LastSeconds(30).to_string(), "30s");
    }

    proptest! {
        #[test]
        fn prop_negative_values_are_unbounded(secs in i64::MIN..=0i64) {
            prop_assert_eq!(ExportWindow::parse(Some(&secs.to_string())), ExportWindow::Unbounded);
        }

        #[test]
        fn prop_positive_values_roundtrip(secs in 1i64..=i64::MAX) {
            prop_assert_eq!(
                ExportWindow::parse(Some(&secs.to_string())),
                ExportWindow::LastSeconds(secs as u64)
            );
        }
    }
}
