//! Shared utility functions for the rating crates.

/// Time utility functions.
///
/// The rating engine keys everything on epoch milliseconds (UTC). These helpers
/// convert between that representation and chrono types at the edges.
pub mod times {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

    /// Display format used for timestamps in logs and CLI output.
    pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    /// Convert a UTC datetime to epoch milliseconds.
    pub fn to_millis(time: &DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    /// Convert epoch milliseconds to a UTC datetime.
    pub fn from_millis(millis: i64) -> anyhow::Result<DateTime<Utc>> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| anyhow::anyhow!("timestamp {} is out of range", millis))
    }

    /// Current wall-clock time in epoch milliseconds.
    pub fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Format epoch milliseconds as "YYYY-MM-DD HH:MM:SS" (UTC).
    ///
    /// Out-of-range values are rendered as the raw millisecond count.
    pub fn format_millis(millis: i64) -> String {
        match from_millis(millis) {
            Ok(time) => time.format(TIME_FORMAT).to_string(),
            Err(_) => millis.to_string(),
        }
    }

    /// Parse a timestamp into epoch milliseconds.
    ///
    /// Accepts RFC 3339 (`2023-06-15T12:00:00Z`), "YYYY-MM-DD HH:MM:SS" and
    /// "YYYY-MM-DD" (both read as UTC), or a bare integer millisecond count.
    pub fn parse_time(s: &str) -> anyhow::Result<i64> {
        let s = s.trim();
        if let Ok(millis) = s.parse::<i64>() {
            return Ok(millis);
        }
        if let Ok(time) = DateTime::parse_from_rfc3339(s) {
            return Ok(time.with_timezone(&Utc).timestamp_millis());
        }
        if let Ok(time) = NaiveDateTime::parse_from_str(s, TIME_FORMAT) {
            return Ok(time.and_utc().timestamp_millis());
        }
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid date: {}", s))?;
        Ok(midnight.and_utc().timestamp_millis())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_formats_agree() {
            let a = parse_time("2023-06-15T00:00:00Z").unwrap();
            let b = parse_time("2023-06-15 00:00:00").unwrap();
            let c = parse_time("2023-06-15").unwrap();
            assert_eq!(a, b);
            assert_eq!(b, c);
        }

        #[test]
        fn test_parse_raw_millis() {
            assert_eq!(parse_time("150").unwrap(), 150);
            assert_eq!(parse_time("-20").unwrap(), -20);
        }

        #[test]
        fn test_parse_invalid() {
            assert!(parse_time("June 15th").is_err());
        }

        #[test]
        fn test_format_and_convert() {
            let millis = parse_time("2023-06-15 12:30:00").unwrap();
            assert_eq!(format_millis(millis), "2023-06-15 12:30:00");
            let time = from_millis(millis).unwrap();
            assert_eq!(to_millis(&time), millis);
        }
    }
}

/// Two-point interpolation with optional log10 axis transforms.
///
/// Used both across time (between two concrete ratings) and across table rows.
pub mod interpolation {
    /// Which axes are interpolated in log10 space.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AxisTransform {
        pub ind_log: bool,
        pub dep_log: bool,
    }

    impl AxisTransform {
        pub const LINEAR: AxisTransform = AxisTransform {
            ind_log: false,
            dep_log: false,
        };

        pub fn new(ind_log: bool, dep_log: bool) -> Self {
            Self { ind_log, dep_log }
        }
    }

    /// The two known points bracketing (or extrapolated from) the query.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Segment {
        pub x1: f64,
        pub x2: f64,
        pub y1: f64,
        pub y2: f64,
    }

    fn all_finite(values: &[f64]) -> bool {
        values.iter().all(|v| v.is_finite())
    }

    /// Plain linear interpolation/extrapolation.
    pub fn linear(x: f64, seg: Segment) -> f64 {
        seg.y1 + ((x - seg.x1) / (seg.x2 - seg.x1)) * (seg.y2 - seg.y1)
    }

    /// Interpolate at `x` with the requested axis transforms.
    ///
    /// `offset` is subtracted from every independent value before taking its log
    /// (USGS log-interpolation offsets); pass `0.0` otherwise.
    ///
    /// Order of evaluation:
    /// 1. independent axis to log10; if any of the three values is not finite, all
    ///    three go back to raw and the dependent transform is switched off too;
    /// 2. dependent axis to log10; if either value is not finite, both axes go back
    ///    to raw and the dependent transform is switched off;
    /// 3. linear interpolation in the transformed space, then `10^y` if the
    ///    dependent transform is still on.
    pub fn interpolate(x: f64, seg: Segment, transform: AxisTransform, offset: f64) -> f64 {
        let mut dep_log = transform.dep_log;
        let (mut tx, mut tx1, mut tx2) = (x, seg.x1, seg.x2);
        let (mut ty1, mut ty2) = (seg.y1, seg.y2);
        if transform.ind_log {
            tx = (x - offset).log10();
            tx1 = (seg.x1 - offset).log10();
            tx2 = (seg.x2 - offset).log10();
            if !all_finite(&[tx, tx1, tx2]) {
                tx = x;
                tx1 = seg.x1;
                tx2 = seg.x2;
                dep_log = false;
            }
        }
        if dep_log {
            ty1 = seg.y1.log10();
            ty2 = seg.y2.log10();
            if !all_finite(&[ty1, ty2]) {
                tx = x;
                tx1 = seg.x1;
                tx2 = seg.x2;
                ty1 = seg.y1;
                ty2 = seg.y2;
                dep_log = false;
            }
        }
        let y = linear(
            tx,
            Segment {
                x1: tx1,
                x2: tx2,
                y1: ty1,
                y2: ty2,
            },
        );
        if dep_log {
            10f64.powf(y)
        } else {
            y
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn seg(x1: f64, x2: f64, y1: f64, y2: f64) -> Segment {
            Segment { x1, x2, y1, y2 }
        }

        #[test]
        fn test_linear_midpoint() {
            let y = interpolate(150.0, seg(100.0, 200.0, 10.0, 20.0), AxisTransform::LINEAR, 0.0);
            assert!((y - 15.0).abs() < 1e-12);
        }

        #[test]
        fn test_linear_extrapolates() {
            let y = linear(300.0, seg(100.0, 200.0, 10.0, 20.0));
            assert!((y - 30.0).abs() < 1e-12);
        }

        #[test]
        fn test_log_log() {
            // log10 axes: x in [1, 2], y in [0, 2]; x = 10^1.5 sits halfway
            let x = 10f64.powf(1.5);
            let y = interpolate(x, seg(10.0, 100.0, 1.0, 100.0), AxisTransform::new(true, true), 0.0);
            assert!((y - 10.0).abs() < 1e-9);
        }

        #[test]
        fn test_independent_log_fallback_disables_dependent() {
            // x1 = 0 has no log; the whole computation must be plain linear
            let s = seg(0.0, 200.0, 10.0, 20.0);
            let y = interpolate(50.0, s, AxisTransform::new(true, true), 0.0);
            assert_eq!(y, linear(50.0, s));
        }

        #[test]
        fn test_dependent_log_fallback_resets_independent() {
            // y1 = -5 has no log; independent axis must go back to raw as well
            let s = seg(10.0, 100.0, -5.0, 20.0);
            let y = interpolate(40.0, s, AxisTransform::new(true, true), 0.0);
            assert_eq!(y, linear(40.0, s));
        }

        #[test]
        fn test_offset_applied_before_log() {
            // with offset 5, (x - 5) spans 10..100 in log space
            let x = 5.0 + 10f64.powf(1.5);
            let y = interpolate(x, seg(15.0, 105.0, 1.0, 100.0), AxisTransform::new(true, true), 5.0);
            assert!((y - 10.0).abs() < 1e-9);
        }
    }
}
