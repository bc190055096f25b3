//! Lookup and interpolation methods shared by the time axis and table axes.

use std::fmt;
use std::str::FromStr;

use rating_utils::interpolation::AxisTransform;
use serde::{Deserialize, Serialize};

use crate::error::RatingError;

/// Behavior for a value that falls between, or outside, the known points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RatingMethod {
    /// Return an undefined value.
    Null,
    /// Fail the whole call.
    Error,
    Linear,
    /// Log10 on both axes.
    Logarithmic,
    /// Log10 on the independent axis only.
    LinLog,
    /// Log10 on the dependent axis only.
    LogLin,
    Previous,
    Next,
    Nearest,
    Lower,
    Higher,
    Closest,
}

impl RatingMethod {
    pub const ALL: [RatingMethod; 12] = [
        RatingMethod::Null,
        RatingMethod::Error,
        RatingMethod::Linear,
        RatingMethod::Logarithmic,
        RatingMethod::LinLog,
        RatingMethod::LogLin,
        RatingMethod::Previous,
        RatingMethod::Next,
        RatingMethod::Nearest,
        RatingMethod::Lower,
        RatingMethod::Higher,
        RatingMethod::Closest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RatingMethod::Null => "NULL",
            RatingMethod::Error => "ERROR",
            RatingMethod::Linear => "LINEAR",
            RatingMethod::Logarithmic => "LOGARITHMIC",
            RatingMethod::LinLog => "LIN-LOG",
            RatingMethod::LogLin => "LOG-LIN",
            RatingMethod::Previous => "PREVIOUS",
            RatingMethod::Next => "NEXT",
            RatingMethod::Nearest => "NEAREST",
            RatingMethod::Lower => "LOWER",
            RatingMethod::Higher => "HIGHER",
            RatingMethod::Closest => "CLOSEST",
        }
    }

    /// True for the methods that compute a value between (or beyond) two points.
    pub fn is_interpolating(&self) -> bool {
        matches!(
            self,
            RatingMethod::Linear
                | RatingMethod::Logarithmic
                | RatingMethod::LinLog
                | RatingMethod::LogLin
        )
    }

    pub fn independent_log(&self) -> bool {
        matches!(self, RatingMethod::Logarithmic | RatingMethod::LinLog)
    }

    pub fn dependent_log(&self) -> bool {
        matches!(self, RatingMethod::Logarithmic | RatingMethod::LogLin)
    }

    /// Axis transforms implied by this method.
    pub fn transform(&self) -> AxisTransform {
        AxisTransform::new(self.independent_log(), self.dependent_log())
    }
}

impl fmt::Display for RatingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatingMethod {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, RatingError> {
        let wanted = s.trim().to_ascii_uppercase().replace('_', "-");
        let wanted = match wanted.as_str() {
            "LOG" => "LOGARITHMIC",
            "LINLOG" => "LIN-LOG",
            "LOGLIN" => "LOG-LIN",
            other => other,
        };
        RatingMethod::ALL
            .iter()
            .find(|m| m.as_str() == wanted)
            .copied()
            .ok_or_else(|| RatingError::Configuration(format!("unknown rating method '{}'", s)))
    }
}

impl TryFrom<String> for RatingMethod {
    type Error = RatingError;

    fn try_from(value: String) -> Result<Self, RatingError> {
        value.parse()
    }
}

impl From<RatingMethod> for String {
    fn from(method: RatingMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Per-parameter methods applied along one value axis of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupMethods {
    pub in_range: RatingMethod,
    pub out_range_low: RatingMethod,
    pub out_range_high: RatingMethod,
}

impl LookupMethods {
    pub fn new(in_range: RatingMethod, out_range_low: RatingMethod, out_range_high: RatingMethod) -> Self {
        Self {
            in_range,
            out_range_low,
            out_range_high,
        }
    }
}

impl Default for LookupMethods {
    fn default() -> Self {
        Self::new(RatingMethod::Linear, RatingMethod::Null, RatingMethod::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("linear".parse::<RatingMethod>().unwrap(), RatingMethod::Linear);
        assert_eq!("LIN-LOG".parse::<RatingMethod>().unwrap(), RatingMethod::LinLog);
        assert_eq!("log_lin".parse::<RatingMethod>().unwrap(), RatingMethod::LogLin);
        assert_eq!("LOG".parse::<RatingMethod>().unwrap(), RatingMethod::Logarithmic);
        assert!(matches!(
            "SPLINE".parse::<RatingMethod>(),
            Err(RatingError::Configuration(_))
        ));
    }

    #[test]
    fn test_try_from_string() {
        assert_eq!(RatingMethod::try_from("error".to_string()).unwrap(), RatingMethod::Error);
        assert!(matches!(
            RatingMethod::try_from(String::from("cubic")),
            Err(RatingError::Configuration(_))
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        for method in RatingMethod::ALL {
            assert_eq!(method.to_string().parse::<RatingMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_axis_flags() {
        assert!(RatingMethod::Logarithmic.independent_log());
        assert!(RatingMethod::Logarithmic.dependent_log());
        assert!(RatingMethod::LinLog.independent_log());
        assert!(!RatingMethod::LinLog.dependent_log());
        assert!(RatingMethod::LogLin.dependent_log());
        assert!(!RatingMethod::LogLin.independent_log());
        assert!(!RatingMethod::Closest.is_interpolating());
    }

    #[test]
    fn test_serde_uses_canonical_text() {
        let json = serde_json::to_string(&RatingMethod::LinLog).unwrap();
        assert_eq!(json, "\"LIN-LOG\"");
        let back: RatingMethod = serde_json::from_str("\"previous\"").unwrap();
        assert_eq!(back, RatingMethod::Previous);
        assert!(serde_json::from_str::<RatingMethod>("\"CUBIC\"").is_err());
    }
}
