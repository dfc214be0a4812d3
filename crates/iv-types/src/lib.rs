#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Calendar year used as the time axis of every trajectory.
pub type Year = i32;

/// Identifies one model run. Ordering is lexicographic by model, then scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScenarioKey {
    pub model: String,
    pub scenario: String,
}

impl ScenarioKey {
    #[must_use]
    pub fn new(model: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            scenario: scenario.into(),
        }
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.model, self.scenario)
    }
}

/// Selects one trajectory inside a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub region: String,
    pub variable: String,
}

impl SeriesKey {
    #[must_use]
    pub fn new(region: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            variable: variable.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.variable, self.region)
    }
}

/// Inclusive year window. A missing end is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearRange {
    #[serde(default)]
    pub start: Option<Year>,
    #[serde(default)]
    pub end: Option<Year>,
}

impl YearRange {
    #[must_use]
    pub fn all() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    #[must_use]
    pub fn between(start: Year, end: Year) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    #[must_use]
    pub fn single(year: Year) -> Self {
        Self::between(year, year)
    }

    #[must_use]
    pub fn contains(&self, year: Year) -> bool {
        self.start.is_none_or(|start| year >= start) && self.end.is_none_or(|end| year <= end)
    }

    /// A range is inverted when both ends are set and start > end.
    #[must_use]
    pub fn is_inverted(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start > end)
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (Some(start), Some(end)) => write!(f, "{start}-{end}"),
            (Some(start), None) => write!(f, "{start}-"),
            (None, Some(end)) => write!(f, "-{end}"),
            (None, None) => f.write_str("all years"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Fatal,
    Warning,
    Informational,
}

impl Severity {
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Warning => "warning",
            Self::Informational => "informational",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Severity {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(Self::Fatal),
            "warning" | "warn" => Ok(Self::Warning),
            "informational" | "info" => Ok(Self::Informational),
            other => Err(TypeError::UnknownSeverity(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pass,
    Fail,
    /// Not enough data to evaluate. Never counts as a pass.
    Inconclusive,
    /// The criterion itself could not be applied (malformed parameters).
    Error,
}

impl OutcomeStatus {
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Inconclusive => "inconclusive",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Accept,
    Review,
    Reject,
}

impl VerdictStatus {
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Review => "review",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("unknown severity {0:?}; expected fatal, warning or informational")]
    UnknownSeverity(String),
    #[error("quantile {0} is outside [0, 1]")]
    QuantileOutOfRange(f64),
}

// ── Nanops: NaN-skipping numeric reductions ────────────────────────────

pub fn finite_values(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Quantile with linear interpolation between order statistics, skipping
/// non-finite values. Returns `Ok(None)` when nothing finite remains.
pub fn nanquantile(values: &[f64], q: f64) -> Result<Option<f64>, TypeError> {
    if !(0.0..=1.0).contains(&q) {
        return Err(TypeError::QuantileOutOfRange(q));
    }
    let mut nums = finite_values(values);
    if nums.is_empty() {
        return Ok(None);
    }
    nums.sort_by(f64::total_cmp);

    let position = q * (nums.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Ok(Some(nums[lower] + (nums[upper] - nums[lower]) * fraction))
}

// ── Non-finite floats on the wire ──────────────────────────────────────

/// Serde adapters for `f64` fields that may hold infinities or NaN.
///
/// JSON has no literal for non-finite numbers, so they are written as the
/// strings `"inf"`, `"-inf"` and `"nan"`. Finite values stay plain numbers.
/// Use with `#[serde(with = "iv_types::nonfinite")]` or its `option` and
/// `seq` variants.
pub mod nonfinite {
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    impl Repr {
        fn into_value<E: de::Error>(self) -> Result<f64, E> {
            match self {
                Self::Number(value) => Ok(value),
                Self::Text(text) => parse(&text).ok_or_else(|| {
                    E::invalid_value(
                        de::Unexpected::Str(&text),
                        &"a number, \"inf\", \"-inf\" or \"nan\"",
                    )
                }),
            }
        }
    }

    struct Wire(f64);

    impl Serialize for Wire {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serialize(&self.0, serializer)
        }
    }

    #[must_use]
    pub fn label(value: f64) -> Option<&'static str> {
        if value.is_nan() {
            Some("nan")
        } else if value == f64::INFINITY {
            Some("inf")
        } else if value == f64::NEG_INFINITY {
            Some("-inf")
        } else {
            None
        }
    }

    #[must_use]
    pub fn parse(text: &str) -> Option<f64> {
        match text.trim().to_ascii_lowercase().as_str() {
            "nan" => Some(f64::NAN),
            "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
            "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        match label(*value) {
            Some(text) => serializer.serialize_str(text),
            None => serializer.serialize_f64(*value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Repr::deserialize(deserializer)?.into_value()
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        use super::{Repr, Wire};

        pub fn serialize<S: Serializer>(
            value: &Option<f64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_some(&Wire(*value)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<f64>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(Repr::into_value)
                .transpose()
        }
    }

    pub mod seq {
        use serde::{Deserialize, Deserializer, Serializer};

        use super::{Repr, Wire};

        pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(|value| Wire(*value)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<f64>, D::Error> {
            Vec::<Repr>::deserialize(deserializer)?
                .into_iter()
                .map(Repr::into_value)
                .collect()
        }
    }
}
