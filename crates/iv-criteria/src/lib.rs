#![forbid(unsafe_code)]

pub mod library;

use std::fmt;

use iv_table::{ScenarioTable, TableError, VariableSeries};
use iv_types::{OutcomeStatus, ScenarioKey, SeriesKey, Severity, Year, YearRange, nonfinite};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use library::{
    CriterionLibrary, EnsembleStatistics, LibraryError, LibraryIdentity, PercentileBand,
    YearStats,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CriterionError {
    #[error("criterion id must not be empty")]
    EmptyId,
    #[error("at least one of lower/upper bound must be given")]
    MissingBounds,
    #[error("bound {0} is not a finite number")]
    NonFiniteBound(f64),
    #[error("lower bound {lower} exceeds upper bound {upper}")]
    InvertedBounds { lower: f64, upper: f64 },
    #[error("year range {0} starts after it ends")]
    InvertedYearRange(YearRange),
    #[error("max_abs_rate must be a non-negative finite number; found {0}")]
    InvalidRate(f64),
    #[error("tolerance must be a non-negative finite number; found {0}")]
    InvalidTolerance(f64),
    #[error("target {0} is not a finite number")]
    NonFiniteTarget(f64),
    #[error("target {target} lies outside its range [{lower}, {upper}]")]
    TargetOutsideRange { target: f64, lower: f64, upper: f64 },
    #[error("reference year {reference_year} must precede year {year}")]
    InvalidReferenceYear { reference_year: Year, year: Year },
    #[error("series {selector} is reported in {found:?} but the criterion expects {expected:?}")]
    UnitMismatch {
        selector: SeriesKey,
        expected: String,
        found: String,
    },
    #[error("reference trajectory is inconsistent: {0}")]
    InvalidReference(TableError),
}

/// Inclusive numeric bounds; a missing side is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, with = "nonfinite::option")]
    pub lower: Option<f64>,
    #[serde(default, with = "nonfinite::option")]
    pub upper: Option<f64>,
}

impl Bounds {
    #[must_use]
    pub fn between(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    #[must_use]
    pub fn at_least(lower: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
        }
    }

    #[must_use]
    pub fn at_most(upper: f64) -> Self {
        Self {
            lower: None,
            upper: Some(upper),
        }
    }

    pub fn validate(&self) -> Result<(), CriterionError> {
        if self.lower.is_none() && self.upper.is_none() {
            return Err(CriterionError::MissingBounds);
        }
        for bound in [self.lower, self.upper].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(CriterionError::NonFiniteBound(bound));
            }
        }
        match (self.lower, self.upper) {
            (Some(lower), Some(upper)) if lower > upper => {
                Err(CriterionError::InvertedBounds { lower, upper })
            }
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        !value.is_nan()
            && self.lower.is_none_or(|lower| value >= lower)
            && self.upper.is_none_or(|upper| value <= upper)
    }

    /// How far `value` lies outside the bounds; zero inside.
    #[must_use]
    pub fn excess(&self, value: f64) -> f64 {
        match (self.lower, self.upper) {
            (Some(lower), _) if value < lower => lower - value,
            (_, Some(upper)) if value > upper => value - upper,
            _ => 0.0,
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper) {
            (Some(lower), Some(upper)) => write!(f, "[{lower}, {upper}]"),
            (Some(lower), None) => write!(f, "[{lower}, inf)"),
            (None, Some(upper)) => write!(f, "(-inf, {upper}]"),
            (None, None) => f.write_str("(-inf, inf)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    NonDecreasing,
    NonIncreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    pub selector: SeriesKey,
    /// Expected unit of the selected series; unchecked when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub years: YearRange,
    pub bounds: Bounds,
}

/// Consecutive-point rate limit. Gaps between years are annualized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateOfChangeBound {
    pub selector: SeriesKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub years: YearRange,
    pub max_abs_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monotonicity {
    pub selector: SeriesKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub years: YearRange,
    pub direction: Direction,
    #[serde(default)]
    pub tolerance: f64,
}

/// Per-year ratio of two variables of the same scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossVariableRatio {
    pub numerator: SeriesKey,
    pub denominator: SeriesKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numerator_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator_unit: Option<String>,
    #[serde(default)]
    pub years: YearRange,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TargetBand {
    Absolute { lower: f64, upper: f64 },
    /// Bounds expressed as multiples of the target, e.g. 0.8..1.2 for +/-20%.
    Relative { lower_factor: f64, upper_factor: f64 },
}

/// Single-year value checked against a target and its accepted band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub selector: SeriesKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub year: Year,
    pub target: f64,
    pub band: TargetBand,
}

/// Relative change `value(year) / value(reference_year) - 1` within bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOverTime {
    pub selector: SeriesKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub reference_year: Year,
    pub year: Year,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `value / reference`, with `0/0 = 1` and `x/0` a signed infinity.
    #[default]
    Ratio,
    /// `value - reference`.
    Difference,
}

impl Comparison {
    #[must_use]
    pub fn apply(self, value: f64, reference: f64) -> f64 {
        match self {
            Self::Ratio => ratio(value, reference),
            Self::Difference => value - reference,
        }
    }
}

/// Reduces per-year comparison values to the single value checked against
/// the bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAggregation {
    #[default]
    MaxAbs,
    Mean,
}

impl TimeAggregation {
    /// Per-year value as it enters the reduction.
    fn prepare(self, value: f64) -> f64 {
        match self {
            Self::MaxAbs => value.abs(),
            Self::Mean => value,
        }
    }

    /// `values` must not be empty.
    fn reduce(self, values: &[f64]) -> f64 {
        match self {
            Self::MaxAbs => values.iter().map(|v| v.abs()).fold(0.0, f64::max),
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
        }
    }
}

/// Year-by-year comparison of a scenario series against a fixed reference
/// trajectory, e.g. harmonized GDP or population. Only years present in
/// both are compared. The series must be in the reference's unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceComparison {
    pub selector: SeriesKey,
    #[serde(default)]
    pub years: YearRange,
    pub reference: VariableSeries,
    #[serde(default)]
    pub comparison: Comparison,
    #[serde(default)]
    pub aggregation: TimeAggregation,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriterionKind {
    RangeBound(RangeBound),
    RateOfChangeBound(RateOfChangeBound),
    Monotonicity(Monotonicity),
    CrossVariableRatio(CrossVariableRatio),
    TargetRange(TargetRange),
    ChangeOverTime(ChangeOverTime),
    ReferenceComparison(ReferenceComparison),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKindTag {
    RangeBound,
    RateOfChangeBound,
    Monotonicity,
    CrossVariableRatio,
    TargetRange,
    ChangeOverTime,
    ReferenceComparison,
}

impl CriterionKindTag {
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::RangeBound => "range_bound",
            Self::RateOfChangeBound => "rate_of_change_bound",
            Self::Monotonicity => "monotonicity",
            Self::CrossVariableRatio => "cross_variable_ratio",
            Self::TargetRange => "target_range",
            Self::ChangeOverTime => "change_over_time",
            Self::ReferenceComparison => "reference_comparison",
        }
    }
}

impl fmt::Display for CriterionKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// One offending data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub year: Year,
    #[serde(with = "nonfinite")]
    pub value: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub scenario: ScenarioKey,
    pub criterion_id: String,
    pub kind: CriterionKindTag,
    pub severity: Severity,
    pub status: OutcomeStatus,
    pub evaluated_points: usize,
    #[serde(default, with = "nonfinite::option")]
    pub measure: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl Outcome {
    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.status == OutcomeStatus::Fail
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Check {
    status: OutcomeStatus,
    evaluated_points: usize,
    measure: Option<f64>,
    message: Option<String>,
    violations: Vec<Violation>,
}

impl Check {
    fn inconclusive(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Inconclusive,
            evaluated_points: 0,
            measure: None,
            message: Some(message.into()),
            violations: Vec::new(),
        }
    }

    fn absent(selector: &SeriesKey) -> Self {
        Self::inconclusive(format!("series {selector} is absent"))
    }

    fn judged(evaluated_points: usize, measure: Option<f64>, violations: Vec<Violation>) -> Self {
        let (status, message) = if violations.is_empty() {
            (OutcomeStatus::Pass, None)
        } else {
            (
                OutcomeStatus::Fail,
                Some(format!(
                    "{} of {evaluated_points} checked points violated the criterion",
                    violations.len()
                )),
            )
        };
        Self {
            status,
            evaluated_points,
            measure,
            message,
            violations,
        }
    }
}

/// Shared capability of every criterion kind.
trait Rule {
    fn validate(&self) -> Result<(), CriterionError>;

    fn check(&self, key: &ScenarioKey, table: &ScenarioTable) -> Result<Check, CriterionError>;
}

fn check_years(range: YearRange) -> Result<(), CriterionError> {
    if range.is_inverted() {
        return Err(CriterionError::InvertedYearRange(range));
    }
    Ok(())
}

/// `Ok(None)` when the series is absent. A series reported in another unit
/// than `unit` is an error rather than silently compared.
fn lookup<'a>(
    table: &'a ScenarioTable,
    key: &ScenarioKey,
    selector: &SeriesKey,
    unit: Option<&str>,
) -> Result<Option<&'a VariableSeries>, CriterionError> {
    let Some(series) = table.get_series(key, &selector.region, &selector.variable) else {
        return Ok(None);
    };
    match unit {
        Some(expected) if !series.has_unit(expected) => Err(CriterionError::UnitMismatch {
            selector: selector.clone(),
            expected: expected.to_owned(),
            found: series.unit().to_owned(),
        }),
        _ => Ok(Some(series)),
    }
}

impl Rule for RangeBound {
    fn validate(&self) -> Result<(), CriterionError> {
        self.bounds.validate()?;
        check_years(self.years)
    }

    fn check(&self, key: &ScenarioKey, table: &ScenarioTable) -> Result<Check, CriterionError> {
        self.validate()?;
        let Some(series) = lookup(table, key, &self.selector, self.unit.as_deref())? else {
            return Ok(Check::absent(&self.selector));
        };
        let points = series.evaluable_points(self.years);
        if points.is_empty() {
            return Ok(Check::inconclusive(format!(
                "series {} has no values in {}",
                self.selector, self.years
            )));
        }

        let violations = points
            .iter()
            .filter(|(_, value)| !self.bounds.contains(*value))
            .map(|&(year, value)| Violation {
                year,
                value,
                detail: format!("{value} outside {}", self.bounds),
            })
            .collect::<Vec<_>>();
        let worst = points
            .iter()
            .map(|(_, value)| self.bounds.excess(*value))
            .fold(0.0, f64::max);
        Ok(Check::judged(points.len(), Some(worst), violations))
    }
}

impl Rule for RateOfChangeBound {
    fn validate(&self) -> Result<(), CriterionError> {
        if !self.max_abs_rate.is_finite() || self.max_abs_rate < 0.0 {
            return Err(CriterionError::InvalidRate(self.max_abs_rate));
        }
        check_years(self.years)
    }

    fn check(&self, key: &ScenarioKey, table: &ScenarioTable) -> Result<Check, CriterionError> {
        self.validate()?;
        let Some(series) = lookup(table, key, &self.selector, self.unit.as_deref())? else {
            return Ok(Check::absent(&self.selector));
        };
        let points = series.evaluable_points(self.years);
        if points.len() < 2 {
            return Ok(Check::inconclusive(format!(
                "rate of change needs two values of {} in {}; found {}",
                self.selector,
                self.years,
                points.len()
            )));
        }

        let mut violations = Vec::new();
        let mut steepest = 0.0_f64;
        for pair in points.windows(2) {
            let (from_year, from_value) = pair[0];
            let (to_year, to_value) = pair[1];
            let rate = (to_value - from_value) / (f64::from(to_year) - f64::from(from_year));
            steepest = steepest.max(rate.abs());
            if rate.abs() > self.max_abs_rate {
                violations.push(Violation {
                    year: to_year,
                    value: rate,
                    detail: format!(
                        "rate {rate}/yr from {from_year} to {to_year} exceeds +/-{}/yr",
                        self.max_abs_rate
                    ),
                });
            }
        }
        Ok(Check::judged(points.len(), Some(steepest), violations))
    }
}

impl Rule for Monotonicity {
    fn validate(&self) -> Result<(), CriterionError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(CriterionError::InvalidTolerance(self.tolerance));
        }
        check_years(self.years)
    }

    fn check(&self, key: &ScenarioKey, table: &ScenarioTable) -> Result<Check, CriterionError> {
        self.validate()?;
        let Some(series) = lookup(table, key, &self.selector, self.unit.as_deref())? else {
            return Ok(Check::absent(&self.selector));
        };
        let points = series.evaluable_points(self.years);
        if points.len() < 2 {
            return Ok(Check::inconclusive(format!(
                "monotonicity needs two values of {} in {}; found {}",
                self.selector,
                self.years,
                points.len()
            )));
        }

        let mut violations = Vec::new();
        let mut largest_reversal = 0.0_f64;
        for pair in points.windows(2) {
            let (from_year, from_value) = pair[0];
            let (to_year, to_value) = pair[1];
            let step = to_value - from_value;
            let reversal = match self.direction {
                Direction::NonDecreasing => -step,
                Direction::NonIncreasing => step,
            };
            largest_reversal = largest_reversal.max(reversal);
            if reversal > self.tolerance {
                violations.push(Violation {
                    year: to_year,
                    value: to_value,
                    detail: format!(
                        "moved from {from_value} ({from_year}) to {to_value} against {:?}",
                        self.direction
                    ),
                });
            }
        }
        Ok(Check::judged(points.len(), Some(largest_reversal), violations))
    }
}

/// `0/0` is treated as a ratio of one, `x/0` as a signed infinity.
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        if numerator == 0.0 {
            1.0
        } else {
            f64::INFINITY.copysign(numerator)
        }
    } else {
        numerator / denominator
    }
}

impl Rule for CrossVariableRatio {
    fn validate(&self) -> Result<(), CriterionError> {
        self.bounds.validate()?;
        check_years(self.years)
    }

    fn check(&self, key: &ScenarioKey, table: &ScenarioTable) -> Result<Check, CriterionError> {
        self.validate()?;
        let Some(numerator) =
            lookup(table, key, &self.numerator, self.numerator_unit.as_deref())?
        else {
            return Ok(Check::absent(&self.numerator));
        };
        let Some(denominator) =
            lookup(table, key, &self.denominator, self.denominator_unit.as_deref())?
        else {
            return Ok(Check::absent(&self.denominator));
        };

        let mut evaluated = 0_usize;
        let mut violations = Vec::new();
        let mut worst = 0.0_f64;
        for (year, top) in numerator.evaluable_points(self.years) {
            // Years missing from either side are excluded, not failed.
            let Some(bottom) = denominator.evaluable_at(year) else {
                continue;
            };
            evaluated += 1;
            let value = ratio(top, bottom);
            worst = worst.max(self.bounds.excess(value));
            if !self.bounds.contains(value) {
                violations.push(Violation {
                    year,
                    value,
                    detail: format!(
                        "{} / {} = {value} outside {}",
                        self.numerator, self.denominator, self.bounds
                    ),
                });
            }
        }

        if evaluated == 0 {
            return Ok(Check::inconclusive(format!(
                "no year in {} has values for both {} and {}",
                self.years, self.numerator, self.denominator
            )));
        }
        Ok(Check::judged(evaluated, Some(worst), violations))
    }
}

fn scaled_offset(offset: f64, span: f64) -> f64 {
    if span > 0.0 {
        offset / span
    } else if offset == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

impl TargetRange {
    /// Absolute `(lower, upper)` band implied by the target and its band.
    #[must_use]
    pub fn resolved_range(&self) -> (f64, f64) {
        match self.band {
            TargetBand::Absolute { lower, upper } => (lower, upper),
            TargetBand::Relative {
                lower_factor,
                upper_factor,
            } => {
                let a = self.target * lower_factor;
                let b = self.target * upper_factor;
                (a.min(b), a.max(b))
            }
        }
    }

    /// Signed distance from target: 0 at target, +1 at upper, -1 at lower.
    #[must_use]
    pub fn normalized_distance(&self, value: f64) -> f64 {
        let (lower, upper) = self.resolved_range();
        if value >= self.target {
            scaled_offset(value - self.target, upper - self.target)
        } else {
            -scaled_offset(self.target - value, self.target - lower)
        }
    }
}

impl Rule for TargetRange {
    fn validate(&self) -> Result<(), CriterionError> {
        if !self.target.is_finite() {
            return Err(CriterionError::NonFiniteTarget(self.target));
        }
        let (first, second) = match self.band {
            TargetBand::Absolute { lower, upper } => (lower, upper),
            TargetBand::Relative {
                lower_factor,
                upper_factor,
            } => (lower_factor, upper_factor),
        };
        for bound in [first, second] {
            if !bound.is_finite() {
                return Err(CriterionError::NonFiniteBound(bound));
            }
        }
        if first > second {
            return Err(CriterionError::InvertedBounds {
                lower: first,
                upper: second,
            });
        }
        let (lower, upper) = self.resolved_range();
        if self.target < lower || self.target > upper {
            return Err(CriterionError::TargetOutsideRange {
                target: self.target,
                lower,
                upper,
            });
        }
        Ok(())
    }

    fn check(&self, key: &ScenarioKey, table: &ScenarioTable) -> Result<Check, CriterionError> {
        self.validate()?;
        let Some(series) = lookup(table, key, &self.selector, self.unit.as_deref())? else {
            return Ok(Check::absent(&self.selector));
        };
        let Some(value) = series.evaluable_at(self.year) else {
            return Ok(Check::inconclusive(format!(
                "series {} has no value for {}",
                self.selector, self.year
            )));
        };

        let (lower, upper) = self.resolved_range();
        let mut violations = Vec::new();
        if value < lower || value > upper {
            violations.push(Violation {
                year: self.year,
                value,
                detail: format!(
                    "{value} outside [{lower}, {upper}] around target {}",
                    self.target
                ),
            });
        }
        Ok(Check::judged(
            1,
            Some(self.normalized_distance(value)),
            violations,
        ))
    }
}

impl Rule for ChangeOverTime {
    fn validate(&self) -> Result<(), CriterionError> {
        if self.reference_year >= self.year {
            return Err(CriterionError::InvalidReferenceYear {
                reference_year: self.reference_year,
                year: self.year,
            });
        }
        self.bounds.validate()
    }

    fn check(&self, key: &ScenarioKey, table: &ScenarioTable) -> Result<Check, CriterionError> {
        self.validate()?;
        let Some(series) = lookup(table, key, &self.selector, self.unit.as_deref())? else {
            return Ok(Check::absent(&self.selector));
        };
        let (Some(reference), Some(value)) = (
            series.evaluable_at(self.reference_year),
            series.evaluable_at(self.year),
        ) else {
            return Ok(Check::inconclusive(format!(
                "series {} needs values for both {} and {}",
                self.selector, self.reference_year, self.year
            )));
        };
        if reference == 0.0 {
            return Ok(Check::inconclusive(format!(
                "reference value of {} in {} is zero",
                self.selector, self.reference_year
            )));
        }

        let change = value / reference - 1.0;
        let mut violations = Vec::new();
        if !self.bounds.contains(change) {
            violations.push(Violation {
                year: self.year,
                value: change,
                detail: format!(
                    "relative change {change} since {} outside {}",
                    self.reference_year, self.bounds
                ),
            });
        }
        Ok(Check::judged(2, Some(change), violations))
    }
}

impl ReferenceComparison {
    /// Unit the scenario series must be reported in; `None` when the
    /// reference carries no unit label.
    #[must_use]
    pub fn expected_unit(&self) -> Option<&str> {
        Some(self.reference.unit()).filter(|unit| !unit.trim().is_empty())
    }
}

impl Rule for ReferenceComparison {
    fn validate(&self) -> Result<(), CriterionError> {
        self.bounds.validate()?;
        check_years(self.years)?;
        self.reference
            .validate()
            .map_err(CriterionError::InvalidReference)
    }

    fn check(&self, key: &ScenarioKey, table: &ScenarioTable) -> Result<Check, CriterionError> {
        self.validate()?;
        let Some(series) = lookup(table, key, &self.selector, self.expected_unit())? else {
            return Ok(Check::absent(&self.selector));
        };

        let compared = series
            .evaluable_points(self.years)
            .into_iter()
            .filter_map(|(year, value)| {
                self.reference
                    .evaluable_at(year)
                    .map(|reference| (year, self.comparison.apply(value, reference)))
            })
            .collect::<Vec<_>>();
        if compared.is_empty() {
            return Ok(Check::inconclusive(format!(
                "no year in {} has values for both {} and the reference",
                self.years, self.selector
            )));
        }

        let values = compared.iter().map(|(_, value)| *value).collect::<Vec<_>>();
        let aggregate = self.aggregation.reduce(&values);
        let mut violations = Vec::new();
        if !self.bounds.contains(aggregate) {
            violations = compared
                .iter()
                .filter(|(_, value)| !self.bounds.contains(self.aggregation.prepare(*value)))
                .map(|&(year, value)| Violation {
                    year,
                    value,
                    detail: format!(
                        "{:?} to reference {value} outside {}",
                        self.comparison, self.bounds
                    ),
                })
                .collect();
            if violations.is_empty() {
                let (year, _) = compared[compared.len() - 1];
                violations.push(Violation {
                    year,
                    value: aggregate,
                    detail: format!(
                        "{:?} of {:?} to reference {aggregate} outside {}",
                        self.aggregation, self.comparison, self.bounds
                    ),
                });
            }
        }
        Ok(Check::judged(compared.len(), Some(aggregate), violations))
    }
}

impl CriterionKind {
    #[must_use]
    pub fn tag(&self) -> CriterionKindTag {
        match self {
            Self::RangeBound(_) => CriterionKindTag::RangeBound,
            Self::RateOfChangeBound(_) => CriterionKindTag::RateOfChangeBound,
            Self::Monotonicity(_) => CriterionKindTag::Monotonicity,
            Self::CrossVariableRatio(_) => CriterionKindTag::CrossVariableRatio,
            Self::TargetRange(_) => CriterionKindTag::TargetRange,
            Self::ChangeOverTime(_) => CriterionKindTag::ChangeOverTime,
            Self::ReferenceComparison(_) => CriterionKindTag::ReferenceComparison,
        }
    }

    fn as_rule(&self) -> &dyn Rule {
        match self {
            Self::RangeBound(rule) => rule,
            Self::RateOfChangeBound(rule) => rule,
            Self::Monotonicity(rule) => rule,
            Self::CrossVariableRatio(rule) => rule,
            Self::TargetRange(rule) => rule,
            Self::ChangeOverTime(rule) => rule,
            Self::ReferenceComparison(rule) => rule,
        }
    }

    /// Every variable selector the rule reads.
    #[must_use]
    pub fn selectors(&self) -> Vec<&SeriesKey> {
        match self {
            Self::RangeBound(rule) => vec![&rule.selector],
            Self::RateOfChangeBound(rule) => vec![&rule.selector],
            Self::Monotonicity(rule) => vec![&rule.selector],
            Self::CrossVariableRatio(rule) => vec![&rule.numerator, &rule.denominator],
            Self::TargetRange(rule) => vec![&rule.selector],
            Self::ChangeOverTime(rule) => vec![&rule.selector],
            Self::ReferenceComparison(rule) => vec![&rule.selector],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub rule: CriterionKind,
}

impl Criterion {
    #[must_use]
    pub fn new(id: impl Into<String>, severity: Severity, rule: CriterionKind) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            severity,
            rule,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn kind(&self) -> CriterionKindTag {
        self.rule.tag()
    }

    pub fn validate(&self) -> Result<(), CriterionError> {
        if self.id.trim().is_empty() {
            return Err(CriterionError::EmptyId);
        }
        self.rule.as_rule().validate()
    }

    /// Evaluates against one scenario. Malformed parameters become an
    /// `error` outcome rather than a panic or an early return.
    #[must_use]
    pub fn evaluate(&self, key: &ScenarioKey, table: &ScenarioTable) -> Outcome {
        let checked = if self.id.trim().is_empty() {
            Err(CriterionError::EmptyId)
        } else {
            self.rule.as_rule().check(key, table)
        };

        let check = checked.unwrap_or_else(|err| Check {
            status: OutcomeStatus::Error,
            evaluated_points: 0,
            measure: None,
            message: Some(err.to_string()),
            violations: Vec::new(),
        });

        Outcome {
            scenario: key.clone(),
            criterion_id: self.id.clone(),
            kind: self.kind(),
            severity: self.severity,
            status: check.status,
            evaluated_points: check.evaluated_points,
            measure: check.measure,
            message: check.message,
            violations: check.violations,
        }
    }
}
