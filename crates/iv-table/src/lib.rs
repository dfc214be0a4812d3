#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use iv_types::{ScenarioKey, SeriesKey, Year, YearRange, nonfinite};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("year {year} appears more than once in the series")]
    DuplicateYear { year: Year },
    #[error("years must be strictly increasing; found {previous} followed by {next}")]
    NonIncreasingYears { previous: Year, next: Year },
    #[error("series has {years} years but {values} values")]
    LengthMismatch { years: usize, values: usize },
    #[error("series for {scenario} {series} already exists")]
    DuplicateSeries {
        scenario: ScenarioKey,
        series: SeriesKey,
    },
    #[error("inconsistent series {series} in {scenario}: {source}")]
    InconsistentSeries {
        scenario: ScenarioKey,
        series: SeriesKey,
        #[source]
        source: Box<TableError>,
    },
}

/// One (region, variable, unit) trajectory of a scenario.
///
/// Years are strictly increasing. The unit is fixed at construction. Values
/// may be NaN; such points are stored but never count as evaluable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSeries {
    unit: String,
    years: Vec<Year>,
    #[serde(with = "nonfinite::seq")]
    values: Vec<f64>,
}

/// Unit labels compare equal when they differ only in whitespace, so
/// `Mt CO2/yr` matches `Mt CO2 / yr`.
#[must_use]
pub fn units_match(left: &str, right: &str) -> bool {
    left.chars()
        .filter(|c| !c.is_whitespace())
        .eq(right.chars().filter(|c| !c.is_whitespace()))
}

fn check_strictly_increasing(years: &[Year]) -> Result<(), TableError> {
    for pair in years.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        if previous == next {
            return Err(TableError::DuplicateYear { year: next });
        }
        if previous > next {
            return Err(TableError::NonIncreasingYears { previous, next });
        }
    }
    Ok(())
}

impl VariableSeries {
    /// Checked constructor: points must already be in ascending year order.
    pub fn new(unit: impl Into<String>, points: Vec<(Year, f64)>) -> Result<Self, TableError> {
        let (years, values): (Vec<Year>, Vec<f64>) = points.into_iter().unzip();
        check_strictly_increasing(&years)?;
        Ok(Self {
            unit: unit.into(),
            years,
            values,
        })
    }

    /// Sorts points by year first; duplicate years are still rejected.
    pub fn from_unsorted(
        unit: impl Into<String>,
        mut points: Vec<(Year, f64)>,
    ) -> Result<Self, TableError> {
        points.sort_by_key(|(year, _)| *year);
        Self::new(unit, points)
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn has_unit(&self, unit: &str) -> bool {
        units_match(&self.unit, unit)
    }

    #[must_use]
    pub fn years(&self) -> &[Year] {
        &self.years
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.years.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Raw value stored for `year`, which may be NaN.
    #[must_use]
    pub fn value_at(&self, year: Year) -> Option<f64> {
        self.years
            .binary_search(&year)
            .ok()
            .and_then(|position| self.values.get(position).copied())
    }

    /// Finite value stored for `year`.
    #[must_use]
    pub fn evaluable_at(&self, year: Year) -> Option<f64> {
        self.value_at(year).filter(|value| value.is_finite())
    }

    pub fn points(&self) -> impl Iterator<Item = (Year, f64)> + '_ {
        self.years.iter().copied().zip(self.values.iter().copied())
    }

    /// Points inside `range` with a finite value, in ascending year order.
    #[must_use]
    pub fn evaluable_points(&self, range: YearRange) -> Vec<(Year, f64)> {
        self.points()
            .filter(|(year, value)| range.contains(*year) && value.is_finite())
            .collect()
    }

    /// Re-checks the invariants. Only needed for series that did not go
    /// through a checked constructor (e.g. deserialized ones).
    pub fn validate(&self) -> Result<(), TableError> {
        if self.years.len() != self.values.len() {
            return Err(TableError::LengthMismatch {
                years: self.years.len(),
                values: self.values.len(),
            });
        }
        check_strictly_increasing(&self.years)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub region: String,
    pub variable: String,
    pub series: VariableSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub scenario: ScenarioKey,
    #[serde(default)]
    pub series: Vec<SeriesEntry>,
}

/// Read-only lookup structure over scenario trajectories.
///
/// Series of the same scenario may use different year grids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ScenarioEntry>", into = "Vec<ScenarioEntry>")]
pub struct ScenarioTable {
    scenarios: BTreeMap<ScenarioKey, BTreeMap<SeriesKey, VariableSeries>>,
}

impl ScenarioTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scenarios: BTreeMap::new(),
        }
    }

    /// Registers a scenario even if it carries no series.
    pub fn insert_scenario(&mut self, key: ScenarioKey) {
        self.scenarios.entry(key).or_default();
    }

    pub fn insert_series(
        &mut self,
        key: ScenarioKey,
        region: impl Into<String>,
        variable: impl Into<String>,
        series: VariableSeries,
    ) -> Result<(), TableError> {
        let series_key = SeriesKey::new(region, variable);
        let scenario = self.scenarios.entry(key.clone()).or_default();
        if scenario.contains_key(&series_key) {
            return Err(TableError::DuplicateSeries {
                scenario: key,
                series: series_key,
            });
        }
        scenario.insert(series_key, series);
        Ok(())
    }

    /// `None` means the variable is absent, which is distinct from zero data.
    #[must_use]
    pub fn get_series(
        &self,
        key: &ScenarioKey,
        region: &str,
        variable: &str,
    ) -> Option<&VariableSeries> {
        let scenario = self.scenarios.get(key)?;
        scenario.get(&SeriesKey::new(region, variable))
    }

    #[must_use]
    pub fn scenario_keys(&self) -> BTreeSet<ScenarioKey> {
        self.scenarios.keys().cloned().collect()
    }

    #[must_use]
    pub fn contains_scenario(&self, key: &ScenarioKey) -> bool {
        self.scenarios.contains_key(key)
    }

    #[must_use]
    pub fn series_of(&self, key: &ScenarioKey) -> Option<&BTreeMap<SeriesKey, VariableSeries>> {
        self.scenarios.get(key)
    }

    #[must_use]
    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }

    #[must_use]
    pub fn series_count(&self) -> usize {
        self.scenarios.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Iterates every series as (scenario, selector, series) in key order.
    pub fn iter_series(
        &self,
    ) -> impl Iterator<Item = (&ScenarioKey, &SeriesKey, &VariableSeries)> + '_ {
        self.scenarios.iter().flat_map(|(scenario, series)| {
            series
                .iter()
                .map(move |(series_key, values)| (scenario, series_key, values))
        })
    }

    /// Checks every series invariant, reporting the first offender.
    pub fn validate(&self) -> Result<(), TableError> {
        for (scenario, series_key, series) in self.iter_series() {
            series
                .validate()
                .map_err(|source| TableError::InconsistentSeries {
                    scenario: scenario.clone(),
                    series: series_key.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}

/// Entries naming the same scenario twice are merged; a (region, variable)
/// pair seen twice within a scenario is rejected.
impl TryFrom<Vec<ScenarioEntry>> for ScenarioTable {
    type Error = TableError;

    fn try_from(entries: Vec<ScenarioEntry>) -> Result<Self, Self::Error> {
        let mut table = Self::new();
        for entry in entries {
            table.insert_scenario(entry.scenario.clone());
            for series in entry.series {
                table.insert_series(
                    entry.scenario.clone(),
                    series.region,
                    series.variable,
                    series.series,
                )?;
            }
        }
        Ok(table)
    }
}

impl From<ScenarioTable> for Vec<ScenarioEntry> {
    fn from(table: ScenarioTable) -> Self {
        table
            .scenarios
            .into_iter()
            .map(|(scenario, series)| ScenarioEntry {
                scenario,
                series: series
                    .into_iter()
                    .map(|(key, series)| SeriesEntry {
                        region: key.region,
                        variable: key.variable,
                        series,
                    })
                    .collect(),
            })
            .collect()
    }
}
