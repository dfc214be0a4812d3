//! Ordered criterion collections and their ensemble-derived construction.

use std::collections::{BTreeMap, BTreeSet};

use iv_table::ScenarioTable;
use iv_types::{SeriesKey, Severity, TypeError, Year, YearRange, nanquantile};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{Bounds, Criterion, CriterionKind, RangeBound};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LibraryError {
    #[error("criterion id {0:?} is declared more than once")]
    DuplicateCriterionId(String),
    #[error("library id must not be empty")]
    EmptyLibraryId,
    #[error("quantile level {0} was not computed for the ensemble")]
    UnknownQuantile(f64),
    #[error("expected {expected} quantile values but found {found}")]
    QuantileCountMismatch { expected: usize, found: usize },
    #[error("percentile band {0:?} matched no ensemble years")]
    EmptyBand(String),
    #[error("percentile band {id:?} has low level {low} above high level {high}")]
    InvertedBand { id: String, low: f64, high: f64 },
    #[error("reference series {series} mixes units {first:?} and {second:?}")]
    MixedUnits {
        series: SeriesKey,
        first: String,
        second: String,
    },
    #[error("cannot serialize library for digest: {0}")]
    Serialization(String),
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryIdentity {
    pub id: String,
    pub version: String,
    pub criteria_count: usize,
    /// `sha256:` digest of the library's canonical JSON.
    pub digest: String,
}

#[derive(Debug, Deserialize)]
struct LibraryDocument {
    id: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    criteria: Vec<Criterion>,
}

/// Criteria in their declared order. Ids are unique; the order is never
/// re-sorted because authors group related criteria deliberately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LibraryDocument")]
pub struct CriterionLibrary {
    id: String,
    version: String,
    criteria: Vec<Criterion>,
}

impl TryFrom<LibraryDocument> for CriterionLibrary {
    type Error = LibraryError;

    fn try_from(document: LibraryDocument) -> Result<Self, Self::Error> {
        Self::new(document.id, document.version, document.criteria)
    }
}

impl CriterionLibrary {
    /// Parameter problems inside individual criteria are not rejected here;
    /// they surface as `error` outcomes when evaluated.
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        criteria: Vec<Criterion>,
    ) -> Result<Self, LibraryError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(LibraryError::EmptyLibraryId);
        }
        let mut seen = BTreeSet::new();
        for criterion in &criteria {
            if !seen.insert(criterion.id.as_str()) {
                return Err(LibraryError::DuplicateCriterionId(criterion.id.clone()));
            }
        }
        Ok(Self {
            id,
            version: version.into(),
            criteria,
        })
    }

    /// One range-bound criterion per (band, ensemble year), bounded by the
    /// band's low/high quantiles. Bands keep their order; years ascend.
    pub fn from_percentile_bands(
        id: impl Into<String>,
        version: impl Into<String>,
        stats: &EnsembleStatistics,
        bands: &[PercentileBand],
    ) -> Result<Self, LibraryError> {
        let mut criteria = Vec::new();
        for band in bands {
            if band.low > band.high {
                return Err(LibraryError::InvertedBand {
                    id: band.id.clone(),
                    low: band.low,
                    high: band.high,
                });
            }
            let low = stats.level_position(band.low)?;
            let high = stats.level_position(band.high)?;
            let years = stats
                .years_for(&band.selector)
                .filter(|(year, _)| band.years.contains(*year))
                .collect::<Vec<_>>();
            if years.is_empty() {
                return Err(LibraryError::EmptyBand(band.id.clone()));
            }
            for (year, year_stats) in years {
                let bounds = Bounds::between(year_stats.values[low], year_stats.values[high]);
                let description = format!(
                    "{} within p{}-p{} of {} reference scenarios in {year}",
                    band.selector,
                    percent(band.low),
                    percent(band.high),
                    year_stats.sample_count
                );
                criteria.push(
                    Criterion::new(
                        format!("{}@{year}", band.id),
                        band.severity,
                        CriterionKind::RangeBound(RangeBound {
                            selector: band.selector.clone(),
                            years: YearRange::single(year),
                            bounds,
                            unit: stats.unit(&band.selector).map(str::to_owned),
                        }),
                    )
                    .with_description(description),
                );
            }
        }
        Self::new(id, version, criteria)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    #[must_use]
    pub fn get(&self, criterion_id: &str) -> Option<&Criterion> {
        self.criteria
            .iter()
            .find(|criterion| criterion.id == criterion_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn identity(&self) -> Result<LibraryIdentity, LibraryError> {
        let payload = serde_json::to_vec(self)
            .map_err(|err| LibraryError::Serialization(err.to_string()))?;
        Ok(LibraryIdentity {
            id: self.id.clone(),
            version: self.version.clone(),
            criteria_count: self.criteria.len(),
            digest: format!("sha256:{:x}", Sha256::digest(&payload)),
        })
    }
}

fn percent(level: f64) -> String {
    format!("{}", (level * 1000.0).round() / 10.0)
}

/// Band of ensemble quantiles that a variable is expected to stay within.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileBand {
    pub id: String,
    pub selector: SeriesKey,
    #[serde(default)]
    pub years: YearRange,
    pub low: f64,
    pub high: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearStats {
    pub sample_count: usize,
    /// One value per configured quantile level, in level order.
    pub values: Vec<f64>,
}

/// Precomputed per-(series, year) quantiles of a reference ensemble, plus
/// the unit each series was reported in.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleStatistics {
    levels: Vec<f64>,
    entries: BTreeMap<SeriesKey, BTreeMap<Year, YearStats>>,
    units: BTreeMap<SeriesKey, String>,
}

impl EnsembleStatistics {
    pub fn new(levels: Vec<f64>) -> Result<Self, LibraryError> {
        for level in &levels {
            if !(0.0..=1.0).contains(level) {
                return Err(TypeError::QuantileOutOfRange(*level).into());
            }
        }
        Ok(Self {
            levels,
            entries: BTreeMap::new(),
            units: BTreeMap::new(),
        })
    }

    /// Pools the finite values of every reference scenario per (series, year).
    /// All scenarios must report a series in the same unit.
    pub fn from_reference(reference: &ScenarioTable, levels: &[f64]) -> Result<Self, LibraryError> {
        let mut stats = Self::new(levels.to_vec())?;
        let mut pooled: BTreeMap<(SeriesKey, Year), Vec<f64>> = BTreeMap::new();
        for (_, series_key, series) in reference.iter_series() {
            match stats.units.get(series_key) {
                Some(first) if !series.has_unit(first) => {
                    return Err(LibraryError::MixedUnits {
                        series: series_key.clone(),
                        first: first.clone(),
                        second: series.unit().to_owned(),
                    });
                }
                Some(_) => {}
                None => stats.set_unit(series_key.clone(), series.unit()),
            }
            for (year, value) in series.points() {
                if value.is_finite() {
                    pooled
                        .entry((series_key.clone(), year))
                        .or_default()
                        .push(value);
                }
            }
        }

        for ((series_key, year), values) in pooled {
            let mut quantiles = Vec::with_capacity(levels.len());
            for level in levels {
                // Pools only hold finite values, so a quantile always exists.
                if let Some(value) = nanquantile(&values, *level)? {
                    quantiles.push(value);
                }
            }
            stats.insert(series_key, year, values.len(), quantiles)?;
        }
        Ok(stats)
    }

    pub fn insert(
        &mut self,
        series: SeriesKey,
        year: Year,
        sample_count: usize,
        values: Vec<f64>,
    ) -> Result<(), LibraryError> {
        if values.len() != self.levels.len() {
            return Err(LibraryError::QuantileCountMismatch {
                expected: self.levels.len(),
                found: values.len(),
            });
        }
        self.entries.entry(series).or_default().insert(
            year,
            YearStats {
                sample_count,
                values,
            },
        );
        Ok(())
    }

    /// Records the unit of a series; derived criteria will require it.
    pub fn set_unit(&mut self, series: SeriesKey, unit: impl Into<String>) {
        self.units.insert(series, unit.into());
    }

    #[must_use]
    pub fn unit(&self, series: &SeriesKey) -> Option<&str> {
        self.units
            .get(series)
            .map(String::as_str)
            .filter(|unit| !unit.trim().is_empty())
    }

    #[must_use]
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    #[must_use]
    pub fn quantile(&self, series: &SeriesKey, year: Year, level: f64) -> Option<f64> {
        let position = self.level_position(level).ok()?;
        let stats = self.entries.get(series)?.get(&year)?;
        stats.values.get(position).copied()
    }

    pub fn years_for<'a>(
        &'a self,
        series: &SeriesKey,
    ) -> impl Iterator<Item = (Year, &'a YearStats)> + 'a {
        self.entries
            .get(series)
            .into_iter()
            .flat_map(|years| years.iter().map(|(year, stats)| (*year, stats)))
    }

    fn level_position(&self, level: f64) -> Result<usize, LibraryError> {
        self.levels
            .iter()
            .position(|candidate| (candidate - level).abs() < 1e-9)
            .ok_or(LibraryError::UnknownQuantile(level))
    }
}
