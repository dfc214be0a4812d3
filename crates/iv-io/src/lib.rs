#![forbid(unsafe_code)]

use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use iv_criteria::{CriterionLibrary, Outcome};
use iv_runtime::Report;
use iv_table::{ScenarioTable, TableError, VariableSeries};
use iv_types::{OutcomeStatus, ScenarioKey, Year};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("required column {0:?} is missing")]
    MissingColumn(&'static str),
    #[error("column {0:?} is neither an IAMC dimension nor a year")]
    UnexpectedColumn(String),
    #[error("row {row}: {column} value {value:?} is not a number")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("unsupported criteria file extension {0:?}; expected json, yaml or yml")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

const DIMENSIONS: [&str; 5] = ["model", "scenario", "region", "variable", "unit"];

/// Column positions of the IAMC dimensions plus every year column.
struct IamcLayout {
    dimensions: [usize; 5],
    years: Vec<(usize, Year)>,
}

impl IamcLayout {
    fn from_headers(headers: &StringRecord) -> Result<Self, IoError> {
        let mut dimensions = [None; 5];
        let mut years = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            let name = header.trim().to_ascii_lowercase();
            if let Some(slot) = DIMENSIONS.iter().position(|dim| *dim == name) {
                dimensions[slot] = Some(idx);
            } else if let Ok(year) = name.parse::<Year>() {
                years.push((idx, year));
            } else {
                return Err(IoError::UnexpectedColumn(header.to_owned()));
            }
        }

        let mut resolved = [0; 5];
        for (slot, position) in dimensions.into_iter().enumerate() {
            resolved[slot] = position.ok_or(IoError::MissingColumn(DIMENSIONS[slot]))?;
        }
        Ok(Self {
            dimensions: resolved,
            years,
        })
    }

    fn field<'r>(&self, record: &'r StringRecord, slot: usize) -> &'r str {
        record.get(self.dimensions[slot]).unwrap_or_default().trim()
    }
}

/// Parses IAMC wide format: one row per (model, scenario, region, variable,
/// unit), one column per year. Header names are matched case-insensitively
/// and empty cells are missing points.
pub fn read_iamc_csv_str(input: &str) -> Result<ScenarioTable, IoError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());

    let headers = reader.headers().cloned().map_err(IoError::from)?;
    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }
    let layout = IamcLayout::from_headers(&headers)?;

    let mut table = ScenarioTable::new();
    for (row_idx, row) in reader.records().enumerate() {
        let record = row?;
        let mut points = Vec::with_capacity(layout.years.len());
        for &(idx, year) in &layout.years {
            let field = record.get(idx).unwrap_or_default().trim();
            if field.is_empty() {
                continue;
            }
            let value = field.parse::<f64>().map_err(|_| IoError::InvalidValue {
                row: row_idx + 1,
                column: year.to_string(),
                value: field.to_owned(),
            })?;
            points.push((year, value));
        }

        let series = VariableSeries::from_unsorted(layout.field(&record, 4), points)?;
        table.insert_series(
            ScenarioKey::new(layout.field(&record, 0), layout.field(&record, 1)),
            layout.field(&record, 2),
            layout.field(&record, 3),
            series,
        )?;
    }

    debug!(
        scenarios = table.scenario_count(),
        series = table.series_count(),
        "iamc table loaded"
    );
    Ok(table)
}

pub fn read_iamc_csv(path: &Path) -> Result<ScenarioTable, IoError> {
    let content = std::fs::read_to_string(path)?;
    read_iamc_csv_str(&content)
}

pub fn read_library_json_str(input: &str) -> Result<CriterionLibrary, IoError> {
    Ok(serde_json::from_str(input)?)
}

pub fn read_library_yaml_str(input: &str) -> Result<CriterionLibrary, IoError> {
    Ok(serde_yaml::from_str(input)?)
}

/// Picks the parser from the file extension.
pub fn read_library(path: &Path) -> Result<CriterionLibrary, IoError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let content = std::fs::read_to_string(path)?;
    let library = match extension.as_str() {
        "json" => read_library_json_str(&content)?,
        "yaml" | "yml" => read_library_yaml_str(&content)?,
        _ => return Err(IoError::UnsupportedFormat(extension)),
    };
    debug!(
        library = library.id(),
        criteria = library.len(),
        "criterion library loaded"
    );
    Ok(library)
}

fn number_to_csv(value: Option<f64>) -> String {
    match value {
        Some(v) if !v.is_nan() => v.to_string(),
        _ => String::new(),
    }
}

fn outcome_row(outcome: &Outcome) -> Vec<String> {
    vec![
        outcome.scenario.model.clone(),
        outcome.scenario.scenario.clone(),
        outcome.criterion_id.clone(),
        outcome.kind.slug().to_owned(),
        outcome.severity.slug().to_owned(),
        outcome.status.slug().to_owned(),
        outcome.evaluated_points.to_string(),
        number_to_csv(outcome.measure),
        outcome.violations.len().to_string(),
        outcome.message.clone().unwrap_or_default(),
    ]
}

/// One row per outcome, in report order.
pub fn write_outcomes_csv_string(report: &Report) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record([
        "model",
        "scenario",
        "criterion_id",
        "kind",
        "severity",
        "status",
        "evaluated_points",
        "measure",
        "violations",
        "message",
    ])?;
    for outcome in report.outcomes() {
        writer.write_record(outcome_row(outcome))?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// One row per scenario. Determining criterion ids are `;`-joined.
pub fn write_verdicts_csv_string(report: &Report) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record([
        "model",
        "scenario",
        "status",
        "determining",
        "pass",
        "fail",
        "inconclusive",
        "error",
    ])?;
    for verdict in &report.verdicts {
        let count = |status: OutcomeStatus| {
            verdict
                .outcomes
                .iter()
                .filter(|outcome| outcome.status == status)
                .count()
                .to_string()
        };
        let determining = verdict
            .determining
            .iter()
            .map(|outcome| outcome.criterion_id.as_str())
            .collect::<Vec<_>>()
            .join(";");
        writer.write_record([
            verdict.scenario.model.clone(),
            verdict.scenario.scenario.clone(),
            verdict.status.slug().to_owned(),
            determining,
            count(OutcomeStatus::Pass),
            count(OutcomeStatus::Fail),
            count(OutcomeStatus::Inconclusive),
            count(OutcomeStatus::Error),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

pub fn write_report_json_string(report: &Report) -> Result<String, IoError> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn write_report_json(report: &Report, path: &Path) -> Result<(), IoError> {
    let mut payload = write_report_json_string(report)?;
    payload.push('\n');
    std::fs::write(path, payload)?;
    Ok(())
}

/// Reads back a report written by `write_report_json`. Infinite and NaN
/// measures come back as written.
pub fn read_report_json_str(input: &str) -> Result<Report, IoError> {
    Ok(serde_json::from_str(input)?)
}

pub fn read_report_json(path: &Path) -> Result<Report, IoError> {
    let content = std::fs::read_to_string(path)?;
    read_report_json_str(&content)
}

pub fn write_text(path: &Path, content: &str) -> Result<(), IoError> {
    std::fs::write(path, content)?;
    Ok(())
}
