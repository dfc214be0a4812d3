#![forbid(unsafe_code)]

//! Scenario vetting pipeline: table and criterion library in, report out.
//!
//! `run_vetting` wires the evaluator, the aggregator and report assembly
//! into a single pass. Loaders and writers live in `iv-io`; the `iv-vet`
//! binary puts both behind a command line.

use std::collections::BTreeSet;
use std::path::Path;

use iv_criteria::LibraryError;
use iv_eval::{EvalError, Evaluator, EvaluatorOptions};
use iv_io::IoError;
use iv_runtime::{Aggregator, RuntimeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use iv_criteria::{
    Criterion, CriterionKind, CriterionLibrary, EnsembleStatistics, LibraryIdentity, Outcome,
    PercentileBand,
};
pub use iv_runtime::{
    AggregationPolicy, PolicyName, Report, ReportSummary, SeverityWeights, Verdict,
    WeightedSeverity,
};
pub use iv_table::{ScenarioTable, VariableSeries};
pub use iv_types::{OutcomeStatus, ScenarioKey, SeriesKey, Severity, VerdictStatus, YearRange};

#[derive(Debug, Error)]
pub enum VettingError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VettingConfig {
    #[serde(default)]
    pub policy: PolicyName,
    /// Parameters for `weighted-severity`; ignored by the other policies.
    #[serde(default)]
    pub weighted: WeightedSeverity,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default)]
    pub scenario_filter: Option<BTreeSet<ScenarioKey>>,
}

fn default_parallel() -> bool {
    true
}

impl Default for VettingConfig {
    fn default() -> Self {
        Self {
            policy: PolicyName::default(),
            weighted: WeightedSeverity::default(),
            parallel: default_parallel(),
            scenario_filter: None,
        }
    }
}

impl VettingConfig {
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyName) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn serial(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Rejects weighted-severity parameters that would make the policy
    /// degenerate (NaN or negative thresholds, review above reject).
    pub fn validate(&self) -> Result<(), RuntimeError> {
        self.weighted.validate()
    }

    fn evaluator_options(&self) -> EvaluatorOptions {
        EvaluatorOptions {
            parallel: self.parallel,
            scenario_filter: self.scenario_filter.clone(),
        }
    }
}

/// Evaluates every selected scenario against the library, aggregates one
/// verdict per scenario, and assembles the report. Scenarios are reported
/// even when the library is empty.
pub fn run_vetting(
    table: &ScenarioTable,
    library: &CriterionLibrary,
    config: &VettingConfig,
) -> Result<Report, VettingError> {
    config.validate()?;
    let evaluator = Evaluator::new(config.evaluator_options());
    let outcomes = evaluator.run(table, library)?;
    let scenarios = evaluator.selected_scenarios(table);

    let aggregator = Aggregator::from_name(config.policy, &config.weighted);
    let per_scenario = library.len();
    let verdicts = scenarios
        .iter()
        .enumerate()
        .map(|(position, key)| {
            let start = position * per_scenario;
            let own = outcomes
                .get(start..start + per_scenario)
                .unwrap_or_default();
            aggregator.aggregate(key, own)
        })
        .collect::<Vec<_>>();
    debug!(verdicts = verdicts.len(), "aggregation finished");

    let report = Report::build(verdicts, library.identity()?, config.policy)?;
    info!(
        library = library.id(),
        policy = %config.policy,
        scenarios = report.summary.scenarios,
        accepted = report.summary.accepted,
        review = report.summary.review,
        rejected = report.summary.rejected,
        "vetting finished"
    );
    Ok(report)
}

/// Loads an IAMC CSV table and a JSON/YAML library from disk, then vets.
pub fn run_vetting_files(
    table_path: &Path,
    library_path: &Path,
    config: &VettingConfig,
) -> Result<Report, VettingError> {
    let table = iv_io::read_iamc_csv(table_path)?;
    let library = iv_io::read_library(library_path)?;
    run_vetting(&table, &library, config)
}

#[cfg(test)]
mod tests {
    use iv_criteria::{Bounds, Criterion, CriterionKind, CriterionLibrary, RangeBound};
    use iv_table::{ScenarioTable, VariableSeries};
    use iv_types::{ScenarioKey, SeriesKey, Severity, VerdictStatus, YearRange};

    use iv_runtime::{RuntimeError, WeightedSeverity};

    use super::{PolicyName, VettingConfig, VettingError, run_vetting};

    fn table() -> ScenarioTable {
        let mut table = ScenarioTable::new();
        for (scenario, peak) in [("SSP1", 12.0), ("SSP5", 40.0)] {
            table
                .insert_series(
                    ScenarioKey::new("WITCH", scenario),
                    "World",
                    "Emissions|CO2",
                    VariableSeries::new("Gt CO2/yr", vec![(2020, 10.0), (2050, peak)])
                        .expect("series"),
                )
                .expect("insert");
        }
        table.insert_scenario(ScenarioKey::new("WITCH", "Empty"));
        table
    }

    fn library(severity: Severity) -> CriterionLibrary {
        CriterionLibrary::new(
            "caps",
            "1",
            vec![Criterion::new(
                "co2-cap",
                severity,
                CriterionKind::RangeBound(RangeBound {
                    selector: SeriesKey::new("World", "Emissions|CO2"),
                    years: YearRange::all(),
                    bounds: Bounds::at_most(30.0),
                    unit: None,
                }),
            )],
        )
        .expect("library")
    }

    #[test]
    fn config_defaults_to_parallel_any_fatal_reject() {
        let config = VettingConfig::default();
        assert_eq!(config.policy, PolicyName::AnyFatalReject);
        assert!(config.parallel);
        assert!(config.scenario_filter.is_none());

        let parsed: VettingConfig = serde_json::from_str("{}").expect("config");
        assert_eq!(parsed, config);
    }

    #[test]
    fn verdicts_cover_every_selected_scenario() {
        let report = run_vetting(&table(), &library(Severity::Fatal), &VettingConfig::default())
            .expect("report");
        let statuses = report
            .verdicts
            .iter()
            .map(|verdict| (verdict.scenario.scenario.as_str(), verdict.status))
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![
                ("Empty", VerdictStatus::Accept),
                ("SSP1", VerdictStatus::Accept),
                ("SSP5", VerdictStatus::Reject),
            ]
        );
        assert_eq!(report.summary.inconclusive, 1);
    }

    #[test]
    fn empty_library_accepts_every_scenario() {
        let library = CriterionLibrary::new("none", "0", Vec::new()).expect("library");
        let report = run_vetting(&table(), &library, &VettingConfig::default()).expect("report");
        assert_eq!(report.summary.scenarios, 3);
        assert_eq!(report.summary.accepted, 3);
        assert_eq!(report.summary.outcomes, 0);
    }

    #[test]
    fn policy_choice_changes_the_verdict_mapping() {
        let default = run_vetting(
            &table(),
            &library(Severity::Warning),
            &VettingConfig::default().serial(),
        )
        .expect("default");
        let strict = run_vetting(
            &table(),
            &library(Severity::Warning),
            &VettingConfig::default().with_policy(PolicyName::StrictAllPass),
        )
        .expect("strict");

        let ssp5 = ScenarioKey::new("WITCH", "SSP5");
        assert_eq!(
            default.verdict(&ssp5).map(|verdict| verdict.status),
            Some(VerdictStatus::Review)
        );
        assert_eq!(
            strict.verdict(&ssp5).map(|verdict| verdict.status),
            Some(VerdictStatus::Reject)
        );
        assert_ne!(default.content_hash, strict.content_hash);
    }

    #[test]
    fn scenario_filter_limits_the_report() {
        let config = VettingConfig {
            scenario_filter: Some([ScenarioKey::new("WITCH", "SSP1")].into_iter().collect()),
            ..VettingConfig::default()
        };
        let report = run_vetting(&table(), &library(Severity::Fatal), &config).expect("report");
        assert_eq!(report.verdicts.len(), 1);
        assert_eq!(report.verdicts[0].scenario, ScenarioKey::new("WITCH", "SSP1"));
    }

    #[test]
    fn degenerate_weighted_thresholds_are_rejected() {
        let config = VettingConfig {
            weighted: WeightedSeverity {
                review_threshold: -1.0,
                ..WeightedSeverity::default()
            },
            ..VettingConfig::default().with_policy(PolicyName::WeightedSeverity)
        };
        let err = run_vetting(&table(), &library(Severity::Fatal), &config).expect_err("invalid");
        assert!(matches!(
            err,
            VettingError::Runtime(RuntimeError::InvalidParameter {
                name: "review threshold",
                ..
            })
        ));

        let err = serde_json::from_str::<VettingConfig>(
            r#"{"policy": "weighted-severity",
                "weighted": {"review_threshold": 2.0, "reject_threshold": 1.0}}"#,
        )
        .expect_err("inverted thresholds");
        assert!(err.to_string().contains("exceeds reject threshold"));
    }
}
