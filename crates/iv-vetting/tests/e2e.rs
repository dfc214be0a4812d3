#![forbid(unsafe_code)]

//! End-to-end walkthroughs: IAMC data and criterion libraries in, reports
//! out, through the same entry points the `iv-vet` binary uses.

use iv_criteria::{
    Bounds, ChangeOverTime, Comparison, CrossVariableRatio, Direction, Monotonicity, RangeBound,
    RateOfChangeBound, ReferenceComparison, TargetBand, TargetRange, TimeAggregation,
};
use iv_vetting::{
    Criterion, CriterionKind, CriterionLibrary, EnsembleStatistics, OutcomeStatus,
    PercentileBand, PolicyName, ScenarioKey, ScenarioTable, SeriesKey, Severity, VariableSeries,
    VerdictStatus, VettingConfig, YearRange, run_vetting, run_vetting_files,
};

fn scenario() -> ScenarioKey {
    ScenarioKey::new("MESSAGEix-GLOBIOM", "SSP2-1.9")
}

fn co2() -> SeriesKey {
    SeriesKey::new("World", "Emissions|CO2")
}

fn declining_co2_table() -> ScenarioTable {
    let mut table = ScenarioTable::new();
    table
        .insert_series(
            scenario(),
            "World",
            "Emissions|CO2",
            VariableSeries::new("Gt CO2/yr", vec![(2020, 10.0), (2030, 5.0), (2040, 1.0)])
                .expect("series"),
        )
        .expect("insert");
    table
}

fn range_and_monotonicity() -> Vec<Criterion> {
    vec![
        Criterion::new(
            "co2-range",
            Severity::Fatal,
            CriterionKind::RangeBound(RangeBound {
                selector: co2(),
                years: YearRange::between(2020, 2040),
                bounds: Bounds::between(0.0, 20.0),
                unit: None,
            }),
        ),
        Criterion::new(
            "co2-declines",
            Severity::Warning,
            CriterionKind::Monotonicity(Monotonicity {
                selector: co2(),
                years: YearRange::all(),
                direction: Direction::NonIncreasing,
                tolerance: 0.0,
                unit: None,
            }),
        ),
    ]
}

fn rate_criterion(max_abs_rate: f64) -> Criterion {
    Criterion::new(
        "co2-rate",
        Severity::Fatal,
        CriterionKind::RateOfChangeBound(RateOfChangeBound {
            selector: co2(),
            years: YearRange::between(2020, 2030),
            max_abs_rate,
            unit: None,
        }),
    )
}

fn library(criteria: Vec<Criterion>) -> CriterionLibrary {
    CriterionLibrary::new("e2e", "1.0", criteria).expect("library")
}

// ---------------------------------------------------------------------------
// Scenario 1: well-behaved CO2 trajectory is accepted
// ---------------------------------------------------------------------------

#[test]
fn e2e_declining_co2_is_accepted() {
    let report = run_vetting(
        &declining_co2_table(),
        &library(range_and_monotonicity()),
        &VettingConfig::default(),
    )
    .expect("report");

    assert_eq!(report.verdicts.len(), 1);
    let verdict = &report.verdicts[0];
    assert_eq!(verdict.status, VerdictStatus::Accept);
    assert!(
        verdict
            .outcomes
            .iter()
            .all(|outcome| outcome.status == OutcomeStatus::Pass)
    );
    assert_eq!(verdict.determining.len(), 2);
}

// ---------------------------------------------------------------------------
// Scenario 2: a steep decline trips a fatal rate limit
// ---------------------------------------------------------------------------

#[test]
fn e2e_rate_limit_rejects_steep_decline() {
    let mut criteria = range_and_monotonicity();
    criteria.push(rate_criterion(0.2));
    let report = run_vetting(
        &declining_co2_table(),
        &library(criteria),
        &VettingConfig::default(),
    )
    .expect("report");

    let verdict = &report.verdicts[0];
    assert_eq!(verdict.status, VerdictStatus::Reject);
    assert_eq!(verdict.determining.len(), 1);
    let rate = &verdict.determining[0];
    assert_eq!(rate.criterion_id, "co2-rate");
    assert_eq!(rate.status, OutcomeStatus::Fail);
    assert_eq!(rate.violations.len(), 1);
    assert_eq!(rate.violations[0].value, -0.5);
}

#[test]
fn e2e_generous_rate_limit_passes() {
    let mut criteria = range_and_monotonicity();
    criteria.push(rate_criterion(3.0));
    let report = run_vetting(
        &declining_co2_table(),
        &library(criteria),
        &VettingConfig::default(),
    )
    .expect("report");
    assert_eq!(report.verdicts[0].status, VerdictStatus::Accept);
    assert_eq!(report.summary.passed, 3);
}

// ---------------------------------------------------------------------------
// Scenario 3: a missing variable is inconclusive and never blocks
// ---------------------------------------------------------------------------

#[test]
fn e2e_missing_variable_is_inconclusive() {
    let mut criteria = range_and_monotonicity();
    criteria.push(Criterion::new(
        "ch4-range",
        Severity::Fatal,
        CriterionKind::RangeBound(RangeBound {
            selector: SeriesKey::new("World", "Emissions|CH4"),
            years: YearRange::all(),
            bounds: Bounds::between(0.0, 500.0),
            unit: None,
        }),
    ));
    let report = run_vetting(
        &declining_co2_table(),
        &library(criteria),
        &VettingConfig::default(),
    )
    .expect("report");

    let verdict = &report.verdicts[0];
    assert_eq!(verdict.status, VerdictStatus::Accept);
    let ch4 = verdict
        .outcomes
        .iter()
        .find(|outcome| outcome.criterion_id == "ch4-range")
        .expect("ch4 outcome");
    assert_eq!(ch4.status, OutcomeStatus::Inconclusive);
    assert_eq!(ch4.evaluated_points, 0);
    assert_eq!(report.summary.inconclusive, 1);

    let strict = run_vetting(
        &declining_co2_table(),
        &library(vec![range_and_monotonicity().remove(0)]),
        &VettingConfig::default().with_policy(PolicyName::StrictAllPass),
    )
    .expect("strict");
    assert_eq!(strict.verdicts[0].status, VerdictStatus::Accept);
}

// ---------------------------------------------------------------------------
// Scenario 4: full criterion mix across several scenarios and policies
// ---------------------------------------------------------------------------

fn ensemble_table() -> ScenarioTable {
    let mut table = ScenarioTable::new();
    let rows: [(&str, [f64; 3], [f64; 3]); 3] = [
        ("Low", [38.0, 20.0, 5.0], [500.0, 480.0, 470.0]),
        ("Mid", [40.0, 35.0, 28.0], [560.0, 400.0, 640.0]),
        ("High", [41.0, 48.0, 60.0], [580.0, 700.0, 820.0]),
    ];
    for (name, co2_values, energy_values) in rows {
        let key = ScenarioKey::new("REMIND", name);
        let years = [2020, 2030, 2050];
        table
            .insert_series(
                key.clone(),
                "World",
                "Emissions|CO2",
                VariableSeries::new(
                    "Gt CO2/yr",
                    years.into_iter().zip(co2_values).collect(),
                )
                .expect("co2"),
            )
            .expect("insert co2");
        table
            .insert_series(
                key,
                "World",
                "Primary Energy",
                VariableSeries::new("EJ/yr", years.into_iter().zip(energy_values).collect())
                    .expect("energy"),
            )
            .expect("insert energy");
    }
    table
}

fn mixed_library() -> CriterionLibrary {
    let energy = SeriesKey::new("World", "Primary Energy");
    library(vec![
        Criterion::new(
            "co2-2020-target",
            Severity::Fatal,
            CriterionKind::TargetRange(TargetRange {
                selector: co2(),
                year: 2020,
                target: 40.0,
                band: TargetBand::Relative {
                    lower_factor: 0.9,
                    upper_factor: 1.1,
                },
                unit: None,
            }),
        ),
        Criterion::new(
            "co2-2050-change",
            Severity::Warning,
            CriterionKind::ChangeOverTime(ChangeOverTime {
                selector: co2(),
                reference_year: 2020,
                year: 2050,
                bounds: Bounds::at_most(0.0),
                unit: None,
            }),
        ),
        Criterion::new(
            "carbon-intensity",
            Severity::Informational,
            CriterionKind::CrossVariableRatio(CrossVariableRatio {
                numerator: co2(),
                denominator: energy,
                years: YearRange::all(),
                bounds: Bounds::at_most(0.08),
                numerator_unit: None,
                denominator_unit: None,
            }),
        ),
    ])
}

#[test]
fn e2e_mixed_criteria_under_each_policy() {
    let table = ensemble_table();
    let library = mixed_library();

    let default = run_vetting(&table, &library, &VettingConfig::default()).expect("default");
    let statuses = |report: &iv_vetting::Report| {
        report
            .verdicts
            .iter()
            .map(|verdict| (verdict.scenario.scenario.clone(), verdict.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        statuses(&default),
        vec![
            ("High".to_owned(), VerdictStatus::Review),
            ("Low".to_owned(), VerdictStatus::Accept),
            ("Mid".to_owned(), VerdictStatus::Accept),
        ]
    );

    let strict = run_vetting(
        &table,
        &library,
        &VettingConfig::default().with_policy(PolicyName::StrictAllPass),
    )
    .expect("strict");
    assert_eq!(
        statuses(&strict),
        vec![
            ("High".to_owned(), VerdictStatus::Reject),
            ("Low".to_owned(), VerdictStatus::Accept),
            ("Mid".to_owned(), VerdictStatus::Reject),
        ]
    );

    let weighted = run_vetting(
        &table,
        &library,
        &VettingConfig::default().with_policy(PolicyName::WeightedSeverity),
    )
    .expect("weighted");
    assert_eq!(
        statuses(&weighted),
        vec![
            ("High".to_owned(), VerdictStatus::Review),
            ("Low".to_owned(), VerdictStatus::Accept),
            ("Mid".to_owned(), VerdictStatus::Accept),
        ]
    );
}

// ---------------------------------------------------------------------------
// Scenario 5: criteria derived from a reference ensemble
// ---------------------------------------------------------------------------

#[test]
fn e2e_percentile_band_library_flags_outlier() {
    let reference = ensemble_table();
    let stats = EnsembleStatistics::from_reference(&reference, &[0.0, 1.0]).expect("stats");
    let band = PercentileBand {
        id: "energy-envelope".to_owned(),
        selector: SeriesKey::new("World", "Primary Energy"),
        years: YearRange::all(),
        low: 0.0,
        high: 1.0,
        severity: Severity::Warning,
    };
    let library = CriterionLibrary::from_percentile_bands("derived", "1", &stats, &[band])
        .expect("library");
    assert_eq!(library.len(), 3);

    let mut candidates = ScenarioTable::new();
    candidates
        .insert_series(
            ScenarioKey::new("IMAGE", "Outlier"),
            "World",
            "Primary Energy",
            VariableSeries::new("EJ/yr", vec![(2020, 520.0), (2030, 900.0), (2050, 700.0)])
                .expect("series"),
        )
        .expect("insert");

    let report = run_vetting(&candidates, &library, &VettingConfig::default()).expect("report");
    let verdict = &report.verdicts[0];
    assert_eq!(verdict.status, VerdictStatus::Review);
    let determining = verdict
        .determining
        .iter()
        .map(|outcome| outcome.criterion_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(determining, vec!["energy-envelope@2030"]);
}

// ---------------------------------------------------------------------------
// Scenario 6: determinism across runs and execution modes
// ---------------------------------------------------------------------------

#[test]
fn e2e_runs_are_idempotent_and_mode_independent() {
    let table = ensemble_table();
    let library = mixed_library();

    let first = run_vetting(&table, &library, &VettingConfig::default()).expect("first");
    let second = run_vetting(&table, &library, &VettingConfig::default()).expect("second");
    let serial = run_vetting(&table, &library, &VettingConfig::default().serial()).expect("serial");

    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(first.content_hash, serial.content_hash);
    assert_eq!(
        serde_json::to_string(&first).expect("json"),
        serde_json::to_string(&serial).expect("json")
    );
}

// ---------------------------------------------------------------------------
// Scenario 7: file-based run with IAMC csv and YAML criteria
// ---------------------------------------------------------------------------

#[test]
fn e2e_files_on_disk_round_trip_to_csv_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let table_path = dir.path().join("scenarios.csv");
    let criteria_path = dir.path().join("criteria.yaml");
    std::fs::write(
        &table_path,
        "model,scenario,region,variable,unit,2020,2030,2040\n\
         MESSAGEix-GLOBIOM,SSP2-1.9,World,Emissions|CO2,Gt CO2/yr,10,5,1\n\
         GCAM,SSP5-8.5,World,Emissions|CO2,Gt CO2/yr,40,55,70\n",
    )
    .expect("write table");
    std::fs::write(
        &criteria_path,
        "id: yaml-lib\n\
         version: '3'\n\
         criteria:\n\
         \x20 - id: co2-range\n\
         \x20   severity: fatal\n\
         \x20   rule:\n\
         \x20     kind: range_bound\n\
         \x20     selector: {region: World, variable: Emissions|CO2}\n\
         \x20     bounds: {lower: 0.0, upper: 50.0}\n",
    )
    .expect("write criteria");

    let report =
        run_vetting_files(&table_path, &criteria_path, &VettingConfig::default()).expect("report");
    assert_eq!(report.library.id, "yaml-lib");
    assert_eq!(report.summary.accepted, 1);
    assert_eq!(report.summary.rejected, 1);

    let verdicts = iv_io::write_verdicts_csv_string(&report).expect("verdicts csv");
    assert!(verdicts.contains("GCAM,SSP5-8.5,reject,co2-range,0,1,0,0"));
    assert!(verdicts.contains("MESSAGEix-GLOBIOM,SSP2-1.9,accept,co2-range,1,0,0,0"));
}

// ---------------------------------------------------------------------------
// Scenario 8: harmonization against a reference trajectory
// ---------------------------------------------------------------------------

#[test]
fn e2e_reference_comparison_flags_unharmonized_base_year() {
    let reference =
        VariableSeries::new("Gt CO2/yr", vec![(2015, 36.0), (2020, 40.0)]).expect("reference");
    let library = library(vec![Criterion::new(
        "co2-harmonized",
        Severity::Fatal,
        CriterionKind::ReferenceComparison(ReferenceComparison {
            selector: co2(),
            years: YearRange::all(),
            reference,
            comparison: Comparison::Ratio,
            aggregation: TimeAggregation::MaxAbs,
            bounds: Bounds::between(0.96, 1.04),
        }),
    )]);

    let report = run_vetting(&ensemble_table(), &library, &VettingConfig::default())
        .expect("report");
    let low = report
        .verdict(&ScenarioKey::new("REMIND", "Low"))
        .expect("low");
    assert_eq!(low.status, VerdictStatus::Reject);
    assert_eq!(low.determining[0].evaluated_points, 1);
    assert_eq!(low.determining[0].measure, Some(0.95));
    assert_eq!(low.determining[0].violations[0].year, 2020);

    for name in ["Mid", "High"] {
        let verdict = report
            .verdict(&ScenarioKey::new("REMIND", name))
            .expect("verdict");
        assert_eq!(verdict.status, VerdictStatus::Accept, "{name}");
    }
}

// ---------------------------------------------------------------------------
// Scenario 9: units are enforced, not silently compared
// ---------------------------------------------------------------------------

#[test]
fn e2e_derived_library_refuses_series_in_other_units() {
    let stats = EnsembleStatistics::from_reference(&ensemble_table(), &[0.0, 1.0]).expect("stats");
    let band = PercentileBand {
        id: "energy-envelope".to_owned(),
        selector: SeriesKey::new("World", "Primary Energy"),
        years: YearRange::single(2020),
        low: 0.0,
        high: 1.0,
        severity: Severity::Warning,
    };
    let library = CriterionLibrary::from_percentile_bands("derived", "1", &stats, &[band])
        .expect("library");

    let mut candidates = ScenarioTable::new();
    candidates
        .insert_series(
            ScenarioKey::new("IMAGE", "Petajoules"),
            "World",
            "Primary Energy",
            VariableSeries::new("PJ/yr", vec![(2020, 540.0)]).expect("series"),
        )
        .expect("insert");

    let report = run_vetting(&candidates, &library, &VettingConfig::default()).expect("report");
    let verdict = &report.verdicts[0];
    assert_eq!(verdict.status, VerdictStatus::Review);
    assert_eq!(verdict.outcomes[0].status, OutcomeStatus::Error);
    assert!(
        verdict.outcomes[0]
            .message
            .as_deref()
            .is_some_and(|message| message.contains("PJ/yr"))
    );
    assert_eq!(report.summary.errors, 1);
}

// ---------------------------------------------------------------------------
// Scenario 10: reports with infinite ratios persist and reload intact
// ---------------------------------------------------------------------------

#[test]
fn e2e_report_with_infinite_ratio_reloads_from_disk() {
    let mut table = ScenarioTable::new();
    for (variable, values) in [("A", [0.0, 1.0]), ("B", [0.0, 0.0])] {
        table
            .insert_series(
                scenario(),
                "World",
                variable,
                VariableSeries::new("EJ/yr", vec![(2020, values[0]), (2030, values[1])])
                    .expect("series"),
            )
            .expect("insert");
    }
    let library = library(vec![Criterion::new(
        "a-over-b",
        Severity::Fatal,
        CriterionKind::CrossVariableRatio(CrossVariableRatio {
            numerator: SeriesKey::new("World", "A"),
            denominator: SeriesKey::new("World", "B"),
            years: YearRange::all(),
            bounds: Bounds::between(0.5, 2.0),
            numerator_unit: None,
            denominator_unit: None,
        }),
    )]);

    let report = run_vetting(&table, &library, &VettingConfig::default()).expect("report");
    assert_eq!(report.verdicts[0].status, VerdictStatus::Reject);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("report.json");
    iv_io::write_report_json(&report, &path).expect("write");
    let reloaded = iv_io::read_report_json(&path).expect("reload");
    assert_eq!(reloaded, report);
    assert_eq!(
        reloaded.verdicts[0].determining[0].violations[0].value,
        f64::INFINITY
    );
}
