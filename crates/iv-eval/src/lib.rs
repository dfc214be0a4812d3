#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use iv_criteria::{CriterionLibrary, Outcome};
use iv_table::{ScenarioTable, TableError};
use iv_types::{OutcomeStatus, ScenarioKey};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("scenario table is inconsistent: {0}")]
    InconsistentTable(#[from] TableError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorOptions {
    /// Spread the (scenario, criterion) product over the rayon pool.
    pub parallel: bool,
    /// Restrict the run to these scenarios. `None` evaluates all of them.
    #[serde(default)]
    pub scenario_filter: Option<BTreeSet<ScenarioKey>>,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            scenario_filter: None,
        }
    }
}

impl EvaluatorOptions {
    #[must_use]
    pub fn serial() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    options: EvaluatorOptions,
}

impl Evaluator {
    #[must_use]
    pub fn new(options: EvaluatorOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    /// Scenarios the run covers, in canonical (model, scenario) order.
    #[must_use]
    pub fn selected_scenarios(&self, table: &ScenarioTable) -> Vec<ScenarioKey> {
        let keys = table.scenario_keys();
        if let Some(filter) = &self.options.scenario_filter {
            for missing in filter.difference(&keys) {
                warn!(scenario = %missing, "filtered scenario is not in the table");
            }
        }
        keys.into_iter()
            .filter(|key| {
                self.options
                    .scenario_filter
                    .as_ref()
                    .is_none_or(|filter| filter.contains(key))
            })
            .collect()
    }

    /// One outcome per (scenario, criterion), scenarios sorted and criteria
    /// in library order. Per-pair problems become `error` outcomes; only an
    /// inconsistent table aborts the run.
    #[instrument(skip_all, name = "evaluate", fields(library = %library.id(), parallel = self.options.parallel))]
    pub fn run(
        &self,
        table: &ScenarioTable,
        library: &CriterionLibrary,
    ) -> Result<Vec<Outcome>, EvalError> {
        table.validate()?;

        let scenarios = self.selected_scenarios(table);
        let criteria = library.criteria();
        debug!(
            scenarios = scenarios.len(),
            criteria = criteria.len(),
            "evaluation started"
        );

        let outcomes = if self.options.parallel {
            let pairs = (0..scenarios.len())
                .flat_map(|s| (0..criteria.len()).map(move |c| (s, c)))
                .collect::<Vec<_>>();
            let mut evaluated = pairs
                .par_iter()
                .map(|&(s, c)| ((s, c), criteria[c].evaluate(&scenarios[s], table)))
                .collect::<Vec<_>>();
            evaluated.sort_by_key(|(position, _)| *position);
            evaluated
                .into_iter()
                .map(|(_, outcome)| outcome)
                .collect::<Vec<_>>()
        } else {
            scenarios
                .iter()
                .flat_map(|key| criteria.iter().map(move |criterion| (key, criterion)))
                .map(|(key, criterion)| criterion.evaluate(key, table))
                .collect::<Vec<_>>()
        };

        for outcome in outcomes
            .iter()
            .filter(|outcome| outcome.status == OutcomeStatus::Error)
        {
            warn!(
                criterion = %outcome.criterion_id,
                scenario = %outcome.scenario,
                detail = outcome.message.as_deref().unwrap_or(""),
                "criterion could not be applied"
            );
        }
        debug!(outcomes = outcomes.len(), "evaluation finished");
        Ok(outcomes)
    }
}
