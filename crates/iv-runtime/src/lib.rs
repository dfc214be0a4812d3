#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use iv_criteria::{LibraryIdentity, Outcome};
use iv_types::{OutcomeStatus, ScenarioKey, Severity, VerdictStatus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("unknown aggregation policy {0:?}; expected any-fatal-reject, strict-all-pass or weighted-severity")]
    UnknownPolicy(String),
    #[error("{name} must be a non-negative finite number; found {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("review threshold {review} exceeds reject threshold {reject}")]
    InvertedThresholds { review: f64, reject: f64 },
    #[error("cannot serialize report content: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyName {
    #[default]
    AnyFatalReject,
    StrictAllPass,
    WeightedSeverity,
}

impl PolicyName {
    pub const ALL: [Self; 3] = [
        Self::AnyFatalReject,
        Self::StrictAllPass,
        Self::WeightedSeverity,
    ];

    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::AnyFatalReject => "any-fatal-reject",
            Self::StrictAllPass => "strict-all-pass",
            Self::WeightedSeverity => "weighted-severity",
        }
    }

    /// Instantiates the policy. `weighted` only parameterizes
    /// `weighted-severity`.
    #[must_use]
    pub fn policy(self, weighted: &WeightedSeverity) -> Box<dyn AggregationPolicy> {
        match self {
            Self::AnyFatalReject => Box::new(AnyFatalReject),
            Self::StrictAllPass => Box::new(StrictAllPass),
            Self::WeightedSeverity => Box::new(weighted.clone()),
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for PolicyName {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|name| name.slug() == normalized)
            .ok_or_else(|| RuntimeError::UnknownPolicy(s.to_owned()))
    }
}

/// Maps one scenario's outcomes to a verdict and the outcomes that
/// determined it.
pub trait AggregationPolicy: Send + Sync {
    fn name(&self) -> PolicyName;

    fn combine(&self, outcomes: &[Outcome]) -> (VerdictStatus, Vec<Outcome>);
}

fn select(outcomes: &[Outcome], keep: impl Fn(&Outcome) -> bool) -> Vec<Outcome> {
    outcomes
        .iter()
        .filter(|outcome| keep(*outcome))
        .cloned()
        .collect()
}

/// Fatal fails reject; warning fails, and errors on criteria that matter,
/// send the scenario to review. Inconclusive and informational outcomes
/// never move the verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnyFatalReject;

impl AggregationPolicy for AnyFatalReject {
    fn name(&self) -> PolicyName {
        PolicyName::AnyFatalReject
    }

    fn combine(&self, outcomes: &[Outcome]) -> (VerdictStatus, Vec<Outcome>) {
        let fatal_fails = select(outcomes, |o| o.is_fail() && o.severity == Severity::Fatal);
        if !fatal_fails.is_empty() {
            return (VerdictStatus::Reject, fatal_fails);
        }

        let warning_fails = select(outcomes, |o| o.is_fail() && o.severity == Severity::Warning);
        if !warning_fails.is_empty() {
            return (VerdictStatus::Review, warning_fails);
        }

        let errors = select(outcomes, |o| {
            o.status == OutcomeStatus::Error && o.severity != Severity::Informational
        });
        if !errors.is_empty() {
            return (VerdictStatus::Review, errors);
        }

        (
            VerdictStatus::Accept,
            select(outcomes, |o| o.status == OutcomeStatus::Pass),
        )
    }
}

/// Every fail or error of any severity rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrictAllPass;

impl AggregationPolicy for StrictAllPass {
    fn name(&self) -> PolicyName {
        PolicyName::StrictAllPass
    }

    fn combine(&self, outcomes: &[Outcome]) -> (VerdictStatus, Vec<Outcome>) {
        let offending = select(outcomes, |o| {
            matches!(o.status, OutcomeStatus::Fail | OutcomeStatus::Error)
        });
        if offending.is_empty() {
            (
                VerdictStatus::Accept,
                select(outcomes, |o| o.status == OutcomeStatus::Pass),
            )
        } else {
            (VerdictStatus::Reject, offending)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub fatal: f64,
    pub warning: f64,
    pub informational: f64,
}

impl SeverityWeights {
    #[must_use]
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Fatal => self.fatal,
            Severity::Warning => self.warning,
            Severity::Informational => self.informational,
        }
    }
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            fatal: 1.0,
            warning: 0.25,
            informational: 0.0,
        }
    }
}

/// Sums the weights of failed outcomes and compares the score against two
/// thresholds. Reject is checked first. Deserialized parameters are
/// validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WeightedParameters")]
pub struct WeightedSeverity {
    #[serde(default)]
    pub weights: SeverityWeights,
    pub review_threshold: f64,
    pub reject_threshold: f64,
}

#[derive(Deserialize)]
struct WeightedParameters {
    #[serde(default)]
    weights: SeverityWeights,
    review_threshold: f64,
    reject_threshold: f64,
}

impl TryFrom<WeightedParameters> for WeightedSeverity {
    type Error = RuntimeError;

    fn try_from(parameters: WeightedParameters) -> Result<Self, Self::Error> {
        Self::new(
            parameters.weights,
            parameters.review_threshold,
            parameters.reject_threshold,
        )
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), RuntimeError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(RuntimeError::InvalidParameter { name, value })
    }
}

impl WeightedSeverity {
    pub fn new(
        weights: SeverityWeights,
        review_threshold: f64,
        reject_threshold: f64,
    ) -> Result<Self, RuntimeError> {
        let policy = Self {
            weights,
            review_threshold,
            reject_threshold,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Weights and thresholds must be finite and non-negative, and review
    /// must not lie above reject.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        non_negative("fatal weight", self.weights.fatal)?;
        non_negative("warning weight", self.weights.warning)?;
        non_negative("informational weight", self.weights.informational)?;
        non_negative("review threshold", self.review_threshold)?;
        non_negative("reject threshold", self.reject_threshold)?;
        if self.review_threshold > self.reject_threshold {
            return Err(RuntimeError::InvertedThresholds {
                review: self.review_threshold,
                reject: self.reject_threshold,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn score(&self, outcomes: &[Outcome]) -> f64 {
        outcomes
            .iter()
            .filter(|outcome| outcome.is_fail())
            .map(|outcome| self.weights.weight(outcome.severity))
            .sum()
    }
}

impl Default for WeightedSeverity {
    fn default() -> Self {
        Self {
            weights: SeverityWeights::default(),
            review_threshold: 0.25,
            reject_threshold: 1.0,
        }
    }
}

impl AggregationPolicy for WeightedSeverity {
    fn name(&self) -> PolicyName {
        PolicyName::WeightedSeverity
    }

    fn combine(&self, outcomes: &[Outcome]) -> (VerdictStatus, Vec<Outcome>) {
        let score = self.score(outcomes);
        let weighted = select(outcomes, |o| {
            o.is_fail() && self.weights.weight(o.severity) > 0.0
        });
        if score >= self.reject_threshold {
            (VerdictStatus::Reject, weighted)
        } else if score >= self.review_threshold {
            (VerdictStatus::Review, weighted)
        } else {
            (
                VerdictStatus::Accept,
                select(outcomes, |o| o.status == OutcomeStatus::Pass),
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub scenario: ScenarioKey,
    pub status: VerdictStatus,
    /// Outcomes that decided `status`.
    pub determining: Vec<Outcome>,
    pub outcomes: Vec<Outcome>,
}

pub struct Aggregator {
    policy: Box<dyn AggregationPolicy>,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(Box::new(AnyFatalReject))
    }
}

impl Aggregator {
    #[must_use]
    pub fn new(policy: Box<dyn AggregationPolicy>) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn from_name(name: PolicyName, weighted: &WeightedSeverity) -> Self {
        Self::new(name.policy(weighted))
    }

    #[must_use]
    pub fn policy_name(&self) -> PolicyName {
        self.policy.name()
    }

    /// Outcomes belonging to other scenarios are ignored.
    #[must_use]
    pub fn aggregate(&self, scenario: &ScenarioKey, outcomes: &[Outcome]) -> Verdict {
        let own = select(outcomes, |o| &o.scenario == scenario);
        let (status, determining) = self.policy.combine(&own);
        debug!(
            scenario = %scenario,
            policy = %self.policy.name(),
            status = %status,
            determining = determining.len(),
            "scenario aggregated"
        );
        Verdict {
            scenario: scenario.clone(),
            status,
            determining,
            outcomes: own,
        }
    }

    /// Groups an outcome stream by scenario. Verdicts come out in scenario
    /// order; outcomes keep their relative order inside each group.
    #[must_use]
    pub fn aggregate_all(&self, outcomes: &[Outcome]) -> Vec<Verdict> {
        let mut groups: BTreeMap<&ScenarioKey, Vec<Outcome>> = BTreeMap::new();
        for outcome in outcomes {
            groups
                .entry(&outcome.scenario)
                .or_default()
                .push(outcome.clone());
        }
        groups
            .into_iter()
            .map(|(scenario, own)| self.aggregate(scenario, &own))
            .collect()
    }
}

// ── Report ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub scenarios: usize,
    pub accepted: usize,
    pub review: usize,
    pub rejected: usize,
    pub outcomes: usize,
    pub passed: usize,
    pub failed: usize,
    pub inconclusive: usize,
    pub errors: usize,
}

impl ReportSummary {
    #[must_use]
    pub fn from_verdicts(verdicts: &[Verdict]) -> Self {
        let mut summary = Self::default();
        for verdict in verdicts {
            summary.scenarios += 1;
            match verdict.status {
                VerdictStatus::Accept => summary.accepted += 1,
                VerdictStatus::Review => summary.review += 1,
                VerdictStatus::Reject => summary.rejected += 1,
            }
            for outcome in &verdict.outcomes {
                summary.outcomes += 1;
                match outcome.status {
                    OutcomeStatus::Pass => summary.passed += 1,
                    OutcomeStatus::Fail => summary.failed += 1,
                    OutcomeStatus::Inconclusive => summary.inconclusive += 1,
                    OutcomeStatus::Error => summary.errors += 1,
                }
            }
        }
        summary
    }

    #[must_use]
    pub fn all_accepted(&self) -> bool {
        self.accepted == self.scenarios
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub library: LibraryIdentity,
    pub policy: PolicyName,
    pub summary: ReportSummary,
    pub verdicts: Vec<Verdict>,
    /// `sha256:` digest over library identity, policy and verdicts.
    pub content_hash: String,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    library: &'a LibraryIdentity,
    policy: PolicyName,
    verdicts: &'a [Verdict],
}

impl Report {
    pub fn build(
        verdicts: Vec<Verdict>,
        library: LibraryIdentity,
        policy: PolicyName,
    ) -> Result<Self, RuntimeError> {
        let payload = serde_json::to_vec(&HashedContent {
            library: &library,
            policy,
            verdicts: &verdicts,
        })
        .map_err(|err| RuntimeError::Serialization(err.to_string()))?;
        let content_hash = format!("sha256:{:x}", Sha256::digest(&payload));
        Ok(Self {
            summary: ReportSummary::from_verdicts(&verdicts),
            library,
            policy,
            verdicts,
            content_hash,
        })
    }

    #[must_use]
    pub fn verdict(&self, scenario: &ScenarioKey) -> Option<&Verdict> {
        self.verdicts
            .iter()
            .find(|verdict| &verdict.scenario == scenario)
    }

    /// Every outcome of every verdict, in report order.
    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome> + '_ {
        self.verdicts.iter().flat_map(|verdict| verdict.outcomes.iter())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "library {} {} ({} criteria), policy {}",
            self.library.id, self.library.version, self.library.criteria_count, self.policy
        )?;
        for verdict in &self.verdicts {
            writeln!(f, "  {:<7} {}", verdict.status.slug(), verdict.scenario)?;
            if verdict.status != VerdictStatus::Accept {
                for outcome in &verdict.determining {
                    writeln!(
                        f,
                        "          {} [{}] {}: {}",
                        outcome.criterion_id,
                        outcome.severity,
                        outcome.status,
                        outcome.message.as_deref().unwrap_or("-")
                    )?;
                }
            }
        }
        let s = &self.summary;
        writeln!(
            f,
            "scenarios={} accept={} review={} reject={} | outcomes={} pass={} fail={} inconclusive={} error={}",
            s.scenarios,
            s.accepted,
            s.review,
            s.rejected,
            s.outcomes,
            s.passed,
            s.failed,
            s.inconclusive,
            s.errors
        )?;
        write!(f, "content_hash={}", self.content_hash)
    }
}
