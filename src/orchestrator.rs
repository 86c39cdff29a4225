use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::adapter::{Adapter, AdapterContext, AdapterRegistry};
use crate::comparator::{self, ComparisonReport, RuleSet};
use crate::error::{GoldenError, GoldenResult};
use crate::fixture::FixtureStore;
use crate::model::{LiveResult, MediaFixture};
use crate::process::saturating_duration_ms;

/// Wall-clock budget for one adapter invocation when neither the scenario
/// nor the harness configuration sets one (10 minutes).
pub const DEFAULT_SCENARIO_TIMEOUT_MS: u64 = 600_000;

/// Extra wait after the budget for an adapter to report its killed tool.
const KILL_GRACE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// One declared fixture pair: which media goes through which adapter, and
/// how the output is judged against which reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub media: String,
    pub reference: String,
    pub adapter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<AdapterContext>,
    pub rules: RuleSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Scenario {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        media: impl Into<String>,
        reference: impl Into<String>,
        adapter: impl Into<String>,
        rules: RuleSet,
    ) -> Self {
        Self {
            name: name.into(),
            media: media.into(),
            reference: reference.into(),
            adapter: adapter.into(),
            context: None,
            rules,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: AdapterContext) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Explicit setup shared by every scenario of a run.
#[derive(Debug, Clone)]
pub struct HarnessContext {
    pub store: FixtureStore,
    pub adapters: AdapterRegistry,
    pub default_timeout: Duration,
}

impl HarnessContext {
    #[must_use]
    pub fn new(store: FixtureStore, adapters: AdapterRegistry) -> Self {
        Self {
            store,
            adapters,
            default_timeout: Duration::from_millis(DEFAULT_SCENARIO_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn budget_for(&self, scenario: &Scenario) -> Duration {
        scenario
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioStage {
    ResolveMedia,
    LoadReference,
    CheckRules,
    Execute,
    Compare,
}

impl ScenarioStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResolveMedia => "resolve_media",
            Self::LoadReference => "load_reference",
            Self::CheckRules => "check_rules",
            Self::Execute => "execute",
            Self::Compare => "compare",
        }
    }
}

/// Log the stage result; errors leave tagged with the scenario and stage.
fn staged<T>(scenario: &str, stage: ScenarioStage, result: GoldenResult<T>) -> GoldenResult<T> {
    match result {
        Ok(value) => {
            tracing::debug!(scenario, stage = stage.as_str(), "stage ok");
            Ok(value)
        }
        Err(error) => {
            tracing::warn!(
                scenario,
                stage = stage.as_str(),
                code = error.error_code(),
                error = %error,
                "stage failed"
            );
            Err(GoldenError::ScenarioAborted {
                scenario: scenario.to_owned(),
                stage: stage.as_str(),
                source: Box::new(error),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Single scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub adapter: String,
    pub media: String,
    pub reference: String,
    pub reference_sha256: String,
    pub started_at_rfc3339: String,
    pub elapsed_ms: u64,
    pub comparison: ComparisonReport,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.comparison.all_passed()
    }

    /// `AssertionMismatch` naming the first failing field, when any failed.
    pub fn assert_passed(&self) -> GoldenResult<()> {
        let Some(first) = self.comparison.first_failure() else {
            return Ok(());
        };
        let (expected, actual) = first
            .mismatch
            .as_ref()
            .map(|mismatch| (mismatch.expected.clone(), mismatch.actual.clone()))
            .unwrap_or_default();
        Err(GoldenError::AssertionMismatch {
            scenario: self.scenario.clone(),
            failed: self.comparison.failed(),
            total: self.comparison.total(),
            field: first.field.clone(),
            expected,
            actual,
        })
    }
}

/// Run one scenario: resolve media, load the reference, check rule
/// coverage, apply the adapter under the wall-clock budget, compare.
///
/// Fixture, configuration, execution and timeout errors abort the scenario
/// as `ScenarioAborted`; value mismatches are collected in the report.
pub fn run_scenario(ctx: &HarnessContext, scenario: &Scenario) -> GoldenResult<ScenarioReport> {
    let name = scenario.name.as_str();
    let started_at = Utc::now();
    let clock = Instant::now();
    tracing::info!(scenario = name, adapter = %scenario.adapter, "scenario started");

    let media = staged(name, ScenarioStage::ResolveMedia, ctx.store.resolve_media(&scenario.media))?;
    let reference = staged(
        name,
        ScenarioStage::LoadReference,
        ctx.store.load_reference(&scenario.reference),
    )?;
    staged(
        name,
        ScenarioStage::CheckRules,
        scenario
            .rules
            .validate(name)
            .and_then(|()| scenario.rules.ensure_covers(name, &reference.result)),
    )?;

    let adapter = staged(name, ScenarioStage::Execute, ctx.adapters.get(&scenario.adapter))?;
    let budget = ctx.budget_for(scenario);
    let live = staged(
        name,
        ScenarioStage::Execute,
        apply_with_budget(adapter, media, scenario.context.clone(), budget),
    )?;

    let comparison = staged(
        name,
        ScenarioStage::Compare,
        comparator::compare_results(name, &reference.result, &live, &scenario.rules),
    )?;

    let report = ScenarioReport {
        scenario: scenario.name.clone(),
        adapter: scenario.adapter.clone(),
        media: scenario.media.clone(),
        reference: scenario.reference.clone(),
        reference_sha256: reference.sha256,
        started_at_rfc3339: started_at.to_rfc3339(),
        elapsed_ms: saturating_duration_ms(clock.elapsed()),
        comparison,
    };
    tracing::info!(
        scenario = name,
        passed = report.comparison.passed(),
        total = report.comparison.total(),
        elapsed_ms = report.elapsed_ms,
        "scenario finished"
    );
    Ok(report)
}

/// Run the adapter on a worker thread under `budget`.
///
/// The budget is forwarded to the adapter so command-backed tools are
/// killed when it runs out; the wait allows `KILL_GRACE` on top for that
/// kill to be reported. Adapters that ignore the budget are detached.
fn apply_with_budget(
    adapter: Arc<dyn Adapter>,
    media: MediaFixture,
    context: Option<AdapterContext>,
    budget: Duration,
) -> GoldenResult<LiveResult> {
    let adapter_name = adapter.name().to_owned();
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("adapter-{adapter_name}"))
        .spawn(move || {
            let _ = tx.send(adapter.apply_within(&media, context.as_ref(), budget));
        })?;

    match rx.recv_timeout(budget.saturating_add(KILL_GRACE)) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(GoldenError::TimeoutExceeded {
            subject: adapter_name,
            budget_ms: saturating_duration_ms(budget),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(GoldenError::PipelineExecution {
            adapter: adapter_name,
            reason: "adapter worker exited without producing a result".to_owned(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Whole runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Errored,
}

impl ScenarioStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
        }
    }
}

#[derive(Debug)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub result: GoldenResult<ScenarioReport>,
}

impl ScenarioOutcome {
    #[must_use]
    pub fn status(&self) -> ScenarioStatus {
        match &self.result {
            Ok(report) if report.passed() => ScenarioStatus::Passed,
            Ok(_) => ScenarioStatus::Failed,
            Err(_) => ScenarioStatus::Errored,
        }
    }

    /// Code of the underlying failure, not of the scenario wrapper.
    #[must_use]
    pub fn error_code(&self) -> Option<&'static str> {
        self.result.as_ref().err().map(|error| error.root().error_code())
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match &self.result {
            Ok(report) => json!({
                "scenario": self.scenario,
                "status": self.status().as_str(),
                "report": report,
            }),
            Err(error) => {
                let stage = match error {
                    GoldenError::ScenarioAborted { stage, .. } => Some(*stage),
                    _ => None,
                };
                json!({
                    "scenario": self.scenario,
                    "status": self.status().as_str(),
                    "stage": stage,
                    "error_code": error.root().error_code(),
                    "error": error.to_string(),
                })
            }
        }
    }
}

/// Per-scenario results of a run, in declaration order.
#[derive(Debug)]
pub struct HarnessSummary {
    pub started_at_rfc3339: String,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl HarnessSummary {
    fn count(&self, status: ScenarioStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status() == status)
            .count()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(ScenarioStatus::Passed)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(ScenarioStatus::Failed)
    }

    #[must_use]
    pub fn errored(&self) -> usize {
        self.count(ScenarioStatus::Errored)
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed() == self.total()
    }

    #[must_use]
    pub fn outcome(&self, scenario: &str) -> Option<&ScenarioOutcome> {
        self.outcomes.iter().find(|outcome| outcome.scenario == scenario)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "started_at_rfc3339": self.started_at_rfc3339,
            "total": self.total(),
            "passed": self.passed(),
            "failed": self.failed(),
            "errored": self.errored(),
            "scenarios": self.outcomes.iter().map(ScenarioOutcome::to_json).collect::<Vec<_>>(),
        })
    }

    /// All reports, or the first error / mismatch in declaration order.
    pub fn into_reports(self) -> GoldenResult<Vec<ScenarioReport>> {
        let mut reports = Vec::with_capacity(self.outcomes.len());
        for outcome in self.outcomes {
            let report = outcome.result?;
            report.assert_passed()?;
            reports.push(report);
        }
        Ok(reports)
    }
}

fn run_one(ctx: &HarnessContext, scenario: &Scenario) -> ScenarioOutcome {
    ScenarioOutcome {
        scenario: scenario.name.clone(),
        result: run_scenario(ctx, scenario),
    }
}

fn summarize(started_at_rfc3339: String, outcomes: Vec<ScenarioOutcome>) -> HarnessSummary {
    let summary = HarnessSummary {
        started_at_rfc3339,
        outcomes,
    };
    tracing::info!(
        total = summary.total(),
        passed = summary.passed(),
        failed = summary.failed(),
        errored = summary.errored(),
        "harness run finished"
    );
    summary
}

/// Run every scenario in order. One scenario's failure never stops the run.
#[must_use]
pub fn run_all(ctx: &HarnessContext, scenarios: &[Scenario]) -> HarnessSummary {
    let started_at = Utc::now().to_rfc3339();
    let outcomes = scenarios
        .iter()
        .map(|scenario| run_one(ctx, scenario))
        .collect();
    summarize(started_at, outcomes)
}

/// Run scenarios on up to `workers` threads. Each worker builds its own
/// context through `make_context`, so adapter instances are never shared
/// between concurrently running scenarios. Outcomes keep declaration order.
pub fn run_all_parallel<F>(
    scenarios: &[Scenario],
    workers: usize,
    make_context: F,
) -> GoldenResult<HarnessSummary>
where
    F: Fn() -> GoldenResult<HarnessContext> + Sync,
{
    let started_at = Utc::now().to_rfc3339();
    let workers = workers.clamp(1, scenarios.len().max(1));
    let next = AtomicUsize::new(0);

    let per_worker: Vec<GoldenResult<Vec<(usize, ScenarioOutcome)>>> = thread::scope(|scope| {
        let next = &next;
        let make_context = &make_context;
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || -> GoldenResult<Vec<(usize, ScenarioOutcome)>> {
                    let ctx = make_context()?;
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(scenario) = scenarios.get(index) else {
                            break;
                        };
                        done.push((index, run_one(&ctx, scenario)));
                    }
                    Ok(done)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(GoldenError::PipelineExecution {
                        adapter: "<harness worker>".to_owned(),
                        reason: "worker thread panicked".to_owned(),
                    })
                })
            })
            .collect()
    });

    let mut indexed = Vec::with_capacity(scenarios.len());
    for batch in per_worker {
        indexed.extend(batch?);
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(summarize(
        started_at,
        indexed.into_iter().map(|(_, outcome)| outcome).collect(),
    ))
}
