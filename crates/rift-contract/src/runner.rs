//! Case runner.
//!
//! Drives every unit through build, execute and evaluate. Standalone cases and
//! sequences are independent and run concurrently up to `workers`; steps of a
//! sequence always run in order. Verdicts come back in declaration order
//! whatever the completion order was.

use crate::builder::{build_expectations, build_request, BuildContext, RequestSpec};
use crate::capture::CaptureStore;
use crate::config::{Credentials, RunSettings};
use crate::engine::{ExecutionEngine, ExecutionResult, ReqwestTransport, Transport};
use crate::error::ConfigError;
use crate::evaluator::evaluate;
use crate::report::{Report, SequenceSummary, SkipReason, Verdict};
use crate::suite::{Case, Expectation, ParameterSet, Sequence, Unit, UnitKind};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle of one sequence execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    Pending,
    Running(usize),
    Completed,
    Aborted,
}

/// A request as it would be sent, for dry runs.
#[derive(Debug, Clone)]
pub struct PlannedRequest {
    pub id: String,
    pub request: Result<RequestSpec, ConfigError>,
}

struct UnitOutcome {
    verdicts: Vec<Verdict>,
    sequence: Option<SequenceSummary>,
}

pub struct Runner {
    settings: RunSettings,
    credentials: Credentials,
    engine: ExecutionEngine,
}

impl Runner {
    pub fn new(settings: RunSettings, credentials: Credentials, transport: Arc<dyn Transport>) -> Self {
        let engine = ExecutionEngine::new(
            transport,
            settings.request_timeout,
            settings.retry_connect_failures,
        );
        Self {
            settings,
            credentials,
            engine,
        }
    }

    /// Runner backed by a pooled `reqwest` client.
    pub fn with_reqwest(settings: RunSettings, credentials: Credentials) -> Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::new(settings.request_timeout)?;
        Ok(Self::new(settings, credentials, Arc::new(transport)))
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run `units` and collect the report.
    pub async fn run(&self, units: Vec<Unit>) -> Report {
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = self.settings.deadline.map(|limit| start + limit);
        let workers = self.settings.workers.max(1);

        info!("running {} unit(s) with {} worker(s)", units.len(), workers);

        // A free worker picks up the next unit as soon as any unit finishes;
        // declaration order is restored afterwards.
        let mut outcomes: Vec<(usize, UnitOutcome)> = stream::iter(units.iter().enumerate())
            .map(|(index, unit)| async move { (index, self.run_unit(unit, deadline).await) })
            .buffer_unordered(workers)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut verdicts = Vec::new();
        let mut sequences = Vec::new();
        for (_, outcome) in outcomes {
            verdicts.extend(outcome.verdicts);
            sequences.extend(outcome.sequence);
        }

        Report::new(started_at, start.elapsed(), verdicts, sequences)
    }

    /// Build every request without touching the network.
    ///
    /// Capture placeholders cannot be known before a real run and are left as
    /// written.
    pub fn plan(&self, units: &[Unit]) -> Vec<PlannedRequest> {
        let empty = CaptureStore::new();
        let mut planned = Vec::new();

        for unit in units {
            let base_url = self.base_url(unit);
            match &unit.kind {
                UnitKind::Case { case, parameters } => {
                    let ctx = BuildContext::new(&self.credentials)
                        .with_parameters(parameters.as_ref())
                        .with_base_url(base_url);
                    planned.push(PlannedRequest {
                        id: unit.id.clone(),
                        request: build_request(case, &ctx),
                    });
                }
                UnitKind::Sequence(sequence) => {
                    let ctx = BuildContext::new(&self.credentials)
                        .with_captures(&empty)
                        .with_base_url(base_url)
                        .deferring_captures();
                    for step in &sequence.steps {
                        planned.push(PlannedRequest {
                            id: sequence.step_id(step),
                            request: build_request(step, &ctx),
                        });
                    }
                }
            }
        }

        planned
    }

    fn base_url<'a>(&'a self, unit: &'a Unit) -> Option<&'a str> {
        self.settings
            .base_url
            .as_deref()
            .or(unit.base_url.as_deref())
    }

    async fn run_unit(&self, unit: &Unit, deadline: Option<Instant>) -> UnitOutcome {
        match &unit.kind {
            UnitKind::Case { case, parameters } => {
                let verdict = if expired(deadline) {
                    info!("{}: skipped, deadline exceeded", unit.id);
                    Verdict::skipped(&unit.id, SkipReason::DeadlineExceeded)
                } else {
                    self.run_case(unit, case, parameters.as_ref()).await
                };
                UnitOutcome {
                    verdicts: vec![verdict],
                    sequence: None,
                }
            }
            UnitKind::Sequence(sequence) => self.run_sequence(unit, sequence, deadline).await,
        }
    }

    async fn run_case(&self, unit: &Unit, case: &Case, parameters: Option<&ParameterSet>) -> Verdict {
        let ctx = BuildContext::new(&self.credentials)
            .with_parameters(parameters)
            .with_base_url(self.base_url(unit));
        let (verdict, _) = self.execute(&unit.id, case, &ctx).await;
        verdict
    }

    async fn run_sequence(
        &self,
        unit: &Unit,
        sequence: &Sequence,
        deadline: Option<Instant>,
    ) -> UnitOutcome {
        let base_url = self.base_url(unit);
        let mut store = CaptureStore::new();
        let mut verdicts = Vec::with_capacity(sequence.steps.len());
        let mut state = SequenceState::Pending;
        let mut halted: Option<SkipReason> = None;

        for (index, step) in sequence.steps.iter().enumerate() {
            let step_id = sequence.step_id(step);

            if halted.is_none() && expired(deadline) {
                info!("{}: deadline exceeded before step {}", sequence.id, index);
                halted = Some(SkipReason::DeadlineExceeded);
            }
            if let Some(reason) = halted {
                verdicts.push(Verdict::skipped(&step_id, reason).with_sequence(&sequence.id));
                store.record_unexecuted(step);
                continue;
            }

            state = SequenceState::Running(index);
            info!("{}: running step {} ({})", sequence.id, index, step.id);

            let ctx = BuildContext::new(&self.credentials)
                .with_captures(&store)
                .with_base_url(base_url);
            let (verdict, result) = self.execute(&step_id, step, &ctx).await;

            match &result {
                Some(result) => store.record(step, result),
                None => store.record_unexecuted(step),
            }

            let failed = !verdict.passed;
            verdicts.push(verdict.with_sequence(&sequence.id));

            if failed && sequence.abort_on_failure {
                info!("{}: aborted after step {}", sequence.id, step.id);
                state = SequenceState::Aborted;
                halted = Some(SkipReason::PriorStepFailed);
            }
        }

        if let SequenceState::Running(_) = state {
            state = SequenceState::Completed;
        }
        info!("{}: {:?}", sequence.id, state);

        UnitOutcome {
            verdicts,
            sequence: Some(SequenceSummary {
                id: sequence.id.clone(),
                state,
            }),
        }
    }

    /// Build, send and evaluate one case. A configuration error yields an
    /// error verdict and no network call.
    async fn execute(
        &self,
        id: &str,
        case: &Case,
        ctx: &BuildContext<'_>,
    ) -> (Verdict, Option<ExecutionResult>) {
        let (request, expectations) = match prepare(case, ctx) {
            Ok(prepared) => prepared,
            Err(error) => {
                warn!("{}: {}", id, error);
                return (Verdict::config_error(id, &error), None);
            }
        };

        let result = self.engine.execute(&request).await;
        let verdict = evaluate(id, &result, &expectations).with_request(request);
        if !verdict.passed && !result.raw_body.is_empty() {
            debug!("{}: response body: {}", id, result.body_text());
        }
        info!(
            "{}: {} ({} failure(s))",
            id,
            verdict.outcome.label().trim(),
            verdict.failures.len()
        );
        (verdict, Some(result))
    }
}

fn prepare(case: &Case, ctx: &BuildContext<'_>) -> Result<(RequestSpec, Vec<Expectation>), ConfigError> {
    Ok((build_request(case, ctx)?, build_expectations(case, ctx)?))
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}
