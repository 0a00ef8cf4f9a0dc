//! Values captured from earlier steps of a sequence.
//!
//! A store lives exactly as long as one sequence execution. Every processed
//! step gets an entry, including steps that never reached the network, so
//! `${step[N].name}` indices always line up with declaration order.

use crate::engine::ExecutionResult;
use crate::error::ConfigError;
use crate::suite::Case;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct StepCaptures {
    step_id: String,
    declared: Vec<String>,
    values: BTreeMap<String, Value>,
}

impl StepCaptures {
    fn value(&self, name: &str) -> Result<&Value, ConfigError> {
        self.values
            .get(name)
            .ok_or_else(|| ConfigError::CaptureUnavailable {
                step: self.step_id.clone(),
                name: name.to_string(),
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptureStore {
    steps: Vec<StepCaptures>,
}

impl CaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of steps processed so far, which is also the current step index.
    pub fn processed(&self) -> usize {
        self.steps.len()
    }

    /// Apply `step`'s capture rules to its response.
    ///
    /// A rule whose path does not resolve leaves that name unavailable, which
    /// later steps see as a configuration error.
    pub fn record(&mut self, step: &Case, result: &ExecutionResult) {
        let mut values = BTreeMap::new();

        for capture in &step.capture {
            let Some(body) = &result.parsed_body else {
                warn!(
                    "step '{}': no JSON body to capture '{}' from",
                    step.id, capture.name
                );
                continue;
            };
            match capture.path.resolve(body) {
                Ok(value) => {
                    debug!("step '{}': captured {} = {}", step.id, capture.name, value);
                    values.insert(capture.name.clone(), value.clone());
                }
                Err(e) => warn!("step '{}': capture '{}' failed: {}", step.id, capture.name, e),
            }
        }

        self.push(step, values);
    }

    /// Register a step that never produced a response.
    pub fn record_unexecuted(&mut self, step: &Case) {
        self.push(step, BTreeMap::new());
    }

    fn push(&mut self, step: &Case, values: BTreeMap<String, Value>) {
        self.steps.push(StepCaptures {
            step_id: step.id.clone(),
            declared: step.capture.iter().map(|c| c.name.clone()).collect(),
            values,
        });
    }

    /// `${capture.name}`: the most recent earlier step declaring `name`.
    pub fn latest(&self, name: &str) -> Result<&Value, ConfigError> {
        self.steps
            .iter()
            .rev()
            .find(|step| step.declared.iter().any(|declared| declared == name))
            .ok_or_else(|| ConfigError::UnknownCapture(name.to_string()))?
            .value(name)
    }

    /// `${step[index].name}`.
    pub fn from_step(&self, index: usize, name: &str) -> Result<&Value, ConfigError> {
        let step = self.steps.get(index).ok_or(ConfigError::StepNotExecuted {
            index,
            current: self.steps.len(),
        })?;
        if !step.declared.iter().any(|declared| declared == name) {
            return Err(ConfigError::UnknownCapture(format!("step[{index}].{name}")));
        }
        step.value(name)
    }
}
