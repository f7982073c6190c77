//! Round state threaded through the controller.
//!
//! The controller owns one [`RoundState`] per submission and passes it by
//! value into each step. Steps read the fields they depend on through a
//! narrowed projection (`*_inputs` methods) so a missing field surfaces as a
//! [`MissingField`] instead of a panic deep inside prompt rendering.

use serde::Serialize;
use thiserror::Error;

use crate::core::routing::RoutingDecision;
use crate::core::types::{Code, ContainerFiles, ExecutionFailure, OutputOfCode, Purpose};

/// A field a step needed that the run has not produced yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("round state is missing `{0}`")]
pub struct MissingField(pub &'static str);

/// Append-only, order-preserving record of every analyzed round.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultHistory {
    entries: Vec<OutputOfCode>,
}

impl ResultHistory {
    pub fn push(&mut self, result: OutputOfCode) {
        self.entries.push(result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[OutputOfCode] {
        &self.entries
    }

    /// Resolve a 1-based position.
    pub fn get_one_based(&self, index: usize) -> Option<&OutputOfCode> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }
}

/// Mutable record of one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundState {
    user_input: String,
    attached_data: String,
    /// Number of times code generation has been entered (first generation = 1).
    pub iteration_count: u32,
    pub purpose: Option<Purpose>,
    pub current_code: Option<Code>,
    pub container_files: Option<ContainerFiles>,
    pub latest_execution_output: Option<String>,
    pub last_failure: Option<ExecutionFailure>,
    /// Consecutive fix attempts since the last successful run.
    pub fix_attempts: u32,
    pub latest_result: Option<OutputOfCode>,
    result_history: ResultHistory,
    pub routing_decision: Option<RoutingDecision>,
}

impl RoundState {
    pub fn new(user_input: impl Into<String>, attached_data: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            attached_data: attached_data.into(),
            iteration_count: 0,
            purpose: None,
            current_code: None,
            container_files: None,
            latest_execution_output: None,
            last_failure: None,
            fix_attempts: 0,
            latest_result: None,
            result_history: ResultHistory::default(),
            routing_decision: None,
        }
    }

    pub fn user_input(&self) -> &str {
        &self.user_input
    }

    pub fn attached_data(&self) -> &str {
        &self.attached_data
    }

    pub fn has_attached_data(&self) -> bool {
        !self.attached_data.is_empty()
    }

    pub fn result_history(&self) -> &ResultHistory {
        &self.result_history
    }

    /// Record an analyzed round as both the latest result and a new history
    /// entry.
    pub fn record_result(&mut self, result: OutputOfCode) {
        self.result_history.push(result.clone());
        self.latest_result = Some(result);
    }

    pub fn analyze_inputs(&self) -> AnalyzeInputs<'_> {
        AnalyzeInputs {
            user_input: &self.user_input,
            attached_data: &self.attached_data,
        }
    }

    pub fn generate_inputs(&self) -> Result<GenerateInputs<'_>, MissingField> {
        Ok(GenerateInputs {
            purpose: self.purpose.as_ref().ok_or(MissingField("purpose"))?,
            attached_data: &self.attached_data,
        })
    }

    pub fn environment_inputs(&self) -> Result<EnvironmentInputs<'_>, MissingField> {
        Ok(EnvironmentInputs {
            code: self.current_code.as_ref().ok_or(MissingField("current_code"))?,
        })
    }

    pub fn execute_inputs(&self) -> Result<ExecuteInputs<'_>, MissingField> {
        let code = self.current_code.as_ref().ok_or(MissingField("current_code"))?;
        let container = self
            .container_files
            .as_ref()
            .ok_or(MissingField("container_files"))?;
        Ok(ExecuteInputs {
            code,
            container,
            fix_attempts: self.fix_attempts,
        })
    }

    pub fn fix_inputs(&self) -> Result<FixInputs<'_>, MissingField> {
        Ok(FixInputs {
            code: self.current_code.as_ref().ok_or(MissingField("current_code"))?,
            failure: self.last_failure.as_ref().ok_or(MissingField("last_failure"))?,
        })
    }

    pub fn review_inputs(&self) -> Result<ReviewInputs<'_>, MissingField> {
        Ok(ReviewInputs {
            purpose: self.purpose.as_ref().ok_or(MissingField("purpose"))?,
            code: self.current_code.as_ref().ok_or(MissingField("current_code"))?,
            execution_output: self
                .latest_execution_output
                .as_deref()
                .ok_or(MissingField("latest_execution_output"))?,
        })
    }

    pub fn next_round_inputs(&self) -> Result<NextRoundInputs<'_>, MissingField> {
        Ok(NextRoundInputs {
            purpose: self.purpose.as_ref().ok_or(MissingField("purpose"))?,
            attached_data: &self.attached_data,
            previous_code: self.current_code.as_ref().ok_or(MissingField("current_code"))?,
            previous_result: self
                .latest_result
                .as_ref()
                .ok_or(MissingField("latest_result"))?,
        })
    }

    pub fn report_inputs(&self) -> Result<ReportInputs<'_>, MissingField> {
        if self.result_history.is_empty() {
            return Err(MissingField("result_history"));
        }
        Ok(ReportInputs {
            user_input: &self.user_input,
            history: &self.result_history,
        })
    }
}

pub struct AnalyzeInputs<'a> {
    pub user_input: &'a str,
    pub attached_data: &'a str,
}

pub struct GenerateInputs<'a> {
    pub purpose: &'a Purpose,
    pub attached_data: &'a str,
}

pub struct EnvironmentInputs<'a> {
    pub code: &'a Code,
}

pub struct ExecuteInputs<'a> {
    pub code: &'a Code,
    pub container: &'a ContainerFiles,
    pub fix_attempts: u32,
}

pub struct FixInputs<'a> {
    pub code: &'a Code,
    pub failure: &'a ExecutionFailure,
}

pub struct ReviewInputs<'a> {
    pub purpose: &'a Purpose,
    pub code: &'a Code,
    pub execution_output: &'a str,
}

pub struct NextRoundInputs<'a> {
    pub purpose: &'a Purpose,
    pub attached_data: &'a str,
    pub previous_code: &'a Code,
    pub previous_result: &'a OutputOfCode,
}

pub struct ReportInputs<'a> {
    pub user_input: &'a str,
    pub history: &'a ResultHistory,
}
