//! Pipeline steps.
//!
//! Each step takes the [`RoundState`] by value and hands it back inside a
//! [`StepOutcome`]. A step renders its prompt from a narrowed projection,
//! asks the model, validates the answer, commits workspace files, and only
//! then writes its own fields. Any [`StepError`] on the way is reported to
//! the user and the state comes back untouched as [`StepOutcome::Halted`].

pub mod analyze;
pub mod environment;
pub mod execute;
pub mod fix;
pub mod generate;
pub mod next_round;
pub mod report;
pub mod review;

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use crate::core::report::{FinalSelection, SelectionOutOfRange};
use crate::core::routing::Stage;
use crate::core::state::{MissingField, RoundState};
use crate::core::structured::ParseError;
use crate::core::types::Code;
use crate::io::config::OptiloopConfig;
use crate::io::conversation::Conversation;
use crate::io::model::{ModelClient, ModelError, ModelRequest, request_structured};
use crate::io::prompt::{Prompt, PromptBuilder};
use crate::io::sandbox::Sandbox;
use crate::io::schemas::SchemaKind;
use crate::io::workspace::Session;

/// Collaborators shared by every step of one submission.
pub struct StepContext<'a> {
    pub model: &'a dyn ModelClient,
    pub sandbox: &'a dyn Sandbox,
    pub conversation: &'a dyn Conversation,
    pub config: &'a OptiloopConfig,
    pub session: &'a Session,
    pub prompts: &'a PromptBuilder,
}

/// Result of running one step.
#[derive(Debug)]
pub enum StepOutcome {
    Advanced(RoundState),
    /// The final report step resolved the model's pick.
    Reported {
        state: RoundState,
        selection: FinalSelection,
    },
    /// The step failed; `state` is exactly what the step received.
    Halted { state: RoundState, reason: String },
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
    #[error("{0:#}")]
    Transport(anyhow::Error),
    #[error(transparent)]
    MissingState(#[from] MissingField),
    #[error("prompt rendering failed: {0:#}")]
    Prompt(anyhow::Error),
    #[error("workspace update failed: {0:#}")]
    Workspace(anyhow::Error),
    #[error("sandbox unavailable: {0:#}")]
    Sandbox(anyhow::Error),
    #[error("user channel failed: {0:#}")]
    Conversation(anyhow::Error),
}

impl From<ParseError> for StepError {
    fn from(err: ParseError) -> Self {
        Self::MalformedOutput(err.to_string())
    }
}

impl From<SelectionOutOfRange> for StepError {
    fn from(err: SelectionOutOfRange) -> Self {
        Self::MalformedOutput(err.to_string())
    }
}

impl From<ModelError> for StepError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Transport(err) => Self::Transport(err),
            ModelError::Malformed(err) => err.into(),
        }
    }
}

impl StepContext<'_> {
    /// Ask the model for a `T` shaped by `kind`.
    ///
    /// `step` names the request artifacts under the session's `model/` dir.
    pub fn request<T: DeserializeOwned>(
        &self,
        step: &str,
        kind: SchemaKind,
        prompt: &Prompt,
    ) -> Result<T, StepError> {
        let artifacts = self.session.model_artifacts(step);
        kind.write_to(&artifacts.schema)
            .map_err(StepError::Transport)?;
        let schema = kind.compile().map_err(StepError::Transport)?;
        let model = &self.config.model;
        let request = ModelRequest {
            workdir: self.session.workspace_dir(),
            prompt: prompt.content.clone(),
            output_schema_path: artifacts.schema,
            output_path: artifacts.output,
            log_path: artifacts.log,
            timeout: Duration::from_secs(model.timeout_secs),
            output_limit_bytes: model.output_limit_bytes,
            stream_path: model.stream_events.then_some(artifacts.stream),
        };
        Ok(request_structured(self.model, &request, &schema)?)
    }

    /// Report `err` to the user and hand the state back unchanged.
    pub fn halt(&self, stage: Stage, state: RoundState, err: StepError) -> StepOutcome {
        warn!(stage = stage.as_str(), err = %err, "step halted");
        self.conversation.say(&format!(
            "The {stage} step failed: {err}\nNothing was changed; the step can be retried."
        ));
        StepOutcome::Halted {
            state,
            reason: err.to_string(),
        }
    }

    /// Apply a successful step result, or halt on its error.
    pub(crate) fn finish<T>(
        &self,
        stage: Stage,
        mut state: RoundState,
        result: Result<T, StepError>,
        apply: impl FnOnce(&mut RoundState, T),
    ) -> StepOutcome {
        match result {
            Ok(value) => {
                apply(&mut state, value);
                StepOutcome::Advanced(state)
            }
            Err(err) => self.halt(stage, state, err),
        }
    }
}

/// Tell the user about resources the code names but the workspace lacks.
pub(crate) fn warn_missing_resources(ctx: &StepContext<'_>, code: &Code) {
    let missing = ctx.session.workspace().missing_resources(code);
    if missing.is_empty() {
        return;
    }
    warn!(?missing, "generated code references missing resources");
    ctx.conversation.say(&format!(
        "The generated code expects files that were not attached: {}",
        missing.join(", ")
    ));
}

/// Run the step for `stage`.
///
/// Terminal stages without a step (`Cancelled`, `GaveUp`) hand the state
/// back unchanged.
pub fn run_stage(ctx: &StepContext<'_>, stage: Stage, state: RoundState) -> StepOutcome {
    match stage {
        Stage::Analyze => analyze::run(ctx, state),
        Stage::GenerateCode => generate::run(ctx, state),
        Stage::BuildEnvironment => environment::run(ctx, state),
        Stage::Execute => execute::run(ctx, state),
        Stage::FixCode => fix::run(ctx, state),
        Stage::AnalyzeOutput => review::run(ctx, state),
        Stage::LoopAgain => next_round::run(ctx, state),
        Stage::FinalReport => report::run(ctx, state),
        Stage::Cancelled | Stage::GaveUp => StepOutcome::Advanced(state),
    }
}
