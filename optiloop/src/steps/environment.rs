//! Container descriptors for the current code.

use tracing::instrument;

use crate::core::routing::Stage;
use crate::core::state::RoundState;
use crate::core::types::ContainerFiles;
use crate::io::schemas::SchemaKind;
use crate::steps::{StepContext, StepError, StepOutcome};

#[instrument(skip_all, fields(stage = "build_environment"))]
pub fn run(ctx: &StepContext<'_>, state: RoundState) -> StepOutcome {
    let result = build(ctx, &state);
    ctx.finish(Stage::BuildEnvironment, state, result, |state, files| {
        state.container_files = Some(files);
        state.routing_decision = None;
    })
}

fn build(ctx: &StepContext<'_>, state: &RoundState) -> Result<ContainerFiles, StepError> {
    let prompt = ctx
        .prompts
        .container_files(&state.environment_inputs()?)
        .map_err(StepError::Prompt)?;
    let files: ContainerFiles =
        ctx.request("build_environment", SchemaKind::ContainerFiles, &prompt)?;
    ctx.session
        .workspace()
        .commit_container_files(&files)
        .map_err(StepError::Workspace)?;
    Ok(files)
}
