//! Repair of code that failed in the sandbox.

use tracing::{info, instrument};

use crate::core::routing::Stage;
use crate::core::state::RoundState;
use crate::core::types::{Code, CodeFix};
use crate::io::schemas::SchemaKind;
use crate::steps::{StepContext, StepError, StepOutcome};

#[instrument(skip_all, fields(stage = "fix_code", fix_attempts = state.fix_attempts))]
pub fn run(ctx: &StepContext<'_>, state: RoundState) -> StepOutcome {
    let result = fix(ctx, &state);
    ctx.finish(Stage::FixCode, state, result, |state, (code, description)| {
        state.fix_attempts += 1;
        info!(attempt = state.fix_attempts, "applied fix");
        ctx.conversation.say(&format!("Applied fix: {description}"));
        state.current_code = Some(code);
        state.routing_decision = None;
    })
}

fn fix(ctx: &StepContext<'_>, state: &RoundState) -> Result<(Code, String), StepError> {
    let inputs = state.fix_inputs()?;
    let prompt = ctx.prompts.fix(&inputs).map_err(StepError::Prompt)?;
    let fix: CodeFix = ctx.request("fix_code", SchemaKind::CodeFix, &prompt)?;
    let description = fix.fix_description.clone();
    let code = fix.into_code(inputs.code);
    ctx.session
        .workspace()
        .commit_code(&code)
        .map_err(StepError::Workspace)?;
    Ok((code, description))
}
