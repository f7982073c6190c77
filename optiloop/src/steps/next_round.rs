//! Improved code for the next optimization round.

use tracing::{info, instrument};

use crate::core::routing::Stage;
use crate::core::state::RoundState;
use crate::core::types::Code;
use crate::io::schemas::SchemaKind;
use crate::steps::{StepContext, StepError, StepOutcome, warn_missing_resources};

#[instrument(skip_all, fields(stage = "loop_again", iteration = state.iteration_count))]
pub fn run(ctx: &StepContext<'_>, state: RoundState) -> StepOutcome {
    let result = improve(ctx, &state);
    ctx.finish(Stage::LoopAgain, state, result, |state, code| {
        state.iteration_count += 1;
        info!(iteration = state.iteration_count, "generated improved solver");
        ctx.conversation.say(&format!(
            "Generated the round {} solver.",
            state.iteration_count
        ));
        state.current_code = Some(code);
        state.fix_attempts = 0;
        state.last_failure = None;
        state.routing_decision = None;
    })
}

fn improve(ctx: &StepContext<'_>, state: &RoundState) -> Result<Code, StepError> {
    let prompt = ctx
        .prompts
        .next_round(&state.next_round_inputs()?)
        .map_err(StepError::Prompt)?;
    let code: Code = ctx.request("loop_again", SchemaKind::Code, &prompt)?;
    ctx.session
        .workspace()
        .commit_code(&code)
        .map_err(StepError::Workspace)?;
    warn_missing_resources(ctx, &code);
    Ok(code)
}
