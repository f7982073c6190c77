//! Output analysis and the end-of-round checkpoint.

use tracing::{info, instrument};

use crate::core::routing::{RoundChoice, RoutingDecision, Stage};
use crate::core::state::RoundState;
use crate::core::types::{OutputAnalysis, OutputOfCode};
use crate::io::schemas::SchemaKind;
use crate::steps::{StepContext, StepError, StepOutcome};

#[instrument(skip_all, fields(stage = "analyze_output", iteration = state.iteration_count))]
pub fn run(ctx: &StepContext<'_>, state: RoundState) -> StepOutcome {
    let result = review(ctx, &state);
    ctx.finish(Stage::AnalyzeOutput, state, result, |state, (result, choice)| {
        info!(?choice, objective = ?result.objective_value, "round reviewed");
        state.record_result(result);
        state.routing_decision = Some(RoutingDecision::from(choice));
    })
}

fn review(
    ctx: &StepContext<'_>,
    state: &RoundState,
) -> Result<(OutputOfCode, RoundChoice), StepError> {
    let inputs = state.review_inputs()?;
    let prompt = ctx.prompts.review(&inputs).map_err(StepError::Prompt)?;
    let analysis: OutputAnalysis =
        ctx.request("analyze_output", SchemaKind::OutputAnalysis, &prompt)?;
    let result = OutputOfCode::from_analysis(analysis, inputs.code);
    let choice = ctx
        .conversation
        .choose_round(&result)
        .map_err(StepError::Conversation)?;
    Ok((result, choice))
}
