//! Problem analysis and the plan checkpoint.

use tracing::{info, instrument};

use crate::core::routing::{PlanChoice, RoutingDecision, Stage};
use crate::core::state::RoundState;
use crate::core::types::Purpose;
use crate::io::schemas::SchemaKind;
use crate::steps::{StepContext, StepError, StepOutcome};

#[instrument(skip_all, fields(stage = "analyze"))]
pub fn run(ctx: &StepContext<'_>, state: RoundState) -> StepOutcome {
    let result = plan(ctx, &state);
    ctx.finish(Stage::Analyze, state, result, |state, (purpose, choice)| {
        info!(?choice, problem_type = %purpose.problem_type, "plan checkpoint answered");
        state.purpose = match choice {
            PlanChoice::NewPlan => None,
            PlanChoice::Continue | PlanChoice::Cancel => Some(purpose),
        };
        state.routing_decision = Some(RoutingDecision::from(choice));
    })
}

fn plan(ctx: &StepContext<'_>, state: &RoundState) -> Result<(Purpose, PlanChoice), StepError> {
    let prompt = ctx
        .prompts
        .analyze(&state.analyze_inputs())
        .map_err(StepError::Prompt)?;
    let purpose: Purpose = ctx.request("analyze", SchemaKind::Purpose, &prompt)?;
    let choice = ctx
        .conversation
        .choose_plan(&purpose)
        .map_err(StepError::Conversation)?;
    Ok((purpose, choice))
}
