//! Final comparative report.

use tracing::{info, instrument};

use crate::core::report::{FinalSelection, resolve_selection};
use crate::core::routing::Stage;
use crate::core::state::RoundState;
use crate::core::types::FinalReport;
use crate::io::schemas::SchemaKind;
use crate::steps::{StepContext, StepError, StepOutcome};

#[instrument(skip_all, fields(stage = "final_report", rounds = state.result_history().len()))]
pub fn run(ctx: &StepContext<'_>, state: RoundState) -> StepOutcome {
    match select(ctx, &state) {
        Ok(selection) => {
            info!(index = selection.index, "final report resolved");
            ctx.conversation.say(&format!(
                "Best result: optimization {}\nReason: {}\n\n{}",
                selection.index,
                selection.reason,
                selection.code()
            ));
            StepOutcome::Reported { state, selection }
        }
        Err(err) => ctx.halt(Stage::FinalReport, state, err),
    }
}

fn select(ctx: &StepContext<'_>, state: &RoundState) -> Result<FinalSelection, StepError> {
    let inputs = state.report_inputs()?;
    let prompt = ctx
        .prompts
        .final_report(&inputs)
        .map_err(StepError::Prompt)?;
    let report: FinalReport = ctx.request("final_report", SchemaKind::FinalReport, &prompt)?;
    Ok(resolve_selection(inputs.history, report)?)
}
