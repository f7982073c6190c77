//! Sandbox execution and the run verdict.

use tracing::{info, instrument};

use crate::core::routing::{RoutingDecision, RunVerdict, Stage};
use crate::core::state::RoundState;
use crate::io::sandbox::{SandboxReport, execute_in_sandbox};
use crate::steps::{StepContext, StepError, StepOutcome};

#[instrument(skip_all, fields(stage = "execute", fix_attempts = state.fix_attempts))]
pub fn run(ctx: &StepContext<'_>, state: RoundState) -> StepOutcome {
    let result = execute(ctx, &state);
    ctx.finish(Stage::Execute, state, result, |state, (report, verdict)| {
        info!(?verdict, "sandbox attempt finished");
        match verdict {
            RunVerdict::Succeeded => {
                ctx.conversation.say("Execution succeeded.");
                state.fix_attempts = 0;
            }
            RunVerdict::Failed => {
                if let Some(failure) = &report.failure {
                    ctx.conversation.say(&format!(
                        "Execution failed during the {} phase:\n{}",
                        failure.phase.as_str(),
                        failure.original_error
                    ));
                }
            }
            RunVerdict::Exhausted => {
                ctx.conversation.say(&format!(
                    "Execution failed again after {} fix attempts; giving up.",
                    state.fix_attempts
                ));
            }
        }
        state.latest_execution_output = Some(report.output);
        state.last_failure = report.failure;
        state.routing_decision = Some(RoutingDecision::from(verdict));
    })
}

fn execute(
    ctx: &StepContext<'_>,
    state: &RoundState,
) -> Result<(SandboxReport, RunVerdict), StepError> {
    let inputs = state.execute_inputs()?;
    let workspace = ctx.session.workspace();
    // The workspace must hold what the state says is current.
    workspace
        .commit_code(inputs.code)
        .map_err(StepError::Workspace)?;
    workspace
        .commit_container_files(inputs.container)
        .map_err(StepError::Workspace)?;

    let report = execute_in_sandbox(ctx.sandbox, ctx.session).map_err(StepError::Sandbox)?;
    let verdict = if report.succeeded() {
        RunVerdict::Succeeded
    } else if ctx.config.controller.fix_budget_spent(inputs.fix_attempts) {
        RunVerdict::Exhausted
    } else {
        RunVerdict::Failed
    };
    Ok((report, verdict))
}
