//! The iteration controller.
//!
//! Dispatches the step for the current stage, then looks the next stage up
//! in [`next_stage`]. The loop ends at a terminal stage or as soon as a step
//! halts; a halted run can be picked up again with [`Controller::resume`].

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::report::FinalSelection;
use crate::core::routing::{RoutingDecision, Stage, next_stage};
use crate::core::state::RoundState;
use crate::steps::{StepContext, StepOutcome, run_stage};

/// Why the controller stopped.
#[derive(Debug)]
pub enum RunOutcome {
    /// The final report resolved to one history entry.
    Completed {
        state: RoundState,
        selection: FinalSelection,
    },
    Cancelled(RoundState),
    /// The fix budget ran out.
    GaveUp(RoundState),
    /// `stage` failed; resubmit it with [`Controller::resume`].
    Halted {
        stage: Stage,
        state: RoundState,
        reason: String,
    },
}

/// One edge taken by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    pub decision: Option<RoutingDecision>,
}

pub struct Controller<'a> {
    ctx: StepContext<'a>,
}

impl<'a> Controller<'a> {
    pub fn new(ctx: StepContext<'a>) -> Self {
        Self { ctx }
    }

    /// Drive a fresh submission from the initial stage.
    pub fn run<F: FnMut(&Transition)>(
        &self,
        state: RoundState,
        on_transition: F,
    ) -> Result<RunOutcome> {
        self.resume(state, Stage::INITIAL, on_transition)
    }

    /// Drive `state` starting with the step for `stage`.
    ///
    /// Fails only when the transition table rejects a step's decision.
    #[instrument(skip_all, fields(session = %self.ctx.session.id, start = stage.as_str()))]
    pub fn resume<F: FnMut(&Transition)>(
        &self,
        state: RoundState,
        stage: Stage,
        mut on_transition: F,
    ) -> Result<RunOutcome> {
        let mut stage = stage;
        let mut state = state;
        loop {
            match stage {
                Stage::Cancelled => {
                    info!("run cancelled");
                    return Ok(RunOutcome::Cancelled(state));
                }
                Stage::GaveUp => {
                    info!(fix_attempts = state.fix_attempts, "run gave up");
                    return Ok(RunOutcome::GaveUp(state));
                }
                _ => {}
            }

            let next_state = match run_stage(&self.ctx, stage, state) {
                StepOutcome::Advanced(next_state) => next_state,
                StepOutcome::Reported { state, selection } => {
                    info!(
                        index = selection.index,
                        rounds = state.result_history().len(),
                        "run completed"
                    );
                    return Ok(RunOutcome::Completed { state, selection });
                }
                StepOutcome::Halted { state, reason } => {
                    info!(stage = stage.as_str(), "run halted");
                    return Ok(RunOutcome::Halted {
                        stage,
                        state,
                        reason,
                    });
                }
            };

            if stage == Stage::FinalReport {
                return Err(anyhow!("final report step advanced without a selection"));
            }
            let decision = if stage.is_decision_point() {
                next_state.routing_decision
            } else {
                None
            };
            let next = next_stage(stage, decision)
                .with_context(|| format!("route after {stage}"))?;
            debug!(from = stage.as_str(), to = next.as_str(), ?decision, "transition");
            on_transition(&Transition {
                from: stage,
                to: next,
                decision,
            });
            stage = next;
            state = next_state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::routing::{PlanChoice, RoundChoice};
    use crate::test_support::{
        ScriptedConversation, ScriptedModel, ScriptedSandbox, TestHarness, analysis_json,
        code_json, container_json, purpose_json, report_json,
    };

    #[test]
    fn new_plan_loops_back_to_analyze() {
        let harness = TestHarness::new();
        let model = ScriptedModel::new().then(purpose_json()).then(purpose_json());
        let sandbox = ScriptedSandbox::new();
        let conversation = ScriptedConversation::new()
            .plan(PlanChoice::NewPlan)
            .plan(PlanChoice::Cancel);
        let mut transitions = Vec::new();
        let outcome = Controller::new(harness.ctx(&model, &sandbox, &conversation))
            .run(RoundState::new("Cut rolls", ""), |t| transitions.push(*t))
            .expect("run");

        assert!(matches!(outcome, RunOutcome::Cancelled(_)));
        assert_eq!(model.steps(), vec!["analyze", "analyze"]);
        assert_eq!(
            transitions.iter().map(|t| t.to).collect::<Vec<_>>(),
            vec![Stage::Analyze, Stage::Cancelled]
        );
    }

    #[test]
    fn halted_run_resumes_at_failed_stage() {
        let harness = TestHarness::new();
        let model = ScriptedModel::new()
            .then(purpose_json())
            .then_raw("{\"source\": 42}")
            .then(code_json("print('waste', 3)"))
            .then(container_json())
            .then(analysis_json(Some(3.0)))
            .then(report_json(1));
        let sandbox = ScriptedSandbox::new().run_succeeds("waste 3\n");
        let conversation = ScriptedConversation::new()
            .plan(PlanChoice::Continue)
            .round(RoundChoice::Done);
        let controller = Controller::new(harness.ctx(&model, &sandbox, &conversation));

        let outcome = controller
            .run(RoundState::new("Cut rolls", ""), |_| {})
            .expect("run");
        let RunOutcome::Halted { stage, state, .. } = outcome else {
            panic!("expected a halt: {outcome:?}");
        };
        assert_eq!(stage, Stage::GenerateCode);
        assert_eq!(state.iteration_count, 0);
        assert!(state.purpose.is_some());

        let outcome = controller.resume(state, stage, |_| {}).expect("resume");
        let RunOutcome::Completed { state, selection } = outcome else {
            panic!("expected completion: {outcome:?}");
        };
        assert_eq!(state.iteration_count, 1);
        assert_eq!(selection.index, 1);
        assert_eq!(model.remaining(), 0);
    }

    #[test]
    fn terminal_stage_resumes_to_its_outcome() {
        let harness = TestHarness::new();
        let model = ScriptedModel::new();
        let sandbox = ScriptedSandbox::new();
        let conversation = ScriptedConversation::new();
        let outcome = Controller::new(harness.ctx(&model, &sandbox, &conversation))
            .resume(RoundState::new("Cut rolls", ""), Stage::GaveUp, |_| {})
            .expect("resume");
        assert!(matches!(outcome, RunOutcome::GaveUp(_)));
        assert!(model.requests().is_empty());
    }
}
