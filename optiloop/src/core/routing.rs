//! Controller stages, routing decisions, and the transition table.
//!
//! Steps never pick the next stage themselves. They write a
//! [`RoutingDecision`] into the round state and the controller looks the
//! pair up in [`next_stage`]. Decision states only produce their own narrow
//! choice enum ([`PlanChoice`], [`RunVerdict`], [`RoundChoice`]) so invalid
//! pairs cannot be written by a well-typed step; the table still rejects
//! them with a [`TransitionError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Controller stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyze,
    GenerateCode,
    BuildEnvironment,
    Execute,
    FixCode,
    AnalyzeOutput,
    LoopAgain,
    FinalReport,
    Cancelled,
    GaveUp,
}

impl Stage {
    pub const INITIAL: Stage = Stage::Analyze;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::GenerateCode => "generate_code",
            Self::BuildEnvironment => "build_environment",
            Self::Execute => "execute",
            Self::FixCode => "fix_code",
            Self::AnalyzeOutput => "analyze_output",
            Self::LoopAgain => "loop_again",
            Self::FinalReport => "final_report",
            Self::Cancelled => "cancelled",
            Self::GaveUp => "gave_up",
        }
    }

    /// Stages with no outgoing transition.
    ///
    /// `FinalReport` still runs its step before the run ends.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FinalReport | Self::Cancelled | Self::GaveUp)
    }

    /// Stages whose outgoing edge depends on a routing decision.
    pub fn is_decision_point(self) -> bool {
        matches!(self, Self::Analyze | Self::Execute | Self::AnalyzeOutput)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control signal written by the step that just ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingDecision {
    Continue,
    RetryFix,
    LoopAgain,
    Done,
    Cancel,
    NewPlan,
    GiveUp,
}

impl RoutingDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::RetryFix => "retry-fix",
            Self::LoopAgain => "loop-again",
            Self::Done => "done",
            Self::Cancel => "cancel",
            Self::NewPlan => "new-plan",
            Self::GiveUp => "give-up",
        }
    }
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User choice at the plan checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChoice {
    Continue,
    NewPlan,
    Cancel,
}

impl From<PlanChoice> for RoutingDecision {
    fn from(choice: PlanChoice) -> Self {
        match choice {
            PlanChoice::Continue => Self::Continue,
            PlanChoice::NewPlan => Self::NewPlan,
            PlanChoice::Cancel => Self::Cancel,
        }
    }
}

/// Outcome of a sandbox attempt, derived from exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunVerdict {
    Succeeded,
    Failed,
    /// Failed, and the fix budget is spent.
    Exhausted,
}

impl From<RunVerdict> for RoutingDecision {
    fn from(verdict: RunVerdict) -> Self {
        match verdict {
            RunVerdict::Succeeded => Self::Continue,
            RunVerdict::Failed => Self::RetryFix,
            RunVerdict::Exhausted => Self::GiveUp,
        }
    }
}

/// User choice at the end-of-round checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundChoice {
    Continue,
    Done,
}

impl From<RoundChoice> for RoutingDecision {
    fn from(choice: RoundChoice) -> Self {
        match choice {
            RoundChoice::Continue => Self::LoopAgain,
            RoundChoice::Done => Self::Done,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("stage {0} is terminal")]
    Terminal(Stage),
    #[error("stage {0} requires a routing decision")]
    MissingDecision(Stage),
    #[error("no transition from {stage} on {decision}")]
    Unmapped {
        stage: Stage,
        decision: RoutingDecision,
    },
}

/// Look up the next stage.
///
/// Unconditional edges ignore `decision`; decision points require one.
pub fn next_stage(
    stage: Stage,
    decision: Option<RoutingDecision>,
) -> Result<Stage, TransitionError> {
    use RoutingDecision as D;

    match stage {
        Stage::GenerateCode | Stage::LoopAgain => return Ok(Stage::BuildEnvironment),
        Stage::BuildEnvironment | Stage::FixCode => return Ok(Stage::Execute),
        Stage::FinalReport | Stage::Cancelled | Stage::GaveUp => {
            return Err(TransitionError::Terminal(stage));
        }
        Stage::Analyze | Stage::Execute | Stage::AnalyzeOutput => {}
    }

    let decision = decision.ok_or(TransitionError::MissingDecision(stage))?;
    let next = match (stage, decision) {
        (Stage::Analyze, D::Continue) => Stage::GenerateCode,
        (Stage::Analyze, D::NewPlan) => Stage::Analyze,
        (Stage::Analyze, D::Cancel) => Stage::Cancelled,
        (Stage::Execute, D::Continue) => Stage::AnalyzeOutput,
        (Stage::Execute, D::RetryFix) => Stage::FixCode,
        (Stage::Execute, D::GiveUp) => Stage::GaveUp,
        (Stage::AnalyzeOutput, D::LoopAgain) => Stage::LoopAgain,
        (Stage::AnalyzeOutput, D::Done) => Stage::FinalReport,
        _ => return Err(TransitionError::Unmapped { stage, decision }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STAGES: [Stage; 10] = [
        Stage::Analyze,
        Stage::GenerateCode,
        Stage::BuildEnvironment,
        Stage::Execute,
        Stage::FixCode,
        Stage::AnalyzeOutput,
        Stage::LoopAgain,
        Stage::FinalReport,
        Stage::Cancelled,
        Stage::GaveUp,
    ];

    const ALL_DECISIONS: [RoutingDecision; 7] = [
        RoutingDecision::Continue,
        RoutingDecision::RetryFix,
        RoutingDecision::LoopAgain,
        RoutingDecision::Done,
        RoutingDecision::Cancel,
        RoutingDecision::NewPlan,
        RoutingDecision::GiveUp,
    ];

    #[test]
    fn plan_checkpoint_edges() {
        assert_eq!(
            next_stage(Stage::Analyze, Some(PlanChoice::Continue.into())),
            Ok(Stage::GenerateCode)
        );
        assert_eq!(
            next_stage(Stage::Analyze, Some(PlanChoice::NewPlan.into())),
            Ok(Stage::Analyze)
        );
        assert_eq!(
            next_stage(Stage::Analyze, Some(PlanChoice::Cancel.into())),
            Ok(Stage::Cancelled)
        );
    }

    #[test]
    fn execute_edges_follow_verdict() {
        assert_eq!(
            next_stage(Stage::Execute, Some(RunVerdict::Succeeded.into())),
            Ok(Stage::AnalyzeOutput)
        );
        assert_eq!(
            next_stage(Stage::Execute, Some(RunVerdict::Failed.into())),
            Ok(Stage::FixCode)
        );
        assert_eq!(
            next_stage(Stage::Execute, Some(RunVerdict::Exhausted.into())),
            Ok(Stage::GaveUp)
        );
    }

    #[test]
    fn round_checkpoint_edges() {
        assert_eq!(
            next_stage(Stage::AnalyzeOutput, Some(RoundChoice::Continue.into())),
            Ok(Stage::LoopAgain)
        );
        assert_eq!(
            next_stage(Stage::AnalyzeOutput, Some(RoundChoice::Done.into())),
            Ok(Stage::FinalReport)
        );
    }

    #[test]
    fn unconditional_edges_ignore_stale_decisions() {
        for decision in ALL_DECISIONS {
            assert_eq!(
                next_stage(Stage::GenerateCode, Some(decision)),
                Ok(Stage::BuildEnvironment)
            );
            assert_eq!(
                next_stage(Stage::LoopAgain, Some(decision)),
                Ok(Stage::BuildEnvironment)
            );
            assert_eq!(
                next_stage(Stage::BuildEnvironment, Some(decision)),
                Ok(Stage::Execute)
            );
            assert_eq!(next_stage(Stage::FixCode, Some(decision)), Ok(Stage::Execute));
        }
        assert_eq!(next_stage(Stage::FixCode, None), Ok(Stage::Execute));
    }

    #[test]
    fn terminal_stages_have_no_edges() {
        for stage in ALL_STAGES.into_iter().filter(|s| s.is_terminal()) {
            assert_eq!(
                next_stage(stage, Some(RoutingDecision::Continue)),
                Err(TransitionError::Terminal(stage))
            );
        }
    }

    #[test]
    fn decision_points_require_a_decision() {
        for stage in ALL_STAGES.into_iter().filter(|s| s.is_decision_point()) {
            assert_eq!(
                next_stage(stage, None),
                Err(TransitionError::MissingDecision(stage))
            );
        }
    }

    #[test]
    fn decisions_outside_the_table_are_rejected() {
        let err = next_stage(Stage::Analyze, Some(RoutingDecision::RetryFix)).unwrap_err();
        assert!(err.to_string().contains("no transition from analyze on retry-fix"));
        assert!(next_stage(Stage::AnalyzeOutput, Some(RoutingDecision::Cancel)).is_err());
        assert!(next_stage(Stage::Execute, Some(RoutingDecision::Done)).is_err());
    }

    #[test]
    fn repeated_failures_keep_routing_to_fix() {
        let mut stage = Stage::Execute;
        for _ in 0..3 {
            stage = next_stage(stage, Some(RunVerdict::Failed.into())).expect("to fix");
            assert_eq!(stage, Stage::FixCode);
            stage = next_stage(stage, None).expect("back to execute");
            assert_eq!(stage, Stage::Execute);
        }
    }
}
