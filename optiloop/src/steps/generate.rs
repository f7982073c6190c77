//! First-round code generation.

use tracing::{info, instrument};

use crate::core::routing::Stage;
use crate::core::state::RoundState;
use crate::core::types::Code;
use crate::io::schemas::SchemaKind;
use crate::steps::{StepContext, StepError, StepOutcome, warn_missing_resources};

#[instrument(skip_all, fields(stage = "generate_code"))]
pub fn run(ctx: &StepContext<'_>, state: RoundState) -> StepOutcome {
    let result = generate(ctx, &state);
    ctx.finish(Stage::GenerateCode, state, result, |state, code| {
        state.iteration_count += 1;
        info!(iteration = state.iteration_count, "generated solver");
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

fn generate(ctx: &StepContext<'_>, state: &RoundState) -> Result<Code, StepError> {
    let prompt = ctx
        .prompts
        .generate(&state.generate_inputs()?)
        .map_err(StepError::Prompt)?;
    let code: Code = ctx.request("generate_code", SchemaKind::Code, &prompt)?;
    ctx.session
        .workspace()
        .commit_code(&code)
        .map_err(StepError::Workspace)?;
    warn_missing_resources(ctx, &code);
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedConversation, ScriptedModel, ScriptedSandbox, TestHarness, code_json,
        sample_purpose,
    };
    use serde_json::json;

    fn planned(attached_data: &str) -> RoundState {
        let mut state = RoundState::new("Cut rolls", attached_data);
        state.purpose = Some(sample_purpose());
        state
    }

    #[test]
    fn commits_source_verbatim_and_counts_iteration() {
        let harness = TestHarness::new();
        let source = "import pulp\n\n\ndef main():\n    print('waste', 3)  \n\nmain()\n";
        let model = ScriptedModel::new().then(code_json(source));
        let sandbox = ScriptedSandbox::new();
        let conversation = ScriptedConversation::new();
        let outcome = run(&harness.ctx(&model, &sandbox, &conversation), planned(""));
        let StepOutcome::Advanced(state) = outcome else {
            panic!("generate should advance: {outcome:?}");
        };
        assert_eq!(state.iteration_count, 1);
        assert_eq!(state.current_code.as_ref().map(|c| c.source.as_str()), Some(source));
        assert_eq!(harness.workspace_source(), source);
    }

    #[test]
    fn template_depends_on_attached_data() {
        let harness = TestHarness::new();
        let model = ScriptedModel::new()
            .then(code_json("print(1)"))
            .then(code_json("print(2)"));
        let sandbox = ScriptedSandbox::new();
        let conversation = ScriptedConversation::new();
        let ctx = harness.ctx(&model, &sandbox, &conversation);

        run(&ctx, planned(""));
        run(&ctx, planned("File: orders.csv, Sheet: orders\nData:\n[]"));

        let requests = model.requests();
        assert!(requests[0].prompt.contains("No data files were supplied"));
        assert!(!requests[0].prompt.contains("<data>"));
        assert!(requests[1].prompt.contains("<data>"));
        assert!(requests[1].prompt.contains("File: orders.csv"));
    }

    #[test]
    fn missing_resource_is_reported() {
        let harness = TestHarness::new();
        let model = ScriptedModel::new().then(json!({
            "source": "open('orders.csv')",
            "dependencies": [],
            "resources": ["orders.csv"]
        }));
        let sandbox = ScriptedSandbox::new();
        let conversation = ScriptedConversation::new();
        run(&harness.ctx(&model, &sandbox, &conversation), planned(""));
        assert!(
            conversation
                .said()
                .iter()
                .any(|m| m.contains("not attached: orders.csv"))
        );
    }

    #[test]
    fn missing_purpose_halts_without_calling_model() {
        let harness = TestHarness::new();
        let model = ScriptedModel::new().then(code_json("print(1)"));
        let sandbox = ScriptedSandbox::new();
        let conversation = ScriptedConversation::new();
        let outcome = run(
            &harness.ctx(&model, &sandbox, &conversation),
            RoundState::new("Cut rolls", ""),
        );
        assert!(matches!(outcome, StepOutcome::Halted { .. }));
        assert!(model.requests().is_empty());
        assert!(!harness.session.workspace().source_path().exists());
    }
}
