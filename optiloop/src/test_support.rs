//! Scripted collaborators and fixtures for tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::routing::{PlanChoice, RoundChoice};
use crate::core::types::{Code, OutputOfCode, Purpose};
use crate::io::config::OptiloopConfig;
use crate::io::conversation::Conversation;
use crate::io::model::{ModelClient, ModelRequest};
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::{PhaseOutput, Sandbox};
use crate::io::workspace::{SOURCE_FILE, Session};
use crate::steps::StepContext;

pub fn sample_purpose() -> Purpose {
    Purpose {
        user_summary: "Cut stock rolls to fill orders".to_string(),
        problem_type: "cutting stock".to_string(),
        optimization_focus: "minimize total waste".to_string(),
        resource_requirements: "rolls are 100 units wide".to_string(),
        chatbot_response: "This is a cutting stock problem.".to_string(),
        next_steps: "1. Enumerate patterns\n2. Solve the master LP".to_string(),
    }
}

pub fn sample_code(source: &str) -> Code {
    Code {
        source: source.to_string(),
        dependencies: vec!["pulp".to_string()],
        resources: Vec::new(),
    }
}

pub fn sample_result(code: &str, objective_value: Option<f64>) -> OutputOfCode {
    OutputOfCode {
        answer: "patterns chosen".to_string(),
        answer_description: "3 patterns".to_string(),
        objective_value,
        is_goal_achieved: "yes".to_string(),
        explanation: "feasible".to_string(),
        improvement: "try column generation".to_string(),
        code: code.to_string(),
    }
}

pub fn purpose_json() -> Value {
    serde_json::to_value(sample_purpose()).expect("purpose json")
}

pub fn code_json(source: &str) -> Value {
    json!({"source": source, "dependencies": ["pulp"], "resources": []})
}

pub fn container_json() -> Value {
    json!({
        "dockerfile": "FROM python:3.12-slim\nWORKDIR /app\nCOPY . .\nRUN pip install -r requirements.txt\n",
        "compose_file": "services:\n  solver:\n    build: .\n    command: python generated.py\n"
    })
}

pub fn fix_json(source: &str) -> Value {
    json!({
        "fixed_source": source,
        "dependencies": null,
        "dependencies_changed": false,
        "fix_description": "use the right column name",
        "original_error": "KeyError: 'Qty'"
    })
}

pub fn analysis_json(objective_value: Option<f64>) -> Value {
    json!({
        "answer": "patterns chosen",
        "answer_description": "3 patterns",
        "objective_value": objective_value,
        "is_goal_achieved": "yes",
        "explanation": "feasible",
        "improvement": "try column generation"
    })
}

pub fn report_json(index: usize) -> Value {
    json!({"index_of_optimization": index, "reason": "lowest waste"})
}

/// One request the scripted model received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Artifact name of the step (e.g. `generate_code`).
    pub step: String,
    pub prompt: String,
}

enum ScriptedReply {
    Raw(String),
    Fail(String),
}

/// Model double that replays queued replies in order.
#[derive(Default)]
pub struct ScriptedModel {
    replies: RefCell<VecDeque<ScriptedReply>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, value: Value) -> Self {
        self.then_raw(&value.to_string())
    }

    pub fn then_raw(self, raw: &str) -> Self {
        self.replies
            .borrow_mut()
            .push_back(ScriptedReply::Raw(raw.to_string()));
        self
    }

    /// Queue a process failure.
    pub fn then_fail(self, message: &str) -> Self {
        self.replies
            .borrow_mut()
            .push_back(ScriptedReply::Fail(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn steps(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|r| r.step.clone()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl ModelClient for ScriptedModel {
    fn exec(&self, request: &ModelRequest) -> Result<()> {
        let step = request
            .output_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".output.json"))
            .unwrap_or_default()
            .to_string();
        self.requests.borrow_mut().push(RecordedRequest {
            step,
            prompt: request.prompt.clone(),
        });
        match self.replies.borrow_mut().pop_front() {
            Some(ScriptedReply::Raw(raw)) => {
                if let Some(parent) = request.output_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&request.output_path, raw)?;
                Ok(())
            }
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted model has no reply left")),
        }
    }
}

struct ScriptedAttempt {
    build: PhaseOutput,
    run: Option<PhaseOutput>,
}

/// Sandbox double that replays queued attempts in order.
#[derive(Default)]
pub struct ScriptedSandbox {
    attempts: RefCell<VecDeque<ScriptedAttempt>>,
    current_run: RefCell<Option<PhaseOutput>>,
    built_sources: RefCell<Vec<String>>,
    builds: Cell<usize>,
    runs: Cell<usize>,
    teardowns: Cell<usize>,
    teardown_fails: Cell<bool>,
}

fn phase(output: &str, succeeded: bool, timed_out: bool) -> PhaseOutput {
    PhaseOutput {
        output: output.to_string(),
        succeeded,
        timed_out,
    }
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, build: PhaseOutput, run: Option<PhaseOutput>) -> Self {
        self.attempts
            .borrow_mut()
            .push_back(ScriptedAttempt { build, run });
        self
    }

    pub fn run_succeeds(self, output: &str) -> Self {
        self.push(phase("built\n", true, false), Some(phase(output, true, false)))
    }

    pub fn run_fails(self, output: &str) -> Self {
        self.push(phase("built\n", true, false), Some(phase(output, false, false)))
    }

    pub fn run_times_out(self, output: &str) -> Self {
        self.push(phase("built\n", true, false), Some(phase(output, false, true)))
    }

    pub fn build_fails(self, output: &str) -> Self {
        self.push(phase(output, false, false), None)
    }

    pub fn teardown_fails(self) -> Self {
        self.teardown_fails.set(true);
        self
    }

    pub fn builds(&self) -> usize {
        self.builds.get()
    }

    pub fn runs(&self) -> usize {
        self.runs.get()
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.get()
    }

    /// `generated.py` as it was in the workspace at each build.
    pub fn built_sources(&self) -> Vec<String> {
        self.built_sources.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn build(&self, workspace: &Path, _log_path: &Path) -> Result<PhaseOutput> {
        self.builds.set(self.builds.get() + 1);
        let source = fs::read_to_string(workspace.join(SOURCE_FILE)).unwrap_or_default();
        self.built_sources.borrow_mut().push(source);
        let attempt = self
            .attempts
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted sandbox has no attempt left"))?;
        *self.current_run.borrow_mut() = attempt.run;
        Ok(attempt.build)
    }

    fn run(&self, _workspace: &Path, _log_path: &Path) -> Result<PhaseOutput> {
        self.runs.set(self.runs.get() + 1);
        self.current_run
            .borrow_mut()
            .take()
            .ok_or_else(|| anyhow!("scripted attempt has no run phase"))
    }

    fn teardown(&self, _workspace: &Path) -> Result<()> {
        self.teardowns.set(self.teardowns.get() + 1);
        if self.teardown_fails.get() {
            return Err(anyhow!("scripted teardown failure"));
        }
        Ok(())
    }
}

/// Conversation double with queued checkpoint answers.
#[derive(Default)]
pub struct ScriptedConversation {
    plans: RefCell<VecDeque<PlanChoice>>,
    rounds: RefCell<VecDeque<RoundChoice>>,
    said: RefCell<Vec<String>>,
}

impl ScriptedConversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(self, choice: PlanChoice) -> Self {
        self.plans.borrow_mut().push_back(choice);
        self
    }

    pub fn round(self, choice: RoundChoice) -> Self {
        self.rounds.borrow_mut().push_back(choice);
        self
    }

    pub fn said(&self) -> Vec<String> {
        self.said.borrow().clone()
    }
}

impl Conversation for ScriptedConversation {
    fn say(&self, message: &str) {
        self.said.borrow_mut().push(message.to_string());
    }

    fn choose_plan(&self, _purpose: &Purpose) -> Result<PlanChoice> {
        self.plans
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted plan answer left"))
    }

    fn choose_round(&self, _result: &OutputOfCode) -> Result<RoundChoice> {
        self.rounds
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted round answer left"))
    }
}

/// A session in a temp directory plus the config and prompts steps need.
pub struct TestHarness {
    pub temp: tempfile::TempDir,
    pub session: Session,
    pub config: OptiloopConfig,
    pub prompts: PromptBuilder,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(OptiloopConfig::default())
    }

    pub fn with_config(config: OptiloopConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = Session::create_with_id(temp.path(), "test").expect("session");
        let prompts =
            PromptBuilder::new(config.controller.prompt_budget_bytes).expect("prompt templates");
        Self {
            temp,
            session,
            config,
            prompts,
        }
    }

    pub fn ctx<'a>(
        &'a self,
        model: &'a ScriptedModel,
        sandbox: &'a ScriptedSandbox,
        conversation: &'a ScriptedConversation,
    ) -> StepContext<'a> {
        StepContext {
            model,
            sandbox,
            conversation,
            config: &self.config,
            session: &self.session,
            prompts: &self.prompts,
        }
    }

    pub fn workspace_source(&self) -> String {
        self.session.workspace().read_source().expect("workspace source")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
