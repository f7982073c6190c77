//! Typed results exchanged with the model collaborator.
//!
//! Each struct mirrors one JSON Schema under `schemas/`. The schemas are the
//! contract the model output is validated against before it is deserialized
//! into these types, so field names here must stay in sync with them.

use serde::{Deserialize, Serialize};

/// Structured problem analysis produced once per planning cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purpose {
    /// Short statement of what the user wants to achieve.
    pub user_summary: String,
    /// Problem classification (e.g. "cutting stock", "vehicle routing").
    pub problem_type: String,
    /// What "better" means for this problem.
    pub optimization_focus: String,
    /// Textual description of constraints and resource limits.
    pub resource_requirements: String,
    /// Message shown to the user explaining the plan.
    pub chatbot_response: String,
    /// Ordered, numbered plan text.
    pub next_steps: String,
}

/// A generated solver artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    /// Solver source text, written verbatim to the workspace.
    pub source: String,
    /// Package specifiers, one manifest line each.
    pub dependencies: Vec<String>,
    /// Auxiliary file names the sandbox must have present.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl Code {
    /// Render `dependencies` as a manifest (one specifier per line).
    pub fn manifest(&self) -> String {
        let mut buf = String::new();
        for dep in &self.dependencies {
            let dep = dep.trim();
            if dep.is_empty() {
                continue;
            }
            buf.push_str(dep);
            buf.push('\n');
        }
        buf
    }
}

/// Narrow result of the fix step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFix {
    pub fixed_source: String,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    pub dependencies_changed: bool,
    pub fix_description: String,
    pub original_error: String,
}

impl CodeFix {
    /// Convert the fix back into a full `Code`, carrying over what the fix
    /// did not replace.
    ///
    /// Dependencies are only replaced when the fix flags a change and
    /// supplies a list; resources always carry over.
    pub fn into_code(self, previous: &Code) -> Code {
        let dependencies = match (self.dependencies_changed, self.dependencies) {
            (true, Some(deps)) => deps,
            _ => previous.dependencies.clone(),
        };
        Code {
            source: self.fixed_source,
            dependencies,
            resources: previous.resources.clone(),
        }
    }
}

/// Container descriptors for the sandbox build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFiles {
    pub dockerfile: String,
    pub compose_file: String,
}

/// Fields the model fills in when interpreting a sandbox run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputAnalysis {
    pub answer: String,
    pub answer_description: String,
    pub objective_value: Option<f64>,
    pub is_goal_achieved: String,
    pub explanation: String,
    pub improvement: String,
}

/// Structured interpretation of one sandbox run, tied to the code that
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputOfCode {
    pub answer: String,
    pub answer_description: String,
    pub objective_value: Option<f64>,
    pub is_goal_achieved: String,
    pub explanation: String,
    pub improvement: String,
    /// Exact source that was executed for this result.
    pub code: String,
}

impl OutputOfCode {
    pub fn from_analysis(analysis: OutputAnalysis, code: &Code) -> Self {
        Self {
            answer: analysis.answer,
            answer_description: analysis.answer_description,
            objective_value: analysis.objective_value,
            is_goal_achieved: analysis.is_goal_achieved,
            explanation: analysis.explanation,
            improvement: analysis.improvement,
            code: code.source.clone(),
        }
    }
}

/// The model's pick among historical rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    /// 1-based index into the result history.
    pub index_of_optimization: usize,
    pub reason: String,
}

/// Which sandbox phase failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxPhase {
    Build,
    Run,
}

impl SandboxPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Run => "run",
        }
    }
}

/// Failure context forwarded to the fix step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub phase: SandboxPhase,
    /// Relevant excerpt of the failing phase output.
    pub original_error: String,
}
