//! Prompt rendering for each pipeline step.
//!
//! Templates are embedded minijinja sources split into sections by
//! `<!-- section:KEY required|droppable [keep-tail] -->` markers. After
//! rendering, the sections are fitted into the byte budget: droppable
//! sections go first (see [`DROP_ORDER`]), then the largest remaining
//! section is truncated until the prompt fits. `keep-tail` sections lose
//! their beginning instead of their end, since build logs and tracebacks
//! carry the error last.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::report::comparison_entries;
use crate::core::state::{
    AnalyzeInputs, EnvironmentInputs, FixInputs, GenerateInputs, NextRoundInputs, ReportInputs,
    ReviewInputs,
};

const TEMPLATES: [(&str, &str); 9] = [
    ("analyze", include_str!("prompts/analyze.md")),
    ("generate", include_str!("prompts/generate.md")),
    ("generate_no_data", include_str!("prompts/generate_no_data.md")),
    ("container_files", include_str!("prompts/container_files.md")),
    ("fix", include_str!("prompts/fix.md")),
    ("review", include_str!("prompts/review.md")),
    ("next_round", include_str!("prompts/next_round.md")),
    ("next_round_no_data", include_str!("prompts/next_round_no_data.md")),
    ("final_report", include_str!("prompts/final_report.md")),
];

/// Droppable sections in the order they are sacrificed.
const DROP_ORDER: [&str; 3] = ["code", "previous_code", "data"];

const TRUNCATION_MARK: &str = "\n[truncated]";
const HEAD_TRUNCATION_MARK: &str = "[truncated]\n";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)(\s+keep-tail)?\s*-->")
        .expect("section marker regex should be valid")
});

/// A rendered prompt and the template it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub template: &'static str,
    pub content: String,
}

/// Renders step prompts within a byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env, budget_bytes })
    }

    pub fn analyze(&self, inputs: &AnalyzeInputs<'_>) -> Result<Prompt> {
        self.render(
            "analyze",
            context! {
                user_input => inputs.user_input.trim(),
                attached_data => inputs.attached_data,
            },
        )
    }

    /// First-round generation. An empty `attached_data` selects the template
    /// that tells the model to embed its inputs.
    pub fn generate(&self, inputs: &GenerateInputs<'_>) -> Result<Prompt> {
        let template = if inputs.attached_data.is_empty() {
            "generate_no_data"
        } else {
            "generate"
        };
        self.render(
            template,
            context! {
                purpose => inputs.purpose,
                attached_data => inputs.attached_data,
            },
        )
    }

    pub fn container_files(&self, inputs: &EnvironmentInputs<'_>) -> Result<Prompt> {
        self.render(
            "container_files",
            context! {
                code => inputs.code,
                manifest => inputs.code.manifest(),
            },
        )
    }

    pub fn fix(&self, inputs: &FixInputs<'_>) -> Result<Prompt> {
        self.render(
            "fix",
            context! {
                code => inputs.code,
                manifest => inputs.code.manifest(),
                failure => inputs.failure,
            },
        )
    }

    pub fn review(&self, inputs: &ReviewInputs<'_>) -> Result<Prompt> {
        self.render(
            "review",
            context! {
                purpose => inputs.purpose,
                code => inputs.code,
                execution_output => inputs.execution_output,
            },
        )
    }

    pub fn next_round(&self, inputs: &NextRoundInputs<'_>) -> Result<Prompt> {
        let template = if inputs.attached_data.is_empty() {
            "next_round_no_data"
        } else {
            "next_round"
        };
        let previous_objective = inputs
            .previous_result
            .objective_value
            .map_or_else(|| "none".to_string(), |v| v.to_string());
        self.render(
            template,
            context! {
                purpose => inputs.purpose,
                attached_data => inputs.attached_data,
                previous_code => inputs.previous_code,
                previous_result => inputs.previous_result,
                previous_objective => previous_objective,
            },
        )
    }

    pub fn final_report(&self, inputs: &ReportInputs<'_>) -> Result<Prompt> {
        let comparison = serde_json::to_string_pretty(&comparison_entries(inputs.history))
            .context("serialize round comparison")?;
        self.render(
            "final_report",
            context! {
                user_input => inputs.user_input.trim(),
                comparison => comparison,
            },
        )
    }

    fn render(&self, template: &'static str, ctx: minijinja::Value) -> Result<Prompt> {
        let rendered = self
            .env
            .get_template(template)
            .and_then(|t| t.render(ctx))
            .with_context(|| format!("render {template} prompt"))?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        let content = render_sections(&sections);
        debug!(template, bytes = content.len(), "rendered prompt");
        Ok(Prompt { template, content })
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    keep_tail: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let start = caps.get(0).map_or(0, |m| m.end());
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let required = &caps[2] == "required";
        let content = rendered[start..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: caps[1].to_string(),
                required,
                keep_tail: caps.get(3).is_some(),
                content,
            });
        }
    }

    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Each pass empties at most one section, so this terminates.
    for _ in 0..sections.len() {
        let total = total_len(sections);
        if total <= budget {
            return;
        }
        let Some(idx) = largest_section(sections) else {
            return;
        };
        let allowed = budget.saturating_sub(total - sections[idx].content.len());
        let section = &mut sections[idx];
        let before_len = section.content.len();
        if section.keep_tail {
            truncate_head(&mut section.content, allowed);
        } else {
            truncate_tail(&mut section.content, allowed);
        }
        debug!(
            section = section.key,
            before_len,
            after_len = section.content.len(),
            "truncated section for budget"
        );
    }
}

/// Index of the largest section; ties go to the later one.
fn largest_section(sections: &[ParsedSection]) -> Option<usize> {
    sections
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.content.is_empty())
        .max_by_key(|(_, s)| s.content.len())
        .map(|(idx, _)| idx)
}

/// Keep the first `allowed` bytes, marking the cut.
fn truncate_tail(content: &mut String, allowed: usize) {
    if allowed > TRUNCATION_MARK.len() {
        let cut = floor_char_boundary(content, allowed - TRUNCATION_MARK.len());
        content.truncate(cut);
        content.push_str(TRUNCATION_MARK);
    } else {
        let cut = floor_char_boundary(content, allowed);
        content.truncate(cut);
    }
}

/// Keep the heading lines (up to and including the opening `<tag>` line)
/// and the last bytes of the body, marking the cut.
fn truncate_head(content: &mut String, allowed: usize) {
    let preamble_end = preamble_len(content);
    let fixed = preamble_end + HEAD_TRUNCATION_MARK.len();
    if allowed <= fixed {
        truncate_tail(content, allowed);
        return;
    }
    let keep = allowed - fixed;
    let tail_start = ceil_char_boundary(
        content,
        content.len().saturating_sub(keep).max(preamble_end),
    );
    let mut trimmed = String::with_capacity(allowed);
    trimmed.push_str(&content[..preamble_end]);
    trimmed.push_str(HEAD_TRUNCATION_MARK);
    trimmed.push_str(&content[tail_start..]);
    *content = trimmed;
}

fn preamble_len(content: &str) -> usize {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        offset += line.len();
        if line.starts_with('<') {
            return offset;
        }
    }
    0
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
