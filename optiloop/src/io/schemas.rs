//! Output schemas shipped with the binary.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::structured::ResultSchema;

/// One of the result contracts the model is asked to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Purpose,
    Code,
    CodeFix,
    ContainerFiles,
    OutputAnalysis,
    FinalReport,
}

impl SchemaKind {
    pub const ALL: [SchemaKind; 6] = [
        SchemaKind::Purpose,
        SchemaKind::Code,
        SchemaKind::CodeFix,
        SchemaKind::ContainerFiles,
        SchemaKind::OutputAnalysis,
        SchemaKind::FinalReport,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Purpose => "purpose",
            Self::Code => "code",
            Self::CodeFix => "code_fix",
            Self::ContainerFiles => "container_files",
            Self::OutputAnalysis => "output_analysis",
            Self::FinalReport => "final_report",
        }
    }

    pub fn source(self) -> &'static str {
        match self {
            Self::Purpose => include_str!("../../schemas/purpose.schema.json"),
            Self::Code => include_str!("../../schemas/code.schema.json"),
            Self::CodeFix => include_str!("../../schemas/code_fix.schema.json"),
            Self::ContainerFiles => include_str!("../../schemas/container_files.schema.json"),
            Self::OutputAnalysis => include_str!("../../schemas/output_analysis.schema.json"),
            Self::FinalReport => include_str!("../../schemas/final_report.schema.json"),
        }
    }

    pub fn compile(self) -> Result<ResultSchema> {
        let value: Value = serde_json::from_str(self.source())
            .with_context(|| format!("parse embedded {} schema", self.name()))?;
        ResultSchema::compile(self.name(), &value)
    }

    /// Write the schema where the model CLI can read it.
    pub fn write_to(self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create schema dir {}", parent.display()))?;
        }
        fs::write(path, self.source()).with_context(|| format!("write schema {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CodeFix, OutputAnalysis, Purpose};

    #[test]
    fn every_embedded_schema_compiles() {
        for kind in SchemaKind::ALL {
            kind.compile()
                .unwrap_or_else(|err| panic!("{} schema: {err:#}", kind.name()));
        }
    }

    #[test]
    fn objective_value_may_be_null() {
        let schema = SchemaKind::OutputAnalysis.compile().expect("compile");
        let analysis: OutputAnalysis = schema
            .parse(
                r#"{"answer": "infeasible", "answer_description": "", "objective_value": null,
                    "is_goal_achieved": "no", "explanation": "", "improvement": ""}"#,
            )
            .expect("parse");
        assert_eq!(analysis.objective_value, None);
    }

    #[test]
    fn purpose_rejects_missing_fields() {
        let schema = SchemaKind::Purpose.compile().expect("compile");
        let err = schema
            .parse::<Purpose>(r#"{"user_summary": "cut rolls"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("purpose"));
    }

    #[test]
    fn code_fix_accepts_null_dependencies() {
        let schema = SchemaKind::CodeFix.compile().expect("compile");
        let fix: CodeFix = schema
            .parse(
                r#"{"fixed_source": "print(1)", "dependencies": null, "dependencies_changed": false,
                    "fix_description": "typo", "original_error": "NameError"}"#,
            )
            .expect("parse");
        assert_eq!(fix.dependencies, None);
    }
}
