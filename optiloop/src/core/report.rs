//! Final report aggregation over the result history.

use serde::Serialize;
use thiserror::Error;

use crate::core::state::ResultHistory;
use crate::core::types::{FinalReport, OutputOfCode};

/// What the model sees of one historical round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonEntry {
    /// 1-based position in the history.
    pub index: usize,
    pub objective_value: Option<f64>,
    pub is_goal_achieved: String,
}

/// The report after the model's pick has been resolved against history.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalSelection {
    pub index: usize,
    pub reason: String,
    pub entry: OutputOfCode,
}

impl FinalSelection {
    /// Source of the chosen round, exactly as it was executed.
    pub fn code(&self) -> &str {
        &self.entry.code
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("report picked optimization {index}, but only {available} exist")]
pub struct SelectionOutOfRange {
    pub index: usize,
    pub available: usize,
}

pub fn comparison_entries(history: &ResultHistory) -> Vec<ComparisonEntry> {
    history
        .entries()
        .iter()
        .enumerate()
        .map(|(i, result)| ComparisonEntry {
            index: i + 1,
            objective_value: result.objective_value,
            is_goal_achieved: result.is_goal_achieved.clone(),
        })
        .collect()
}

/// Resolve the model's 1-based pick to the stored history entry.
pub fn resolve_selection(
    history: &ResultHistory,
    report: FinalReport,
) -> Result<FinalSelection, SelectionOutOfRange> {
    let entry = history
        .get_one_based(report.index_of_optimization)
        .cloned()
        .ok_or(SelectionOutOfRange {
            index: report.index_of_optimization,
            available: history.len(),
        })?;
    Ok(FinalSelection {
        index: report.index_of_optimization,
        reason: report.reason,
        entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_result;

    fn history(codes: &[&str]) -> ResultHistory {
        let mut history = ResultHistory::default();
        for (i, code) in codes.iter().enumerate() {
            history.push(sample_result(code, Some(10.0 - i as f64)));
        }
        history
    }

    #[test]
    fn comparison_entries_are_one_based_triples() {
        let entries = comparison_entries(&history(&["a", "b"]));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[1].index, 2);
        assert_eq!(entries[1].objective_value, Some(9.0));
        let json = serde_json::to_value(&entries[0]).expect("json");
        let keys: Vec<&String> = json.as_object().expect("object").keys().collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn selection_returns_stored_code_verbatim() {
        let history = history(&["first()\n", "second()\n", "third()\n"]);
        for index in 1..=history.len() {
            let selection = resolve_selection(
                &history,
                FinalReport {
                    index_of_optimization: index,
                    reason: "best objective".to_string(),
                },
            )
            .expect("in range");
            assert_eq!(selection.code(), history.entries()[index - 1].code);
        }
    }

    #[test]
    fn selection_rejects_zero_and_past_end() {
        let history = history(&["only()"]);
        for index in [0, 2] {
            let err = resolve_selection(
                &history,
                FinalReport {
                    index_of_optimization: index,
                    reason: String::new(),
                },
            )
            .unwrap_err();
            assert_eq!(err.available, 1);
        }
    }
}
