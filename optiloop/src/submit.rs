//! Turning a user submission into a session and its initial round state.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{info, instrument};

use crate::core::state::RoundState;
use crate::io::attachments::prepare_attachments;
use crate::io::conversation::Conversation;
use crate::io::workspace::Session;

/// A session ready for the controller.
#[derive(Debug)]
pub struct Submission {
    pub session: Session,
    pub state: RoundState,
}

/// Validate the request, create its session, and ingest attachments.
///
/// Unsupported attachments are reported through `conversation` and skipped;
/// accepted ones are also copied into the session workspace.
#[instrument(skip_all, fields(attachments = attachments.len()))]
pub fn prepare_submission(
    root: &Path,
    user_input: &str,
    attachments: &[PathBuf],
    conversation: &dyn Conversation,
) -> Result<Submission> {
    if user_input.trim().is_empty() {
        return Err(anyhow!("the optimization request is empty"));
    }
    if let Some(missing) = attachments.iter().find(|p| !p.is_file()) {
        return Err(anyhow!("attachment not found {}", missing.display()));
    }

    let prepared = prepare_attachments(attachments)?;
    for warning in &prepared.warnings {
        conversation.say(warning);
    }

    let session = Session::create(root)?;
    let workspace = session.workspace();
    for path in &prepared.accepted {
        workspace.copy_attachment(path)?;
    }
    info!(
        session = %session.id,
        accepted = prepared.accepted.len(),
        skipped = prepared.warnings.len(),
        "prepared submission"
    );

    Ok(Submission {
        state: RoundState::new(user_input, prepared.attached_data),
        session,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedConversation;
    use std::fs;

    #[test]
    fn copies_accepted_attachments_and_warns_on_others() {
        let temp = tempfile::tempdir().expect("tempdir");
        let csv = temp.path().join("orders.csv");
        let binary = temp.path().join("orders.xlsx");
        fs::write(&csv, "id,qty\n1,5\n").expect("write csv");
        fs::write(&binary, "PK").expect("write xlsx");
        let conversation = ScriptedConversation::new();

        let submission = prepare_submission(
            temp.path(),
            "minimize waste",
            &[csv, binary],
            &conversation,
        )
        .expect("submission");

        assert!(submission.session.workspace_dir().join("orders.csv").is_file());
        assert!(!submission.session.workspace_dir().join("orders.xlsx").exists());
        assert!(submission.state.attached_data().starts_with("File: orders.csv"));
        assert_eq!(conversation.said().len(), 1);
        assert!(conversation.said()[0].contains("orders.xlsx"));
    }

    #[test]
    fn rejects_blank_request_and_missing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let conversation = ScriptedConversation::new();
        assert!(prepare_submission(temp.path(), "  ", &[], &conversation).is_err());
        let err = prepare_submission(
            temp.path(),
            "minimize waste",
            &[temp.path().join("nope.csv")],
            &conversation,
        )
        .unwrap_err();
        assert!(err.to_string().contains("attachment not found"));
    }

    #[test]
    fn no_attachments_gives_empty_data() {
        let temp = tempfile::tempdir().expect("tempdir");
        let submission =
            prepare_submission(temp.path(), "pack 3 boxes", &[], &ScriptedConversation::new())
                .expect("submission");
        assert!(!submission.state.has_attached_data());
    }
}
