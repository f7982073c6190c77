//! Per-session directories and the sandbox build context.
//!
//! Every submission gets `.optiloop/sessions/<id>/` with two children:
//! `workspace/` is the build context handed to the sandbox and `model/`
//! holds request artifacts. Files in both are overwritten in place; there
//! is no versioned history on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::core::types::{Code, ContainerFiles, SandboxPhase};

pub const STATE_DIR: &str = ".optiloop";
pub const SOURCE_FILE: &str = "generated.py";
pub const MANIFEST_FILE: &str = "requirements.txt";
pub const DOCKERFILE: &str = "Dockerfile";
pub const COMPOSE_FILE: &str = "compose.yaml";

/// Paths for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub root: PathBuf,
}

/// Artifact paths for one model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub schema: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    pub stream: PathBuf,
}

impl Session {
    /// Create a fresh session under `<project_root>/.optiloop/sessions/`.
    pub fn create(project_root: &Path) -> Result<Self> {
        let id = format!("{}-{}", generate_timestamp(), generate_short_id());
        Self::create_with_id(project_root, &id)
    }

    pub fn create_with_id(project_root: &Path, id: &str) -> Result<Self> {
        let root = project_root.join(STATE_DIR).join("sessions").join(id);
        if root.exists() {
            return Err(anyhow!("session directory already exists {}", root.display()));
        }
        let session = Self {
            id: id.to_string(),
            root,
        };
        for dir in [session.workspace_dir(), session.model_dir()] {
            fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        }
        info!(session = %session.id, root = %session.root.display(), "created session");
        Ok(session)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.root.join("model")
    }

    pub fn model_artifacts(&self, step: &str) -> ModelArtifacts {
        let dir = self.model_dir();
        ModelArtifacts {
            schema: dir.join(format!("{step}.schema.json")),
            output: dir.join(format!("{step}.output.json")),
            log: dir.join(format!("{step}.log")),
            stream: dir.join(format!("{step}.stream.jsonl")),
        }
    }

    pub fn sandbox_log(&self, phase: SandboxPhase) -> PathBuf {
        self.root.join("sandbox").join(format!("{}.log", phase.as_str()))
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.workspace_dir())
    }
}

/// The sandbox build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.join(SOURCE_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Write the solver source and its manifest.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn commit_code(&self, code: &Code) -> Result<()> {
        write_atomic(&self.source_path(), code.source.as_bytes())?;
        write_atomic(&self.manifest_path(), code.manifest().as_bytes())?;
        debug!(
            sha256 = %sha256_hex(code.source.as_bytes()),
            dependencies = code.dependencies.len(),
            "committed solver source"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn commit_container_files(&self, files: &ContainerFiles) -> Result<()> {
        write_atomic(&self.dir.join(DOCKERFILE), files.dockerfile.as_bytes())?;
        write_atomic(&self.dir.join(COMPOSE_FILE), files.compose_file.as_bytes())?;
        debug!("committed container files");
        Ok(())
    }

    pub fn read_source(&self) -> Result<String> {
        let path = self.source_path();
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Copy an attachment into the build context under its file name.
    pub fn copy_attachment(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow!("attachment has no file name {}", path.display()))?;
        let dest = self.dir.join(name);
        fs::copy(path, &dest)
            .with_context(|| format!("copy {} to {}", path.display(), dest.display()))?;
        Ok(dest)
    }

    /// Resources named by `code` that are absent from the build context.
    pub fn missing_resources(&self, code: &Code) -> Vec<String> {
        code.resources
            .iter()
            .filter(|name| !self.dir.join(name.as_str()).is_file())
            .cloned()
            .collect()
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_code;

    #[test]
    fn sessions_get_distinct_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = Session::create_with_id(temp.path(), "a").expect("a");
        let b = Session::create_with_id(temp.path(), "b").expect("b");
        assert_ne!(a.workspace_dir(), b.workspace_dir());
        assert!(a.workspace_dir().is_dir());
        assert!(a.model_dir().is_dir());
        assert!(Session::create_with_id(temp.path(), "a").is_err());
    }

    #[test]
    fn generated_ids_have_timestamp_and_suffix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let session = Session::create(temp.path()).expect("session");
        let (stamp, suffix) = session.id.rsplit_once('-').expect("separator");
        assert_eq!(stamp.len(), "20260101_000000".len());
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn committed_source_round_trips_byte_for_byte() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(temp.path().join("ws"));
        let source = "# -*- coding: utf-8 -*-\nprint('größe')\r\n\n\t  \n";
        workspace.commit_code(&sample_code(source)).expect("commit");
        assert_eq!(workspace.read_source().expect("read"), source);
        assert_eq!(
            fs::read_to_string(workspace.manifest_path()).expect("manifest"),
            "pulp\n"
        );
        assert!(!workspace.dir().join("generated.py.tmp").exists());
    }

    #[test]
    fn reports_missing_resources() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(temp.path());
        let attachment = temp.path().join("in").join("orders.csv");
        fs::create_dir_all(attachment.parent().expect("parent")).expect("mkdir");
        fs::write(&attachment, "id,qty\n1,2\n").expect("write");
        workspace.copy_attachment(&attachment).expect("copy");

        let mut code = sample_code("print(1)");
        code.resources = vec!["orders.csv".to_string(), "prices.csv".to_string()];
        assert_eq!(workspace.missing_resources(&code), vec!["prices.csv".to_string()]);
    }
}
