//! `.optiloop/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{OptiloopConfig, write_config};
use crate::io::workspace::STATE_DIR;

const GITIGNORE: &str = "sessions/\n";

/// Canonical paths within `.optiloop/` for a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptiloopPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub sessions_dir: PathBuf,
}

impl OptiloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self {
            config_path: state_dir.join("config.toml"),
            gitignore_path: state_dir.join(".gitignore"),
            sessions_dir: state_dir.join("sessions"),
            state_dir,
            root,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing config.
    pub force: bool,
}

/// Create `.optiloop/` with a default config.
///
/// Fails if the config already exists unless `options.force` is set.
/// Existing sessions are never touched.
pub fn init_optiloop(root: &Path, options: &InitOptions) -> Result<OptiloopPaths> {
    let paths = OptiloopPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "optiloop init: {} exists but is not a directory",
            paths.state_dir.display()
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "optiloop init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.sessions_dir)
        .with_context(|| format!("create {}", paths.sessions_dir.display()))?;
    fs::write(&paths.gitignore_path, GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &OptiloopConfig::default())?;
    Ok(paths)
}
