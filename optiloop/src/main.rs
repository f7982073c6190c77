//! LLM-driven optimization loop CLI.
//!
//! `optiloop run` takes an optimization problem in plain language, plans it
//! with the model, and iterates generate / execute / review rounds in a
//! container sandbox until the user asks for the final report.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use optiloop::controller::{Controller, RunOutcome};
use optiloop::exit_codes;
use optiloop::io::config::load_config;
use optiloop::io::conversation::{Conversation, TerminalConversation};
use optiloop::io::init::{InitOptions, OptiloopPaths, init_optiloop};
use optiloop::io::model::CodexClient;
use optiloop::io::prompt::PromptBuilder;
use optiloop::io::sandbox::ComposeSandbox;
use optiloop::logging;
use optiloop::steps::StepContext;
use optiloop::submit::prepare_submission;

#[derive(Parser)]
#[command(
    name = "optiloop",
    version,
    about = "Iterate on LLM-generated optimization code in a container sandbox"
)]
struct Cli {
    /// Project root holding `.optiloop/`.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.optiloop/config.toml` with defaults.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one optimization submission interactively.
    Run {
        /// The optimization request.
        #[arg(long, conflicts_with = "prompt_file", required_unless_present = "prompt_file")]
        prompt: Option<String>,
        /// Read the optimization request from a file.
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        /// Data or code file to attach (repeatable).
        #[arg(long = "attach", value_name = "PATH")]
        attachments: Vec<PathBuf>,
    },
    /// Print the effective configuration.
    Config,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn dispatch(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Init { force } => cmd_init(&cli.root, *force),
        Command::Run {
            prompt,
            prompt_file,
            attachments,
        } => {
            let user_input = match (prompt, prompt_file) {
                (Some(prompt), _) => prompt.clone(),
                (None, Some(path)) => fs::read_to_string(path)
                    .with_context(|| format!("read prompt file {}", path.display()))?,
                (None, None) => bail!("provide --prompt or --prompt-file"),
            };
            cmd_run(&cli.root, &user_input, attachments)
        }
        Command::Config => cmd_config(&cli.root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_optiloop(root, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_config(root: &Path) -> Result<i32> {
    let config = load_config(&OptiloopPaths::new(root).config_path)?;
    let rendered = toml::to_string_pretty(&config).context("serialize config toml")?;
    print!("{rendered}");
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, user_input: &str, attachments: &[PathBuf]) -> Result<i32> {
    let config = load_config(&OptiloopPaths::new(root).config_path)?;
    let conversation = TerminalConversation::stdio();
    let submission = prepare_submission(root, user_input, attachments, &conversation)?;

    let model = CodexClient::from_config(&config.model);
    let sandbox = ComposeSandbox::new(config.sandbox.clone(), &submission.session.id);
    let prompts = PromptBuilder::new(config.controller.prompt_budget_bytes)?;
    let ctx = StepContext {
        model: &model,
        sandbox: &sandbox,
        conversation: &conversation,
        config: &config,
        session: &submission.session,
        prompts: &prompts,
    };

    let outcome = Controller::new(ctx).run(submission.state, |transition| {
        debug!(from = %transition.from, to = %transition.to, "stage transition");
    })?;

    let code = match outcome {
        RunOutcome::Completed { .. } => exit_codes::OK,
        RunOutcome::Cancelled(_) => {
            conversation.say("Cancelled.");
            exit_codes::CANCELLED
        }
        RunOutcome::GaveUp(state) => {
            eprintln!(
                "gave up after {} fix attempts; session kept at {}",
                state.fix_attempts,
                submission.session.root.display()
            );
            exit_codes::GAVE_UP
        }
        RunOutcome::Halted { stage, reason, .. } => {
            eprintln!(
                "halted at {stage}: {reason}\nsession kept at {}",
                submission.session.root.display()
            );
            exit_codes::HALTED
        }
    };
    Ok(code)
}
