//! # coderloop CLI
//!
//! Command-line interface for building small projects with a tool-calling model.
//!
//! Usage:
//!   coderloop <brief>
//!   coderloop build --name <name> --skill <skill> <brief>
//!   coderloop sessions
//!   coderloop tools
//!
//! Examples:
//!   coderloop "Create a hello.txt file saying Hello"
//!   coderloop -c local.yaml build -n todo "A command-line todo app in Python"
//!   coderloop sessions

use clap::{ArgAction, Parser, Subcommand};
use coderloop_agent::{Agent, AgentConfig, BuildOutcome, BuildStatus};
use coderloop_runtime::{builtin_registry, list_sessions, AppConfig, OpenAIProvider, Workspace};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coderloop")]
#[command(author, version, about = "coderloop - build small projects with a tool-calling model")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project brief (when not using subcommands)
    #[arg(trailing_var_arg = true)]
    brief: Vec<String>,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "coderloop.yaml")]
    config: PathBuf,

    /// More diagnostic output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show the final answer
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a project from a brief
    Build {
        /// The project brief
        #[arg(trailing_var_arg = true, required = true)]
        brief: Vec<String>,

        /// Project name (defaults to the brief)
        #[arg(short, long)]
        name: Option<String>,

        /// Extra skill to load from <context_dir>/skills (repeatable)
        #[arg(short, long = "skill")]
        skills: Vec<String>,
    },
    /// List recorded sessions
    Sessions,
    /// Show the tool schemas sent to the model
    Tools,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> AppConfig {
    match AppConfig::load(path) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), model = %config.llm.model, "configuration loaded");
            config
        }
        Err(e) => {
            eprintln!("Error loading {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn print_outcome(outcome: &BuildOutcome, quiet: bool) {
    match &outcome.status {
        BuildStatus::Done { answer } => {
            if !quiet {
                println!("\n--- FINAL ANSWER ---\n");
            }
            println!("{}", answer);
        }
        BuildStatus::IterationLimitReached => {
            println!("Stopped after {} iterations without a final answer.", outcome.iterations);
        }
    }

    if !quiet {
        println!("\n--- Session ---");
        println!("  id:          {}", outcome.session_id);
        println!("  status:      {}", outcome.status.as_str());
        println!("  iterations:  {}", outcome.iterations);
        println!("  compactions: {}", outcome.compactions);
        println!("  llm calls:   {}", outcome.usage.total_calls);
        println!("  tokens:      {}", outcome.usage.total_tokens());
        println!("  log:         {}", outcome.log_path.display());
    }
}

async fn run_build(config: AppConfig, brief: &str, name: Option<&str>, skills: &[String], quiet: bool) {
    let provider = match OpenAIProvider::new(config.provider_config()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to create provider: {}", e);
            std::process::exit(1);
        }
    };
    let agent = Agent::new(provider, AgentConfig::from_app_config(&config));

    let mut session = match agent.prepare_build(brief, name, skills) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to prepare build: {}", e);
            std::process::exit(1);
        }
    };

    if !quiet {
        if let Some(workspace) = &session.workspace {
            println!("Workspace: {}", workspace.display());
        }
        println!("Session:   {}\n", session.logger.session_id());
    }

    // None when interrupted; the loop future is dropped before the session is touched again
    let result = {
        let run = agent.run(&mut session);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    };

    match result {
        Some(Ok(outcome)) => print_outcome(&outcome, quiet),
        Some(Err(e)) => {
            eprintln!("Build failed: {}", e);
            eprintln!("Log: {}", session.logger.path().display());
            std::process::exit(1);
        }
        None => {
            if let Err(e) = session.interrupt() {
                eprintln!("Failed to finalize session: {}", e);
            }
            eprintln!("\nInterrupted. Log: {}", session.logger.path().display());
            std::process::exit(130);
        }
    }
}

fn show_sessions(config: &AppConfig) {
    let sessions = match list_sessions(&config.log_dir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read {}: {}", config.log_dir.display(), e);
            std::process::exit(1);
        }
    };

    println!("Sessions in {}:", config.log_dir.display());
    if sessions.is_empty() {
        println!("  (no sessions found)");
    }
    for s in &sessions {
        let started = s
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  - {}  {}  {:<16} {} entries",
            s.session_id,
            started,
            s.status.as_deref().unwrap_or("unfinished"),
            s.entries
        );
    }
}

fn show_tools(config: &AppConfig) {
    // A scratch workspace is enough to build the registry
    let scratch = std::env::temp_dir().join("coderloop-tools");
    let registry = match Workspace::new(&scratch).and_then(|ws| builtin_registry(ws, config.shell_timeout())) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to build tool registry: {}", e);
            std::process::exit(1);
        }
    };

    let definitions = registry.definitions();
    match serde_json::to_string_pretty(&definitions) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Failed to render tool schemas: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Sessions) => {
            show_sessions(&load_config(&cli.config));
        }
        Some(Commands::Tools) => {
            show_tools(&load_config(&cli.config));
        }
        Some(Commands::Build { brief, name, skills }) => {
            let config = load_config(&cli.config);
            run_build(config, &brief.join(" "), name.as_deref(), &skills, cli.quiet).await;
        }
        None => {
            if cli.brief.is_empty() {
                eprintln!("Error: No brief provided.");
                eprintln!("Usage: coderloop [OPTIONS] <BRIEF>...");
                eprintln!("       coderloop build [--name <NAME>] [--skill <SKILL>]... <BRIEF>...");
                eprintln!("       coderloop sessions");
                eprintln!("       coderloop tools");
                eprintln!("\nExamples:");
                eprintln!("  coderloop \"Create a hello.txt file saying Hello\"");
                eprintln!("  coderloop build -n todo \"A command-line todo app\"");
                std::process::exit(1);
            }
            let config = load_config(&cli.config);
            run_build(config, &cli.brief.join(" "), None, &[], cli.quiet).await;
        }
    }
}
