mod orchestrator;
mod poller;
mod webhook;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jarvis_agent::{AgentBackend, ClaudeBackend, CodexBackend, GeminiBackend};
use jarvis_core::report::{format_issue_report, format_summary_report, publish_report, report_filename, write_report};
use jarvis_core::{Config, Db, GitHubScmClient, ScmClient, Trigger};
use orchestrator::Orchestrator;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "jarvis",
    about = "Autonomous coding-agent orchestrator — watches labeled issues, drives a coding agent, opens PRs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the continuous polling loop
    Poll,
    /// Run exactly one poll cycle, print a session summary, then exit
    PollOnce,
    /// Process a single issue
    Run {
        /// GitHub issue number
        issue_number: i64,
        /// Repo to process the issue in (`owner/name`); defaults to the
        /// first configured TARGET_REPO entry
        repo: Option<String>,
    },
    /// Start the inbound webhook HTTP server
    Webhook,
    /// Print ledger rows, optionally filtered to one issue
    Status {
        /// Filter to this issue number
        issue_number: Option<i64>,
    },
    /// Print a formatted run report, optionally for one issue
    Report {
        /// Issue number to report on; omit for a session-wide summary
        issue_number: Option<i64>,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jarvis_cli={0},jarvis_core={0},jarvis_agent={0}", config.log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_backends(config: &Config) -> HashMap<String, Arc<dyn AgentBackend>> {
    let mut backends: HashMap<String, Arc<dyn AgentBackend>> = HashMap::new();
    backends.insert(
        "claude".to_string(),
        Arc::new(ClaudeBackend::new(config.claude_bin.clone(), config.claude_model.clone())),
    );
    backends.insert(
        "codex".to_string(),
        Arc::new(CodexBackend::new(config.codex_bin.clone())),
    );
    backends.insert(
        "gemini".to_string(),
        Arc::new(GeminiBackend::new(config.gemini_bin.clone())),
    );
    backends
}

fn require_external_config(config: &Config) -> Result<(), ExitCode> {
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        return Err(ExitCode::FAILURE);
    }
    Ok(())
}

fn build_orchestrator(config: Arc<Config>) -> Result<Orchestrator> {
    let db = Arc::new(Db::open(&config.db_path)?);
    let scm: Arc<dyn ScmClient> = Arc::new(GitHubScmClient::new(&config.github_token)?);
    let backends = build_backends(&config);
    Ok(Orchestrator::new(config, db, scm, backends))
}

async fn cmd_poll(config: Arc<Config>) -> Result<ExitCode> {
    if require_external_config(&config).is_err() {
        return Ok(ExitCode::FAILURE);
    }
    let orchestrator = Arc::new(build_orchestrator(config)?);
    poller::run_continuous(&orchestrator).await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_poll_once(config: Arc<Config>) -> Result<ExitCode> {
    if require_external_config(&config).is_err() {
        return Ok(ExitCode::FAILURE);
    }
    let orchestrator = build_orchestrator(config.clone())?;
    let processed = poller::run_single_cycle(&orchestrator).await?;
    let summary = format_summary_report(&orchestrator.db)?;
    println!("Processed {processed} issue(s) this cycle.\n\n{summary}");

    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let filename = format!("session-{date}.md");
    if let Ok(path) = write_report(&config.reports_dir, &filename, &summary) {
        publish_report(&config.jarvis_repo_dir, config.publish, &path);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(config: Arc<Config>, issue_number: i64, repo: Option<String>) -> Result<ExitCode> {
    if require_external_config(&config).is_err() {
        return Ok(ExitCode::FAILURE);
    }
    let repo = match repo.or_else(|| config.target_repos.first().cloned()) {
        Some(r) => r,
        None => {
            eprintln!("Error: no repo given and TARGET_REPO is empty");
            return Ok(ExitCode::FAILURE);
        }
    };
    let orchestrator = build_orchestrator(config.clone())?;
    orchestrator.run_single(issue_number, &repo, Trigger::Cli).await?;

    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let report = format_issue_report(&orchestrator.db, issue_number, &repo)?;
    let filename = report_filename(&date, &repo, issue_number);
    if let Ok(path) = write_report(&config.reports_dir, &filename, &report) {
        publish_report(&config.jarvis_repo_dir, config.publish, &path);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_webhook(config: Arc<Config>) -> Result<ExitCode> {
    if require_external_config(&config).is_err() {
        return Ok(ExitCode::FAILURE);
    }
    let orchestrator = Arc::new(build_orchestrator(config)?);
    webhook::run(orchestrator).await?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(config: &Config, issue_number: Option<i64>) -> Result<ExitCode> {
    let db = Db::open(&config.db_path)?;
    let runs = match issue_number {
        Some(n) => {
            let mut all = Vec::new();
            for repo in &config.target_repos {
                all.extend(db.get_runs_for_issue(n, repo)?);
            }
            all
        }
        None => db.get_all_runs()?,
    };

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(ExitCode::SUCCESS);
    }

    for r in runs {
        let pr = r.pr_url.as_deref().map(|u| format!(" -> {u}")).unwrap_or_default();
        let err = r
            .error
            .as_deref()
            .map(|e| format!(" | error: {}", e.chars().take(80).collect::<String>()))
            .unwrap_or_default();
        println!(
            "#{:>4} issue={:<6} {:<10} {:<8} {}{pr}{err}",
            r.id, r.issue_number, r.status, r.trigger, r.created_at
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_report(config: &Config, issue_number: Option<i64>) -> Result<ExitCode> {
    let db = Db::open(&config.db_path)?;
    match issue_number {
        Some(n) => {
            let repo = config.target_repos.first().map(String::as_str).unwrap_or("");
            println!("{}", format_issue_report(&db, n, repo)?);
        }
        None => println!("{}", format_summary_report(&db)?),
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Arc::new(Config::from_env());
    init_tracing(&config);

    match cli.command {
        Commands::Poll => cmd_poll(config).await,
        Commands::PollOnce => cmd_poll_once(config).await,
        Commands::Run { issue_number, repo } => cmd_run(config, issue_number, repo).await,
        Commands::Webhook => cmd_webhook(config).await,
        Commands::Status { issue_number } => cmd_status(&config, issue_number),
        Commands::Report { issue_number } => cmd_report(&config, issue_number),
    }
}
