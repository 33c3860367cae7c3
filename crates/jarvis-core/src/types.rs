use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Poll,
    Cli,
    Webhook,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Poll => "poll",
            Trigger::Cli => "cli",
            Trigger::Webhook => "webhook",
        };
        write!(f, "{s}")
    }
}

/// Terminal and non-terminal states a [`crate::db::Run`] can be in.
///
/// `Deferred`, `Failed`, `Timeout` and `Blocked` do not claim an issue —
/// see `Db::is_issue_claimed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Blocked,
    Deferred,
    NeedsHuman,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
            RunStatus::Blocked => "blocked",
            RunStatus::Deferred => "deferred",
            RunStatus::NeedsHuman => "needs_human",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "success" => RunStatus::Success,
            "failed" => RunStatus::Failed,
            "timeout" => RunStatus::Timeout,
            "blocked" => RunStatus::Blocked,
            "deferred" => RunStatus::Deferred,
            "needs_human" => RunStatus::NeedsHuman,
            _ => RunStatus::Pending,
        }
    }

    /// Statuses that claim an issue against concurrent/duplicate runs.
    pub fn claims() -> [RunStatus; 4] {
        [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::NeedsHuman,
        ]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ledger row: one attempt to resolve one issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub issue_number: i64,
    pub issue_title: String,
    pub repo: String,
    pub status: RunStatus,
    pub trigger: Trigger,
    pub branch: Option<String>,
    pub pr_url: Option<String>,
    pub error: Option<String>,
    pub agent_output: Option<String>,
    pub agent_name: Option<String>,
    pub tokens_used: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields an [`crate::db::Db::update_run`] call may change. `None` leaves a
/// field untouched; `updated_at` always advances regardless.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub branch: Option<String>,
    pub pr_url: Option<String>,
    pub error: Option<String>,
    pub agent_output: Option<String>,
    pub agent_name: Option<String>,
    pub tokens_used: Option<i64>,
}

/// A GitHub issue as seen by the orchestrator: just enough to decide
/// whether and how to act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueContext {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub repo: String,
    pub labels: Vec<String>,
}

impl IssueContext {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Outcome of running a test command against a workspace.
#[derive(Debug, Clone)]
pub struct TestOutput {
    pub cmd: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TestOutput {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}
