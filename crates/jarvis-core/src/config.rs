use anyhow::{bail, Result};
use std::collections::HashMap;

/// Full application configuration, loaded once at process start from the
/// environment with a `.env` file fallback.
#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: String,
    pub target_repos: Vec<String>,

    pub poll_interval: u64,
    pub issue_label: String,
    pub ready_label: String,
    pub done_label: String,
    pub needs_human_label: String,
    pub model_label_claude: String,
    pub model_label_codex: String,
    pub model_label_gemini: String,

    pub workspace_dir: String,
    pub db_path: String,
    pub branch_prefix: String,

    pub review_rounds: u32,
    pub reviewer_backend_order: Vec<String>,
    pub test_cmd: String,
    pub test_timeout_s: u64,

    pub webhook_port: u16,
    pub webhook_secret: String,

    pub session_timeout: u64,
    pub issue_timeout: u64,
    pub agent_timeout_s: u64,
    pub max_diff_files: u32,
    pub max_diff_loc: u32,
    pub max_tokens_per_run: i64,
    pub token_warning_buffer: i64,

    pub reports_dir: String,
    pub jarvis_repo_dir: String,
    pub publish: bool,

    pub log_level: String,
    pub max_issues_per_poll: u32,

    pub anthropic_api_key: String,
    pub openai_api_key: String,
    pub gemini_api_key: String,

    pub claude_bin: String,
    pub codex_bin: String,
    pub gemini_bin: String,
    pub claude_model: String,

    pub git_author_name: String,
    pub git_author_email: String,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(_) => default,
        None => default,
    }
}

fn get_i64(key: &str, dotenv: &HashMap<String, String>, default: i64) -> i64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        let dotenv = parse_dotenv();

        Config {
            github_token: get_str("GITHUB_TOKEN", &dotenv, ""),
            target_repos: parse_list(&get_str("TARGET_REPO", &dotenv, "")),

            poll_interval: get_u64("POLL_INTERVAL", &dotenv, 60),
            issue_label: get_str("ISSUE_LABEL", &dotenv, "jarvis"),
            ready_label: get_str("READY_LABEL", &dotenv, ""),
            done_label: get_str("DONE_LABEL", &dotenv, "jarvis-done"),
            needs_human_label: get_str("NEEDS_HUMAN_LABEL", &dotenv, ""),
            model_label_claude: get_str("MODEL_LABEL_CLAUDE", &dotenv, "model:claude"),
            model_label_codex: get_str("MODEL_LABEL_CODEX", &dotenv, "model:codex"),
            model_label_gemini: get_str("MODEL_LABEL_GEMINI", &dotenv, "model:gemini"),

            workspace_dir: get_str("WORKSPACE_DIR", &dotenv, "/tmp/agent-workspace"),
            db_path: get_str("DB_PATH", &dotenv, "orchestrator.db"),
            branch_prefix: get_str("BRANCH_PREFIX", &dotenv, "agent/issue-"),

            review_rounds: get_u32("REVIEW_ROUNDS", &dotenv, 2),
            reviewer_backend_order: parse_list(&get_str("REVIEWER_BACKEND_ORDER", &dotenv, "")),
            test_cmd: get_str("TEST_CMD", &dotenv, ""),
            test_timeout_s: get_u64("TEST_TIMEOUT_S", &dotenv, 300),

            webhook_port: get_u16("WEBHOOK_PORT", &dotenv, 8080),
            webhook_secret: get_str("WEBHOOK_SECRET", &dotenv, ""),

            session_timeout: get_u64("SESSION_TIMEOUT", &dotenv, 3600),
            issue_timeout: get_u64("ISSUE_TIMEOUT", &dotenv, 1800),
            agent_timeout_s: get_u64("AGENT_TIMEOUT_S", &dotenv, 900),
            max_diff_files: get_u32("MAX_DIFF_FILES", &dotenv, 0),
            max_diff_loc: get_u32("MAX_DIFF_LOC", &dotenv, 0),
            max_tokens_per_run: get_i64("MAX_TOKENS_PER_RUN", &dotenv, 0),
            token_warning_buffer: get_i64("TOKEN_WARNING_BUFFER", &dotenv, 0),

            reports_dir: get_str("REPORTS_DIR", &dotenv, "reports"),
            jarvis_repo_dir: get_str("JARVIS_REPO_DIR", &dotenv, ""),
            publish: get_bool("PUBLISH", &dotenv, false),

            log_level: get_str("LOG_LEVEL", &dotenv, "info"),
            max_issues_per_poll: get_u32("MAX_ISSUES_PER_POLL", &dotenv, 5),

            anthropic_api_key: get_str("ANTHROPIC_API_KEY", &dotenv, ""),
            openai_api_key: get_str("OPENAI_API_KEY", &dotenv, ""),
            gemini_api_key: get_str("GEMINI_API_KEY", &dotenv, ""),

            claude_bin: get_str("CLAUDE_BIN", &dotenv, "claude"),
            codex_bin: get_str("CODEX_BIN", &dotenv, "codex"),
            gemini_bin: get_str("GEMINI_BIN", &dotenv, "gemini"),
            claude_model: get_str("CLAUDE_MODEL", &dotenv, "sonnet"),

            git_author_name: get_str("GIT_AUTHOR_NAME", &dotenv, "orchestrator-bot"),
            git_author_email: get_str("GIT_AUTHOR_EMAIL", &dotenv, "orchestrator@localhost"),
        }
    }

    /// `poll`, `run` and `webhook` need real GitHub credentials; `status`
    /// and `report` only read the local ledger and skip this check.
    pub fn validate(&self) -> Result<()> {
        if self.github_token.is_empty() {
            bail!("GITHUB_TOKEN is required");
        }
        if self.target_repos.is_empty() {
            bail!("TARGET_REPO is required");
        }
        Ok(())
    }

    /// All labels that, when present on an issue, mark it for processing.
    pub fn trigger_labels(&self) -> Vec<&str> {
        [
            self.issue_label.as_str(),
            self.model_label_claude.as_str(),
            self.model_label_codex.as_str(),
            self.model_label_gemini.as_str(),
        ]
        .into_iter()
        .filter(|l| !l.is_empty())
        .collect()
    }
}
