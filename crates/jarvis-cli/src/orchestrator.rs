use anyhow::Result;
use jarvis_agent::{
    backend_order, implementer_prompt, parse_reviewer_verdict, reviewer_prompt,
    unavailable_reviewer_fallback, AgentBackend, AgentRunRequest, Outcome, ReviewVerdict,
};
use jarvis_core::report::{format_failure_comment, format_success_comment};
use jarvis_core::{Config, Db, IssueContext, RunStatus, RunUpdate, ScmClient, Trigger, Workspace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}\n\n...(truncated)", s.chars().take(max_chars).collect::<String>())
    }
}

/// One ledger-backed run of the full implement -> PR -> review pipeline.
pub struct Orchestrator {
    pub config: Arc<Config>,
    pub db: Arc<Db>,
    pub scm: Arc<dyn ScmClient>,
    pub backends: HashMap<String, Arc<dyn AgentBackend>>,
    /// Mirrors the prototype's `claude_unavailable_recently`, generalized
    /// to any backend — read by the poller to shorten its sleep.
    unavailable_recently: AtomicBool,
}

struct ImplementerOutcome {
    has_changes: bool,
    any_unavailable: bool,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        db: Arc<Db>,
        scm: Arc<dyn ScmClient>,
        backends: HashMap<String, Arc<dyn AgentBackend>>,
    ) -> Self {
        Self {
            config,
            db,
            scm,
            backends,
            unavailable_recently: AtomicBool::new(false),
        }
    }

    pub fn unavailable_recently(&self) -> bool {
        self.unavailable_recently.load(Ordering::Relaxed)
    }

    fn workspace_for(&self, repo: &str) -> Workspace {
        Workspace::new(
            &self.config.workspace_dir,
            repo,
            self.scm.clone_url(repo),
            self.config.git_author_name.clone(),
            self.config.git_author_email.clone(),
        )
    }

    /// Issue's label set intersects the configured trigger labels.
    pub fn should_process(&self, issue: &IssueContext) -> bool {
        issue
            .labels
            .iter()
            .any(|l| self.config.trigger_labels().iter().any(|t| l.eq_ignore_ascii_case(t)))
    }

    fn preferred_backend(&self, issue: &IssueContext) -> Option<&'static str> {
        if issue.has_label(&self.config.model_label_claude) {
            Some("claude")
        } else if issue.has_label(&self.config.model_label_codex) {
            Some("codex")
        } else if issue.has_label(&self.config.model_label_gemini) {
            Some("gemini")
        } else {
            None
        }
    }

    fn default_backend_order(&self) -> Vec<String> {
        let mut order: Vec<String> = vec!["claude".to_string(), "codex".to_string(), "gemini".to_string()];
        order.retain(|name| self.backends.contains_key(name));
        order
    }

    fn reviewer_order(&self, issue: &IssueContext) -> Vec<String> {
        let default = if self.config.reviewer_backend_order.is_empty() {
            self.default_backend_order()
        } else {
            self.config.reviewer_backend_order.clone()
        };
        backend_order(&default, self.preferred_backend(issue))
    }

    fn implementer_order(&self, issue: &IssueContext) -> Vec<String> {
        backend_order(&self.default_backend_order(), self.preferred_backend(issue))
    }

    async fn run_implementer_until_changes(
        &self,
        workspace: &Workspace,
        issue: &IssueContext,
        extra_instructions: Option<&str>,
        output_parts: &mut Vec<String>,
        tokens: &mut i64,
    ) -> ImplementerOutcome {
        let mut any_unavailable = false;
        let prompt = implementer_prompt(issue, extra_instructions);

        for name in self.implementer_order(issue) {
            let Some(backend) = self.backends.get(&name) else {
                continue;
            };
            let req = AgentRunRequest {
                prompt: prompt.clone(),
                work_dir: workspace.repo_dir.clone(),
                env: Vec::new(),
                timeout_s: self.config.agent_timeout_s,
            };

            match backend.run(&req).await {
                Outcome::Ok(result) => {
                    *tokens += result.total_tokens;
                    output_parts.push(format!("[implementer:{name}]\n{}", result.output));
                    if name == "claude" {
                        self.unavailable_recently.store(false, Ordering::Relaxed);
                    }

                    match workspace.has_changes() {
                        Ok(true) => {
                            info!(repo = %issue.repo, backend = %name, "implementer produced changes");
                            return ImplementerOutcome {
                                has_changes: true,
                                any_unavailable,
                            };
                        }
                        Ok(false) => {
                            warn!(repo = %issue.repo, backend = %name, "implementer produced no file changes; trying next backend");
                        }
                        Err(e) => {
                            warn!(repo = %issue.repo, error = %e, "failed to check workspace for changes");
                        }
                    }
                }
                Outcome::Unavailable(msg) => {
                    any_unavailable = true;
                    output_parts.push(format!("[implementer:{name}]\nUNAVAILABLE: {msg}"));
                    if name == "claude" {
                        self.unavailable_recently.store(true, Ordering::Relaxed);
                    }
                }
                Outcome::Fatal(msg) => {
                    output_parts.push(format!("[implementer:{name}]\nFATAL: {msg}"));
                }
            }
        }

        let has_changes = workspace.has_changes().unwrap_or(false);
        ImplementerOutcome {
            has_changes,
            any_unavailable,
        }
    }

    async fn run_reviewer(
        &self,
        workspace: &Workspace,
        issue: &IssueContext,
        round_num: u32,
        test_output: &str,
        output_parts: &mut Vec<String>,
        tokens: &mut i64,
    ) -> (ReviewVerdict, String) {
        let diffstat = workspace.diffstat().unwrap_or_default();
        let diff = workspace.diff().unwrap_or_default();
        let prompt = reviewer_prompt(issue, &diffstat, &diff, test_output);

        let mut last_err: Option<String> = None;
        for name in self.reviewer_order(issue) {
            let Some(backend) = self.backends.get(&name) else {
                continue;
            };
            let req = AgentRunRequest {
                prompt: prompt.clone(),
                work_dir: workspace.repo_dir.clone(),
                env: Vec::new(),
                timeout_s: self.config.agent_timeout_s,
            };

            match backend.run(&req).await {
                Outcome::Ok(result) => {
                    *tokens += result.total_tokens;
                    output_parts.push(format!(
                        "[reviewer:{name}:round{round_num}]\n{}",
                        result.output
                    ));
                    let verdict = parse_reviewer_verdict(&result.output);
                    return (verdict, result.output);
                }
                Outcome::Unavailable(msg) => {
                    last_err = Some(msg.clone());
                    output_parts.push(format!(
                        "[reviewer:{name}:round{round_num}]\nUNAVAILABLE: {msg}"
                    ));
                }
                Outcome::Fatal(msg) => {
                    last_err = Some(msg.clone());
                    output_parts.push(format!("[reviewer:{name}:round{round_num}]\nFATAL: {msg}"));
                }
            }
        }

        let fallback = unavailable_reviewer_fallback(last_err.as_deref());
        (ReviewVerdict::ChangesRequested, fallback)
    }

    /// Returns the id of the [`jarvis_core::Run`] this call created, so
    /// callers (notably the poller) can read back its final token spend for
    /// cycle-level budget accounting without re-deriving it.
    pub async fn process_issue(&self, issue: &IssueContext, trigger: Trigger) -> Result<i64> {
        let workspace = self.workspace_for(&issue.repo);
        let run = self.db.create_run(issue.number, &issue.title, &issue.repo, trigger)?;
        let run_id = run.id;
        let branch = format!("{}{}", self.config.branch_prefix, issue.number);

        // issue_timeout bounds the whole process_issue call; a backend-level
        // timeout still surfaces as Unavailable/Fatal from within, but this
        // catches a run that hangs across many rounds of review.
        let inner = self.process_issue_inner(&workspace, issue, run_id, &branch);
        let outcome = if self.config.issue_timeout == 0 {
            inner.await
        } else {
            match tokio::time::timeout(Duration::from_secs(self.config.issue_timeout), inner).await
            {
                Ok(result) => result,
                Err(_elapsed) => {
                    warn!(repo = %issue.repo, issue = issue.number, "issue processing exceeded issue_timeout");
                    self.db.update_run(
                        run_id,
                        &RunUpdate {
                            status: Some(RunStatus::Timeout),
                            error: Some(format!(
                                "Processing exceeded issue_timeout ({}s)",
                                self.config.issue_timeout
                            )),
                            ..Default::default()
                        },
                    )?;
                    let _ = self
                        .scm
                        .comment(
                            &issue.repo,
                            issue.number,
                            &format_failure_comment("Processing timed out before reaching a terminal state"),
                        )
                        .await;
                    return Ok(run_id);
                }
            }
        };

        match outcome {
            Ok(()) => Ok(run_id),
            Err(e) => {
                let error_msg = e.to_string();
                self.db.update_run(
                    run_id,
                    &RunUpdate {
                        status: Some(RunStatus::Failed),
                        error: Some(error_msg.clone()),
                        ..Default::default()
                    },
                )?;
                let _ = self
                    .scm
                    .comment(&issue.repo, issue.number, &format_failure_comment(&error_msg))
                    .await;
                Ok(run_id)
            }
        }
    }

    async fn process_issue_inner(
        &self,
        workspace: &Workspace,
        issue: &IssueContext,
        run_id: i64,
        branch: &str,
    ) -> Result<()> {
        self.db.update_run(
            run_id,
            &RunUpdate {
                status: Some(RunStatus::Running),
                branch: Some(branch.to_string()),
                ..Default::default()
            },
        )?;

        workspace.ensure_repo()?;
        workspace.create_branch(branch)?;

        let mut output_parts = Vec::new();
        let mut tokens = 0i64;

        let implement = self
            .run_implementer_until_changes(workspace, issue, None, &mut output_parts, &mut tokens)
            .await;
        self.db.update_run(
            run_id,
            &RunUpdate {
                agent_output: Some(output_parts.join("\n\n")),
                tokens_used: Some(tokens),
                ..Default::default()
            },
        )?;

        if !implement.has_changes {
            if implement.any_unavailable {
                self.db.update_run(
                    run_id,
                    &RunUpdate {
                        status: Some(RunStatus::Deferred),
                        error: Some(
                            "No backend produced changes (some backends unavailable); will retry."
                                .to_string(),
                        ),
                        ..Default::default()
                    },
                )?;
                return Ok(());
            }
            self.db.update_run(
                run_id,
                &RunUpdate {
                    status: Some(RunStatus::Failed),
                    error: Some("Agent produced no file changes".to_string()),
                    ..Default::default()
                },
            )?;
            self.scm
                .comment(
                    &issue.repo,
                    issue.number,
                    &format_failure_comment("Agent produced no file changes"),
                )
                .await?;
            return Ok(());
        }

        if let Err(limit_err) = workspace.check_diff_limits(
            self.config.max_diff_files,
            self.config.max_diff_loc,
        ) {
            self.db.update_run(
                run_id,
                &RunUpdate {
                    status: Some(RunStatus::Blocked),
                    error: Some(limit_err.to_string()),
                    ..Default::default()
                },
            )?;
            let _ = self
                .scm
                .comment(&issue.repo, issue.number, &format_failure_comment(&limit_err.to_string()))
                .await;
            return Ok(());
        }

        let commit_msg = format!("orchestrator: pass 1 implement — issue #{}", issue.number);
        let pushed = workspace.commit_and_push(branch, &commit_msg)?;
        if !pushed {
            self.db.update_run(
                run_id,
                &RunUpdate {
                    status: Some(RunStatus::Failed),
                    error: Some("Agent produced no file changes".to_string()),
                    ..Default::default()
                },
            )?;
            self.scm
                .comment(
                    &issue.repo,
                    issue.number,
                    &format_failure_comment("Agent produced no file changes"),
                )
                .await?;
            return Ok(());
        }

        let pr_body = truncate(&output_parts.join("\n\n"), 3000);
        let default_branch = workspace.default_branch().unwrap_or_else(|_| "main".to_string());
        let pr_url = self
            .scm
            .create_pull_request(
                &issue.repo,
                branch,
                &default_branch,
                &format!("fix: resolve #{} — {}", issue.number, issue.title),
                &format!(
                    "Closes #{}\n\n## Agent output\n\n```\n{pr_body}\n```\n",
                    issue.number
                ),
            )
            .await?;

        self.scm
            .comment(
                &issue.repo,
                issue.number,
                &truncate(
                    &format!(
                        "Implementer completed pass 1.\n\nPR: {pr_url}\n\nImplementer output:\n\n```\n{}\n```",
                        truncate(output_parts.last().map(String::as_str).unwrap_or(""), 6000)
                    ),
                    9000,
                ),
            )
            .await?;

        let mut feedback_text = String::new();
        let mut approved = false;
        let review_rounds = self.config.review_rounds.max(1);

        for round_num in 1..=review_rounds {
            let test_res = workspace.run_test_cmd(&self.config.test_cmd, self.config.test_timeout_s)?;
            let test_out = format!(
                "CMD: {}\nEXIT: {}\nSTDOUT:\n{}\nSTDERR:\n{}",
                test_res.cmd, test_res.exit_code, test_res.stdout, test_res.stderr
            );
            let test_out_short = truncate(&test_out, 12000);

            let (verdict, review_text) = self
                .run_reviewer(workspace, issue, round_num, &test_out_short, &mut output_parts, &mut tokens)
                .await;
            self.db.update_run(
                run_id,
                &RunUpdate {
                    agent_output: Some(output_parts.join("\n\n")),
                    tokens_used: Some(tokens),
                    ..Default::default()
                },
            )?;

            self.scm
                .comment(
                    &issue.repo,
                    issue.number,
                    &truncate(
                        &format!(
                            "Reviewer round {round_num}:\n\n```\n{}\n```\n\nTest output (truncated):\n\n```\n{test_out_short}\n```",
                            truncate(&review_text, 12000)
                        ),
                        15000,
                    ),
                )
                .await?;

            if verdict == ReviewVerdict::Approved {
                approved = true;
                break;
            }
            feedback_text = review_text;

            let extra = format!("Address the following review feedback:\n\n{feedback_text}");
            let implement2 = self
                .run_implementer_until_changes(
                    workspace,
                    issue,
                    Some(&extra),
                    &mut output_parts,
                    &mut tokens,
                )
                .await;
            self.db.update_run(
                run_id,
                &RunUpdate {
                    agent_output: Some(output_parts.join("\n\n")),
                    tokens_used: Some(tokens),
                    ..Default::default()
                },
            )?;

            if !implement2.has_changes && implement2.any_unavailable {
                self.db.update_run(
                    run_id,
                    &RunUpdate {
                        status: Some(RunStatus::Deferred),
                        error: Some(
                            "Could not address review (backends unavailable); will retry.".to_string(),
                        ),
                        ..Default::default()
                    },
                )?;
                return Ok(());
            }

            // A no-op push here is tolerated: the reviewer may ask only for
            // verification, not edits.
            let pushed2 = workspace.commit_and_push(
                branch,
                &format!("orchestrator: pass {} address review — issue #{}", round_num + 1, issue.number),
            )?;
            if pushed2 {
                self.scm
                    .comment(
                        &issue.repo,
                        issue.number,
                        &truncate(
                            &format!(
                                "Implementer updated the branch after reviewer round {round_num}.\n\nPR: {pr_url}\n\nImplementer output (latest):\n\n```\n{}\n```",
                                truncate(output_parts.last().map(String::as_str).unwrap_or(""), 8000)
                            ),
                            12000,
                        ),
                    )
                    .await?;
            }
        }

        if approved {
            self.db.update_run(
                run_id,
                &RunUpdate {
                    status: Some(RunStatus::Success),
                    pr_url: Some(pr_url.clone()),
                    ..Default::default()
                },
            )?;
            self.scm
                .set_labels(
                    &issue.repo,
                    issue.number,
                    &[&self.config.issue_label, &self.config.ready_label],
                    &self.config.done_label,
                )
                .await?;
            self.scm
                .comment(&issue.repo, issue.number, &format_success_comment(&pr_url))
                .await?;
            return Ok(());
        }

        self.db.update_run(
            run_id,
            &RunUpdate {
                status: Some(RunStatus::NeedsHuman),
                pr_url: Some(pr_url.clone()),
                error: Some("Review not approved".to_string()),
                ..Default::default()
            },
        )?;
        self.scm
            .set_labels(
                &issue.repo,
                issue.number,
                &[&self.config.issue_label, &self.config.ready_label],
                &self.config.needs_human_label,
            )
            .await?;
        self.scm
            .comment(
                &issue.repo,
                issue.number,
                &truncate(
                    &format!(
                        "Reviewer did not approve after {review_rounds} rounds. Marking needs human.\n\nPR: {pr_url}\n\nLast feedback:\n\n```\n{}\n```",
                        truncate(&feedback_text, 12000)
                    ),
                    15000,
                ),
            )
            .await?;

        Ok(())
    }

    /// Runs one poll cycle across every configured repository, respecting
    /// three cross-repository budgets: `session_timeout` (wall clock since
    /// this call started), `max_tokens_per_run - token_warning_buffer`
    /// (cumulative tokens spent by runs created in this cycle), and
    /// `max_issues_per_poll` (`0` means unlimited). An in-flight issue
    /// always finishes; budgets are only checked between issues.
    pub async fn poll_once(&self, trigger: Trigger) -> Result<usize> {
        let cycle_start = Instant::now();
        let mut processed = 0usize;
        let mut accumulated_tokens = 0i64;
        let token_budget = if self.config.max_tokens_per_run > 0 {
            Some((self.config.max_tokens_per_run - self.config.token_warning_buffer).max(0))
        } else {
            None
        };

        'repos: for repo in &self.config.target_repos {
            if self.config.session_timeout > 0
                && cycle_start.elapsed() >= Duration::from_secs(self.config.session_timeout)
            {
                info!("poll_once: session_timeout reached before starting repo {repo}");
                break;
            }

            let issues = match self.scm.list_issues_with_label(repo, &self.config.issue_label).await {
                Ok(issues) => issues,
                Err(e) => {
                    warn!(repo = %repo, error = %e, "failed to fetch issues");
                    continue;
                }
            };

            for issue in issues {
                if self.config.max_issues_per_poll > 0 && processed as u32 >= self.config.max_issues_per_poll {
                    info!("poll_once: max_issues_per_poll reached");
                    break 'repos;
                }
                if self.config.session_timeout > 0
                    && cycle_start.elapsed() >= Duration::from_secs(self.config.session_timeout)
                {
                    info!("poll_once: session_timeout reached between issues");
                    break 'repos;
                }
                if let Some(budget) = token_budget {
                    if accumulated_tokens >= budget {
                        warn!(
                            accumulated_tokens,
                            budget, "poll_once: token budget reached, skipping remaining issues"
                        );
                        break 'repos;
                    }
                }
                if self.db.is_issue_claimed(issue.number, repo)? {
                    continue;
                }
                if !self.should_process(&issue) {
                    continue;
                }
                info!(repo = %repo, issue = issue.number, "processing issue");
                let run_id = self.process_issue(&issue, trigger).await?;
                if let Ok(run) = self.db.get_run(run_id) {
                    accumulated_tokens += run.tokens_used.unwrap_or(0);
                }
                processed += 1;
            }
        }

        Ok(processed)
    }

    pub async fn run_single(&self, issue_number: i64, repo: &str, trigger: Trigger) -> Result<()> {
        let issue = self.scm.get_issue(repo, issue_number).await?;
        if !self.should_process(&issue) {
            info!(repo, issue_number, "skipping issue due to label policy");
            return Ok(());
        }
        self.process_issue(&issue, trigger).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jarvis_agent::AgentResult;
    use std::process::Command;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn run_git(dir: &std::path::Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .status()
            .expect("failed to run git");
        assert!(status.success(), "git {args:?} failed in {dir:?}");
    }

    /// Local repo standing in for the GitHub-hosted origin — `Workspace`
    /// only ever talks to `clone_url` over plain `git`, so a bare repo on
    /// disk exercises the exact same code paths a real clone would.
    fn init_origin(dir: &std::path::Path) {
        std::fs::create_dir_all(dir).unwrap();
        run_git(dir, &["init", "-q"]);
        run_git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(dir, &["config", "user.email", "a@example.com"]);
        run_git(dir, &["config", "user.name", "a"]);
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        run_git(dir, &["add", "-A"]);
        run_git(dir, &["commit", "-q", "-m", "init"]);
    }

    struct FakeScm {
        origin: String,
        prs: Mutex<Vec<(String, String)>>,
        labels: Mutex<Vec<(Vec<String>, String)>>,
    }

    impl FakeScm {
        fn new(origin: String) -> Self {
            Self {
                origin,
                prs: Mutex::new(Vec::new()),
                labels: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScmClient for FakeScm {
        async fn list_issues_with_label(&self, _repo: &str, _label: &str) -> Result<Vec<IssueContext>> {
            Ok(Vec::new())
        }

        async fn get_issue(&self, repo: &str, number: i64) -> Result<IssueContext> {
            Ok(IssueContext {
                number,
                title: "test issue".to_string(),
                body: "do the thing".to_string(),
                repo: repo.to_string(),
                labels: vec!["jarvis".to_string()],
            })
        }

        async fn create_pull_request(
            &self,
            _repo: &str,
            branch: &str,
            base: &str,
            _title: &str,
            _body: &str,
        ) -> Result<String> {
            self.prs.lock().unwrap().push((branch.to_string(), base.to_string()));
            Ok(format!("https://example.test/pull/{branch}"))
        }

        async fn comment(&self, _repo: &str, _issue_number: i64, _body: &str) -> Result<()> {
            Ok(())
        }

        async fn set_labels(&self, _repo: &str, _issue_number: i64, remove: &[&str], add: &str) -> Result<()> {
            self.labels
                .lock()
                .unwrap()
                .push((remove.iter().map(|s| s.to_string()).collect(), add.to_string()));
            Ok(())
        }

        fn clone_url(&self, _repo: &str) -> String {
            self.origin.clone()
        }
    }

    /// Discriminates implementer vs. reviewer calls the same way a human
    /// reading the prompt would: `reviewer_prompt` is the only one that asks
    /// for a `VERDICT:` line.
    fn is_reviewer_call(req: &AgentRunRequest) -> bool {
        req.prompt.contains("VERDICT:")
    }

    fn ok_result(output: &str) -> Outcome {
        Outcome::Ok(AgentResult {
            output: output.to_string(),
            agent_name: "fake".to_string(),
            input_tokens: 1,
            output_tokens: 1,
            total_tokens: 2,
        })
    }

    /// Writes `file_contents` into the workspace on its implementer call (if
    /// the file isn't already there) and approves on its reviewer call.
    struct WriteAndApproveBackend {
        file_name: String,
        file_contents: String,
    }

    #[async_trait]
    impl AgentBackend for WriteAndApproveBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn run(&self, req: &AgentRunRequest) -> Outcome {
            if is_reviewer_call(req) {
                return ok_result("VERDICT: APPROVE\nSUMMARY: looks good\nNOTES: none\nTESTING: n/a");
            }
            let path = std::path::Path::new(&req.work_dir).join(&self.file_name);
            if !path.exists() {
                std::fs::write(&path, &self.file_contents).unwrap();
            }
            ok_result("wrote the fix")
        }
    }

    /// Never touches the filesystem — models an implementer that claims
    /// success but produces nothing to commit.
    struct NoOpBackend;

    #[async_trait]
    impl AgentBackend for NoOpBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn run(&self, _req: &AgentRunRequest) -> Outcome {
            ok_result("nothing to do here")
        }
    }

    struct UnavailableBackend;

    #[async_trait]
    impl AgentBackend for UnavailableBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn run(&self, _req: &AgentRunRequest) -> Outcome {
            Outcome::Unavailable("rate limit exceeded".to_string())
        }
    }

    fn test_config(tmp: &TempDir) -> Config {
        Config {
            github_token: "x".to_string(),
            target_repos: vec!["acme/widgets".to_string()],

            poll_interval: 60,
            issue_label: "jarvis".to_string(),
            ready_label: String::new(),
            done_label: "jarvis-done".to_string(),
            needs_human_label: "needs-human".to_string(),
            model_label_claude: "model:claude".to_string(),
            model_label_codex: "model:codex".to_string(),
            model_label_gemini: "model:gemini".to_string(),

            workspace_dir: tmp.path().join("workspace").to_str().unwrap().to_string(),
            db_path: tmp.path().join("orchestrator.db").to_str().unwrap().to_string(),
            branch_prefix: "agent/issue-".to_string(),

            review_rounds: 1,
            reviewer_backend_order: Vec::new(),
            test_cmd: String::new(),
            test_timeout_s: 60,

            webhook_port: 0,
            webhook_secret: String::new(),

            session_timeout: 0,
            issue_timeout: 30,
            agent_timeout_s: 30,
            max_diff_files: 0,
            max_diff_loc: 0,
            max_tokens_per_run: 0,
            token_warning_buffer: 0,

            reports_dir: tmp.path().join("reports").to_str().unwrap().to_string(),
            jarvis_repo_dir: String::new(),
            publish: false,

            log_level: "error".to_string(),
            max_issues_per_poll: 0,

            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
            gemini_api_key: String::new(),

            claude_bin: "claude".to_string(),
            codex_bin: "codex".to_string(),
            gemini_bin: "gemini".to_string(),
            claude_model: "sonnet".to_string(),

            git_author_name: "test-bot".to_string(),
            git_author_email: "test-bot@example.com".to_string(),
        }
    }

    fn make_orchestrator(
        tmp: &TempDir,
        backend: Arc<dyn AgentBackend>,
    ) -> (Orchestrator, String) {
        let origin = tmp.path().join("origin");
        init_origin(&origin);
        let origin_url = origin.to_str().unwrap().to_string();

        let config = Arc::new(test_config(tmp));
        let db = Arc::new(Db::open(&config.db_path).unwrap());
        let scm: Arc<dyn ScmClient> = Arc::new(FakeScm::new(origin_url.clone()));
        let mut backends: HashMap<String, Arc<dyn AgentBackend>> = HashMap::new();
        backends.insert("claude".to_string(), backend);
        (Orchestrator::new(config, db, scm, backends), origin_url)
    }

    fn issue() -> IssueContext {
        IssueContext {
            number: 1,
            title: "fix the bug".to_string(),
            body: "please fix it".to_string(),
            repo: "acme/widgets".to_string(),
            labels: vec!["jarvis".to_string()],
        }
    }

    #[tokio::test]
    async fn success_scenario_opens_pr_and_marks_done() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(WriteAndApproveBackend {
            file_name: "fix.txt".to_string(),
            file_contents: "the fix\n".to_string(),
        });
        let (orch, _origin) = make_orchestrator(&tmp, backend);

        let run_id = orch.process_issue(&issue(), Trigger::Cli).await.unwrap();
        let run = orch.db.get_run(run_id).unwrap();

        assert_eq!(run.status, RunStatus::Success);
        assert!(run.pr_url.as_deref().unwrap().contains("agent/issue-1"));
    }

    #[tokio::test]
    async fn no_changes_marks_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(NoOpBackend);
        let (orch, _origin) = make_orchestrator(&tmp, backend);

        let run_id = orch.process_issue(&issue(), Trigger::Cli).await.unwrap();
        let run = orch.db.get_run(run_id).unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run
            .error
            .as_deref()
            .unwrap()
            .to_lowercase()
            .contains("no file changes"));
    }

    #[tokio::test]
    async fn all_backends_unavailable_defers() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(UnavailableBackend);
        let (orch, _origin) = make_orchestrator(&tmp, backend);

        let run_id = orch.process_issue(&issue(), Trigger::Cli).await.unwrap();
        let run = orch.db.get_run(run_id).unwrap();

        assert_eq!(run.status, RunStatus::Deferred);
    }

    #[tokio::test]
    async fn oversized_diff_is_blocked() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(WriteAndApproveBackend {
            file_name: "fix.txt".to_string(),
            file_contents: "line\n".repeat(200),
        });
        let (orch, _origin) = make_orchestrator(&tmp, backend);
        let mut config = (*orch.config).clone();
        config.max_diff_loc = 10;
        let orch = Orchestrator::new(Arc::new(config), orch.db.clone(), orch.scm.clone(), orch.backends.clone());

        let run_id = orch.process_issue(&issue(), Trigger::Cli).await.unwrap();
        let run = orch.db.get_run(run_id).unwrap();

        assert_eq!(run.status, RunStatus::Blocked);
        assert!(run.error.as_deref().unwrap().contains("exceeds configured limits"));
    }
}
