use crate::types::TestOutput;
use anyhow::{anyhow, Context, Result};
use std::process::Command;
use std::time::Duration;

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

const DEFAULT_TIMEOUT_S: u64 = 120;
const CLONE_TIMEOUT_S: u64 = 600;

/// Exceeded diff budget — the issue is blocked rather than pushed.
#[derive(Debug)]
pub struct DiffLimitExceeded {
    pub files_changed: u32,
    pub lines_changed: u32,
}

impl std::fmt::Display for DiffLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "diff exceeds configured limits: {} files, {} lines changed",
            self.files_changed, self.lines_changed
        )
    }
}

impl std::error::Error for DiffLimitExceeded {}

/// A single repo's working copy, owned exclusively by this process —
/// concurrent runs against the same repo serialize rather than getting
/// isolated worktrees.
pub struct Workspace {
    pub repo_dir: String,
    pub clone_url: String,
    pub git_author_name: String,
    pub git_author_email: String,
}

/// `owner/name` -> `owner_name`, matching the prototype's workspace
/// directory naming.
pub fn repo_slug(repo: &str) -> String {
    repo.replace('/', "_")
}

impl Workspace {
    pub fn new(
        workspace_dir: &str,
        repo: &str,
        clone_url: String,
        git_author_name: String,
        git_author_email: String,
    ) -> Self {
        let repo_dir = format!("{}/{}", workspace_dir.trim_end_matches('/'), repo_slug(repo));
        Self {
            repo_dir,
            clone_url,
            git_author_name,
            git_author_email,
        }
    }

    /// Same poll-then-kill shape as `run_test_cmd`: `std::process::Command`
    /// has no native timeout, so a hung `git` subprocess is bounded by
    /// polling `try_wait` and killing on expiry rather than blocking
    /// indefinitely on `output()`.
    fn exec(&self, dir: &str, args: &[&str], timeout_s: u64) -> Result<ExecResult> {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(dir)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn git -C {dir} {}", args.join(" ")))?;

        if timeout_s == 0 {
            let output = child
                .wait_with_output()
                .with_context(|| format!("failed to wait for git -C {dir} {}", args.join(" ")))?;
            return Ok(ExecResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(1),
            });
        }

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(timeout_s);
        loop {
            match child.try_wait()? {
                Some(status) => {
                    let output = child.wait_with_output().with_context(|| {
                        format!("failed to collect output of git -C {dir} {}", args.join(" "))
                    })?;
                    return Ok(ExecResult {
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        exit_code: status.code().unwrap_or(1),
                    });
                }
                None => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Ok(ExecResult {
                            stdout: String::new(),
                            stderr: format!(
                                "git -C {dir} {} timed out after {timeout_s}s",
                                args.join(" ")
                            ),
                            exit_code: 124,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }

    pub fn default_branch(&self) -> Result<String> {
        let result = self.exec(
            &self.repo_dir,
            &["remote", "show", "origin"],
            DEFAULT_TIMEOUT_S,
        )?;
        if result.success() {
            for line in result.stdout.lines() {
                let line = line.trim();
                if let Some(rest) = line.strip_prefix("HEAD branch:") {
                    return Ok(rest.trim().to_string());
                }
            }
        }
        Ok("main".to_string())
    }

    pub fn ensure_repo(&self) -> Result<()> {
        if std::path::Path::new(&self.repo_dir).join(".git").exists() {
            let fetch = self.exec(&self.repo_dir, &["fetch", "--all"], DEFAULT_TIMEOUT_S)?;
            if !fetch.success() {
                return Err(anyhow!("git fetch --all failed: {}", fetch.combined_output()));
            }
            let default = self.default_branch()?;
            let checkout = self.exec(&self.repo_dir, &["checkout", &default], DEFAULT_TIMEOUT_S)?;
            if !checkout.success() {
                return Err(anyhow!(
                    "git checkout {default} failed: {}",
                    checkout.combined_output()
                ));
            }
            let reset = self.exec(
                &self.repo_dir,
                &["reset", "--hard", &format!("origin/{default}")],
                DEFAULT_TIMEOUT_S,
            )?;
            if !reset.success() {
                return Err(anyhow!(
                    "git reset --hard origin/{default} failed: {}",
                    reset.combined_output()
                ));
            }
        } else {
            if let Some(parent) = std::path::Path::new(&self.repo_dir).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {parent:?}"))?;
            }
            let clone = self.exec(
                ".",
                &["clone", &self.clone_url, &self.repo_dir],
                CLONE_TIMEOUT_S,
            )?;
            if !clone.success() {
                return Err(anyhow!("git clone failed: {}", clone.combined_output()));
            }
        }

        let name = self.exec(
            &self.repo_dir,
            &["config", "user.name", &self.git_author_name],
            DEFAULT_TIMEOUT_S,
        )?;
        if !name.success() {
            return Err(anyhow!("git config user.name failed: {}", name.combined_output()));
        }
        let email = self.exec(
            &self.repo_dir,
            &["config", "user.email", &self.git_author_email],
            DEFAULT_TIMEOUT_S,
        )?;
        if !email.success() {
            return Err(anyhow!(
                "git config user.email failed: {}",
                email.combined_output()
            ));
        }
        Ok(())
    }

    /// Best-effort delete of any same-named local/remote branch (collision
    /// recovery for retries), then branch fresh off the default branch.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        let _ = self.exec(&self.repo_dir, &["branch", "-D", name], DEFAULT_TIMEOUT_S);
        let _ = self.exec(
            &self.repo_dir,
            &["push", "origin", "--delete", name],
            DEFAULT_TIMEOUT_S,
        );

        let default = self.default_branch()?;
        let result = self.exec(
            &self.repo_dir,
            &["checkout", "-b", name, &format!("origin/{default}")],
            DEFAULT_TIMEOUT_S,
        )?;
        if !result.success() {
            return Err(anyhow!(
                "git checkout -b {name} failed: {}",
                result.combined_output()
            ));
        }
        Ok(())
    }

    pub fn has_changes(&self) -> Result<bool> {
        let result = self.exec(
            &self.repo_dir,
            &["status", "--porcelain"],
            DEFAULT_TIMEOUT_S,
        )?;
        Ok(!result.stdout.trim().is_empty())
    }

    /// `git diff <ref>` never shows untracked files, only tracked ones —
    /// stage everything first so newly created files are counted too. Safe
    /// to call repeatedly; `commit_and_push` stages again right before
    /// committing.
    fn stage_all(&self) -> Result<()> {
        let add = self.exec(&self.repo_dir, &["add", "-A"], DEFAULT_TIMEOUT_S)?;
        if !add.success() {
            return Err(anyhow!("git add -A failed: {}", add.combined_output()));
        }
        Ok(())
    }

    pub fn diffstat(&self) -> Result<String> {
        self.stage_all()?;
        let default = self.default_branch()?;
        let result = self.exec(
            &self.repo_dir,
            &["diff", "--stat", &format!("origin/{default}")],
            DEFAULT_TIMEOUT_S,
        )?;
        Ok(result.stdout)
    }

    pub fn diff(&self) -> Result<String> {
        self.stage_all()?;
        let default = self.default_branch()?;
        let result = self.exec(
            &self.repo_dir,
            &["diff", &format!("origin/{default}")],
            DEFAULT_TIMEOUT_S,
        )?;
        Ok(result.stdout)
    }

    /// `0` disables the corresponding limit.
    pub fn check_diff_limits(&self, max_files: u32, max_loc: u32) -> Result<()> {
        if max_files == 0 && max_loc == 0 {
            return Ok(());
        }
        self.stage_all()?;
        let default = self.default_branch()?;
        let result = self.exec(
            &self.repo_dir,
            &["diff", "--numstat", &format!("origin/{default}")],
            DEFAULT_TIMEOUT_S,
        )?;
        if !result.success() {
            return Err(anyhow!(
                "git diff --numstat failed: {}",
                result.combined_output()
            ));
        }

        let mut files_changed = 0u32;
        let mut lines_changed = 0u32;
        for line in result.stdout.lines() {
            let mut parts = line.split_whitespace();
            let added = parts.next().unwrap_or("0");
            let removed = parts.next().unwrap_or("0");
            if parts.next().is_none() {
                continue;
            }
            files_changed += 1;
            lines_changed += added.parse::<u32>().unwrap_or(0);
            lines_changed += removed.parse::<u32>().unwrap_or(0);
        }

        let files_exceeded = max_files > 0 && files_changed > max_files;
        let loc_exceeded = max_loc > 0 && lines_changed > max_loc;
        if files_exceeded || loc_exceeded {
            return Err(DiffLimitExceeded {
                files_changed,
                lines_changed,
            }
            .into());
        }
        Ok(())
    }

    /// Empty `cmd` short-circuits to a zero-exit no-op.
    pub fn run_test_cmd(&self, cmd: &str, timeout_s: u64) -> Result<TestOutput> {
        if cmd.trim().is_empty() {
            return Ok(TestOutput {
                cmd: String::new(),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.repo_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn test command: {cmd}"))?;

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(timeout_s);
        loop {
            match child.try_wait()? {
                Some(status) => {
                    let output = child.wait_with_output()?;
                    return Ok(TestOutput {
                        cmd: cmd.to_string(),
                        exit_code: status.code().unwrap_or(1),
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    });
                }
                None => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Ok(TestOutput {
                            cmd: cmd.to_string(),
                            exit_code: 124,
                            stdout: String::new(),
                            stderr: format!("test command timed out after {timeout_s}s"),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }
            }
        }
    }

    /// Returns `false` (no-op) if the working tree had nothing to commit.
    pub fn commit_and_push(&self, branch: &str, message: &str) -> Result<bool> {
        let status = self.exec(
            &self.repo_dir,
            &["status", "--porcelain"],
            DEFAULT_TIMEOUT_S,
        )?;
        if status.stdout.trim().is_empty() {
            return Ok(false);
        }

        let add = self.exec(&self.repo_dir, &["add", "-A"], DEFAULT_TIMEOUT_S)?;
        if !add.success() {
            return Err(anyhow!("git add -A failed: {}", add.combined_output()));
        }
        let commit = self.exec(&self.repo_dir, &["commit", "-m", message], DEFAULT_TIMEOUT_S)?;
        if !commit.success() {
            return Err(anyhow!("git commit failed: {}", commit.combined_output()));
        }
        let push = self.exec(
            &self.repo_dir,
            &["push", "-u", "origin", branch],
            DEFAULT_TIMEOUT_S,
        )?;
        if !push.success() {
            return Err(anyhow!("git push failed: {}", push.combined_output()));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{repo_slug, Workspace};
    use std::process::Command;

    #[test]
    fn repo_slug_replaces_slash() {
        assert_eq!(repo_slug("acme/widgets"), "acme_widgets");
    }

    fn run(dir: &std::path::Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .status()
            .expect("failed to run git");
        assert!(status.success(), "git {args:?} failed in {dir:?}");
    }

    /// Sets up `origin` on `main` with one commit, then clones it into a
    /// sibling `clone` dir wired up as a `Workspace` already checked out on
    /// a fresh branch — the state every test below starts from.
    fn workspace_on_branch(tmp: &std::path::Path, branch: &str) -> Workspace {
        let origin = tmp.join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        run(&origin, &["init", "-q"]);
        run(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run(&origin, &["config", "user.email", "a@example.com"]);
        run(&origin, &["config", "user.name", "a"]);
        std::fs::write(origin.join("README.md"), "hello\n").unwrap();
        run(&origin, &["add", "-A"]);
        run(&origin, &["commit", "-q", "-m", "init"]);

        let clone_dir = tmp.join("clone");
        let ws = Workspace::new(
            tmp.to_str().unwrap(),
            "acme/widgets",
            origin.to_str().unwrap().to_string(),
            "a".to_string(),
            "a@example.com".to_string(),
        );
        assert_eq!(ws.repo_dir, clone_dir.to_str().unwrap());
        ws.ensure_repo().expect("ensure_repo should clone");
        ws.create_branch(branch).expect("create_branch");
        ws
    }

    #[test]
    fn check_diff_limits_allows_small_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = workspace_on_branch(tmp.path(), "agent/issue-1");
        std::fs::write(
            std::path::Path::new(&ws.repo_dir).join("small.txt"),
            "one\ntwo\n",
        )
        .unwrap();

        ws.check_diff_limits(5, 50)
            .expect("small new file should stay under the limit");
    }

    #[test]
    fn check_diff_limits_blocks_oversized_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = workspace_on_branch(tmp.path(), "agent/issue-2");
        let big = "line\n".repeat(50);
        std::fs::write(std::path::Path::new(&ws.repo_dir).join("big.txt"), big).unwrap();

        let err = ws
            .check_diff_limits(0, 10)
            .expect_err("50-line new file should exceed a 10-line budget");
        assert!(err.downcast_ref::<super::DiffLimitExceeded>().is_some());
    }

    #[test]
    fn check_diff_limits_zero_disables_both() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = workspace_on_branch(tmp.path(), "agent/issue-3");
        let big = "line\n".repeat(500);
        std::fs::write(std::path::Path::new(&ws.repo_dir).join("huge.txt"), big).unwrap();

        ws.check_diff_limits(0, 0)
            .expect("0/0 means the limit is disabled");
    }
}
