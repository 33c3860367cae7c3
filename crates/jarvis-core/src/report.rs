use crate::db::Db;
use crate::git::ExecResult;
use crate::types::RunStatus;
use anyhow::{Context, Result};
use std::process::Command;
use tracing::warn;

fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "+",
        RunStatus::Failed => "x",
        RunStatus::Running => "~",
        RunStatus::Pending => "?",
        _ => "?",
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

pub fn format_summary_report(db: &Db) -> Result<String> {
    let runs = db.get_all_runs()?;
    if runs.is_empty() {
        return Ok("No runs recorded yet.".to_string());
    }

    let total = runs.len();
    let success = runs.iter().filter(|r| r.status == RunStatus::Success).count();
    let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
    let running = runs.iter().filter(|r| r.status == RunStatus::Running).count();
    let pending = runs.iter().filter(|r| r.status == RunStatus::Pending).count();
    let rate = if total > 0 {
        (success as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    let unique_issues = runs
        .iter()
        .map(|r| r.issue_number)
        .collect::<std::collections::HashSet<_>>()
        .len();

    let mut lines = vec![
        "# Orchestrator Run Report".to_string(),
        String::new(),
        format!("**Total runs:** {total}"),
        format!("**Unique issues:** {unique_issues}"),
        format!(
            "**Success:** {success} | **Failed:** {failed} | **Running:** {running} | **Pending:** {pending}"
        ),
        format!("**Success rate:** {rate:.1}%"),
    ];

    let failures: Vec<_> = runs
        .iter()
        .filter(|r| r.status == RunStatus::Failed)
        .take(5)
        .collect();
    if !failures.is_empty() {
        lines.push(String::new());
        lines.push("## Recent Failures".to_string());
        for r in failures {
            let error_excerpt = truncate(r.error.as_deref().unwrap_or("unknown"), 100);
            lines.push(format!(
                "- Issue #{} ({}): {error_excerpt}",
                r.issue_number, r.issue_title
            ));
        }
    }

    let successes: Vec<_> = runs
        .iter()
        .filter(|r| r.status == RunStatus::Success)
        .take(5)
        .collect();
    if !successes.is_empty() {
        lines.push(String::new());
        lines.push("## Recent Successes".to_string());
        for r in successes {
            lines.push(format!(
                "- Issue #{} ({}): {}",
                r.issue_number,
                r.issue_title,
                r.pr_url.as_deref().unwrap_or("no PR")
            ));
        }
    }

    Ok(lines.join("\n"))
}

pub fn format_issue_report(db: &Db, issue_number: i64, repo: &str) -> Result<String> {
    let runs = db.get_runs_for_issue(issue_number, repo)?;
    if runs.is_empty() {
        return Ok(format!("No runs found for issue #{issue_number}."));
    }

    let mut lines = vec![
        format!("# Report for Issue #{issue_number}"),
        format!("**Title:** {}", runs[0].issue_title),
        format!("**Total attempts:** {}", runs.len()),
        String::new(),
        "## Run History".to_string(),
    ];

    for r in &runs {
        let icon = status_icon(r.status);
        lines.push(format!(
            "  [{icon}] Run #{} ({}) — {}",
            r.id, r.status, r.created_at
        ));
        if let Some(pr_url) = &r.pr_url {
            lines.push(format!("      PR: {pr_url}"));
        }
        if let Some(error) = &r.error {
            lines.push(format!("      Error: {}", truncate(error, 200)));
        }
        if let Some(output) = &r.agent_output {
            let excerpt = truncate(output, 200).replace('\n', " ");
            lines.push(format!("      Output: {excerpt}..."));
        }
    }

    Ok(lines.join("\n"))
}

pub fn format_success_comment(pr_url: &str) -> String {
    format!(
        "The orchestrator has created a pull request to resolve this issue.\n\n\
         **PR:** {pr_url}\n\n\
         Please review the changes and merge if they look good.\n"
    )
}

pub fn format_failure_comment(error: &str) -> String {
    let error_excerpt = truncate(error, 500);
    format!(
        "The orchestrator attempted to resolve this issue but encountered an error:\n\n\
         ```\n{error_excerpt}\n```\n\n\
         The issue remains open for manual intervention or a retry.\n"
    )
}

/// `report-<date>-<repo_slug>-issue-<n>.md`
pub fn report_filename(date: &str, repo: &str, issue_number: i64) -> String {
    format!(
        "report-{date}-{}-issue-{issue_number}.md",
        crate::git::repo_slug(repo)
    )
}

/// Writes `contents` to `<reports_dir>/<filename>`, creating the directory
/// if needed. Returns the full path written.
pub fn write_report(reports_dir: &str, filename: &str, contents: &str) -> Result<String> {
    std::fs::create_dir_all(reports_dir)
        .with_context(|| format!("failed to create reports dir {reports_dir:?}"))?;
    let path = format!("{}/{filename}", reports_dir.trim_end_matches('/'));
    std::fs::write(&path, contents).with_context(|| format!("failed to write report {path:?}"))?;
    Ok(path)
}

fn git_exec(dir: &str, args: &[&str]) -> Result<ExecResult> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .with_context(|| format!("failed to spawn git -C {dir} {}", args.join(" ")))?;
    Ok(ExecResult {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(1),
    })
}

/// Best-effort: commit and push a just-written report file into
/// `jarvis_repo_dir`'s git repository when `publish` is set. Never returns
/// an error to the caller — failures are logged, since a report that
/// couldn't be published must not fail the run that produced it.
pub fn publish_report(jarvis_repo_dir: &str, publish: bool, report_path: &str) {
    if !publish || jarvis_repo_dir.is_empty() {
        return;
    }
    let add = match git_exec(jarvis_repo_dir, &["add", report_path]) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "report publish: git add failed to spawn");
            return;
        }
    };
    if !add.success() {
        warn!(detail = %add.combined_output(), "report publish: git add failed");
        return;
    }
    let commit = match git_exec(
        jarvis_repo_dir,
        &["commit", "-m", "orchestrator: publish run report"],
    ) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "report publish: git commit failed to spawn");
            return;
        }
    };
    if !commit.success() {
        // Nothing to commit is not an error worth logging loudly.
        return;
    }
    match git_exec(jarvis_repo_dir, &["push"]) {
        Ok(r) if !r.success() => warn!(detail = %r.combined_output(), "report publish: git push failed"),
        Err(e) => warn!(error = %e, "report publish: git push failed to spawn"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Trigger;

    #[test]
    fn summary_report_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        assert_eq!(format_summary_report(&db).unwrap(), "No runs recorded yet.");
    }

    #[test]
    fn summary_report_counts_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        db.create_run(1, "t1", "r/r", Trigger::Poll).unwrap();
        db.create_run(2, "t2", "r/r", Trigger::Poll).unwrap();
        let report = format_summary_report(&db).unwrap();
        assert!(report.contains("**Total runs:** 2"));
        assert!(report.contains("**Unique issues:** 2"));
    }

    #[test]
    fn issue_report_missing_issue() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let report = format_issue_report(&db, 99, "r/r").unwrap();
        assert_eq!(report, "No runs found for issue #99.");
    }

    #[test]
    fn write_report_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let reports_dir = dir.path().join("reports");
        let path = write_report(reports_dir.to_str().unwrap(), "r.md", "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn publish_report_is_noop_when_disabled() {
        // Must not panic or touch the filesystem when publish is false.
        publish_report("/nonexistent/path", false, "report.md");
    }

    #[test]
    fn report_filename_includes_date_repo_and_issue() {
        let name = report_filename("2026-07-27", "acme/widgets", 42);
        assert_eq!(name, "report-2026-07-27-acme_widgets-issue-42.md");
    }
}
