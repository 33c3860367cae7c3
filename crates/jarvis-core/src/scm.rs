use crate::types::IssueContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use octocrab::Octocrab;

/// Thin facade over the GitHub REST API. A trait so the orchestrator can be
/// exercised against a fake in tests without touching the network.
#[async_trait]
pub trait ScmClient: Send + Sync {
    async fn list_issues_with_label(&self, repo: &str, label: &str) -> Result<Vec<IssueContext>>;
    async fn get_issue(&self, repo: &str, number: i64) -> Result<IssueContext>;
    async fn create_pull_request(
        &self,
        repo: &str,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String>;
    async fn comment(&self, repo: &str, issue_number: i64, body: &str) -> Result<()>;
    /// Removes `issue_label`/`ready_label`, adds `terminal_label` — best
    /// effort, tolerates "label not present" errors.
    async fn set_labels(
        &self,
        repo: &str,
        issue_number: i64,
        remove: &[&str],
        add: &str,
    ) -> Result<()>;
    fn clone_url(&self, repo: &str) -> String;
}

pub struct GitHubScmClient {
    client: Octocrab,
    token: String,
}

fn split_repo(repo: &str) -> Result<(&str, &str)> {
    repo.split_once('/')
        .with_context(|| format!("repo {repo:?} is not in owner/name form"))
}

impl GitHubScmClient {
    pub fn new(token: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .context("failed to build octocrab client")?;
        Ok(Self {
            client,
            token: token.to_string(),
        })
    }
}

fn to_issue_context(issue: octocrab::models::issues::Issue, repo: &str) -> IssueContext {
    IssueContext {
        number: issue.number as i64,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        repo: repo.to_string(),
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
    }
}

#[async_trait]
impl ScmClient for GitHubScmClient {
    async fn list_issues_with_label(&self, repo: &str, label: &str) -> Result<Vec<IssueContext>> {
        let (owner, name) = split_repo(repo)?;
        let page = self
            .client
            .issues(owner, name)
            .list()
            .state(octocrab::params::State::Open)
            .labels(&[label.to_string()])
            .send()
            .await
            .with_context(|| format!("list_issues_with_label({repo}, {label})"))?;

        Ok(page
            .items
            .into_iter()
            // Pull requests show up in the issues listing; exclude them.
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| to_issue_context(issue, repo))
            .collect())
    }

    async fn get_issue(&self, repo: &str, number: i64) -> Result<IssueContext> {
        let (owner, name) = split_repo(repo)?;
        let issue = self
            .client
            .issues(owner, name)
            .get(number as u64)
            .await
            .with_context(|| format!("get_issue({repo}, {number})"))?;
        Ok(to_issue_context(issue, repo))
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String> {
        let (owner, name) = split_repo(repo)?;
        let pr = self
            .client
            .pulls(owner, name)
            .create(title, branch, base)
            .body(body)
            .send()
            .await
            .with_context(|| format!("create_pull_request({repo}, {branch})"))?;
        Ok(pr
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_else(|| format!("https://github.com/{repo}/pull/{}", pr.number)))
    }

    async fn comment(&self, repo: &str, issue_number: i64, body: &str) -> Result<()> {
        let (owner, name) = split_repo(repo)?;
        self.client
            .issues(owner, name)
            .create_comment(issue_number as u64, body)
            .await
            .with_context(|| format!("comment({repo}, {issue_number})"))?;
        Ok(())
    }

    async fn set_labels(
        &self,
        repo: &str,
        issue_number: i64,
        remove: &[&str],
        add: &str,
    ) -> Result<()> {
        let (owner, name) = split_repo(repo)?;
        let issues = self.client.issues(owner, name);
        for label in remove {
            if label.is_empty() {
                continue;
            }
            // Best-effort: GitHub 404s if the label was never applied.
            let _ = issues.remove_label(issue_number as u64, label).await;
        }
        if !add.is_empty() {
            issues
                .add_labels(issue_number as u64, &[add.to_string()])
                .await
                .with_context(|| format!("set_labels add {add} on {repo}#{issue_number}"))?;
        }
        Ok(())
    }

    fn clone_url(&self, repo: &str) -> String {
        format!("https://x-access-token:{}@github.com/{repo}.git", self.token)
    }
}
