use crate::orchestrator::Orchestrator;
use anyhow::Result;
use jarvis_core::Trigger;
use std::time::Duration;
use tracing::{error, info};

/// Fixed sleep used to resume polling quickly once a backend that was
/// recently unavailable likely has capacity again.
const FAST_RETRY_SLEEP_S: u64 = 10;

/// Runs `poll_once` in a loop, sleeping `poll_interval` seconds between
/// cycles (or `FAST_RETRY_SLEEP_S` if the cycle just completed saw a
/// backend go `Unavailable`), until `Ctrl-C` is received.
pub async fn run_continuous(orchestrator: &Orchestrator) -> Result<()> {
    let repos = orchestrator.config.target_repos.join(", ");
    info!(
        repos = %repos,
        issue_label = %orchestrator.config.issue_label,
        poll_interval = orchestrator.config.poll_interval,
        max_issues_per_poll = orchestrator.config.max_issues_per_poll,
        "starting poller"
    );

    loop {
        let cycle = async {
            match orchestrator.poll_once(Trigger::Poll).await {
                Ok(count) if count > 0 => info!("processed {count} issue(s) across repos"),
                Ok(_) => info!("no new issues found"),
                Err(e) => error!(error = %e, "error during poll cycle"),
            }
        };

        tokio::select! {
            _ = cycle => {}
            _ = tokio::signal::ctrl_c() => {
                info!("poller stopped by user");
                return Ok(());
            }
        }

        let sleep_s = if orchestrator.unavailable_recently() {
            FAST_RETRY_SLEEP_S
        } else {
            orchestrator.config.poll_interval
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(sleep_s)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("poller stopped by user");
                return Ok(());
            }
        }
    }
}

/// Runs exactly one `poll_once` cycle and returns the number of issues
/// processed, for the `poll-once` CLI command's session-summary report.
pub async fn run_single_cycle(orchestrator: &Orchestrator) -> Result<usize> {
    orchestrator.poll_once(Trigger::Poll).await
}
