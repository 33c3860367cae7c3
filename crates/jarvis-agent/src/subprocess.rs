use crate::dispatch::AgentRunRequest;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::warn;

pub struct SubprocessOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub timed_out: bool,
}

/// Spawns `bin args...` with `req.prompt` delivered on stdin, reads
/// stdout/stderr concurrently, and enforces `req.timeout_s` as a
/// wall-clock limit on the whole invocation.
pub async fn run(bin: &str, args: &[String], req: &AgentRunRequest) -> Result<SubprocessOutput> {
    let mut child = Command::new(bin)
        .args(args)
        .current_dir(&req.work_dir)
        .envs(req.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {bin}"))?;

    let mut stdin = child.stdin.take().context("failed to take stdin")?;
    let stdout = child.stdout.take().context("failed to take stdout")?;
    let stderr = child.stderr.take().context("failed to take stderr")?;

    let prompt = req.prompt.clone();
    let write_stdin = async move {
        stdin.write_all(prompt.as_bytes()).await?;
        stdin.shutdown().await?;
        anyhow::Ok(())
    };
    if let Err(e) = write_stdin.await {
        warn!(bin, error = %e, "failed writing prompt to agent stdin");
    }

    let io_future = async move {
        let mut out = String::new();
        let mut err = String::new();
        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        loop {
            tokio::select! {
                line = stdout_reader.next_line() => {
                    match line.context("error reading agent stdout")? {
                        Some(l) => {
                            out.push_str(&l);
                            out.push('\n');
                        }
                        None => break,
                    }
                }
                line = stderr_reader.next_line() => {
                    if let Ok(Some(l)) = line {
                        err.push_str(&l);
                        err.push('\n');
                    }
                }
            }
        }
        while let Ok(Some(l)) = stderr_reader.next_line().await {
            err.push_str(&l);
            err.push('\n');
        }

        let status = child.wait().await.context("failed to wait for agent process")?;
        anyhow::Ok((out, err, status.success()))
    };

    if req.timeout_s == 0 {
        let (stdout, stderr, success) = io_future.await?;
        return Ok(SubprocessOutput {
            stdout,
            stderr,
            success,
            timed_out: false,
        });
    }

    match tokio::time::timeout(std::time::Duration::from_secs(req.timeout_s), io_future).await {
        Ok(Ok((stdout, stderr, success))) => Ok(SubprocessOutput {
            stdout,
            stderr,
            success,
            timed_out: false,
        }),
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => {
            warn!(bin, timeout_s = req.timeout_s, "agent subprocess timed out");
            Ok(SubprocessOutput {
                stdout: String::new(),
                stderr: format!("agent subprocess timed out after {}s", req.timeout_s),
                success: false,
                timed_out: true,
            })
        }
    }
}
