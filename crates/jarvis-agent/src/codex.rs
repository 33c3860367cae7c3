use crate::dispatch::{is_unavailable, AgentBackend, AgentResult, AgentRunRequest, Outcome};
use crate::subprocess;
use async_trait::async_trait;
use tracing::info;

/// Runs the Codex CLI as a subprocess, writable to its own workspace.
pub struct CodexBackend {
    pub bin: String,
}

impl CodexBackend {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl AgentBackend for CodexBackend {
    fn name(&self) -> &str {
        "codex"
    }

    async fn run(&self, req: &AgentRunRequest) -> Outcome {
        let args = vec![
            "exec".to_string(),
            "--sandbox".to_string(),
            "workspace-write".to_string(),
        ];

        let output = match subprocess::run(&self.bin, &args, req).await {
            Ok(o) => o,
            Err(e) => return Outcome::Fatal(e.to_string()),
        };

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if output.timed_out || is_unavailable(&combined) {
            return Outcome::Unavailable(combined);
        }
        if !output.success {
            return Outcome::Fatal(combined);
        }

        info!(backend = "codex", "agent run completed");
        Outcome::Ok(AgentResult {
            output: output.stdout,
            agent_name: self.name().to_string(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        })
    }
}
