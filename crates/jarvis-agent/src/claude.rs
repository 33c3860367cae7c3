use crate::dispatch::{is_unavailable, AgentBackend, AgentResult, AgentRunRequest, Outcome};
use crate::event::parse_result;
use crate::subprocess;
use async_trait::async_trait;
use tracing::info;

/// Runs Claude Code as a subprocess with the prompt delivered on stdin.
pub struct ClaudeBackend {
    pub bin: String,
    pub model: String,
}

impl ClaudeBackend {
    pub fn new(bin: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl AgentBackend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    async fn run(&self, req: &AgentRunRequest) -> Outcome {
        let args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--model".to_string(),
            self.model.clone(),
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

        let (text, input_tokens, output_tokens) = parse_result(&output.stdout);
        info!(backend = "claude", input_tokens, output_tokens, "agent run completed");
        Outcome::Ok(AgentResult {
            output: text,
            agent_name: self.name().to_string(),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        })
    }
}
