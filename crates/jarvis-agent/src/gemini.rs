use crate::dispatch::{is_unavailable, AgentBackend, AgentResult, AgentRunRequest, Outcome};
use crate::subprocess;
use async_trait::async_trait;
use tracing::info;

/// Runs the Gemini CLI as a subprocess. Gemini's plain-text mode does not
/// report token usage, so `AgentResult`'s token fields are always zero.
pub struct GeminiBackend {
    pub bin: String,
}

impl GeminiBackend {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl AgentBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn run(&self, req: &AgentRunRequest) -> Outcome {
        let args = vec!["-o".to_string(), "text".to_string(), "--yolo".to_string()];

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

        info!(backend = "gemini", "agent run completed");
        Outcome::Ok(AgentResult {
            output: output.stdout,
            agent_name: self.name().to_string(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        })
    }
}
