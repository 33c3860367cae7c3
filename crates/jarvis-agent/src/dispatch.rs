use async_trait::async_trait;

/// Substrings that mark a backend invocation as transiently unavailable
/// rather than a hard failure — matched case-insensitively against the
/// combined stdout+stderr of a finished subprocess.
const UNAVAILABLE_PATTERNS: &[&str] = &[
    "rate limit",
    "quota",
    "usage limit",
    "credit",
    "insufficient",
    "429",
    "temporarily unavailable",
    "try again later",
    "overloaded",
    "max turns",
    "max-turns",
    "timeout",
    "timed out",
    "pass --to",
];

/// What a single backend invocation produced.
pub struct AgentResult {
    pub output: String,
    pub agent_name: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Classification of a completed (or timed-out) backend invocation.
pub enum Outcome {
    Ok(AgentResult),
    /// Transient — try the next backend in order, or defer the issue if
    /// every backend in the order is unavailable.
    Unavailable(String),
    /// Hard failure — does not by itself stop the implementer loop from
    /// trying the next configured backend, but is surfaced in logs/output.
    Fatal(String),
}

/// True if `combined` (stdout+stderr, or a timeout message) looks like a
/// transient capacity problem rather than a real failure.
pub fn is_unavailable(combined: &str) -> bool {
    let lower = combined.to_lowercase();
    UNAVAILABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// What to run and where.
pub struct AgentRunRequest {
    pub prompt: String,
    pub work_dir: String,
    pub env: Vec<(String, String)>,
    pub timeout_s: u64,
}

/// One coding-agent CLI integration (Claude Code, Codex, Gemini CLI, ...).
#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, req: &AgentRunRequest) -> Outcome;
}

/// Orders configured backend names by the issue's model label (if any),
/// falling back to `default_order`, deduplicated.
pub fn backend_order(
    default_order: &[String],
    preferred: Option<&str>,
) -> Vec<String> {
    let mut order = Vec::new();
    if let Some(p) = preferred {
        order.push(p.to_string());
    }
    for name in default_order {
        if !order.iter().any(|o: &String| o.eq_ignore_ascii_case(name)) {
            order.push(name.clone());
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_as_unavailable() {
        assert!(is_unavailable("Error: Rate limit exceeded, try again later"));
    }

    #[test]
    fn classifies_429_as_unavailable() {
        assert!(is_unavailable("HTTP 429 Too Many Requests"));
    }

    #[test]
    fn classifies_generic_error_as_not_unavailable() {
        assert!(!is_unavailable("panic: index out of bounds"));
    }

    #[test]
    fn is_case_insensitive() {
        assert!(is_unavailable("QUOTA EXCEEDED"));
    }

    #[test]
    fn backend_order_puts_preferred_first_and_dedupes() {
        let default_order = vec!["claude".to_string(), "codex".to_string(), "gemini".to_string()];
        let order = backend_order(&default_order, Some("codex"));
        assert_eq!(order, vec!["codex", "claude", "gemini"]);
    }

    #[test]
    fn backend_order_without_preference_is_default() {
        let default_order = vec!["claude".to_string(), "codex".to_string()];
        let order = backend_order(&default_order, None);
        assert_eq!(order, vec!["claude", "codex"]);
    }
}
