use serde::Deserialize;

/// `claude --print --output-format json` emits one JSON envelope on
/// completion rather than Claude Code's interactive `stream-json` NDJSON
/// feed — a single object, not a line stream.
#[derive(Debug, Deserialize)]
pub struct ResultEnvelope {
    pub result: Option<String>,
    pub is_error: Option<bool>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

/// Parses the single JSON object Claude Code prints to stdout. Falls back
/// to treating `stdout` itself as the output when it isn't valid JSON
/// (e.g. the CLI printed plain text because of a flag mismatch).
pub fn parse_result(stdout: &str) -> (String, i64, i64) {
    match serde_json::from_str::<ResultEnvelope>(stdout.trim()) {
        Ok(envelope) => {
            let output = envelope.result.unwrap_or_default();
            let input_tokens = envelope
                .usage
                .as_ref()
                .and_then(|u| u.input_tokens)
                .unwrap_or(0);
            let output_tokens = envelope
                .usage
                .as_ref()
                .and_then(|u| u.output_tokens)
                .unwrap_or(0);
            (output, input_tokens, output_tokens)
        }
        Err(_) => (stdout.to_string(), 0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_envelope_with_usage() {
        let raw = r#"{"result":"done","is_error":false,"usage":{"input_tokens":100,"output_tokens":40}}"#;
        let (output, input, out) = parse_result(raw);
        assert_eq!(output, "done");
        assert_eq!(input, 100);
        assert_eq!(out, 40);
    }

    #[test]
    fn falls_back_to_raw_text_on_non_json() {
        let (output, input, out) = parse_result("not json at all");
        assert_eq!(output, "not json at all");
        assert_eq!(input, 0);
        assert_eq!(out, 0);
    }
}
