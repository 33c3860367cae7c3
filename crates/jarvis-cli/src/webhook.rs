use crate::orchestrator::Orchestrator;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use jarvis_core::Trigger;
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Verifies `X-Hub-Signature-256: sha256=<hex hmac>` in constant time. A
/// blank `secret` disables verification entirely (the spec's
/// "required only when configured" contract).
fn verify_signature(secret: &str, body: &[u8], header_value: Option<&str>) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Some(header_value) = header_value else {
        return false;
    };
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

async fn handle_webhook(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&orchestrator.config.webhook_secret, &body, signature) {
        warn!("webhook: signature verification failed");
        return (StatusCode::FORBIDDEN, Json(json!({"error": "Invalid signature"}))).into_response();
    }

    let event = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if event != "issues" {
        return (StatusCode::OK, Json(json!({"status": "ignored", "event": event}))).into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "Invalid JSON"}))).into_response();
        }
    };

    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if action != "labeled" {
        return (StatusCode::OK, Json(json!({"status": "ignored", "action": action}))).into_response();
    }

    let label_name = payload
        .pointer("/label/name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if !orchestrator
        .config
        .trigger_labels()
        .iter()
        .any(|l| l.eq_ignore_ascii_case(&label_name))
    {
        return (StatusCode::OK, Json(json!({"status": "ignored", "label": label_name}))).into_response();
    }

    let repo_name = payload
        .pointer("/repository/full_name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if !orchestrator
        .config
        .target_repos
        .iter()
        .any(|r| r == &repo_name)
    {
        return (StatusCode::OK, Json(json!({"status": "ignored", "repo": repo_name}))).into_response();
    }

    let Some(issue_number) = payload.pointer("/issue/number").and_then(Value::as_i64) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing issue.number"}))).into_response();
    };

    info!(repo = %repo_name, issue_number, label = %label_name, "webhook: issue labeled");

    // Respond before processing — webhook delivery must not wait on a full
    // agent run, which can take minutes.
    let response = (
        StatusCode::OK,
        Json(json!({"status": "accepted", "repo": repo_name, "issue": issue_number})),
    )
        .into_response();

    tokio::spawn(async move {
        if let Err(e) = orchestrator
            .run_single(issue_number, &repo_name, Trigger::Webhook)
            .await
        {
            warn!(repo = %repo_name, issue_number, error = %e, "webhook: failed to process labeled issue");
        }
    });

    response
}

pub async fn run(orchestrator: Arc<Orchestrator>) -> Result<()> {
    let port = orchestrator.config.webhook_port;
    let app = Router::new()
        .route("/webhook", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator);

    let addr = format!("0.0.0.0:{port}");
    info!(%addr, "webhook server listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind webhook listener on {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("webhook server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_secret_always_verifies() {
        assert!(verify_signature("", b"body", None));
    }

    #[test]
    fn missing_header_fails_when_secret_configured() {
        assert!(!verify_signature("shh", b"body", None));
    }

    #[test]
    fn correct_signature_verifies() {
        let secret = "shh";
        let body = b"hello world";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("sha256={sig}");
        assert!(verify_signature(secret, body, Some(&header)));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let secret = "shh";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"original");
        let sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("sha256={sig}");
        assert!(!verify_signature(secret, b"tampered", Some(&header)));
    }

    #[test]
    fn malformed_header_fails_verification() {
        assert!(!verify_signature("shh", b"body", Some("not-a-signature")));
    }
}
