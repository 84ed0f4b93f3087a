use console::{Emoji, style};
use reqwest::{Response, StatusCode};
use serde::Deserialize;

use crate::provider::ProviderError;

static WARNING: Emoji = Emoji("⚠️  ", "");
static NO_ENTRY: Emoji = Emoji("⛔ ", "");

#[derive(Deserialize)]
struct ErrorResponse {
    reason: String,
}

fn reason(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.reason)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Whether a failed status is worth retrying.
pub fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429) || status.is_server_error()
}

/// Map an unsuccessful API response to a provider error, keeping the server's
/// `reason` when it sent one.
pub fn classify(status: StatusCode, body: &str, operation: &str) -> ProviderError {
    let reason = reason(body);
    let detail = if reason.is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        reason
    };

    if is_transient(status) {
        ProviderError::Transient(format!(
            "{}{}",
            WARNING,
            style(format!("{operation} failed ({}): {detail}", status.as_u16())).yellow()
        ))
    } else {
        ProviderError::Rejected(format!(
            "{}{}",
            NO_ENTRY,
            style(format!("{operation} failed ({}): {detail}", status.as_u16())).red()
        ))
    }
}

pub async fn handle_http_error(
    response: Response,
    operation: &str,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    log::debug!("{operation} returned {status}: {body}");
    Err(classify(status, &body, operation))
}

/// Connection level failures: timeouts and refused connections are transient.
pub fn from_transport(err: reqwest::Error, operation: &str) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(format!("{operation}: {err}"))
    } else {
        ProviderError::Rejected(format!("{operation}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(400, false ; "bad request")]
    #[test_case(403, false ; "forbidden")]
    #[test_case(408, true ; "request timeout")]
    #[test_case(429, true ; "throttled")]
    #[test_case(500, true ; "internal error")]
    #[test_case(503, true ; "unavailable")]
    fn status_classes(code: u16, retryable: bool) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(classify(status, "", "create").is_retryable(), retryable);
    }

    #[test]
    fn reason_is_kept() {
        let err = classify(
            StatusCode::BAD_REQUEST,
            r#"{"reason":"quota exceeded for load balancers"}"#,
            "create load_balancer.lb",
        );
        assert!(err.to_string().contains("quota exceeded for load balancers"));
    }
}
