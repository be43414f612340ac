//! Usage: Per-endpoint authorized GET and response classification.

use reqwest::header::AUTHORIZATION;
use serde_json::Value;

/// Discriminated outcome for one endpoint.
///
/// `Empty` is a deliberate reading of HTTP 403: authenticated but not
/// authorized for this resource. The UI omits the optional content instead of
/// raising an error banner.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointOutcome {
    Success(Value),
    Empty,
    Failure(String),
}

/// One authorized GET. Transport failures and body-read failures classify as
/// `Failure` with the underlying error text; nothing propagates.
pub async fn call_endpoint(
    client: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> EndpointOutcome {
    let response = match client
        .get(url)
        .header(AUTHORIZATION, format!("Bearer {access_token}"))
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => return EndpointOutcome::Failure(err.to_string()),
    };

    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => return EndpointOutcome::Failure(err.to_string()),
    };

    classify_response(status, &body)
}

pub fn classify_response(status: u16, body: &str) -> EndpointOutcome {
    match status {
        200..=299 => match serde_json::from_str::<Value>(body) {
            Ok(payload) => EndpointOutcome::Success(payload),
            Err(err) => EndpointOutcome::Failure(format!("response body is not valid JSON: {err}")),
        },
        403 => EndpointOutcome::Empty,
        _ => EndpointOutcome::Failure(error_message_from_body(status, body)),
    }
}

/// Human-readable message from a conventional error body: `detail` as a
/// string, or `detail.message` nested, else the generic fallback.
fn error_message_from_body(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(detail) = value.get("detail") {
            if let Some(message) = detail.get("message").and_then(Value::as_str) {
                if !message.trim().is_empty() {
                    return message.to_string();
                }
            }
            if let Some(message) = detail.as_str() {
                if !message.trim().is_empty() {
                    return message.to_string();
                }
            }
        }
    }
    format!("Request failed with status {status}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_json_body_is_success() {
        let outcome = classify_response(200, r#"{"name":"Alice"}"#);
        assert_eq!(outcome, EndpointOutcome::Success(json!({"name": "Alice"})));
    }

    #[test]
    fn forbidden_is_empty_not_error() {
        assert_eq!(classify_response(403, r#"{"detail":"nope"}"#), EndpointOutcome::Empty);
        assert_eq!(classify_response(403, ""), EndpointOutcome::Empty);
    }

    #[test]
    fn server_error_with_string_detail_uses_it() {
        let outcome = classify_response(500, r#"{"detail": "boom"}"#);
        assert_eq!(outcome, EndpointOutcome::Failure("boom".to_string()));
    }

    #[test]
    fn server_error_with_nested_detail_message_uses_it() {
        let outcome = classify_response(500, r#"{"detail": {"message": "nested boom"}}"#);
        assert_eq!(outcome, EndpointOutcome::Failure("nested boom".to_string()));
    }

    #[test]
    fn server_error_without_parseable_body_uses_generic_message() {
        let outcome = classify_response(500, "<html>oops</html>");
        assert_eq!(
            outcome,
            EndpointOutcome::Failure("Request failed with status 500".to_string())
        );
    }

    #[test]
    fn server_error_with_unrelated_json_uses_generic_message() {
        let outcome = classify_response(404, r#"{"error":"missing"}"#);
        assert_eq!(
            outcome,
            EndpointOutcome::Failure("Request failed with status 404".to_string())
        );
    }

    #[test]
    fn ok_with_unparseable_body_is_failure() {
        let outcome = classify_response(200, "not json");
        assert!(matches!(outcome, EndpointOutcome::Failure(_)));
    }
}
