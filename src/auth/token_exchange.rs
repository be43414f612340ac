//! Usage: Token endpoint client (authorization_code + refresh_token grants).

use crate::shared::error::{AppError, AppResult};
use crate::shared::security::mask_token;
use crate::shared::time::now_unix_seconds;
use serde_json::Value;
use std::collections::HashMap;

const ERROR_SNIPPET_MAX_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct TokenExchangeRequest {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: String,
}

#[derive(Debug, Clone)]
pub struct TokenRefreshRequest {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub refresh_token: String,
    pub scopes: Vec<String>,
}

/// Tokens returned by the provider. `expires_at` is absolute unix seconds,
/// already resolved from the relative `expires_in` at parse time.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub id_token: Option<String>,
}

pub async fn exchange_authorization_code(
    client: &reqwest::Client,
    req: &TokenExchangeRequest,
) -> AppResult<TokenSet> {
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("grant_type", "authorization_code".to_string());
    form.insert("code", req.code.trim().to_string());
    form.insert("redirect_uri", req.redirect_uri.trim().to_string());
    form.insert("client_id", req.client_id.trim().to_string());
    form.insert("code_verifier", req.code_verifier.trim().to_string());
    insert_client_secret(&mut form, req.client_secret.as_deref());

    post_token_request(client, &req.token_url, &form).await
}

pub async fn refresh_access_token(
    client: &reqwest::Client,
    req: &TokenRefreshRequest,
) -> AppResult<TokenSet> {
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("grant_type", "refresh_token".to_string());
    form.insert("refresh_token", req.refresh_token.trim().to_string());
    form.insert("client_id", req.client_id.trim().to_string());
    if !req.scopes.is_empty() {
        form.insert("scope", req.scopes.join(" "));
    }
    insert_client_secret(&mut form, req.client_secret.as_deref());

    post_token_request(client, &req.token_url, &form).await
}

fn insert_client_secret(form: &mut HashMap<&str, String>, secret: Option<&str>) {
    if let Some(secret) = secret.map(str::trim) {
        if !secret.is_empty() {
            form.insert("client_secret", secret.to_string());
        }
    }
}

async fn post_token_request(
    client: &reqwest::Client,
    token_url: &str,
    form: &HashMap<&str, String>,
) -> AppResult<TokenSet> {
    let response = client
        .post(token_url.trim())
        .form(form)
        .send()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: token endpoint request failed: {e}"))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| format!("SYSTEM_ERROR: token endpoint response read failed: {e}"))?;

    parse_token_body(status, &body)
}

/// Parse a token endpoint response. Pure so grant outcomes stay testable
/// without a live provider.
pub fn parse_token_body(status: u16, body: &str) -> AppResult<TokenSet> {
    if !(200..300).contains(&status) {
        let (code, message) = parse_oauth_error_details(body);
        let mut msg = format!("token endpoint returned status={status}");
        if let Some(code) = code {
            msg.push_str(&format!(" code={code}"));
        }
        if let Some(detail) = message {
            let detail: String = detail.chars().take(240).collect();
            msg.push_str(&format!(" message={detail}"));
        }
        msg.push_str(&format!(" body={}", sanitize_error_body_snippet(body)));
        return Err(AppError::new("SYSTEM_ERROR", msg));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| format!("SYSTEM_ERROR: token endpoint response is not JSON: {e}"))?;

    let access_token = non_empty_str(value.get("access_token"))
        .ok_or_else(|| "SYSTEM_ERROR: token response missing access_token".to_string())?;
    let refresh_token = non_empty_str(value.get("refresh_token"));
    let id_token = non_empty_str(value.get("id_token"));

    let expires_at = value
        .get("expires_in")
        .and_then(parse_i64_lossy)
        .filter(|v| *v > 0)
        .map(|v| now_unix_seconds().saturating_add(v));

    Ok(TokenSet {
        access_token,
        refresh_token,
        expires_at,
        id_token,
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Pull `(code, message)` out of an OAuth error body. Handles the standard
/// `error`/`error_description` pair and nested `error.{code,type,message}`
/// objects some providers return.
fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };

    let mut code = non_empty_str(value.get("code"));
    let mut message = non_empty_str(value.get("error_description"));

    match value.get("error") {
        Some(Value::String(err_str)) => {
            if code.is_none() && !err_str.trim().is_empty() {
                code = Some(err_str.trim().to_string());
            }
        }
        Some(Value::Object(err_obj)) => {
            if code.is_none() {
                code = non_empty_str(err_obj.get("code")).or_else(|| non_empty_str(err_obj.get("type")));
            }
            if message.is_none() {
                message = non_empty_str(err_obj.get("message"));
            }
        }
        _ => {}
    }

    (code, message)
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token") || key_lc.contains("secret") || key_lc == "authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

fn sanitize_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(ERROR_SNIPPET_MAX_CHARS).collect();
        }
    }
    body.chars().take(ERROR_SNIPPET_MAX_CHARS).collect()
}
