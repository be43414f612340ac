//! Usage: One-shot localhost listener for the interactive redirect callback.

use crate::shared::error::{AppError, AppResult};
use crate::shared::security::constant_time_eq;
use reqwest::Url;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const SUCCESS_HTML: &str =
    "<html><body><h1>Authentication successful</h1><p>You may close this window.</p></body></html>";
const ERROR_HTML: &str =
    "<html><body><h1>Authentication failed</h1><p>You may close this window and retry.</p></body></html>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug)]
pub struct BoundCallbackListener {
    port: u16,
    listener_v4: Option<TcpListener>,
    listener_v6: Option<TcpListener>,
}

impl BoundCallbackListener {
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Bind the loopback listener on the preferred port, falling back to a
/// dynamic port when it is taken. Browsers may resolve `localhost` to either
/// loopback family, so both are bound when possible.
pub async fn bind_callback_listener(preferred_port: u16) -> AppResult<BoundCallbackListener> {
    if preferred_port != 0 {
        if let Ok(bound) = try_bind(preferred_port).await {
            return Ok(bound);
        }
    }
    try_bind(0)
        .await
        .map_err(|e| AppError::new("SYSTEM_ERROR", format!("callback bind failed: {e}")))
}

async fn try_bind(port: u16) -> Result<BoundCallbackListener, String> {
    let listener_v4 = TcpListener::bind(("127.0.0.1", port)).await;
    let bound_port = match &listener_v4 {
        Ok(listener) => listener
            .local_addr()
            .map_err(|e| format!("local_addr failed: {e}"))?
            .port(),
        Err(_) => port,
    };
    let listener_v6 = TcpListener::bind(("::1", bound_port)).await;

    match (listener_v4, listener_v6) {
        (Err(v4_err), Err(v6_err)) => Err(format!("v4: {v4_err}; v6: {v6_err}")),
        (v4, v6) => {
            let listener_v4 = v4.ok();
            let listener_v6 = v6.ok();
            let port = listener_v4
                .as_ref()
                .or(listener_v6.as_ref())
                .and_then(|l| l.local_addr().ok())
                .map(|addr| addr.port())
                .unwrap_or(bound_port);
            Ok(BoundCallbackListener {
                port,
                listener_v4,
                listener_v6,
            })
        }
    }
}

/// Accept exactly one callback request, validate its `state`, answer with a
/// closing HTML page, and hand back the extracted payload.
pub async fn wait_for_callback(
    mut listener: BoundCallbackListener,
    expected_path: &str,
    expected_state: &str,
    timeout: Duration,
) -> AppResult<CallbackPayload> {
    let accept_future = async {
        match (listener.listener_v4.as_mut(), listener.listener_v6.as_mut()) {
            (Some(v4), Some(v6)) => tokio::select! {
                result = v4.accept() => result,
                result = v6.accept() => result,
            },
            (Some(v4), None) => v4.accept().await,
            (None, Some(v6)) => v6.accept().await,
            (None, None) => unreachable!("bind_callback_listener always keeps one listener"),
        }
    };

    let (mut socket, _) = tokio::time::timeout(timeout, accept_future)
        .await
        .map_err(|_| "SYSTEM_ERROR: callback wait timed out".to_string())?
        .map_err(|e| format!("SYSTEM_ERROR: callback accept failed: {e}"))?;

    let mut buffer = vec![0u8; 8192];
    let size = socket
        .read(&mut buffer)
        .await
        .map_err(|e| format!("SYSTEM_ERROR: callback read failed: {e}"))?;
    if size == 0 {
        return Err("SYSTEM_ERROR: callback request is empty".into());
    }

    let request = String::from_utf8_lossy(&buffer[..size]);
    let result = extract_request_target(request.as_ref())
        .and_then(|target| parse_callback_target(target, expected_path))
        .and_then(|payload| {
            validate_state(&payload, expected_state)?;
            Ok(payload)
        });

    let (status, body) = match &result {
        Ok(payload) if payload.error.is_none() => ("HTTP/1.1 200 OK", SUCCESS_HTML),
        _ => ("HTTP/1.1 400 Bad Request", ERROR_HTML),
    };
    let response = format!(
        "{status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;

    result
}

fn extract_request_target(request: &str) -> AppResult<&str> {
    let first = request
        .lines()
        .next()
        .ok_or_else(|| "SEC_INVALID_INPUT: callback request is malformed".to_string())?;
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        return Err("SEC_INVALID_INPUT: callback must be a GET request".into());
    }
    Ok(target)
}

pub fn parse_callback_target(target: &str, expected_path: &str) -> AppResult<CallbackPayload> {
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| format!("SEC_INVALID_INPUT: invalid callback target: {e}"))?;

    if url.path() != expected_path {
        return Err(AppError::new(
            "SEC_INVALID_INPUT",
            format!("unexpected callback path {}", url.path()),
        ));
    }

    let mut payload = CallbackPayload {
        code: None,
        state: None,
        error: None,
        error_description: None,
    };
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.to_string()),
            "state" => payload.state = Some(value.to_string()),
            "error" => payload.error = Some(value.to_string()),
            "error_description" => payload.error_description = Some(value.to_string()),
            _ => {}
        }
    }

    if payload.code.is_none() && payload.error.is_none() {
        return Err("SEC_INVALID_INPUT: callback carries neither code nor error".into());
    }

    Ok(payload)
}

fn validate_state(payload: &CallbackPayload, expected_state: &str) -> AppResult<()> {
    let state = payload
        .state
        .as_deref()
        .ok_or_else(|| "SEC_INVALID_INPUT: callback missing state".to_string())?;
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        return Err("SEC_INVALID_INPUT: callback state mismatch".into());
    }
    Ok(())
}
