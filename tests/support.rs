//! Shared helpers for integration tests: temp token caches, config builders,
//! a recording fake redirect flow, and a minimal loopback HTTP stub.

#![allow(dead_code)]

use authfetch::accounts;
use authfetch::auth::session::{RedirectContext, RedirectFlow, Session};
use authfetch::auth::token_exchange::TokenSet;
use authfetch::db::Db;
use authfetch::settings::{AppConfig, EndpointConfig};
use authfetch::shared::error::{AppError, AppResult};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub fn endpoint(name: &str, url: &str, signals_elevated: bool) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        url: url.to_string(),
        signals_elevated,
    }
}

pub fn test_config(token_url: &str, endpoints: Vec<EndpointConfig>) -> AppConfig {
    AppConfig {
        authorize_url: "https://login.example.com/authorize".to_string(),
        token_url: token_url.to_string(),
        end_session_url: None,
        client_id: "client-123".to_string(),
        client_secret: None,
        scopes: vec!["api://client-123/access_as_user".to_string()],
        redirect_host: "localhost".to_string(),
        callback_path: "/callback".to_string(),
        callback_port: 0,
        refresh_lead_s: 300,
        http_timeout_secs: 5,
        endpoints,
    }
}

pub struct TestEnv {
    _dir: tempfile::TempDir,
    pub db: Db,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Db::open(&dir.path().join("cache.db")).expect("open token cache");
        Self { _dir: dir, db }
    }

    pub fn session(&self, config: AppConfig) -> Session {
        Session::new(config, self.db.clone()).expect("session")
    }

    pub fn seed_account(&self, home_id: &str, display_name: &str) -> accounts::Account {
        let conn = self.db.open_connection().expect("conn");
        accounts::upsert(&conn, home_id, display_name).expect("seed account")
    }

    pub fn seed_tokens(
        &self,
        account_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
    ) {
        let conn = self.db.open_connection().expect("conn");
        accounts::update_tokens(&conn, account_id, access_token, refresh_token, expires_at)
            .expect("seed tokens");
    }

    pub fn reload_account(&self, account_id: i64) -> accounts::Account {
        let conn = self.db.open_connection().expect("conn");
        accounts::get_by_id(&conn, account_id).expect("reload account")
    }
}

/// Redirect seam fake: records every context it is asked to begin, answers
/// with a canned token set or a canned failure.
pub struct FakeRedirectFlow {
    pub seen: Arc<Mutex<Vec<RedirectContext>>>,
    outcome: Result<TokenSet, String>,
}

impl FakeRedirectFlow {
    pub fn returning(tokens: TokenSet) -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            outcome: Ok(tokens),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            outcome: Err(message.to_string()),
        }
    }

    pub fn seen_scopes(&self) -> Vec<Vec<String>> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .map(|cx| cx.scopes.clone())
            .collect()
    }
}

impl RedirectFlow for FakeRedirectFlow {
    fn begin(
        &self,
        cx: RedirectContext,
    ) -> Pin<Box<dyn Future<Output = AppResult<TokenSet>> + Send + '_>> {
        self.seen.lock().expect("seen lock").push(cx);
        let outcome = self.outcome.clone();
        Box::pin(async move {
            outcome.map_err(|message| AppError::new("SYSTEM_ERROR", message))
        })
    }
}

pub fn token_set(access_token: &str, expires_in: i64) -> TokenSet {
    TokenSet {
        access_token: access_token.to_string(),
        refresh_token: None,
        expires_at: Some(authfetch::shared::time::now_unix_seconds() + expires_in),
        id_token: None,
    }
}

#[derive(Clone)]
pub struct StubRoute {
    pub status: u16,
    pub body: String,
    pub delay: Option<Duration>,
}

impl StubRoute {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(status: u16, body: &str, delay: Duration) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Some(delay),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// Minimal HTTP/1.1 stub on a loopback port. One response per route path;
/// unknown paths answer 404. Records every request it serves.
pub struct StubServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubServer {
    pub async fn start(routes: HashMap<String, StubRoute>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve_one(socket, routes, recorded).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn requests_for(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

async fn serve_one(
    mut socket: TcpStream,
    routes: HashMap<String, StubRoute>,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let raw = read_full_request(&mut socket).await?;
    let request = String::from_utf8_lossy(&raw).to_string();

    let mut lines = request.lines();
    let first = lines.next().unwrap_or_default();
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default().to_string();

    let authorization = lines
        .clone()
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("authorization")
                .then(|| value.trim().to_string())
        });
    let body = request
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();

    recorded.lock().expect("requests lock").push(RecordedRequest {
        method,
        path: path.clone(),
        authorization,
        body,
    });

    let (status, body) = match routes.get(&path) {
        Some(route) => {
            if let Some(delay) = route.delay {
                tokio::time::sleep(delay).await;
            }
            (route.status, route.body.clone())
        }
        None => (404, r#"{"detail":"no such route"}"#.to_string()),
    };

    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reason_phrase(status),
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

async fn read_full_request(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = find_header_end(&buf) {
            let headers = String::from_utf8_lossy(&buf[..header_end]);
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                return Ok(buf);
            }
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}
