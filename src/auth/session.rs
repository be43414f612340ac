//! Usage: Session context for silent token acquisition with interactive redirect fallback.
//!
//! The session is passed explicitly through the fetch cycle instead of living
//! in ambient globals, so acquisition stays testable. Silent acquisition
//! serves the cached access token or runs the refresh grant; any failure there
//! is recoverable and the caller falls back to the interactive redirect, which
//! is modelled as the `RedirectFlow` seam so tests can observe the call and
//! its scopes instead of expecting a browser navigation to return.

use crate::auth::callback_server::{bind_callback_listener, wait_for_callback};
use crate::auth::pkce::generate_pkce_pair;
use crate::auth::token_exchange::{
    exchange_authorization_code, refresh_access_token, TokenExchangeRequest, TokenRefreshRequest,
    TokenSet,
};
use crate::domain::accounts;
use crate::infra::db::Db;
use crate::infra::settings::AppConfig;
use crate::shared::blocking;
use crate::shared::error::{AppError, AppResult};
use crate::shared::security::mask_token;
use crate::shared::time::now_unix_seconds;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::future::Future;
use std::pin::Pin;
use std::process::Command;
use std::time::Duration;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Constructed per acquisition attempt; immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub account_id: i64,
    pub scopes: Vec<String>,
}

/// A bearer credential plus the account it was issued for. Held only for the
/// duration of the in-flight requests, never persisted by the fetcher.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub account_id: i64,
    pub access_token: String,
    pub expires_at: Option<i64>,
}

/// Everything the interactive flow needs, cloned out of the session so
/// implementations own their inputs.
#[derive(Debug, Clone)]
pub struct RedirectContext {
    pub config: AppConfig,
    pub scopes: Vec<String>,
}

/// The interactive redirect seam. The real implementation diverges into a
/// browser navigation and only resumes via the loopback callback; fakes can
/// record the context and answer directly.
pub trait RedirectFlow: Send + Sync {
    fn begin(
        &self,
        cx: RedirectContext,
    ) -> Pin<Box<dyn Future<Output = AppResult<TokenSet>> + Send + '_>>;
}

pub struct Session {
    config: AppConfig,
    db: Db,
    http: reqwest::Client,
}

impl Session {
    pub fn new(config: AppConfig, db: Db) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("authfetch/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| AppError::new("SYSTEM_ERROR", format!("http client init failed: {e}")))?;
        Ok(Self { config, db, http })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Build the token request for one acquisition attempt against `account_id`.
    pub fn token_request(&self, account_id: i64) -> TokenRequest {
        TokenRequest {
            account_id,
            scopes: self.config.scopes.clone(),
        }
    }

    /// Silent acquisition: serve the cached access token while it is outside
    /// the refresh lead, otherwise run the refresh grant and persist the
    /// rotated tokens. Every failure is reported as `AUTH_SILENT_FAILED`; the
    /// caller decides whether to fall back to the interactive redirect.
    pub async fn acquire_token_silent(&self, request: &TokenRequest) -> AppResult<AccessGrant> {
        let account = self
            .load_account(request.account_id)
            .await
            .map_err(|e| e.with_code("AUTH_SILENT_FAILED"))?;

        if let Some(token) = account.access_token.as_deref() {
            if !should_refresh_now(account.expires_at, self.config.refresh_lead_s, now_unix_seconds())
            {
                tracing::debug!(
                    account_id = account.id,
                    token = %mask_token(token),
                    "serving cached access token"
                );
                return Ok(AccessGrant {
                    account_id: account.id,
                    access_token: token.to_string(),
                    expires_at: account.expires_at,
                });
            }
        }

        let refresh_token = account.refresh_token.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let Some(refresh_token) = refresh_token else {
            return Err(AppError::new(
                "AUTH_SILENT_FAILED",
                "no usable cached token and no refresh token",
            ));
        };

        let refresh = TokenRefreshRequest {
            token_url: self.config.token_url.clone(),
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            refresh_token: refresh_token.to_string(),
            scopes: request.scopes.clone(),
        };
        let tokens = refresh_access_token(&self.http, &refresh)
            .await
            .map_err(|e| e.with_code("AUTH_SILENT_FAILED"))?;
        tracing::info!(account_id = account.id, "access token refreshed silently");

        self.persist_grant(account.id, tokens).await
    }

    /// Interactive acquisition through the redirect seam. A failure here is
    /// terminal for the cycle; no automatic retry.
    pub async fn acquire_token_interactive(
        &self,
        flow: &dyn RedirectFlow,
        request: &TokenRequest,
    ) -> AppResult<AccessGrant> {
        let cx = RedirectContext {
            config: self.config.clone(),
            scopes: request.scopes.clone(),
        };
        let tokens = flow
            .begin(cx)
            .await
            .map_err(|e| e.with_code("AUTH_INTERACTIVE_FAILED"))?;
        tracing::info!(account_id = request.account_id, "interactive acquisition completed");

        self.persist_grant(request.account_id, tokens).await
    }

    /// Unconditionally drop the cached tokens and hand back the provider
    /// end-session URL (when configured) carrying the post-logout target.
    pub async fn logout(
        &self,
        account_id: i64,
        post_logout_redirect: &str,
    ) -> AppResult<Option<String>> {
        let db = self.db.clone();
        blocking::run("logout_clear_tokens", move || {
            let conn = db.open_connection()?;
            accounts::clear_tokens(&conn, account_id)
        })
        .await?;
        tracing::info!(account_id, "cached tokens cleared on logout");

        let Some(end_session_url) = self.config.end_session_url.as_deref() else {
            return Ok(None);
        };
        let mut url = reqwest::Url::parse(end_session_url)
            .map_err(|e| AppError::new("CONFIG_INVALID", format!("invalid end_session_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", post_logout_redirect);
        Ok(Some(url.to_string()))
    }

    async fn load_account(&self, account_id: i64) -> AppResult<accounts::Account> {
        let db = self.db.clone();
        blocking::run("session_load_account", move || {
            let conn = db.open_connection()?;
            accounts::get_by_id(&conn, account_id)
        })
        .await
    }

    async fn persist_grant(&self, account_id: i64, tokens: TokenSet) -> AppResult<AccessGrant> {
        let db = self.db.clone();
        let display_name = tokens.id_token.as_deref().and_then(display_name_from_id_token);
        let subject = tokens.id_token.as_deref().and_then(subject_from_id_token);
        let access_token = tokens.access_token.clone();
        let expires_at = tokens.expires_at;
        blocking::run("session_persist_grant", move || {
            let conn = db.open_connection()?;
            accounts::update_tokens(
                &conn,
                account_id,
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
                tokens.expires_at,
            )?;
            if let Some(name) = display_name.as_deref() {
                accounts::set_display_name(&conn, account_id, name)?;
            }
            if let Some(subject) = subject.as_deref() {
                accounts::set_home_id(&conn, account_id, subject)?;
            }
            Ok::<_, AppError>(())
        })
        .await?;

        Ok(AccessGrant {
            account_id,
            access_token,
            expires_at,
        })
    }
}

/// Refresh when the recorded expiry falls inside the lead window. An unknown
/// expiry keeps the cached token in service.
pub(crate) fn should_refresh_now(expires_at: Option<i64>, refresh_lead_s: i64, now_unix: i64) -> bool {
    let Some(expiry) = expires_at else {
        return false;
    };
    expiry.saturating_sub(refresh_lead_s.max(0)) <= now_unix
}

/// Display name from the id_token payload claims (`name`, else
/// `preferred_username`). Claims are read unverified; they feed the greeting
/// only, never an authorization decision.
pub fn display_name_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    ["name", "preferred_username"]
        .iter()
        .find_map(|key| claims.get(key).and_then(serde_json::Value::as_str))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Subject claim from the id_token; used as the opaque token-cache key for
/// accounts created by an interactive login.
pub fn subject_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims
        .get("sub")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Real interactive flow: authorize URL in the system browser, loopback
/// callback, code exchange. Control only resumes once the provider redirects
/// back, or never does; the callback timeout converts the latter into an error.
pub struct BrowserRedirectFlow;

impl RedirectFlow for BrowserRedirectFlow {
    fn begin(
        &self,
        cx: RedirectContext,
    ) -> Pin<Box<dyn Future<Output = AppResult<TokenSet>> + Send + '_>> {
        Box::pin(async move {
            let pkce = generate_pkce_pair();
            let state = random_state();

            let listener = bind_callback_listener(cx.config.callback_port).await?;
            let redirect_uri = cx.config.redirect_uri(listener.port());
            let authorize_url =
                build_authorize_url(&cx.config, &cx.scopes, &redirect_uri, &state, &pkce.code_challenge)?;

            open_browser(&authorize_url)?;
            let payload = wait_for_callback(
                listener,
                &cx.config.callback_path,
                &state,
                CALLBACK_TIMEOUT,
            )
            .await?;

            if let Some(error) = payload.error {
                let detail = payload.error_description.unwrap_or_default();
                return Err(AppError::new(
                    "AUTH_INTERACTIVE_FAILED",
                    format!("provider returned {error}: {detail}"),
                ));
            }
            let code = payload
                .code
                .ok_or_else(|| "SEC_INVALID_INPUT: callback payload missing code".to_string())?;

            let client = reqwest::Client::builder()
                .user_agent(format!("authfetch/{}", env!("CARGO_PKG_VERSION")))
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .map_err(|e| format!("SYSTEM_ERROR: http client init failed: {e}"))?;
            let exchange = TokenExchangeRequest {
                token_url: cx.config.token_url.clone(),
                client_id: cx.config.client_id.clone(),
                client_secret: cx.config.client_secret.clone(),
                code,
                redirect_uri,
                code_verifier: pkce.code_verifier,
            };
            exchange_authorization_code(&client, &exchange).await
        })
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Authorization URL carrying exactly the requested scopes.
pub fn build_authorize_url(
    config: &AppConfig,
    scopes: &[String],
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> AppResult<String> {
    let mut url = reqwest::Url::parse(&config.authorize_url)
        .map_err(|e| format!("CONFIG_INVALID: invalid authorize_url: {e}"))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", &config.client_id);
        query.append_pair("redirect_uri", redirect_uri);
        query.append_pair("scope", &scopes.join(" "));
        query.append_pair("state", state);
        query.append_pair("code_challenge", code_challenge);
        query.append_pair("code_challenge_method", "S256");
    }
    Ok(url.to_string())
}

pub fn open_browser(url: &str) -> AppResult<()> {
    #[cfg(target_os = "windows")]
    {
        // URL protocol handler opens the default browser; `explorer <url>` may
        // open File Explorer for some URL shapes.
        Command::new("rundll32.exe")
            .arg("url.dll,FileProtocolHandler")
            .arg(url)
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[cfg(target_os = "macos")]
    {
        Command::new("open")
            .arg(url)
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        Command::new("xdg-open")
            .arg(url)
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[allow(unreachable_code)]
    Err("SYSTEM_ERROR: browser open is unsupported on this platform".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::settings::AppConfig;

    fn test_config() -> AppConfig {
        AppConfig::from_toml_str(
            r#"
            authorize_url = "https://login.example.com/authorize"
            token_url = "https://login.example.com/token"
            client_id = "client-123"
            scopes = ["api://client-123/access_as_user", "openid"]

            [[endpoints]]
            name = "profile"
            url = "http://localhost:8000/api/me"
            "#,
        )
        .expect("config")
    }

    #[test]
    fn should_refresh_now_keeps_unknown_expiry_in_service() {
        assert!(!should_refresh_now(None, 300, 1_000));
    }

    #[test]
    fn should_refresh_now_respects_lead_window() {
        assert!(!should_refresh_now(Some(2_000), 300, 1_600));
        assert!(should_refresh_now(Some(2_000), 300, 1_700));
        assert!(should_refresh_now(Some(2_000), 300, 2_500));
    }

    #[test]
    fn authorize_url_carries_requested_scopes_unchanged() {
        let config = test_config();
        let url = build_authorize_url(
            &config,
            &config.scopes,
            "http://localhost:8400/callback",
            "state-1",
            "challenge-1",
        )
        .expect("url");
        assert!(url.starts_with("https://login.example.com/authorize?"));
        assert!(url.contains("scope=api%3A%2F%2Fclient-123%2Faccess_as_user+openid"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=state-1"));
    }

    #[test]
    fn display_name_prefers_name_claim() {
        let claims = URL_SAFE_NO_PAD
            .encode(r#"{"sub":"home-1","name":"Alice","preferred_username":"alice@example.com"}"#);
        let id_token = format!("h.{claims}.s");
        assert_eq!(display_name_from_id_token(&id_token).as_deref(), Some("Alice"));
        assert_eq!(subject_from_id_token(&id_token).as_deref(), Some("home-1"));
    }

    #[test]
    fn display_name_falls_back_to_preferred_username() {
        let claims = URL_SAFE_NO_PAD.encode(r#"{"preferred_username":"alice@example.com"}"#);
        let id_token = format!("h.{claims}.s");
        assert_eq!(
            display_name_from_id_token(&id_token).as_deref(),
            Some("alice@example.com")
        );
    }

    #[test]
    fn malformed_id_token_yields_no_name() {
        assert!(display_name_from_id_token("not-a-jwt").is_none());
        assert!(subject_from_id_token("a.b").is_none());
    }

    #[test]
    fn random_state_is_hex_and_unique() {
        let a = random_state();
        let b = random_state();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
