//! authfetch CLI: sign in through the browser, run a fetch cycle, sign out.

use authfetch::accounts;
use authfetch::auth::session::{open_browser, BrowserRedirectFlow, Session};
use authfetch::db::Db;
use authfetch::fetch::cycle::{CycleResult, CycleRunner};
use authfetch::fetch::state::{render, UiState};
use authfetch::settings::AppConfig;
use authfetch::shared::blocking;
use authfetch::shared::error::{AppError, AppResult};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const CACHE_PATH_ENV: &str = "AUTHFETCH_CACHE";
const DEFAULT_ACCOUNT_HOME_ID: &str = "default";

#[derive(Parser)]
#[command(name = "authfetch", about = "Authenticated multi-endpoint fetch demo client")]
struct Cli {
    /// Path to the TOML config (defaults to $AUTHFETCH_CONFIG or authfetch.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in interactively through the system browser.
    Login {
        /// Display name to use when the provider issues no id_token claims.
        #[arg(long, default_value = "user")]
        name: String,
    },
    /// Acquire a token (silently when possible) and fetch every endpoint.
    Fetch,
    /// Clear cached tokens and print the provider end-session URL.
    Logout {
        #[arg(long, default_value = "/")]
        post_logout_redirect: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let db = Db::open(&cache_path()?)?;
    let session = Session::new(config, db.clone())?;

    match cli.command {
        Command::Login { name } => login(&session, &db, &name).await,
        Command::Fetch => fetch(&session, &db).await,
        Command::Logout {
            post_logout_redirect,
        } => logout(&session, &db, &post_logout_redirect).await,
    }
}

async fn login(session: &Session, db: &Db, fallback_name: &str) -> AppResult<()> {
    let fallback_name = fallback_name.to_string();
    let account = {
        let db = db.clone();
        blocking::run("login_upsert_account", move || {
            let conn = db.open_connection()?;
            match accounts::get_active(&conn)? {
                Some(existing) => Ok(existing),
                None => accounts::upsert(&conn, DEFAULT_ACCOUNT_HOME_ID, &fallback_name),
            }
        })
        .await?
    };

    let request = session.token_request(account.id);
    session
        .acquire_token_interactive(&BrowserRedirectFlow, &request)
        .await?;

    // The session refreshed the display name (and home id) from the id_token
    // claims while persisting the grant; reload for the greeting.
    let account = {
        let db = db.clone();
        blocking::run("login_reload_account", move || {
            let conn = db.open_connection()?;
            accounts::get_by_id(&conn, account.id)
        })
        .await?
    };
    println!("Signed in as {}.", account.display_name);
    Ok(())
}

async fn fetch(session: &Session, db: &Db) -> AppResult<()> {
    let account = {
        let db = db.clone();
        blocking::run("fetch_load_account", move || {
            let conn = db.open_connection()?;
            accounts::get_active(&conn)
        })
        .await?
    };
    let Some(account) = account else {
        print_state(&UiState::signed_out());
        return Ok(());
    };

    let runner = CycleRunner::new();
    match runner.run(session, &BrowserRedirectFlow, &account).await {
        CycleResult::Completed(state) => print_state(&state),
        CycleResult::Superseded => {}
    }
    Ok(())
}

async fn logout(session: &Session, db: &Db, post_logout_redirect: &str) -> AppResult<()> {
    let account = {
        let db = db.clone();
        blocking::run("logout_load_account", move || {
            let conn = db.open_connection()?;
            accounts::get_active(&conn)
        })
        .await?
    };
    if let Some(account) = account {
        if let Some(end_session_url) = session.logout(account.id, post_logout_redirect).await? {
            println!("End-session URL: {end_session_url}");
            let _ = open_browser(&end_session_url);
        }
    }
    print_state(&UiState::signed_out());
    Ok(())
}

fn print_state(state: &UiState) {
    for line in render(state) {
        println!("{line}");
    }
}

fn cache_path() -> AppResult<PathBuf> {
    if let Ok(path) = std::env::var(CACHE_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| AppError::new("SYSTEM_ERROR", "cannot resolve a data directory"))?;
    Ok(base.join("authfetch").join("cache.db"))
}
