//! Usage: Account rows in the token cache (identity + cached credentials).
//!
//! The account is the opaque token-cache key plus a display name. Tokens live
//! here so the session side owns persistence; the fetcher only ever sees the
//! access token for the duration of one cycle.

use crate::shared::error::{db_err, AppError, AppResult};
use crate::shared::time::now_unix_seconds;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub home_id: String,
    pub display_name: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub last_refreshed_at: Option<i64>,
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get("id")?,
        home_id: row.get("home_id")?,
        display_name: row.get("display_name")?,
        access_token: row.get("access_token")?,
        refresh_token: row.get("refresh_token")?,
        expires_at: row.get("expires_at")?,
        last_refreshed_at: row.get("last_refreshed_at")?,
    })
}

const SELECT_COLUMNS: &str = "id, home_id, display_name, access_token, refresh_token, \
                              expires_at, last_refreshed_at";

/// Insert the account, or refresh its display name if the home id is known.
pub fn upsert(conn: &Connection, home_id: &str, display_name: &str) -> AppResult<Account> {
    let home_id = home_id.trim();
    if home_id.is_empty() {
        return Err(AppError::new(
            "SEC_INVALID_INPUT",
            "account home_id must not be empty",
        ));
    }
    let now = now_unix_seconds();
    conn.execute(
        "INSERT INTO accounts (home_id, display_name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(home_id) DO UPDATE SET display_name = ?2, updated_at = ?3",
        params![home_id, display_name, now],
    )
    .map_err(db_err("account upsert"))?;
    get_by_home_id(conn, home_id)?.ok_or_else(|| {
        AppError::new("DB_ERROR", format!("account {home_id} missing after upsert"))
    })
}

pub fn get_by_home_id(conn: &Connection, home_id: &str) -> AppResult<Option<Account>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM accounts WHERE home_id = ?1"),
        params![home_id],
        from_row,
    )
    .optional()
    .map_err(db_err("account lookup"))
}

pub fn get_by_id(conn: &Connection, id: i64) -> AppResult<Account> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM accounts WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .map_err(db_err("account lookup"))?
    .ok_or_else(|| AppError::new("SEC_INVALID_INPUT", format!("unknown account id {id}")))
}

/// First signed-in account, if any. The baseline client is single-account.
pub fn get_active(conn: &Connection) -> AppResult<Option<Account>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM accounts ORDER BY id LIMIT 1"),
        [],
        from_row,
    )
    .optional()
    .map_err(db_err("active account lookup"))
}

/// Persist a rotated token set. A `None` refresh token keeps the stored one,
/// matching providers that omit the refresh token on rotation.
pub fn update_tokens(
    conn: &Connection,
    id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<i64>,
) -> AppResult<()> {
    let now = now_unix_seconds();
    let changed = conn
        .execute(
            "UPDATE accounts
             SET access_token = ?2,
                 refresh_token = COALESCE(?3, refresh_token),
                 expires_at = ?4,
                 last_refreshed_at = ?5,
                 updated_at = ?5
             WHERE id = ?1",
            params![id, access_token, refresh_token, expires_at, now],
        )
        .map_err(db_err("token update"))?;
    if changed == 0 {
        return Err(AppError::new(
            "SEC_INVALID_INPUT",
            format!("unknown account id {id}"),
        ));
    }
    Ok(())
}

/// Re-key the account onto the provider-issued subject. Ignored when another
/// row already owns that home id.
pub fn set_home_id(conn: &Connection, id: i64, home_id: &str) -> AppResult<()> {
    let home_id = home_id.trim();
    if home_id.is_empty() {
        return Ok(());
    }
    conn.execute(
        "UPDATE OR IGNORE accounts SET home_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, home_id, now_unix_seconds()],
    )
    .map_err(db_err("home id update"))?;
    Ok(())
}

pub fn set_display_name(conn: &Connection, id: i64, display_name: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE accounts SET display_name = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, display_name, now_unix_seconds()],
    )
    .map_err(db_err("display name update"))?;
    Ok(())
}

/// Drop every cached credential for the account. Used by logout; idempotent.
pub fn clear_tokens(conn: &Connection, id: i64) -> AppResult<bool> {
    let changed = conn
        .execute(
            "UPDATE accounts
             SET access_token = NULL, refresh_token = NULL, expires_at = NULL,
                 last_refreshed_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, now_unix_seconds()],
        )
        .map_err(db_err("token clear"))?;
    Ok(changed > 0)
}
