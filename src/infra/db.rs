//! Usage: SQLite token cache setup (connection pool, pragmas, schema).

use crate::shared::error::{db_err, AppResult};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_millis(2000);
const POOL_MAX_SIZE: u32 = 4;
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub type DbConnection = PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
pub struct Db {
    pool: Pool<SqliteConnectionManager>,
}

impl Db {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(db_err("token cache dir"))?;
            }
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(POOL_MAX_SIZE)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .build(manager)
            .map_err(db_err("token cache pool init"))?;

        let db = Self { pool };
        let conn = db.open_connection()?;
        ensure_schema(&conn)?;
        Ok(db)
    }

    pub fn open_connection(&self) -> AppResult<DbConnection> {
        self.pool.get().map_err(db_err("token cache connection"))
    }
}

fn ensure_schema(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            home_id TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            access_token TEXT,
            refresh_token TEXT,
            expires_at INTEGER,
            last_refreshed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    )
    .map_err(db_err("token cache schema"))
}

#[cfg(test)]
mod tests {
    use super::Db;

    #[test]
    fn open_creates_schema_and_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("cache.db");
        let db = Db::open(&path).expect("open db");
        let conn = db.open_connection().expect("conn");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
            .expect("query accounts");
        assert_eq!(count, 0);
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.db");
        Db::open(&path).expect("first open");
        Db::open(&path).expect("second open");
    }
}
