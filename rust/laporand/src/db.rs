use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE: &str = "laporan.sqlite3";
pub const SCHEMA_VERSION: i64 = 1;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates any missing collection table. Safe to run on every open and from
/// several processes at once: the immediate transaction serializes openers.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let version: i64 = tx.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version > SCHEMA_VERSION {
        anyhow::bail!(
            "database schema v{} is newer than supported v{}",
            version,
            SCHEMA_VERSION
        );
    }

    tx.execute(
        "CREATE TABLE IF NOT EXISTS users(
            username TEXT PRIMARY KEY,
            doc TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS facility_reports(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS duty_reports(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc TEXT NOT NULL
        )",
        [],
    )?;

    if version < SCHEMA_VERSION {
        tx.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
    }

    tx.commit()?;
    Ok(())
}
