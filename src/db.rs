//! Local SQLite snapshot store.
//!
//! Holds the persisted cart snapshot and a small category/key settings table.
//! Uses rusqlite with WAL mode and versioned migrations.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::models::CartLine;

/// Shared handle to the snapshot database.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection, recovering from a poisoned mutex.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("snapshot db mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/marketplace.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("marketplace.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path).and_then(|c| run_migrations(&c).map(|_| c)) {
        Ok(c) => c,
        Err(first_err) => {
            warn!("Database open failed ({first_err}), deleting and retrying once");
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            let conn = open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?;
            run_migrations(&conn)?;
            conn
        }
    };

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// In-memory database with the full schema, for embedders that do not want a
/// file on disk.
pub fn open_in_memory() -> Result<DbState, String> {
    let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings table.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: persisted cart snapshot. Subtotals are derived, never stored.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cart_lines (
            position INTEGER PRIMARY KEY,
            product_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL DEFAULT '',
            price REAL NOT NULL DEFAULT 0 CHECK (price >= 0),
            quantity INTEGER NOT NULL CHECK (quantity >= 1),
            updated_at TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at) \
         VALUES (?1, ?2, ?3, datetime('now')) \
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET \
            setting_value = excluded.setting_value, updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Cart snapshot
// ---------------------------------------------------------------------------

/// Replace the persisted cart with `lines`, keeping their order.
pub fn save_cart_lines(conn: &mut Connection, lines: &[CartLine]) -> Result<(), String> {
    let tx = conn
        .transaction()
        .map_err(|e| format!("cart snapshot begin: {e}"))?;
    tx.execute("DELETE FROM cart_lines", [])
        .map_err(|e| format!("cart snapshot clear: {e}"))?;

    let now = Utc::now().to_rfc3339();
    for (position, line) in lines.iter().enumerate() {
        tx.execute(
            "INSERT INTO cart_lines (position, product_id, name, price, quantity, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                position as i64,
                line.product_id,
                line.name,
                line.price,
                line.quantity,
                now
            ],
        )
        .map_err(|e| format!("cart snapshot insert {}: {e}", line.product_id))?;
    }

    tx.commit()
        .map_err(|e| format!("cart snapshot commit: {e}"))?;
    Ok(())
}

/// Load the persisted cart in insertion order. Unreadable rows are skipped.
pub fn load_cart_lines(conn: &Connection) -> Result<Vec<CartLine>, String> {
    let mut stmt = conn
        .prepare("SELECT product_id, name, price, quantity FROM cart_lines ORDER BY position")
        .map_err(|e| format!("cart snapshot prepare: {e}"))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(CartLine {
                product_id: row.get(0)?,
                name: row.get(1)?,
                price: row.get(2)?,
                quantity: row.get(3)?,
            })
        })
        .map_err(|e| format!("cart snapshot query: {e}"))?;

    let mut lines = Vec::new();
    for row in rows {
        match row {
            Ok(line) if line.quantity >= 1 && !line.product_id.trim().is_empty() => {
                lines.push(line)
            }
            Ok(line) => warn!(product_id = %line.product_id, "skipping invalid cart snapshot row"),
            Err(e) => warn!("skipping unreadable cart snapshot row: {e}"),
        }
    }
    Ok(lines)
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================
