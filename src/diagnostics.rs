//! Diagnostics: logging setup, log rotation and status reporting.
//!
//! - **Logging**: console plus a daily rolling file under `<data_dir>/logs`.
//! - **About info**: version, build timestamp, git SHA, platform.
//! - **Health**: a JSON snapshot of the cart, the order board and pending notices.

use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cart::LocalCart;
use crate::notices::Notices;
use crate::orders::OrderBoard;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

const LOG_FILE_PREFIX: &str = "marketplace";
const DEFAULT_FILTER: &str = "info,marketplace_sync=debug";

/// Install the global subscriber. Keep the returned guard alive until exit;
/// dropping it flushes the file writer.
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let dir_ok = fs::create_dir_all(log_dir).is_ok();
    prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if !dir_ok {
        warn!("Could not create log directory {}", log_dir.display());
    }
    guard
}

/// Returns version, build timestamp, git SHA, and platform info.
pub fn about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}

/// Point-in-time view of what the client is holding.
pub fn health_snapshot(cart: &LocalCart, board: &OrderBoard, notices: &Notices) -> Value {
    let cart = cart.snapshot();
    let active_notices = notices.active();
    json!({
        "cart": {
            "lines": cart.items.len(),
            "itemCount": cart.item_count,
            "total": cart.total,
        },
        "orders": {
            "active": board.orders().len(),
            "lastPolledAt": board.last_polled_at().map(|t| t.to_rfc3339()),
            "lastError": board.last_error(),
            "polling": !board.is_closed(),
        },
        "notices": active_notices,
    })
}

/// Prune old log files in `log_dir`, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(std::path::PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
