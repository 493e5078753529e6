//! Marketplace sync client.
//!
//! Keeps a local shopping cart that mirrors to the marketplace backend on a
//! best-effort basis, and a kitchen order board that polls the backend for
//! active orders and pushes status changes optimistically.
//!
//! All shared state (cart, board, token store, notices) is created by the
//! caller and passed around as `Arc`s; nothing here is a global.

use std::sync::Arc;
use tracing::{info, warn};

mod api;
mod cart;
mod cart_sync;
mod config;
mod db;
mod diagnostics;
mod error;
mod models;
mod notices;
mod orders;
mod poller;
mod storage;

#[cfg(test)]
mod fakes;

pub use api::{parse_order, parse_orders, parse_remote_cart, ApiClient, CartRemote, OrderRemote, RetryPolicy};
pub use cart::LocalCart;
pub use cart_sync::CartSync;
pub use config::{normalize_api_url, Config};
pub use db::{init as open_snapshot_db, open_in_memory as open_snapshot_db_in_memory, DbState};
pub use diagnostics::{about_info, health_snapshot, init_logging, prune_old_logs};
pub use error::{CartError, OrderError, RemoteError, StorageError};
pub use models::{CartItem, CartLine, CartSnapshot, Order, OrderItem, OrderStatus};
pub use notices::{Notice, NoticeLevel, Notices};
pub use orders::{OrderBoard, StatusMutator};
pub use poller::{start_order_poll, OrderPoller};
pub use storage::{KeyringTokenStore, MemoryTokenStore, TokenStore};

const DEVICE_SETTING_CATEGORY: &str = "device";
const DEVICE_ID_KEY: &str = "device_id";

/// Stable per-install identifier sent as `X-Device-Id`.
fn load_or_create_device_id(db: &DbState) -> String {
    let conn = db.lock();
    if let Some(id) = db::get_setting(&conn, DEVICE_SETTING_CATEGORY, DEVICE_ID_KEY)
        .filter(|id| !id.trim().is_empty())
    {
        return id;
    }
    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = db::set_setting(&conn, DEVICE_SETTING_CATEGORY, DEVICE_ID_KEY, &id) {
        warn!("Could not persist device id: {e}");
    }
    id
}

/// Headless kitchen display: poll active orders until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::load();
    let _log_guard = diagnostics::init_logging(&config.log_dir());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        api_url = %config.api_url,
        "Starting marketplace-sync"
    );

    let db = Arc::new(db::init(&config.data_dir).map_err(anyhow::Error::msg)?);
    let device_id = load_or_create_device_id(&db);

    let tokens: Arc<dyn TokenStore> = Arc::new(KeyringTokenStore::new());
    if !tokens.has_token() {
        warn!("No bearer token stored; cart changes stay on this device");
    }

    let client = Arc::new(ApiClient::new(&config, tokens)?.with_device_id(device_id));
    let cart = Arc::new(LocalCart::open(db)?);
    let board = Arc::new(OrderBoard::new());
    let notices = Arc::new(Notices::new(config.notice_ttl));

    info!(lines = cart.snapshot().items.len(), "Cart restored");

    let mut board_rx = board.subscribe();
    let board_watch = tokio::spawn(async move {
        while board_rx.changed().await.is_ok() {
            let orders = board_rx.borrow_and_update().clone();
            info!(active = orders.len(), "Order board updated");
            for order in &orders {
                info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    status = %order.status,
                    items = order.items.len(),
                    "order"
                );
            }
        }
    });

    let poller = poller::start_order_poll(board.clone(), client, config.poll_interval);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    poller.shutdown().await;
    board_watch.abort();

    info!(
        health = %diagnostics::health_snapshot(&cart, &board, &notices),
        "Stopped"
    );
    Ok(())
}
