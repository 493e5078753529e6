//! Background order poll loop.
//!
//! Fetches the active order list immediately, then on a fixed interval, and
//! applies each result to the board. Only one request is ever in flight: the
//! next tick waits for the previous fetch to finish. Stopping the poller
//! cancels the in-flight request and closes the board, so a response that
//! arrives after teardown is never applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::OrderRemote;
use crate::orders::OrderBoard;

/// Handle to a running poll loop. Dropping it stops the loop.
pub struct OrderPoller {
    board: Arc<OrderBoard>,
    cancel: CancellationToken,
    is_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OrderPoller {
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop polling and close the board. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Order poll loop stopping");
        }
        self.cancel.cancel();
        self.board.close();
        self.is_running.store(false, Ordering::SeqCst);
    }

    /// Stop and wait for the loop task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("order poll task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for OrderPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start polling `remote` into `board` every `interval`.
pub fn start_order_poll<R: OrderRemote>(
    board: Arc<OrderBoard>,
    remote: Arc<R>,
    interval: Duration,
) -> OrderPoller {
    let cancel = CancellationToken::new();
    let is_running = Arc::new(AtomicBool::new(true));

    let handle = tokio::spawn(run_poll_loop(
        board.clone(),
        remote,
        interval,
        cancel.clone(),
        is_running.clone(),
    ));

    OrderPoller {
        board,
        cancel,
        is_running,
        handle: Some(handle),
    }
}

async fn run_poll_loop<R: OrderRemote>(
    board: Arc<OrderBoard>,
    remote: Arc<R>,
    interval: Duration,
    cancel: CancellationToken,
    is_running: Arc<AtomicBool>,
) {
    info!("Order poll loop started (interval: {}s)", interval.as_secs_f32());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous_ok: Option<bool> = None;

    loop {
        // First tick completes immediately.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(seq) = board.begin_fetch() else {
            break;
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(seq, "poll cancelled with request in flight");
                break;
            }
            r = remote.fetch_active_orders() => r,
        };

        match result {
            Ok(orders) => {
                if previous_ok == Some(false) {
                    info!("Order poll recovered");
                }
                previous_ok = Some(true);
                board.apply_snapshot(seq, orders);
            }
            Err(e) => {
                if previous_ok != Some(false) {
                    warn!(seq, error = %e, "Order poll failed; keeping last list");
                } else {
                    debug!(seq, error = %e, "Order poll still failing");
                }
                previous_ok = Some(false);
                board.record_fetch_error(seq, &e);
            }
        }
    }

    is_running.store(false, Ordering::SeqCst);
    info!("Order poll loop stopped");
}
