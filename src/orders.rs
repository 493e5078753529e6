//! Kitchen order board and status mutations.
//!
//! The board holds the working list of active orders. Poll results replace
//! the list wholesale; a request sequence number makes sure an older response
//! never overwrites a newer one. Status changes are applied optimistically and
//! then confirmed (or not) by the backend.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::OrderRemote;
use crate::error::{OrderError, RemoteError};
use crate::models::{Order, OrderStatus};
use crate::notices::Notices;

#[derive(Default)]
struct BoardState {
    orders: Vec<Order>,
    /// Sequence number of the most recently issued fetch.
    issued_seq: u64,
    /// Sequence number of the fetch whose result is on display.
    applied_seq: u64,
    closed: bool,
    /// Generation counter for local status changes.
    mutation_gen: u64,
    /// Latest local status change per order id.
    latest_mutation: HashMap<String, u64>,
    last_polled_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct OrderBoard {
    state: Mutex<BoardState>,
    tx: watch::Sender<Vec<Order>>,
}

impl Default for OrderBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            state: Mutex::new(BoardState::default()),
            tx,
        }
    }

    fn guard(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("order board mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn publish(&self, state: &BoardState) {
        self.tx.send_replace(state.orders.clone());
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Order>> {
        self.tx.subscribe()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.guard().orders.clone()
    }

    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.guard().orders.iter().find(|o| o.id == order_id).cloned()
    }

    pub fn last_polled_at(&self) -> Option<DateTime<Utc>> {
        self.guard().last_polled_at
    }

    pub fn last_error(&self) -> Option<String> {
        self.guard().last_error.clone()
    }

    // -----------------------------------------------------------------------
    // Snapshot application
    // -----------------------------------------------------------------------

    /// Register a new fetch and return its sequence number, or `None` once
    /// the board is closed.
    pub fn begin_fetch(&self) -> Option<u64> {
        let mut state = self.guard();
        if state.closed {
            return None;
        }
        state.issued_seq += 1;
        Some(state.issued_seq)
    }

    /// Replace the working list with the result of fetch `seq`.
    ///
    /// Returns `false` (and changes nothing) when the board is closed or a
    /// fetch issued after `seq` has already been applied.
    pub fn apply_snapshot(&self, seq: u64, orders: Vec<Order>) -> bool {
        let mut state = self.guard();
        if state.closed {
            debug!(seq, "board closed, dropping late snapshot");
            return false;
        }
        if seq <= state.applied_seq {
            debug!(seq, applied = state.applied_seq, "dropping stale snapshot");
            return false;
        }
        let state = &mut *state;
        state.orders = orders.into_iter().filter(|o| o.status.is_active()).collect();
        let on_board = &state.orders;
        state
            .latest_mutation
            .retain(|id, _| on_board.iter().any(|o| &o.id == id));
        state.applied_seq = seq;
        state.last_polled_at = Some(Utc::now());
        state.last_error = None;
        debug!(seq, orders = state.orders.len(), "snapshot applied");
        self.publish(state);
        true
    }

    /// Remember a failed fetch. The displayed list is left untouched.
    pub fn record_fetch_error(&self, seq: u64, error: &RemoteError) {
        let mut state = self.guard();
        if state.closed || seq <= state.applied_seq {
            return;
        }
        state.last_error = Some(error.to_string());
    }

    /// Fetch the active list once and apply it if it is still the freshest.
    pub async fn refresh<R: OrderRemote>(&self, remote: &R) -> Result<bool, RemoteError> {
        let Some(seq) = self.begin_fetch() else {
            return Ok(false);
        };
        match remote.fetch_active_orders().await {
            Ok(orders) => Ok(self.apply_snapshot(seq, orders)),
            Err(e) => {
                warn!(seq, error = %e, "order fetch failed");
                self.record_fetch_error(seq, &e);
                Err(e)
            }
        }
    }

    /// Stop accepting results. Used on teardown.
    pub fn close(&self) {
        self.guard().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.guard().closed
    }

    // -----------------------------------------------------------------------
    // Status mutation
    // -----------------------------------------------------------------------

    /// Validate and apply a local status change. Returns the previous status
    /// and the generation of this change.
    fn apply_optimistic_status(
        &self,
        order_id: &str,
        next: &OrderStatus,
    ) -> Result<(OrderStatus, u64), OrderError> {
        let mut state = self.guard();
        let state = &mut *state;
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;

        if !order.status.can_transition_to(next) {
            return Err(OrderError::IllegalTransition {
                from: order.status.clone(),
                to: next.clone(),
            });
        }

        let previous = std::mem::replace(&mut order.status, next.clone());
        state.mutation_gen += 1;
        let generation = state.mutation_gen;
        state
            .latest_mutation
            .insert(order_id.to_string(), generation);
        self.publish(state);
        Ok((previous, generation))
    }

    /// Swap in the server's copy of an order. Orders the server reports as no
    /// longer active leave the board. A confirmation for a change that a later
    /// local change has superseded is dropped.
    fn confirm_order(&self, confirmed: Order, generation: u64) {
        let mut state = self.guard();
        if state.closed {
            return;
        }
        if state
            .latest_mutation
            .get(&confirmed.id)
            .is_some_and(|latest| *latest > generation)
        {
            debug!(order_id = %confirmed.id, generation, "dropping superseded confirmation");
            return;
        }
        let Some(idx) = state.orders.iter().position(|o| o.id == confirmed.id) else {
            debug!(order_id = %confirmed.id, "confirmed order no longer on board");
            return;
        };
        if confirmed.status.is_active() {
            state.orders[idx] = confirmed;
        } else {
            state.orders.remove(idx);
        }
        self.publish(&state);
    }
}

/// Moves orders forward through `new → preparing → ready`.
pub struct StatusMutator<R> {
    board: Arc<OrderBoard>,
    remote: Arc<R>,
    notices: Arc<Notices>,
}

impl<R: OrderRemote> StatusMutator<R> {
    pub fn new(board: Arc<OrderBoard>, remote: Arc<R>, notices: Arc<Notices>) -> Self {
        Self {
            board,
            remote,
            notices,
        }
    }

    /// Move `order_id` to `next`.
    ///
    /// The board shows `next` immediately. On remote success the record is
    /// replaced with the server's version; on failure the optimistic status
    /// stays and the error is returned (and posted as a notice).
    pub async fn transition(&self, order_id: &str, next: OrderStatus) -> Result<Order, OrderError> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(OrderError::MissingIdentifier);
        }

        let (previous, generation) = self.board.apply_optimistic_status(order_id, &next)?;
        info!(order_id, from = %previous, to = %next, "order status changed locally");

        match self.remote.update_order_status(order_id, &next).await {
            Ok(confirmed) => {
                debug!(order_id, status = %confirmed.status, "order status confirmed");
                self.board.confirm_order(confirmed.clone(), generation);
                Ok(confirmed)
            }
            Err(e) => {
                warn!(order_id, error = %e, "order status update failed, keeping local status");
                self.notices
                    .error(format!("Could not update order status: {e}"));
                Err(OrderError::Remote(e))
            }
        }
    }

    /// Advance an order to the next status in the sequence.
    pub async fn advance(&self, order_id: &str) -> Result<Order, OrderError> {
        let current = self
            .board
            .get(order_id.trim())
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
        let next = current
            .status
            .next()
            .ok_or_else(|| OrderError::IllegalTransition {
                from: current.status.clone(),
                to: current.status.clone(),
            })?;
        self.transition(order_id, next).await
    }
}
