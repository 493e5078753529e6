//! Scripted remotes for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{CartRemote, OrderRemote};
use crate::error::RemoteError;
use crate::models::{CartLine, Order, OrderStatus};

pub fn order(id: &str, status: &str) -> Order {
    Order {
        id: id.to_string(),
        order_number: String::new(),
        status: OrderStatus::from(status),
        items: Vec::new(),
        created_at: None,
    }
}

type Scripted<T> = Mutex<VecDeque<(Duration, Result<T, RemoteError>)>>;

/// Order remote that replays queued responses after a per-call delay.
#[derive(Default)]
pub struct ScriptedOrders {
    fetches: Scripted<Vec<Order>>,
    statuses: Scripted<Order>,
    status_calls: Mutex<Vec<(String, OrderStatus)>>,
    fetch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fetch(&self, delay: Duration, result: Result<Vec<Order>, RemoteError>) {
        self.fetches.lock().unwrap().push_back((delay, result));
    }

    pub fn push_status(&self, delay: Duration, result: Result<Order, RemoteError>) {
        self.statuses.lock().unwrap().push_back((delay, result));
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> Vec<(String, OrderStatus)> {
        self.status_calls.lock().unwrap().clone()
    }
}

impl OrderRemote for ScriptedOrders {
    async fn fetch_active_orders(&self) -> Result<Vec<Order>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let next = self.fetches.lock().unwrap().pop_front();
        let (delay, result) = next.unwrap_or((Duration::ZERO, Ok(Vec::new())));
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: &OrderStatus,
    ) -> Result<Order, RemoteError> {
        self.status_calls
            .lock()
            .unwrap()
            .push((order_id.to_string(), status.clone()));
        let next = self.statuses.lock().unwrap().pop_front();
        let (delay, result) = next.unwrap_or_else(|| {
            (
                Duration::ZERO,
                Err(RemoteError::Unavailable("no scripted response".into())),
            )
        });
        tokio::time::sleep(delay).await;
        result
    }
}

/// Cart remote that records calls and either succeeds or fails them all.
#[derive(Default)]
pub struct RecordingCart {
    pub credential: bool,
    pub fail_with: Option<RemoteError>,
    pub remote_lines: Vec<CartLine>,
    pub delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl RecordingCart {
    pub fn signed_in() -> Self {
        Self {
            credential: true,
            ..Self::default()
        }
    }

    pub fn failing(error: RemoteError) -> Self {
        Self {
            credential: true,
            fail_with: Some(error),
            ..Self::default()
        }
    }

    pub fn with_remote_lines(lines: Vec<CartLine>) -> Self {
        Self {
            credential: true,
            remote_lines: lines,
            ..Self::default()
        }
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, call: String) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(call);
        tokio::time::sleep(self.delay).await;
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl CartRemote for RecordingCart {
    fn has_credential(&self) -> bool {
        self.credential
    }

    async fn add_to_cart(&self, product_id: &str, quantity: u32) -> Result<(), RemoteError> {
        self.record(format!("add {product_id} {quantity}")).await
    }

    async fn update_cart_line(&self, product_id: &str, quantity: u32) -> Result<(), RemoteError> {
        self.record(format!("update {product_id} {quantity}")).await
    }

    async fn remove_from_cart(&self, product_id: &str) -> Result<(), RemoteError> {
        self.record(format!("remove {product_id}")).await
    }

    async fn clear_cart(&self) -> Result<(), RemoteError> {
        self.record("clear".to_string()).await
    }

    async fn fetch_cart(&self) -> Result<Vec<CartLine>, RemoteError> {
        self.record("fetch".to_string()).await?;
        Ok(self.remote_lines.clone())
    }
}
