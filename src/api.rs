//! Marketplace REST client.
//!
//! Authenticated HTTP communication with the marketplace backend: the active
//! order list, order status updates, and the remote cart endpoints. The
//! `OrderRemote` and `CartRemote` traits are the seams the board and the cart
//! reconciler depend on.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RemoteError;
use crate::models::{CartLine, Order, OrderStatus};
use crate::storage::TokenStore;

const API_PREFIX: &str = "/api";
const DEFAULT_RETRY_BASE_MS: u64 = 250;
const MAX_RETRY_DELAY_MS: u64 = 2_000;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Order endpoints used by the kitchen board.
pub trait OrderRemote: Send + Sync + 'static {
    /// Orders in an active status, newest first.
    fn fetch_active_orders(&self) -> impl Future<Output = Result<Vec<Order>, RemoteError>> + Send;

    /// Request a status change; returns the server's copy of the order.
    fn update_order_status(
        &self,
        order_id: &str,
        status: &OrderStatus,
    ) -> impl Future<Output = Result<Order, RemoteError>> + Send;
}

/// Remote cart endpoints. All writes are best-effort from the caller's view.
pub trait CartRemote: Send + Sync {
    fn has_credential(&self) -> bool;

    fn add_to_cart(
        &self,
        product_id: &str,
        quantity: u32,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn update_cart_line(
        &self,
        product_id: &str,
        quantity: u32,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn remove_from_cart(
        &self,
        product_id: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn clear_cart(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn fetch_cart(&self) -> impl Future<Output = Result<Vec<CartLine>, RemoteError>> + Send;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32, seed: u64) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        exp.min(self.max_delay) + Duration::from_millis(deterministic_jitter_ms(seed))
    }
}

fn deterministic_jitter_ms(seed: u64) -> u64 {
    seed % 50
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly transport failure.
fn friendly_error(url: &str, err: &reqwest::Error) -> RemoteError {
    let message = if err.is_connect() {
        format!("Cannot reach marketplace API at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid marketplace API URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    RemoteError::Unavailable(message)
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session expired, please sign in again".to_string(),
        403 => "Not allowed".to_string(),
        404 => "Marketplace endpoint not found".to_string(),
        429 => "Too many requests".to_string(),
        s if s >= 500 => format!("Marketplace server error (HTTP {s})"),
        s => format!("Unexpected response from marketplace API (HTTP {s})"),
    }
}

/// Build a `Rejected` error, preferring the server's own message.
fn rejection(status: StatusCode, body_text: &str) -> RemoteError {
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| status_error(status));
    RemoteError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// The payload itself, or the first of the usual envelope keys that holds it.
fn unwrap_envelope<'a>(body: &'a Value, keys: &[&str]) -> &'a Value {
    keys.iter().find_map(|k| body.get(*k)).unwrap_or(body)
}

/// Parse an order list. Records without an id or with an unreadable shape are
/// dropped. The result is sorted newest first.
pub fn parse_orders(body: &Value) -> Result<Vec<Order>, RemoteError> {
    let list = unwrap_envelope(body, &["orders", "tickets", "data"])
        .as_array()
        .ok_or_else(|| RemoteError::InvalidResponse("expected an order list".into()))?;

    let mut orders: Vec<Order> = list
        .iter()
        .filter_map(|raw| match serde_json::from_value::<Order>(raw.clone()) {
            Ok(order) if !order.id.trim().is_empty() => Some(order),
            Ok(_) => {
                warn!("dropping order without id");
                None
            }
            Err(e) => {
                warn!(error = %e, "dropping unreadable order");
                None
            }
        })
        .collect();

    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(orders)
}

pub fn parse_order(body: &Value) -> Result<Order, RemoteError> {
    let raw = unwrap_envelope(body, &["order", "data"]);
    let order: Order = serde_json::from_value(raw.clone())
        .map_err(|e| RemoteError::InvalidResponse(format!("order: {e}")))?;
    if order.id.trim().is_empty() {
        return Err(RemoteError::InvalidResponse("order without id".into()));
    }
    Ok(order)
}

fn str_any(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn num_any(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| v.get(*k).and_then(Value::as_f64))
}

/// Parse a remote cart. Lines reference the product either by id string or as
/// an embedded product document.
pub fn parse_remote_cart(body: &Value) -> Result<Vec<CartLine>, RemoteError> {
    let cart = unwrap_envelope(body, &["cart", "data"]);
    let items = cart
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| RemoteError::InvalidResponse("expected cart items".into()))?;

    let lines = items
        .iter()
        .filter_map(|item| {
            let product = item.get("product").filter(|p| p.is_object());
            let product_id = str_any(item, &["productId", "product"])
                .or_else(|| product.and_then(|p| str_any(p, &["_id", "id"])))?;
            let name = str_any(item, &["name"])
                .or_else(|| product.and_then(|p| str_any(p, &["name", "title"])))
                .unwrap_or_default();
            let price = num_any(item, &["price"])
                .or_else(|| product.and_then(|p| num_any(p, &["price"])))
                .unwrap_or(0.0);
            let quantity = item
                .get("quantity")
                .and_then(Value::as_u64)
                .and_then(|q| u32::try_from(q).ok())
                .filter(|q| *q >= 1)?;
            Some(CartLine {
                product_id,
                name,
                price,
                quantity,
            })
        })
        .collect();
    Ok(lines)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the marketplace backend.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    tokens: Arc<dyn TokenStore>,
    retry: RetryPolicy,
    order_limit: u32,
    device_id: Option<String>,
}

impl ApiClient {
    pub fn new(config: &Config, tokens: Arc<dyn TokenStore>) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.api_url.clone(),
            http,
            tokens,
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                ..RetryPolicy::default()
            },
            order_limit: config.order_limit,
            device_id: None,
        })
    }

    /// Identify this install to the backend via `X-Device-Id`.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn orders_path(&self) -> String {
        format!(
            "{API_PREFIX}/orders?status=active&sort=createdAt:desc&limit={}",
            self.order_limit
        )
    }

    /// Perform a request with the bearer token attached, retrying transient
    /// failures up to the policy's attempt budget.
    ///
    /// With `require_auth`, a missing token fails fast without any network
    /// traffic.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        require_auth: bool,
    ) -> Result<Value, RemoteError> {
        self.send(method, path, body, require_auth, self.retry.max_attempts)
            .await
    }

    /// Single attempt, for writes that must not be replayed.
    pub async fn request_once(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        require_auth: bool,
    ) -> Result<Value, RemoteError> {
        self.send(method, path, body, require_auth, 1).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        require_auth: bool,
        max_attempts: u32,
    ) -> Result<Value, RemoteError> {
        let token = self.tokens.token();
        if require_auth && token.is_none() {
            return Err(RemoteError::MissingCredential);
        }

        let url = format!("{}{path}", self.base_url);
        let mut attempt = 1;
        loop {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("Accept", "application/json");
            if let Some(t) = token.as_deref() {
                req = req.bearer_auth(t.as_str());
            }
            if let Some(id) = self.device_id.as_deref() {
                req = req.header("X-Device-Id", id);
            }
            if let Some(b) = body.as_ref() {
                req = req.json(b);
            }

            let result = match req.send().await {
                Ok(resp) => read_response(resp).await,
                Err(e) => Err(friendly_error(&self.base_url, &e)),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt, u64::from(attempt) * 17);
                    debug!(%method, path, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

async fn read_response(resp: reqwest::Response) -> Result<Value, RemoteError> {
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(rejection(status, &body_text));
    }
    if body_text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body_text)
        .map_err(|e| RemoteError::InvalidResponse(format!("invalid JSON: {e}")))
}

impl OrderRemote for ApiClient {
    async fn fetch_active_orders(&self) -> Result<Vec<Order>, RemoteError> {
        let path = self.orders_path();
        let body = self.request(Method::GET, &path, None, false).await?;
        parse_orders(&body)
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: &OrderStatus,
    ) -> Result<Order, RemoteError> {
        let path = format!("{API_PREFIX}/orders/{}/status", percent_encode(order_id));
        let body = serde_json::json!({ "status": status.as_str() });
        let resp = self.request(Method::PATCH, &path, Some(body), true).await?;
        parse_order(&resp)
    }
}

/// Cart writes go out once: a replayed `add` would double the remote quantity.
impl CartRemote for ApiClient {
    fn has_credential(&self) -> bool {
        self.tokens.has_token()
    }

    async fn add_to_cart(&self, product_id: &str, quantity: u32) -> Result<(), RemoteError> {
        let body = serde_json::json!({ "productId": product_id, "quantity": quantity });
        self.request_once(Method::POST, &format!("{API_PREFIX}/cart/add"), Some(body), true)
            .await
            .map(|_| ())
    }

    async fn update_cart_line(&self, product_id: &str, quantity: u32) -> Result<(), RemoteError> {
        let body = serde_json::json!({ "productId": product_id, "quantity": quantity });
        self.request_once(Method::PUT, &format!("{API_PREFIX}/cart/update"), Some(body), true)
            .await
            .map(|_| ())
    }

    async fn remove_from_cart(&self, product_id: &str) -> Result<(), RemoteError> {
        let body = serde_json::json!({ "productId": product_id });
        self.request_once(Method::DELETE, &format!("{API_PREFIX}/cart/remove"), Some(body), true)
            .await
            .map(|_| ())
    }

    async fn clear_cart(&self) -> Result<(), RemoteError> {
        self.request_once(Method::DELETE, &format!("{API_PREFIX}/cart/clear"), None, true)
            .await
            .map(|_| ())
    }

    async fn fetch_cart(&self) -> Result<Vec<CartLine>, RemoteError> {
        let body = self
            .request(Method::GET, &format!("{API_PREFIX}/cart"), None, true)
            .await?;
        parse_remote_cart(&body)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
