//! Local cart cache.
//!
//! The in-memory list of cart lines is the source of truth for what the user
//! sees. Every mutation is applied synchronously, written through to the
//! SQLite snapshot (when one is attached) and published to subscribers.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::db::{self, DbState};
use crate::error::CartError;
use crate::models::{CartItem, CartLine, CartSnapshot};

pub struct LocalCart {
    lines: Mutex<Vec<CartLine>>,
    db: Option<Arc<DbState>>,
    tx: watch::Sender<CartSnapshot>,
}

impl Default for LocalCart {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCart {
    /// Empty cart without persistence.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CartSnapshot::default());
        Self {
            lines: Mutex::new(Vec::new()),
            db: None,
            tx,
        }
    }

    /// Cart restored from (and written through to) the snapshot store.
    pub fn open(db: Arc<DbState>) -> Result<Self, CartError> {
        let lines = db::load_cart_lines(&db.lock()).map_err(CartError::Storage)?;
        debug!(lines = lines.len(), "cart snapshot restored");
        let (tx, _rx) = watch::channel(CartSnapshot::from_lines(&lines));
        Ok(Self {
            lines: Mutex::new(lines),
            db: Some(db),
            tx,
        })
    }

    /// Receiver that sees the latest snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.tx.subscribe()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<CartLine>> {
        self.lines.lock().unwrap_or_else(|poisoned| {
            warn!("cart mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Persist and publish. Called with the lines lock held so snapshots are
    /// written in mutation order.
    fn commit(&self, lines: &[CartLine]) -> CartSnapshot {
        if let Some(db) = &self.db {
            if let Err(e) = db::save_cart_lines(&mut db.lock(), lines) {
                error!("cart snapshot write failed: {e}");
            }
        }
        let snapshot = CartSnapshot::from_lines(lines);
        self.tx.send_replace(snapshot.clone());
        snapshot
    }

    /// Add `qty` of `item`. An existing line for the same product has its
    /// quantity incremented; otherwise a new line is appended. Non-positive
    /// quantities are clamped to 1.
    pub fn add(&self, item: &CartItem, qty: i64) -> Result<CartSnapshot, CartError> {
        let product_id = item.product_id.trim();
        if product_id.is_empty() {
            return Err(CartError::ProductIdMissing);
        }
        let qty = clamp_add_quantity(qty);

        let mut lines = self.guard();
        match lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => {
                line.quantity = line.quantity.saturating_add(qty);
                debug!(product_id, quantity = line.quantity, "cart line incremented");
            }
            None => {
                lines.push(CartLine {
                    product_id: product_id.to_string(),
                    name: item.name.clone(),
                    price: sanitize_price(item.price),
                    quantity: qty,
                });
                debug!(product_id, quantity = qty, "cart line added");
            }
        }
        Ok(self.commit(&lines))
    }

    /// Remove the line for `product_id`, if present.
    pub fn remove(&self, product_id: &str) -> CartSnapshot {
        let mut lines = self.guard();
        lines.retain(|l| l.product_id != product_id);
        self.commit(&lines)
    }

    /// Set the quantity of an existing line. `qty <= 0` removes the line.
    /// Unknown products are left alone.
    pub fn update_quantity(&self, product_id: &str, qty: i64) -> CartSnapshot {
        let mut lines = self.guard();
        if qty <= 0 {
            lines.retain(|l| l.product_id != product_id);
        } else if let Some(line) = lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = u32::try_from(qty).unwrap_or(u32::MAX);
        }
        self.commit(&lines)
    }

    pub fn clear(&self) -> CartSnapshot {
        let mut lines = self.guard();
        lines.clear();
        self.commit(&lines)
    }

    /// Replace the whole cart, e.g. with a copy pulled from the server.
    pub fn replace_all(&self, new_lines: Vec<CartLine>) -> CartSnapshot {
        let mut lines = self.guard();
        *lines = new_lines
            .into_iter()
            .filter(|l| l.quantity >= 1 && !l.product_id.trim().is_empty())
            .map(|l| CartLine {
                price: sanitize_price(l.price),
                ..l
            })
            .collect();
        self.commit(&lines)
    }

    pub fn total(&self) -> f64 {
        self.guard().iter().map(CartLine::subtotal).sum()
    }

    pub fn count(&self) -> u32 {
        self.guard().iter().map(|l| l.quantity).sum()
    }

    pub fn is_in_cart(&self, product_id: &str) -> bool {
        self.guard().iter().any(|l| l.product_id == product_id)
    }

    /// Quantity of `product_id` in the cart, 0 when absent.
    pub fn item_quantity(&self, product_id: &str) -> u32 {
        self.guard()
            .iter()
            .find(|l| l.product_id == product_id)
            .map_or(0, |l| l.quantity)
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot::from_lines(&self.guard())
    }
}

fn clamp_add_quantity(qty: i64) -> u32 {
    if qty < 1 {
        debug!(qty, "non-positive add quantity clamped to 1");
        return 1;
    }
    u32::try_from(qty).unwrap_or(u32::MAX)
}

fn sanitize_price(price: f64) -> f64 {
    if price.is_finite() && price > 0.0 {
        price
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::path::PathBuf;

    fn test_db_state() -> Arc<DbState> {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        Arc::new(DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn item(id: &str, price: f64) -> CartItem {
        CartItem::new(id, format!("product {id}"), price)
    }

    fn assert_totals_consistent(cart: &LocalCart) {
        let snap = cart.snapshot();
        let expected_total: f64 = snap
            .items
            .iter()
            .map(|l| l.price * f64::from(l.quantity))
            .sum();
        let expected_count: u32 = snap.items.iter().map(|l| l.quantity).sum();
        assert!((cart.total() - expected_total).abs() < 1e-9);
        assert_eq!(cart.count(), expected_count);
        assert!((snap.total - expected_total).abs() < 1e-9);
        assert_eq!(snap.item_count, expected_count);
    }

    #[test]
    fn adding_same_product_increments_single_line() {
        let cart = LocalCart::new();
        cart.add(&item("p1", 4.0), 2).unwrap();
        let snap = cart.add(&item("p1", 4.0), 3).unwrap();
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].quantity, 5);
        assert_eq!(cart.item_quantity("p1"), 5);
    }

    #[test]
    fn add_without_product_id_is_rejected() {
        let cart = LocalCart::new();
        assert_eq!(cart.add(&item("  ", 1.0), 1), Err(CartError::ProductIdMissing));
        assert_eq!(cart.count(), 0);
    }

    #[test]
    fn non_positive_add_quantity_is_clamped() {
        let cart = LocalCart::new();
        cart.add(&item("p1", 1.0), 0).unwrap();
        cart.add(&item("p2", 1.0), -7).unwrap();
        assert_eq!(cart.item_quantity("p1"), 1);
        assert_eq!(cart.item_quantity("p2"), 1);
    }

    #[test]
    fn update_quantity_zero_equals_remove() {
        let a = LocalCart::new();
        let b = LocalCart::new();
        for cart in [&a, &b] {
            cart.add(&item("p1", 2.0), 1).unwrap();
            cart.add(&item("p2", 3.0), 2).unwrap();
        }
        a.update_quantity("p1", 0);
        b.remove("p1");
        assert_eq!(a.snapshot(), b.snapshot());
        assert!(!a.is_in_cart("p1"));
    }

    #[test]
    fn update_quantity_sets_and_ignores_unknown() {
        let cart = LocalCart::new();
        cart.add(&item("p1", 2.5), 1).unwrap();
        cart.update_quantity("p1", 4);
        cart.update_quantity("ghost", 9);
        assert_eq!(cart.item_quantity("p1"), 4);
        assert!(!cart.is_in_cart("ghost"));
        assert!((cart.total() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn totals_hold_across_mixed_sequence() {
        let cart = LocalCart::new();
        let ops: Vec<Box<dyn Fn(&LocalCart)>> = vec![
            Box::new(|c| {
                c.add(&item("a", 1.25), 3).unwrap();
            }),
            Box::new(|c| {
                c.add(&item("b", 9.99), 1).unwrap();
            }),
            Box::new(|c| {
                c.add(&item("a", 1.25), 2).unwrap();
            }),
            Box::new(|c| {
                c.update_quantity("b", 7);
            }),
            Box::new(|c| {
                c.add(&item("c", 0.5), 10).unwrap();
            }),
            Box::new(|c| {
                c.remove("a");
            }),
            Box::new(|c| {
                c.update_quantity("c", -1);
            }),
            Box::new(|c| {
                c.add(&item("d", 3.0), 1).unwrap();
            }),
        ];
        for op in ops {
            op(&cart);
            assert_totals_consistent(&cart);
        }
        assert_eq!(cart.count(), 8);
    }

    #[test]
    fn lines_keep_insertion_order() {
        let cart = LocalCart::new();
        cart.add(&item("z", 1.0), 1).unwrap();
        cart.add(&item("a", 1.0), 1).unwrap();
        cart.add(&item("z", 1.0), 1).unwrap();
        let ids: Vec<_> = cart
            .snapshot()
            .items
            .into_iter()
            .map(|l| l.product_id)
            .collect();
        assert_eq!(ids, vec!["z", "a"]);
    }

    #[test]
    fn every_mutation_notifies_subscribers() {
        let cart = LocalCart::new();
        let mut rx = cart.subscribe();
        assert!(!rx.has_changed().unwrap());

        cart.add(&item("p1", 2.0), 2).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().item_count, 2);

        cart.clear();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().item_count, 0);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let db = test_db_state();
        {
            let cart = LocalCart::open(db.clone()).unwrap();
            cart.add(&item("p1", 3.0), 2).unwrap();
            cart.add(&item("p2", 1.0), 1).unwrap();
            cart.update_quantity("p2", 5);
        }
        let reopened = LocalCart::open(db).unwrap();
        assert_eq!(reopened.item_quantity("p1"), 2);
        assert_eq!(reopened.item_quantity("p2"), 5);
        assert!((reopened.total() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn replace_all_drops_invalid_lines() {
        let cart = LocalCart::new();
        cart.add(&item("old", 1.0), 1).unwrap();
        cart.replace_all(vec![
            CartLine {
                product_id: "p1".into(),
                name: "Tea".into(),
                price: -2.0,
                quantity: 2,
            },
            CartLine {
                product_id: "p2".into(),
                name: "Cake".into(),
                price: 4.0,
                quantity: 0,
            },
        ]);
        let snap = cart.snapshot();
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].price, 0.0);
        assert!(!cart.is_in_cart("old"));
    }

    #[test]
    fn open_reports_unreadable_snapshot() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        let db = Arc::new(DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        });
        assert!(matches!(LocalCart::open(db), Err(CartError::Storage(_))));
    }
}
