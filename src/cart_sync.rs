//! Cart reconciler: best-effort remote writes in front of the local cart.
//!
//! Each operation changes the local cart first, so the user sees it at once,
//! then mirrors the change to the remote cart when a bearer token is present.
//! Remote failures are logged and posted as a warning notice; they are never
//! retried and never roll the local change back.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::CartRemote;
use crate::cart::LocalCart;
use crate::error::{CartError, RemoteError};
use crate::models::{CartItem, CartSnapshot};
use crate::notices::Notices;

pub struct CartSync<R> {
    cart: Arc<LocalCart>,
    remote: Arc<R>,
    notices: Arc<Notices>,
}

impl<R: CartRemote> CartSync<R> {
    pub fn new(cart: Arc<LocalCart>, remote: Arc<R>, notices: Arc<Notices>) -> Self {
        Self {
            cart,
            remote,
            notices,
        }
    }

    pub fn cart(&self) -> &Arc<LocalCart> {
        &self.cart
    }

    fn swallow(&self, op: &str, product_id: Option<&str>, result: Result<(), RemoteError>) {
        if let Err(e) = result {
            warn!(op, product_id, error = %e, "remote cart write failed, keeping local change");
            self.notices
                .warn(format!("Cart saved on this device only: {e}"));
        }
    }

    /// Add `quantity` of `item` to the cart.
    pub async fn add_to_cart(&self, item: &CartItem, quantity: i64) -> Result<CartSnapshot, CartError> {
        let snapshot = self.cart.add(item, quantity)?;
        let product_id = item.product_id.trim();
        let qty = u32::try_from(quantity.max(1)).unwrap_or(u32::MAX);

        if self.remote.has_credential() {
            let result = self.remote.add_to_cart(product_id, qty).await;
            self.swallow("add", Some(product_id), result);
        } else {
            debug!(product_id, "no credential, cart add is local only");
        }
        Ok(snapshot)
    }

    /// Set a line's quantity; `quantity <= 0` removes it.
    pub async fn update_quantity(&self, product_id: &str, quantity: i64) -> CartSnapshot {
        let snapshot = self.cart.update_quantity(product_id, quantity);
        if self.remote.has_credential() {
            let result = if quantity <= 0 {
                self.remote.remove_from_cart(product_id).await
            } else {
                let qty = u32::try_from(quantity).unwrap_or(u32::MAX);
                self.remote.update_cart_line(product_id, qty).await
            };
            self.swallow("update", Some(product_id), result);
        }
        snapshot
    }

    pub async fn remove(&self, product_id: &str) -> CartSnapshot {
        let snapshot = self.cart.remove(product_id);
        if self.remote.has_credential() {
            let result = self.remote.remove_from_cart(product_id).await;
            self.swallow("remove", Some(product_id), result);
        }
        snapshot
    }

    /// Empty the cart, e.g. after checkout completes.
    pub async fn clear(&self) -> CartSnapshot {
        let snapshot = self.cart.clear();
        if self.remote.has_credential() {
            let result = self.remote.clear_cart().await;
            self.swallow("clear", None, result);
        }
        snapshot
    }

    /// Overwrite the local cart with the server's copy.
    ///
    /// Never called implicitly: without it local and remote carts may differ
    /// indefinitely after a failed write.
    pub async fn pull_remote(&self) -> Result<CartSnapshot, RemoteError> {
        if !self.remote.has_credential() {
            return Err(RemoteError::MissingCredential);
        }
        let lines = self.remote.fetch_cart().await?;
        info!(lines = lines.len(), "local cart replaced with remote copy");
        Ok(self.cart.replace_all(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingCart;
    use crate::models::CartLine;
    use std::time::Duration;

    fn sync_with(remote: RecordingCart) -> (CartSync<RecordingCart>, Arc<RecordingCart>, Arc<Notices>) {
        let remote = Arc::new(remote);
        let notices = Arc::new(Notices::new(Duration::from_secs(60)));
        let sync = CartSync::new(Arc::new(LocalCart::new()), remote.clone(), notices.clone());
        (sync, remote, notices)
    }

    fn tea() -> CartItem {
        CartItem::new("p1", "Mint tea", 2.0)
    }

    #[tokio::test]
    async fn signed_out_add_is_local_only() {
        let (sync, remote, notices) = sync_with(RecordingCart::default());
        let snap = sync.add_to_cart(&tea(), 2).await.unwrap();
        assert_eq!(snap.item_count, 2);
        assert!(remote.calls().is_empty());
        assert!(notices.active().is_empty());
    }

    #[tokio::test]
    async fn signed_in_add_writes_remote_and_local() {
        let (sync, remote, _) = sync_with(RecordingCart::signed_in());
        sync.add_to_cart(&tea(), 2).await.unwrap();
        sync.add_to_cart(&tea(), 3).await.unwrap();
        assert_eq!(remote.calls(), vec!["add p1 2", "add p1 3"]);
        assert_eq!(sync.cart().item_quantity("p1"), 5);
    }

    #[tokio::test]
    async fn remote_failure_keeps_local_change() {
        let (sync, remote, notices) = sync_with(RecordingCart::failing(RemoteError::Unavailable(
            "connection refused".into(),
        )));
        let snap = sync.add_to_cart(&tea(), 1).await.unwrap();
        assert_eq!(snap.item_count, 1);
        assert_eq!(remote.calls().len(), 1);
        assert_eq!(notices.active().len(), 1);

        let snap = sync.update_quantity("p1", 4).await;
        assert_eq!(snap.item_count, 4);
        let snap = sync.clear().await;
        assert_eq!(snap.item_count, 0);
        assert_eq!(remote.calls().len(), 3);
    }

    #[tokio::test]
    async fn missing_product_id_blocks_everything() {
        let (sync, remote, _) = sync_with(RecordingCart::signed_in());
        let err = sync
            .add_to_cart(&CartItem::new("", "Nameless", 1.0), 1)
            .await
            .unwrap_err();
        assert_eq!(err, CartError::ProductIdMissing);
        assert!(remote.calls().is_empty());
        assert_eq!(sync.cart().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn local_change_visible_while_remote_write_pending() {
        let remote = RecordingCart::failing(RemoteError::Unavailable("timed out".into()))
            .with_delay(Duration::from_secs(30));
        let (sync, _, notices) = sync_with(remote);
        let sync = Arc::new(sync);

        let s = sync.clone();
        let task = tokio::spawn(async move { s.add_to_cart(&tea(), 2).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sync.cart().is_in_cart("p1"));
        assert_eq!(sync.cart().item_quantity("p1"), 2);
        assert!(notices.active().is_empty());

        let snap = task.await.unwrap().unwrap();
        assert_eq!(snap.item_count, 2);
        assert!(sync.cart().is_in_cart("p1"));
        assert_eq!(notices.active().len(), 1);
    }

    #[tokio::test]
    async fn zero_quantity_update_mirrors_as_remove() {
        let (sync, remote, _) = sync_with(RecordingCart::signed_in());
        sync.add_to_cart(&tea(), 1).await.unwrap();
        let snap = sync.update_quantity("p1", 0).await;
        assert!(snap.items.is_empty());
        assert_eq!(remote.calls(), vec!["add p1 1", "remove p1"]);
    }

    #[tokio::test]
    async fn non_positive_add_sends_clamped_quantity() {
        let (sync, remote, _) = sync_with(RecordingCart::signed_in());
        sync.add_to_cart(&tea(), -3).await.unwrap();
        assert_eq!(remote.calls(), vec!["add p1 1"]);
        assert_eq!(sync.cart().item_quantity("p1"), 1);
    }

    #[tokio::test]
    async fn pull_remote_overwrites_local() {
        let remote = RecordingCart::with_remote_lines(vec![CartLine {
            product_id: "p9".into(),
            name: "Baklava".into(),
            price: 3.5,
            quantity: 2,
        }]);
        let (sync, _, _) = sync_with(remote);
        sync.cart().add(&tea(), 1).unwrap();

        let snap = sync.pull_remote().await.unwrap();
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].product_id, "p9");
        assert!(!sync.cart().is_in_cart("p1"));
    }

    #[tokio::test]
    async fn pull_remote_requires_credential() {
        let (sync, remote, _) = sync_with(RecordingCart::default());
        assert_eq!(sync.pull_remote().await, Err(RemoteError::MissingCredential));
        assert!(remote.calls().is_empty());
    }
}
