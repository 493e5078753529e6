//! Error taxonomy for the cart and order-board core.
//!
//! Remote failures are classified once, at the REST boundary, so callers can
//! decide between swallowing (cart writes) and surfacing (order status).

use thiserror::Error;

use crate::models::OrderStatus;

/// Failure talking to the marketplace REST backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// No bearer token in the token store.
    #[error("Not signed in")]
    MissingCredential,

    /// Connect failure, timeout, or any other transport problem.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// Non-2xx response. `message` is the server-provided text when present.
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },

    /// 2xx response whose body is not the expected shape.
    #[error("Invalid response from marketplace API: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::MissingCredential | Self::InvalidResponse(_) => false,
        }
    }
}

/// Failure of a local cart operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    #[error("Product id is missing")]
    ProductIdMissing,

    /// The persisted snapshot could not be read while opening the cart.
    #[error("Cart snapshot error: {0}")]
    Storage(String),
}

/// Failure of an order status transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("Order id is missing")]
    MissingIdentifier,

    #[error("Order {0} is not on the board")]
    UnknownOrder(String),

    #[error("Cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    /// Remote confirmation failed after the optimistic change was applied.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl OrderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_retryable())
    }
}

/// Failure of the persisted token store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Credential store error: {0}")]
    Keyring(#[from] keyring::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RemoteError::Unavailable("timeout".into()).is_retryable());
        assert!(RemoteError::Rejected {
            status: 503,
            message: "down".into()
        }
        .is_retryable());
        assert!(RemoteError::Rejected {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(!RemoteError::Rejected {
            status: 422,
            message: "bad status".into()
        }
        .is_retryable());
        assert!(!RemoteError::MissingCredential.is_retryable());
    }

    #[test]
    fn order_error_retryable_only_for_transient_remote() {
        let transient = OrderError::Remote(RemoteError::Unavailable("reset".into()));
        let rejected = OrderError::Remote(RemoteError::Rejected {
            status: 400,
            message: "nope".into(),
        });
        assert!(transient.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!OrderError::MissingIdentifier.is_retryable());
    }

    #[test]
    fn rejected_message_keeps_server_text() {
        let err = RemoteError::Rejected {
            status: 409,
            message: "Order already ready".into(),
        };
        assert_eq!(err.to_string(), "Order already ready (HTTP 409)");
    }
}
