//! Error types for wallet operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::Amount;
use crate::model::{Currency, CustomerId, TransactionReason, WalletId, WalletType};
use crate::store::StoreError;

/// Top-level error returned by [`WalletLedger`](super::WalletLedger) operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("wallet {0} not found")]
    NotFound(WalletId),

    #[error("insufficient balance in wallet {wallet}: available {available}, requested {requested}")]
    InsufficientBalance {
        wallet: WalletId,
        available: Amount,
        requested: Amount,
    },

    #[error("wallet {0} is closed")]
    WalletClosed(WalletId),

    #[error(
        "customer {customer} already has active {wallet_type} wallet {existing} in {currency}"
    )]
    DuplicateWallet {
        customer: CustomerId,
        currency: Currency,
        wallet_type: WalletType,
        existing: WalletId,
    },

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Store(_) | LedgerError::Collaborator(_) | LedgerError::Internal(_)
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WalletNotFound(id) => LedgerError::NotFound(id),
            StoreError::ActiveWalletExists {
                customer,
                currency,
                wallet_type,
                existing,
            } => LedgerError::DuplicateWallet {
                customer,
                currency,
                wallet_type,
                existing,
            },
            other => LedgerError::Store(other),
        }
    }
}

/// Request rejected before touching any state.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid amount {0}: must be greater than zero")]
    InvalidAmount(Amount),

    #[error("either credits or a currency amount is required")]
    MissingAmount,

    #[error("expiry date cannot be in the past: {expiry} is not after {now}")]
    ExpiryInPast {
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("malformed {kind} '{value}'")]
    MalformedId { kind: &'static str, value: String },

    #[error("unknown wallet type '{0}'")]
    UnknownWalletType(String),

    #[error("invalid currency '{0}': expected a three-letter code")]
    InvalidCurrency(String),

    #[error("invalid conversion rate {0}: must be greater than zero")]
    InvalidConversionRate(Decimal),

    #[error("malformed conversion rate '{0}'")]
    MalformedRate(String),

    #[error("reason {reason} is not allowed for {operation}")]
    ReasonNotAllowed {
        reason: TransactionReason,
        operation: &'static str,
    },

    #[error("amount out of range")]
    Overflow,
}

/// Failure reported by an invoice or usage source.
#[derive(Debug, Error)]
#[error("{source_name} unavailable: {message}")]
pub struct CollaboratorError {
    pub source_name: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(source_name: &'static str, message: impl Into<String>) -> Self {
        Self {
            source_name,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let id: WalletId = "w1".parse().unwrap();
        let err: LedgerError = StoreError::WalletNotFound(id.clone()).into();
        assert!(matches!(err, LedgerError::NotFound(ref w) if *w == id));
        assert!(!err.is_retryable());
    }

    #[test]
    fn active_wallet_conflict_is_not_retryable() {
        let err: LedgerError = StoreError::ActiveWalletExists {
            customer: "cust_1".parse().unwrap(),
            currency: "usd".parse().unwrap(),
            wallet_type: WalletType::Prepaid,
            existing: "w1".parse().unwrap(),
        }
        .into();
        assert!(matches!(err, LedgerError::DuplicateWallet { .. }));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "customer cust_1 already has active prepaid wallet w1 in usd"
        );
    }

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(LedgerError::from(StoreError::Poisoned).is_retryable());
        assert!(LedgerError::Internal("boom".into()).is_retryable());
        assert!(LedgerError::from(CollaboratorError::new("invoices", "timeout")).is_retryable());
        assert!(!LedgerError::from(ValidationError::MissingAmount).is_retryable());
        let insufficient = LedgerError::InsufficientBalance {
            wallet: "w1".parse().unwrap(),
            available: Amount::from(1),
            requested: Amount::from(2),
        };
        assert!(!insufficient.is_retryable());
        assert_eq!(
            insufficient.to_string(),
            "insufficient balance in wallet w1: available 1, requested 2"
        );
    }
}
