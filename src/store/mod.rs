//! Persistence contract for wallets and their ledgers.
//!
//! Every mutating wallet operation runs inside one [`LedgerTx`], obtained from
//! [`LedgerStore::begin`]. A transaction holds exclusive write access to a
//! single wallet; its changes become visible only on [`LedgerTx::commit`], and
//! dropping it uncommitted discards them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Amount;
use crate::model::{
    Currency, CustomerId, EntryId, EntryKind, IdempotencyKey, LedgerEntry, LotRef,
    NewLedgerEntry, TransactionReason, Wallet, WalletConfig, WalletId, WalletStatus, WalletType,
};

mod memory;
pub use memory::MemoryStore;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),

    #[error("wallet {0} already exists")]
    WalletExists(WalletId),

    #[error("customer {customer} already has active {wallet_type} wallet {existing} in {currency}")]
    ActiveWalletExists {
        customer: CustomerId,
        currency: Currency,
        wallet_type: WalletType,
        existing: WalletId,
    },

    #[error("ledger entry {0} not found")]
    EntryNotFound(EntryId),

    #[error("ledger entry {0} is not a credit lot")]
    NotALot(EntryId),

    #[error("idempotency key '{key}' already used in wallet {wallet}")]
    DuplicateIdempotencyKey {
        wallet: WalletId,
        key: IdempotencyKey,
    },

    #[error("lot {entry} holds {available} credits, cannot consume {requested}")]
    Overconsumption {
        entry: EntryId,
        available: Amount,
        requested: Amount,
    },

    #[error("entry for wallet {entry_wallet} written in transaction of wallet {tx_wallet}")]
    WalletMismatch {
        tx_wallet: WalletId,
        entry_wallet: WalletId,
    },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("commit failed: {0}")]
    Commit(String),
}

/// Fields of a wallet that may change without touching its balances.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletDetails {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: WalletConfig,
}

/// Criteria for [`LedgerStore::list_entries`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub wallet_id: Option<WalletId>,
    pub kind: Option<EntryKind>,
    pub reason: Option<TransactionReason>,
    /// Only entries with unconsumed credits.
    pub with_credits_available: bool,
    /// Only entries whose expiry date lies strictly before this instant.
    pub expired_before: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn wallet(id: WalletId) -> Self {
        Self {
            wallet_id: Some(id),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if self.wallet_id.as_ref().is_some_and(|id| *id != entry.wallet_id) {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != entry.kind) {
            return false;
        }
        if self.reason.is_some_and(|reason| reason != entry.reason) {
            return false;
        }
        if self.with_credits_available && !entry.credits_available.is_positive() {
            return false;
        }
        if let Some(instant) = self.expired_before {
            return entry.expiry_date.is_some_and(|expiry| expiry < instant);
        }
        true
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new wallet. Fails when the customer already holds an active
    /// wallet of the same currency and type; the check and the insert are
    /// atomic.
    async fn create_wallet(&self, wallet: Wallet) -> Result<()>;

    /// Last committed state of a wallet.
    async fn get_wallet(&self, id: &WalletId) -> Result<Wallet>;

    async fn wallets_by_customer(&self, customer: &CustomerId) -> Result<Vec<Wallet>>;

    async fn list_wallets(&self) -> Result<Vec<Wallet>>;

    /// Committed entries matching `filter`, in creation order.
    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>>;

    /// Committed wallet and its entries matching `filter`, read atomically.
    async fn snapshot(
        &self,
        id: &WalletId,
        filter: &EntryFilter,
    ) -> Result<(Wallet, Vec<LedgerEntry>)>;

    /// Open a write transaction on one wallet, waiting for any transaction
    /// already open on it.
    async fn begin(&self, wallet: &WalletId) -> Result<Box<dyn LedgerTx>>;
}

/// Write transaction scoped to a single wallet.
pub trait LedgerTx: Send {
    fn wallet(&self) -> &Wallet;

    fn update_wallet_balances(
        &mut self,
        balance: Amount,
        credit_balance: Amount,
        at: DateTime<Utc>,
    );

    fn update_wallet_status(&mut self, status: WalletStatus, at: DateTime<Utc>);

    /// Replace the descriptive fields of the wallet.
    fn update_wallet_details(&mut self, details: WalletDetails, at: DateTime<Utc>);

    /// Allocator query against this transaction's view of the ledger.
    fn find_eligible_credits(
        &self,
        amount_needed: Amount,
        max_lots: usize,
        now: DateTime<Utc>,
    ) -> Vec<LotRef>;

    fn lapsed_lots(&self, now: DateTime<Utc>) -> Vec<LotRef>;

    /// Decrement a lot's `credits_available` by `amount`.
    fn consume_credits(&mut self, lot: &EntryId, amount: Amount) -> Result<()>;

    fn create_ledger_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry>;

    fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Option<&LedgerEntry>;

    fn commit(self: Box<Self>) -> Result<()>;
}
