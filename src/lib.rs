pub mod allocator;
pub mod amount;
pub mod clock;
pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod store;

pub use amount::{Amount, ConversionRate};
pub use config::LedgerConfig;
pub use engine::{BalanceAggregator, LedgerError, Operation, WalletLedger};
pub use model::{
    Currency, CustomerId, EntryId, LedgerEntry, TransactionReason, Wallet, WalletId, WalletStatus,
    WalletType,
};
pub use store::{LedgerStore, MemoryStore};
