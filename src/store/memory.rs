//! In-process ledger store.
//!
//! Each wallet owns a slot holding its last committed book behind an `Arc`.
//! Writers serialise on a per-wallet async mutex and work on a private copy of
//! the book, which replaces the committed one on commit. Readers only clone the
//! committed `Arc` and never wait for an open transaction.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{EntryFilter, LedgerStore, LedgerTx, Result, StoreError, WalletDetails};
use crate::Amount;
use crate::allocator;
use crate::model::{
    CustomerId, EntryId, IdempotencyKey, LedgerEntry, LotRef, NewLedgerEntry, Wallet, WalletId,
    WalletStatus,
};

#[derive(Debug, Clone)]
struct Book {
    wallet: Wallet,
    entries: Vec<LedgerEntry>,
    by_id: HashMap<EntryId, usize>,
    by_key: HashMap<IdempotencyKey, usize>,
}

impl Book {
    fn new(wallet: Wallet) -> Self {
        Self {
            wallet,
            entries: Vec::new(),
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    writer: Arc<Mutex<()>>,
    committed: RwLock<Arc<Book>>,
}

impl Slot {
    fn snapshot(&self) -> Result<Arc<Book>> {
        self.committed
            .read()
            .map(|book| Arc::clone(&*book))
            .map_err(|_| StoreError::Poisoned)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<WalletId, Arc<Slot>>>,
    fail_on_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail until reset.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    fn slot(&self, id: &WalletId) -> Result<Arc<Slot>> {
        let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
        slots
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::WalletNotFound(id.clone()))
    }

    fn all_slots(&self) -> Result<Vec<Arc<Slot>>> {
        let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
        Ok(slots.values().cloned().collect())
    }

    fn snapshots(&self) -> Result<Vec<Arc<Book>>> {
        self.all_slots()?.iter().map(|slot| slot.snapshot()).collect()
    }
}

fn sort_wallets(wallets: &mut [Wallet]) {
    wallets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Merge per-wallet runs, each in seq order, into one list. The earliest
/// head wins, so a wallet's own entries keep their relative order even when
/// their timestamps go backwards.
fn merge_by_creation(runs: Vec<Vec<LedgerEntry>>) -> Vec<LedgerEntry> {
    let total = runs.iter().map(Vec::len).sum();
    let mut runs: Vec<VecDeque<LedgerEntry>> = runs.into_iter().map(VecDeque::from).collect();
    let mut merged = Vec::with_capacity(total);
    loop {
        let next = runs
            .iter()
            .enumerate()
            .filter_map(|(idx, run)| run.front().map(|head| (idx, head)))
            .min_by(|(_, a), (_, b)| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.wallet_id.cmp(&b.wallet_id))
            })
            .map(|(idx, _)| idx);
        let Some(run) = next else { break };
        if let Some(entry) = runs[run].pop_front() {
            merged.push(entry);
        }
    }
    merged
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_wallet(&self, wallet: Wallet) -> Result<()> {
        let mut slots = self.slots.write().map_err(|_| StoreError::Poisoned)?;
        if slots.contains_key(&wallet.id) {
            return Err(StoreError::WalletExists(wallet.id));
        }
        for slot in slots.values() {
            let existing = slot.snapshot()?;
            if existing.wallet.conflicts_with(&wallet) {
                return Err(StoreError::ActiveWalletExists {
                    customer: wallet.customer_id,
                    currency: wallet.currency,
                    wallet_type: wallet.wallet_type,
                    existing: existing.wallet.id.clone(),
                });
            }
        }
        let slot = Slot {
            writer: Arc::new(Mutex::new(())),
            committed: RwLock::new(Arc::new(Book::new(wallet.clone()))),
        };
        slots.insert(wallet.id, Arc::new(slot));
        Ok(())
    }

    async fn get_wallet(&self, id: &WalletId) -> Result<Wallet> {
        Ok(self.slot(id)?.snapshot()?.wallet.clone())
    }

    async fn wallets_by_customer(&self, customer: &CustomerId) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self
            .snapshots()?
            .iter()
            .filter(|book| book.wallet.customer_id == *customer)
            .map(|book| book.wallet.clone())
            .collect();
        sort_wallets(&mut wallets);
        Ok(wallets)
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self
            .snapshots()?
            .iter()
            .map(|book| book.wallet.clone())
            .collect();
        sort_wallets(&mut wallets);
        Ok(wallets)
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        let books = match &filter.wallet_id {
            Some(id) => vec![self.slot(id)?.snapshot()?],
            None => self.snapshots()?,
        };
        // each book is already in seq order; only interleave across wallets
        let mut runs: Vec<Vec<LedgerEntry>> = books
            .iter()
            .map(|book| {
                book.entries
                    .iter()
                    .filter(|entry| filter.matches(entry))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|run| !run.is_empty())
            .collect();
        if runs.len() <= 1 {
            return Ok(runs.pop().unwrap_or_default());
        }
        Ok(merge_by_creation(runs))
    }

    async fn snapshot(
        &self,
        id: &WalletId,
        filter: &EntryFilter,
    ) -> Result<(Wallet, Vec<LedgerEntry>)> {
        let book = self.slot(id)?.snapshot()?;
        let entries = book
            .entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        Ok((book.wallet.clone(), entries))
    }

    async fn begin(&self, wallet: &WalletId) -> Result<Box<dyn LedgerTx>> {
        let slot = self.slot(wallet)?;
        let guard = Arc::clone(&slot.writer).lock_owned().await;
        let staged = Book::clone(&*slot.snapshot()?);
        Ok(Box::new(MemoryTx {
            slot,
            _guard: guard,
            staged,
            fail_on_commit: Arc::clone(&self.fail_on_commit),
        }))
    }
}

struct MemoryTx {
    slot: Arc<Slot>,
    _guard: OwnedMutexGuard<()>,
    staged: Book,
    fail_on_commit: Arc<AtomicBool>,
}

impl LedgerTx for MemoryTx {
    fn wallet(&self) -> &Wallet {
        &self.staged.wallet
    }

    fn update_wallet_balances(
        &mut self,
        balance: Amount,
        credit_balance: Amount,
        at: DateTime<Utc>,
    ) {
        let wallet = &mut self.staged.wallet;
        wallet.balance = balance;
        wallet.credit_balance = credit_balance;
        wallet.updated_at = at;
    }

    fn update_wallet_status(&mut self, status: WalletStatus, at: DateTime<Utc>) {
        let wallet = &mut self.staged.wallet;
        wallet.status = status;
        wallet.updated_at = at;
    }

    fn update_wallet_details(&mut self, details: WalletDetails, at: DateTime<Utc>) {
        let wallet = &mut self.staged.wallet;
        wallet.name = details.name;
        wallet.description = details.description;
        wallet.config = details.config;
        wallet.updated_at = at;
    }

    fn find_eligible_credits(
        &self,
        amount_needed: Amount,
        max_lots: usize,
        now: DateTime<Utc>,
    ) -> Vec<LotRef> {
        allocator::find_eligible_credits(&self.staged.entries, amount_needed, max_lots, now)
    }

    fn lapsed_lots(&self, now: DateTime<Utc>) -> Vec<LotRef> {
        allocator::lapsed_lots(&self.staged.entries, now)
    }

    fn consume_credits(&mut self, lot: &EntryId, amount: Amount) -> Result<()> {
        let idx = *self
            .staged
            .by_id
            .get(lot)
            .ok_or_else(|| StoreError::EntryNotFound(lot.clone()))?;
        let entry = &mut self.staged.entries[idx];
        if !entry.is_lot() {
            return Err(StoreError::NotALot(lot.clone()));
        }
        if amount > entry.credits_available || !amount.is_positive() {
            return Err(StoreError::Overconsumption {
                entry: lot.clone(),
                available: entry.credits_available,
                requested: amount,
            });
        }
        entry.credits_available -= amount;
        Ok(())
    }

    fn create_ledger_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let book = &mut self.staged;
        if entry.wallet_id != book.wallet.id {
            return Err(StoreError::WalletMismatch {
                tx_wallet: book.wallet.id.clone(),
                entry_wallet: entry.wallet_id,
            });
        }
        if let Some(key) = &entry.idempotency_key {
            if book.by_key.contains_key(key) {
                return Err(StoreError::DuplicateIdempotencyKey {
                    wallet: book.wallet.id.clone(),
                    key: key.clone(),
                });
            }
        }

        let idx = book.entries.len();
        let entry = entry.into_entry(idx as u64);
        book.by_id.insert(entry.id.clone(), idx);
        if let Some(key) = &entry.idempotency_key {
            book.by_key.insert(key.clone(), idx);
        }
        book.entries.push(entry.clone());
        Ok(entry)
    }

    fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Option<&LedgerEntry> {
        self.staged
            .by_key
            .get(key)
            .map(|&idx| &self.staged.entries[idx])
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if self.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Commit(format!(
                "wallet {} rejected by store",
                self.staged.wallet.id
            )));
        }
        let MemoryTx { slot, staged, .. } = *self;
        let mut committed = slot.committed.write().map_err(|_| StoreError::Poisoned)?;
        *committed = Arc::new(staged);
        Ok(())
    }
}
