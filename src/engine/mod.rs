//! Wallet operations.
//!
//! [`WalletLedger`] grants credits in lots, consumes them in allocator order and
//! keeps each wallet's cached totals in step with its ledger. Every mutating
//! operation runs inside a single store transaction on one wallet, so a
//! failure at any step leaves no trace.
//! Also supports async stream of operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::model::{
    CustomerId, EntryId, EntryKind, IdempotencyKey, LedgerEntry, NewLedgerEntry,
    TransactionReason, Wallet, WalletId, WalletStatus,
};
use crate::store::{EntryFilter, LedgerStore, LedgerTx, WalletDetails};
use crate::{Amount, ConversionRate};

mod balance;
pub use balance::{BalanceAggregator, InvoiceSource, RealTimeBalance, UsageSource};

mod error;
pub use error::{CollaboratorError, LedgerError, ValidationError};

mod request;
pub use request::{
    CreateWalletRequest, CreditRequest, DebitRequest, Operation, TopUpOutcome, TopUpRequest,
    UpdateWalletRequest,
};

type Result<T> = std::result::Result<T, LedgerError>;

pub struct WalletLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

/// Public API
impl WalletLedger {
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn LedgerStore>,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Run the ledger over a stream of operations. Failed operations are
    /// logged and skipped.
    pub async fn run(&self, mut stream: impl Stream<Item = Operation> + Unpin) {
        while let Some(op) = stream.next().await {
            let _ = self.apply(op).await;
        }
    }

    /// Apply a single operation.
    pub async fn apply(&self, op: Operation) -> Result<()> {
        let name = op.name();
        let wallet = op.wallet_label();
        let amount = op.amount();

        let result = match op {
            Operation::CreateWallet(request) => self.create_wallet(request).await.map(drop),
            Operation::TopUp { wallet_id, request } => {
                self.top_up(&wallet_id, request).await.map(drop)
            }
            Operation::Debit(request) => self.debit(request).await,
            Operation::Terminate(wallet_id) => self.terminate_wallet(&wallet_id).await,
        };
        Self::log_result(name, &wallet, amount, &result);
        result
    }

    pub async fn create_wallet(&self, request: CreateWalletRequest) -> Result<Wallet> {
        let now = self.clock.now();
        let wallet = Wallet {
            id: request.id.unwrap_or_else(WalletId::generate),
            customer_id: request.customer_id,
            currency: request.currency,
            wallet_type: request.wallet_type,
            name: request.name,
            description: request.description,
            conversion_rate: request.conversion_rate,
            credit_balance: Amount::ZERO,
            balance: Amount::ZERO,
            status: WalletStatus::Active,
            config: request.config,
            created_at: now,
            updated_at: now,
        };
        self.store.create_wallet(wallet.clone()).await?;
        debug!(
            wallet = %wallet.id,
            customer = %wallet.customer_id,
            currency = %wallet.currency,
            wallet_type = %wallet.wallet_type,
            rate = %wallet.conversion_rate,
            "wallet created"
        );
        Ok(wallet)
    }

    /// Change a wallet's name, description or config. Balances and ledger
    /// are left alone; an empty request changes nothing.
    pub async fn update_wallet(&self, id: &WalletId, request: UpdateWalletRequest) -> Result<Wallet> {
        let now = self.clock.now();

        let mut tx = self.store.begin(id).await?;
        ensure_active(tx.wallet())?;
        if request.is_empty() {
            return projected_in(&*tx, now);
        }
        let current = tx.wallet();
        let details = WalletDetails {
            name: request.name.or_else(|| current.name.clone()),
            description: request.description.or_else(|| current.description.clone()),
            config: request.config.unwrap_or_else(|| current.config.clone()),
        };
        tx.update_wallet_details(details, now);
        let wallet = projected_in(&*tx, now)?;
        tx.commit()?;
        debug!(wallet = %id, "wallet updated");
        Ok(wallet)
    }

    /// Latest committed state of a wallet, with lots that expired since the
    /// last write already excluded from its balances.
    pub async fn get_wallet_by_id(&self, id: &WalletId) -> Result<Wallet> {
        let now = self.clock.now();
        let lapsed = EntryFilter {
            kind: Some(EntryKind::Credit),
            with_credits_available: true,
            expired_before: Some(now),
            ..EntryFilter::default()
        };
        let (wallet, lapsed) = self.store.snapshot(id, &lapsed).await?;
        project(wallet, lapsed.iter().map(|e| e.credits_available).sum())
    }

    pub async fn get_wallets_by_customer(&self, customer: &CustomerId) -> Result<Vec<Wallet>> {
        let wallets = self.store.wallets_by_customer(customer).await?;
        let mut projected = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            projected.push(self.get_wallet_by_id(&wallet.id).await?);
        }
        Ok(projected)
    }

    /// Every wallet, projected, ordered by id.
    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let wallets = self.store.list_wallets().await?;
        let mut projected = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            projected.push(self.get_wallet_by_id(&wallet.id).await?);
        }
        projected.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projected)
    }

    pub async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        Ok(self.store.list_entries(filter).await?)
    }

    /// Grant a new credit lot. A request whose idempotency key was already
    /// used on this wallet changes nothing and returns the current wallet.
    pub async fn credit(&self, request: CreditRequest) -> Result<Wallet> {
        let now = self.clock.now();

        let mut tx = self.store.begin(&request.wallet_id).await?;
        ensure_active(tx.wallet())?;
        if prior_entry(&*tx, request.idempotency_key.as_ref()).is_some() {
            return projected_in(&*tx, now);
        }
        validate_credit(&request, now)?;

        self.credit_in(&mut *tx, &request, now)?;
        let wallet = tx.wallet().clone();
        tx.commit()?;
        Ok(wallet)
    }

    /// Credit a wallet for a top-up category reason.
    pub async fn top_up(&self, wallet_id: &WalletId, request: TopUpRequest) -> Result<TopUpOutcome> {
        if !request.reason.is_top_up() {
            return Err(ValidationError::ReasonNotAllowed {
                reason: request.reason,
                operation: "top-up",
            }
            .into());
        }
        let now = self.clock.now();

        let mut tx = self.store.begin(wallet_id).await?;
        ensure_active(tx.wallet())?;
        if let Some(entry) = prior_entry(&*tx, request.idempotency_key.as_ref()) {
            return Ok(TopUpOutcome {
                wallet: projected_in(&*tx, now)?,
                entry,
            });
        }
        let credits = match (request.credits, request.amount) {
            (Some(credits), _) => credits,
            (None, Some(amount)) => tx
                .wallet()
                .conversion_rate
                .to_credits(amount)
                .ok_or(ValidationError::Overflow)?,
            (None, None) => return Err(ValidationError::MissingAmount.into()),
        };
        let credit = CreditRequest {
            wallet_id: wallet_id.clone(),
            credit_amount: credits,
            reason: request.reason,
            expiry_date: request.expiry_date,
            priority: request.priority,
            idempotency_key: request.idempotency_key,
            description: request.description,
        };
        validate_credit(&credit, now)?;

        let entry = self.credit_in(&mut *tx, &credit, now)?;
        let wallet = tx.wallet().clone();
        tx.commit()?;
        Ok(TopUpOutcome { wallet, entry })
    }

    /// Consume credits in allocator order and record one debit entry. A
    /// request whose idempotency key was already used on this wallet changes
    /// nothing.
    pub async fn debit(&self, request: DebitRequest) -> Result<()> {
        if request.reason.kind() != EntryKind::Debit || request.reason.is_internal() {
            return Err(ValidationError::ReasonNotAllowed {
                reason: request.reason,
                operation: "debit",
            }
            .into());
        }
        let now = self.clock.now();

        let mut tx = self.store.begin(&request.wallet_id).await?;
        ensure_active(tx.wallet())?;
        if prior_entry(&*tx, request.idempotency_key.as_ref()).is_some() {
            return Ok(());
        }
        let credits = match (request.credit_amount, request.amount) {
            (Some(credits), _) => credits,
            (None, Some(amount)) => tx
                .wallet()
                .conversion_rate
                .to_credits(amount)
                .ok_or(ValidationError::Overflow)?,
            (None, None) => return Err(ValidationError::MissingAmount.into()),
        };
        if !credits.is_positive() {
            return Err(ValidationError::InvalidAmount(credits).into());
        }

        self.settle_lapsed(&mut *tx, now)?;
        self.debit_in(
            &mut *tx,
            credits,
            request.reason,
            request.idempotency_key,
            request.description,
            now,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Debit whatever is left and close the wallet. Closing a closed wallet is
    /// a no-op.
    pub async fn terminate_wallet(&self, id: &WalletId) -> Result<()> {
        let now = self.clock.now();

        let mut tx = self.store.begin(id).await?;
        if !tx.wallet().is_active() {
            debug!(wallet = %id, "wallet already closed");
            return Ok(());
        }
        self.settle_lapsed(&mut *tx, now)?;
        let remaining = tx.wallet().credit_balance;
        if remaining.is_positive() {
            self.debit_in(
                &mut *tx,
                remaining,
                TransactionReason::WalletTermination,
                None,
                Some("wallet termination - remaining balance debit".to_string()),
                now,
            )?;
        }
        tx.update_wallet_status(WalletStatus::Closed, now);
        tx.commit()?;
        Ok(())
    }

    /// Write off lots whose expiry has passed, one `credit_expired` debit per lot.
    pub async fn expire_credits(&self, id: &WalletId) -> Result<Wallet> {
        let now = self.clock.now();

        let mut tx = self.store.begin(id).await?;
        let settled = self.settle_lapsed(&mut *tx, now)?;
        let wallet = tx.wallet().clone();
        if settled.is_positive() {
            tx.commit()?;
        }
        Ok(wallet)
    }
}

/// Private API
impl WalletLedger {
    /// Small helper to log `apply` results
    fn log_result<E: std::fmt::Display>(
        op: &str,
        wallet: &str,
        amount: Option<Amount>,
        result: &std::result::Result<(), E>,
    ) {
        match (result, amount) {
            (Ok(()), Some(amt)) => {
                info!(wallet = %wallet, amount = %amt, "{op} applied");
            }
            (Ok(()), None) => {
                info!(wallet = %wallet, "{op} applied");
            }
            (Err(e), Some(amt)) => {
                info!(wallet = %wallet, amount = %amt, reason = %e, "{op} skipped");
            }
            (Err(e), None) => {
                info!(wallet = %wallet, reason = %e, "{op} skipped");
            }
        }
    }

    /// Apply a validated credit:
    /// - Settle lapsed lots
    /// - Append the lot and raise the cached totals
    fn credit_in(
        &self,
        tx: &mut dyn LedgerTx,
        request: &CreditRequest,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        self.settle_lapsed(tx, now)?;

        let wallet = tx.wallet();
        let rate = wallet.conversion_rate;
        let before = wallet.credit_balance;
        let after = before
            .checked_add(request.credit_amount)
            .ok_or(ValidationError::Overflow)?;
        let entry = NewLedgerEntry {
            id: EntryId::generate(),
            wallet_id: wallet.id.clone(),
            kind: EntryKind::Credit,
            credit_amount: request.credit_amount,
            amount: to_currency(rate, request.credit_amount)?,
            reason: request.reason,
            idempotency_key: request.idempotency_key.clone(),
            credits_available: request.credit_amount,
            priority: request.priority,
            expiry_date: request.expiry_date,
            description: request.description.clone(),
            credit_balance_before: before,
            credit_balance_after: after,
            created_at: now,
        };
        let balance = to_currency(rate, after)?;

        let entry = tx.create_ledger_entry(entry)?;
        tx.update_wallet_balances(balance, after, now);
        Ok(entry)
    }

    /// Consume `amount` credits from eligible lots:
    /// - Refuse if the wallet's credit balance cannot cover it
    /// - Page through the allocator until nothing remains
    /// - Record a single debit entry for the total
    fn debit_in(
        &self,
        tx: &mut dyn LedgerTx,
        amount: Amount,
        reason: TransactionReason,
        idempotency_key: Option<IdempotencyKey>,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let wallet_id = tx.wallet().id.clone();
        let available = tx.wallet().credit_balance;
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                wallet: wallet_id,
                available,
                requested: amount,
            });
        }

        let mut remaining = amount;
        while remaining.is_positive() {
            let lots = tx.find_eligible_credits(remaining, self.config.max_lots_per_page, now);
            if lots.is_empty() {
                return Err(LedgerError::Internal(format!(
                    "wallet {wallet_id} ran out of eligible credits with {remaining} outstanding"
                )));
            }
            for lot in lots {
                if !remaining.is_positive() {
                    break;
                }
                let take = lot.credits_available.min(remaining);
                tx.consume_credits(&lot.entry_id, take)?;
                remaining -= take;
                debug!(wallet = %wallet_id, lot = %lot.entry_id, consumed = %take, "lot consumed");
            }
        }

        record_debit(tx, amount, reason, idempotency_key, description, now)
    }

    /// Zero every lapsed lot, recording one `credit_expired` debit per lot.
    /// Returns the credits written off.
    fn settle_lapsed(&self, tx: &mut dyn LedgerTx, now: DateTime<Utc>) -> Result<Amount> {
        let mut settled = Amount::ZERO;
        for lot in tx.lapsed_lots(now) {
            let credits = lot.credits_available;
            tx.consume_credits(&lot.entry_id, credits)?;
            record_debit(
                tx,
                credits,
                TransactionReason::CreditExpired,
                None,
                Some(format!("credit expiry for entry {}", lot.entry_id)),
                now,
            )?;
            debug!(
                wallet = %tx.wallet().id,
                lot = %lot.entry_id,
                credits = %credits,
                "lapsed lot settled"
            );
            settled += credits;
        }
        Ok(settled)
    }
}

/// Append a debit entry for credits already taken out of their lots and lower
/// the cached totals accordingly.
fn record_debit(
    tx: &mut dyn LedgerTx,
    credits: Amount,
    reason: TransactionReason,
    idempotency_key: Option<IdempotencyKey>,
    description: Option<String>,
    now: DateTime<Utc>,
) -> Result<LedgerEntry> {
    let wallet = tx.wallet();
    let rate = wallet.conversion_rate;
    let before = wallet.credit_balance;
    let after = before
        .checked_sub(credits)
        .ok_or(ValidationError::Overflow)?;
    if after < Amount::ZERO {
        return Err(LedgerError::Internal(format!(
            "wallet {} credit balance {before} below debit of {credits}",
            wallet.id
        )));
    }
    let entry = NewLedgerEntry {
        id: EntryId::generate(),
        wallet_id: wallet.id.clone(),
        kind: EntryKind::Debit,
        credit_amount: credits,
        amount: to_currency(rate, credits)?,
        reason,
        idempotency_key,
        credits_available: Amount::ZERO,
        priority: None,
        expiry_date: None,
        description,
        credit_balance_before: before,
        credit_balance_after: after,
        created_at: now,
    };
    let balance = to_currency(rate, after)?;

    let entry = tx.create_ledger_entry(entry)?;
    tx.update_wallet_balances(balance, after, now);
    Ok(entry)
}

/// Entry already written under `key`, if any. Its operation must not be
/// applied again.
fn prior_entry(tx: &dyn LedgerTx, key: Option<&IdempotencyKey>) -> Option<LedgerEntry> {
    let key = key?;
    let existing = tx.find_by_idempotency_key(key)?;
    debug!(
        wallet = %tx.wallet().id,
        key = %key,
        entry = %existing.id,
        "idempotency key already used"
    );
    Some(existing.clone())
}

fn validate_credit(request: &CreditRequest, now: DateTime<Utc>) -> Result<()> {
    if !request.credit_amount.is_positive() {
        return Err(ValidationError::InvalidAmount(request.credit_amount).into());
    }
    if request.reason.kind() != EntryKind::Credit {
        return Err(ValidationError::ReasonNotAllowed {
            reason: request.reason,
            operation: "credit",
        }
        .into());
    }
    if let Some(expiry) = request.expiry_date {
        if expiry <= now {
            return Err(ValidationError::ExpiryInPast { expiry, now }.into());
        }
    }
    Ok(())
}

fn ensure_active(wallet: &Wallet) -> Result<()> {
    match wallet.status {
        WalletStatus::Active => Ok(()),
        WalletStatus::Closed => Err(LedgerError::WalletClosed(wallet.id.clone())),
    }
}

fn to_currency(rate: ConversionRate, credits: Amount) -> Result<Amount> {
    Ok(rate.to_currency(credits).ok_or(ValidationError::Overflow)?)
}

/// The wallet as it stands once `lapsed` credits are written off.
fn project(mut wallet: Wallet, lapsed: Amount) -> Result<Wallet> {
    if lapsed.is_zero() || !wallet.is_active() {
        return Ok(wallet);
    }
    let credit_balance = wallet
        .credit_balance
        .checked_sub(lapsed)
        .ok_or(ValidationError::Overflow)?;
    wallet.balance = to_currency(wallet.conversion_rate, credit_balance)?;
    wallet.credit_balance = credit_balance;
    Ok(wallet)
}

fn projected_in(tx: &dyn LedgerTx, now: DateTime<Utc>) -> Result<Wallet> {
    let lapsed = tx
        .lapsed_lots(now)
        .iter()
        .map(|lot| lot.credits_available)
        .sum();
    project(tx.wallet().clone(), lapsed)
}
