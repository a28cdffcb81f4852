//! Inputs of wallet operations.

use chrono::{DateTime, Utc};

use crate::model::{
    Currency, CustomerId, IdempotencyKey, LedgerEntry, TransactionReason, Wallet, WalletConfig,
    WalletId, WalletType,
};
use crate::{Amount, ConversionRate};

#[derive(Debug, Clone)]
pub struct CreateWalletRequest {
    /// Generated when absent.
    pub id: Option<WalletId>,
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub wallet_type: WalletType,
    pub conversion_rate: ConversionRate,
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: WalletConfig,
}

impl CreateWalletRequest {
    pub fn new(customer_id: CustomerId, currency: Currency) -> Self {
        Self {
            id: None,
            customer_id,
            currency,
            wallet_type: WalletType::default(),
            conversion_rate: ConversionRate::ONE,
            name: None,
            description: None,
            config: WalletConfig::default(),
        }
    }

    pub fn with_id(mut self, id: WalletId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_conversion_rate(mut self, rate: ConversionRate) -> Self {
        self.conversion_rate = rate;
        self
    }

    pub fn with_wallet_type(mut self, wallet_type: WalletType) -> Self {
        self.wallet_type = wallet_type;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_config(mut self, config: WalletConfig) -> Self {
        self.config = config;
        self
    }
}

/// Change to a wallet's descriptive fields. Unset fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct UpdateWalletRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<WalletConfig>,
}

impl UpdateWalletRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.config.is_none()
    }
}

/// Grant of a new credit lot.
#[derive(Debug, Clone)]
pub struct CreditRequest {
    pub wallet_id: WalletId,
    pub credit_amount: Amount,
    pub reason: TransactionReason,
    pub expiry_date: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub description: Option<String>,
}

impl CreditRequest {
    pub fn new(wallet_id: WalletId, credit_amount: Amount, reason: TransactionReason) -> Self {
        Self {
            wallet_id,
            credit_amount,
            reason,
            expiry_date: None,
            priority: None,
            idempotency_key: None,
            description: None,
        }
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expiry_date = Some(at);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Top-up of a wallet, sized either in credits or in wallet currency.
/// Credits win when both are set.
#[derive(Debug, Clone)]
pub struct TopUpRequest {
    pub credits: Option<Amount>,
    pub amount: Option<Amount>,
    pub reason: TransactionReason,
    pub expiry_date: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub description: Option<String>,
}

impl Default for TopUpRequest {
    fn default() -> Self {
        Self {
            credits: None,
            amount: None,
            reason: TransactionReason::PurchasedCreditDirect,
            expiry_date: None,
            priority: None,
            idempotency_key: None,
            description: None,
        }
    }
}

impl TopUpRequest {
    pub fn credits(credits: Amount) -> Self {
        Self {
            credits: Some(credits),
            ..Self::default()
        }
    }

    pub fn currency(amount: Amount) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopUpOutcome {
    pub wallet: Wallet,
    /// The credit entry written, or the earlier one on an idempotent replay.
    pub entry: LedgerEntry,
}

/// Consumption of credits, sized either in credits or in wallet currency.
/// Credits win when both are set.
#[derive(Debug, Clone)]
pub struct DebitRequest {
    pub wallet_id: WalletId,
    pub credit_amount: Option<Amount>,
    pub amount: Option<Amount>,
    pub reason: TransactionReason,
    pub idempotency_key: Option<IdempotencyKey>,
    pub description: Option<String>,
}

impl DebitRequest {
    pub fn new(wallet_id: WalletId, credit_amount: Amount, reason: TransactionReason) -> Self {
        Self {
            wallet_id,
            credit_amount: Some(credit_amount),
            amount: None,
            reason,
            idempotency_key: None,
            description: None,
        }
    }

    pub fn currency(wallet_id: WalletId, amount: Amount, reason: TransactionReason) -> Self {
        Self {
            wallet_id,
            credit_amount: None,
            amount: Some(amount),
            reason,
            idempotency_key: None,
            description: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// A wallet operation as fed to [`WalletLedger::run`](super::WalletLedger::run).
#[derive(Debug, Clone)]
pub enum Operation {
    CreateWallet(CreateWalletRequest),
    TopUp {
        wallet_id: WalletId,
        request: TopUpRequest,
    },
    Debit(DebitRequest),
    Terminate(WalletId),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateWallet(_) => "create wallet",
            Operation::TopUp { .. } => "top-up",
            Operation::Debit(_) => "debit",
            Operation::Terminate(_) => "terminate",
        }
    }

    pub fn wallet_label(&self) -> String {
        match self {
            Operation::CreateWallet(request) => request
                .id
                .as_ref()
                .map_or_else(|| "(generated)".to_string(), WalletId::to_string),
            Operation::TopUp { wallet_id, .. } => wallet_id.to_string(),
            Operation::Debit(request) => request.wallet_id.to_string(),
            Operation::Terminate(wallet_id) => wallet_id.to_string(),
        }
    }

    pub fn amount(&self) -> Option<Amount> {
        match self {
            Operation::TopUp { request, .. } => request.credits.or(request.amount),
            Operation::Debit(request) => request.credit_amount.or(request.amount),
            Operation::CreateWallet(_) | Operation::Terminate(_) => None,
        }
    }
}
