//! Core domain types for the wallet ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::ValidationError;
use crate::{Amount, ConversionRate};

fn is_valid_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 128
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn prefixed_uuid(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if is_valid_id(s) {
                    Ok($name(s.to_string()))
                } else {
                    Err(ValidationError::MalformedId {
                        kind: $kind,
                        value: s.to_string(),
                    })
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Wallet identifier.
    WalletId,
    "wallet id"
);
string_id!(
    /// Identifier of the customer owning a wallet.
    CustomerId,
    "customer id"
);
string_id!(
    /// Ledger entry identifier.
    EntryId,
    "entry id"
);

impl WalletId {
    pub fn generate() -> Self {
        WalletId(prefixed_uuid("wallet"))
    }
}

impl EntryId {
    pub fn generate() -> Self {
        EntryId(prefixed_uuid("wtx"))
    }
}

/// Caller-supplied token making a credit or debit apply at most once per wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IdempotencyKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.len() > 255 {
            return Err(ValidationError::MalformedId {
                kind: "idempotency key",
                value: s.to_string(),
            });
        }
        Ok(IdempotencyKey(trimmed.to_string()))
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Three-letter currency code, stored lower-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(s.to_string()));
        }
        Ok(Currency(code.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a wallet. Wallets are never deleted, only closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    #[default]
    Active,
    Closed,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Active => f.write_str("active"),
            WalletStatus::Closed => f.write_str("closed"),
        }
    }
}

/// Kind of balance a wallet holds. A customer has at most one active wallet
/// per currency and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    #[default]
    Prepaid,
    Promotional,
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletType::Prepaid => f.write_str("prepaid"),
            WalletType::Promotional => f.write_str("promotional"),
        }
    }
}

impl FromStr for WalletType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prepaid" => Ok(WalletType::Prepaid),
            "promotional" => Ok(WalletType::Promotional),
            _ => Err(ValidationError::UnknownWalletType(s.to_string())),
        }
    }
}

/// Price categories a wallet may pay for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Usage,
    Fixed,
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Empty means every price type is allowed.
    #[serde(default)]
    pub allowed_price_types: Vec<PriceType>,
}

impl WalletConfig {
    /// Whether unbilled usage counts against this wallet's real-time balance.
    pub fn includes_usage(&self) -> bool {
        self.allowed_price_types.is_empty()
            || self
                .allowed_price_types
                .iter()
                .any(|t| matches!(t, PriceType::Usage | PriceType::All))
    }
}

/// A customer-owned prepaid credit balance.
///
/// `credit_balance` caches the sum of consumable lots and `balance` is always
/// `credit_balance * conversion_rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub customer_id: CustomerId,
    pub currency: Currency,
    #[serde(default)]
    pub wallet_type: WalletType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub conversion_rate: ConversionRate,
    pub credit_balance: Amount,
    pub balance: Amount,
    pub status: WalletStatus,
    pub config: WalletConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    /// Whether `other` would hold the same kind of balance for the same
    /// customer while both are active.
    pub fn conflicts_with(&self, other: &Wallet) -> bool {
        self.is_active()
            && other.is_active()
            && self.customer_id == other.customer_id
            && self.currency == other.currency
            && self.wallet_type == other.wallet_type
    }
}

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Credit,
    Debit,
}

/// Why a ledger entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionReason {
    FreeCredit,
    PurchasedCreditDirect,
    SubscriptionCredit,
    CreditNote,
    InvoicePayment,
    ManualBalanceDebit,
    CreditExpired,
    WalletTermination,
}

impl TransactionReason {
    /// The entry kind this reason is recorded under.
    pub fn kind(&self) -> EntryKind {
        use TransactionReason::*;
        match self {
            FreeCredit | PurchasedCreditDirect | SubscriptionCredit | CreditNote => {
                EntryKind::Credit
            }
            InvoicePayment | ManualBalanceDebit | CreditExpired | WalletTermination => {
                EntryKind::Debit
            }
        }
    }

    /// Reasons only the ledger itself may record.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            TransactionReason::CreditExpired | TransactionReason::WalletTermination
        )
    }

    pub fn is_top_up(&self) -> bool {
        matches!(
            self,
            TransactionReason::FreeCredit
                | TransactionReason::PurchasedCreditDirect
                | TransactionReason::SubscriptionCredit
        )
    }
}

impl fmt::Display for TransactionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionReason::FreeCredit => "free_credit",
            TransactionReason::PurchasedCreditDirect => "purchased_credit_direct",
            TransactionReason::SubscriptionCredit => "subscription_credit",
            TransactionReason::CreditNote => "credit_note",
            TransactionReason::InvoicePayment => "invoice_payment",
            TransactionReason::ManualBalanceDebit => "manual_balance_debit",
            TransactionReason::CreditExpired => "credit_expired",
            TransactionReason::WalletTermination => "wallet_termination",
        };
        f.write_str(name)
    }
}

/// An entry about to be appended to a wallet's ledger. The store assigns the
/// creation sequence.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub id: EntryId,
    pub wallet_id: WalletId,
    pub kind: EntryKind,
    pub credit_amount: Amount,
    pub amount: Amount,
    pub reason: TransactionReason,
    pub idempotency_key: Option<IdempotencyKey>,
    pub credits_available: Amount,
    pub priority: Option<i32>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub credit_balance_before: Amount,
    pub credit_balance_after: Amount,
    pub created_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    pub fn into_entry(self, seq: u64) -> LedgerEntry {
        LedgerEntry {
            id: self.id,
            wallet_id: self.wallet_id,
            seq,
            kind: self.kind,
            credit_amount: self.credit_amount,
            amount: self.amount,
            reason: self.reason,
            idempotency_key: self.idempotency_key,
            credits_available: self.credits_available,
            priority: self.priority,
            expiry_date: self.expiry_date,
            description: self.description,
            credit_balance_before: self.credit_balance_before,
            credit_balance_after: self.credit_balance_after,
            created_at: self.created_at,
        }
    }
}

/// One append-only row of a wallet's ledger.
///
/// Credit entries are lots: `credits_available` starts at `credit_amount` and
/// only ever decreases. Debit entries always carry zero `credits_available`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub wallet_id: WalletId,
    /// Per-wallet creation order.
    pub seq: u64,
    pub kind: EntryKind,
    pub credit_amount: Amount,
    pub amount: Amount,
    pub reason: TransactionReason,
    pub idempotency_key: Option<IdempotencyKey>,
    pub credits_available: Amount,
    /// Lower is consumed first; `None` is consumed after every prioritized lot.
    pub priority: Option<i32>,
    /// `None` never expires.
    pub expiry_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub credit_balance_before: Amount,
    pub credit_balance_after: Amount,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_lot(&self) -> bool {
        self.kind == EntryKind::Credit
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry < now)
    }

    /// A lot that can still be allocated against at `now`.
    pub fn is_consumable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_lot() && self.credits_available.is_positive() && !self.is_expired_at(now)
    }

    /// A lot whose expiry has passed with credits still unconsumed.
    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.is_lot() && self.credits_available.is_positive() && self.is_expired_at(now)
    }

    pub fn lot_ref(&self) -> LotRef {
        LotRef {
            entry_id: self.id.clone(),
            seq: self.seq,
            credits_available: self.credits_available,
            priority: self.priority,
            expiry_date: self.expiry_date,
        }
    }
}

/// Reference to a credit lot selected for consumption.
#[derive(Debug, Clone, PartialEq)]
pub struct LotRef {
    pub entry_id: EntryId,
    pub seq: u64,
    pub credits_available: Amount,
    pub priority: Option<i32>,
    pub expiry_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lot(available: i64, expiry: Option<DateTime<Utc>>) -> LedgerEntry {
        NewLedgerEntry {
            id: EntryId::generate(),
            wallet_id: "w1".parse().unwrap(),
            kind: EntryKind::Credit,
            credit_amount: Amount::from(100),
            amount: Amount::from(100),
            reason: TransactionReason::FreeCredit,
            idempotency_key: None,
            credits_available: Amount::from(available),
            priority: None,
            expiry_date: expiry,
            description: None,
            credit_balance_before: Amount::ZERO,
            credit_balance_after: Amount::from(100),
            created_at: Utc::now(),
        }
        .into_entry(0)
    }

    #[test]
    fn ids_reject_malformed_values() {
        assert!("".parse::<WalletId>().is_err());
        assert!("has space".parse::<WalletId>().is_err());
        assert!("w/1".parse::<CustomerId>().is_err());
        assert!("cust_01-a".parse::<CustomerId>().is_ok());
        assert!("   ".parse::<IdempotencyKey>().is_err());
    }

    #[test]
    fn generated_ids_are_prefixed_and_valid() {
        let id = WalletId::generate();
        assert!(id.as_str().starts_with("wallet_"));
        assert_eq!(id.as_str().parse::<WalletId>().unwrap(), id);
        assert!(EntryId::generate().as_str().starts_with("wtx_"));
    }

    #[test]
    fn currency_is_lowercased() {
        assert_eq!("USD".parse::<Currency>().unwrap().as_str(), "usd");
        assert!("us".parse::<Currency>().is_err());
        assert!("u5d".parse::<Currency>().is_err());
    }

    #[test]
    fn reasons_map_to_kinds() {
        assert_eq!(TransactionReason::FreeCredit.kind(), EntryKind::Credit);
        assert_eq!(TransactionReason::InvoicePayment.kind(), EntryKind::Debit);
        assert!(TransactionReason::WalletTermination.is_internal());
        assert!(!TransactionReason::CreditNote.is_top_up());
    }

    #[test]
    fn wallet_type_parses_case_insensitively() {
        assert_eq!("Promotional".parse::<WalletType>().unwrap(), WalletType::Promotional);
        assert_eq!(WalletType::default(), WalletType::Prepaid);
        assert!("gift".parse::<WalletType>().is_err());
    }

    #[test]
    fn only_active_wallets_of_same_kind_conflict() {
        let now = Utc::now();
        let prepaid = Wallet {
            id: "w1".parse().unwrap(),
            customer_id: "cust_1".parse().unwrap(),
            currency: "usd".parse().unwrap(),
            wallet_type: WalletType::Prepaid,
            name: None,
            description: None,
            conversion_rate: ConversionRate::ONE,
            credit_balance: Amount::ZERO,
            balance: Amount::ZERO,
            status: WalletStatus::Active,
            config: WalletConfig::default(),
            created_at: now,
            updated_at: now,
        };
        let twin = Wallet {
            id: "w2".parse().unwrap(),
            ..prepaid.clone()
        };
        assert!(prepaid.conflicts_with(&twin));

        let promotional = Wallet {
            wallet_type: WalletType::Promotional,
            ..twin.clone()
        };
        assert!(!prepaid.conflicts_with(&promotional));

        let euro = Wallet {
            currency: "eur".parse().unwrap(),
            ..twin.clone()
        };
        assert!(!prepaid.conflicts_with(&euro));

        let closed = Wallet {
            status: WalletStatus::Closed,
            ..twin
        };
        assert!(!prepaid.conflicts_with(&closed));
    }

    #[test]
    fn config_usage_inclusion() {
        assert!(WalletConfig::default().includes_usage());
        let fixed_only = WalletConfig {
            allowed_price_types: vec![PriceType::Fixed],
        };
        assert!(!fixed_only.includes_usage());
        let all = WalletConfig {
            allowed_price_types: vec![PriceType::Fixed, PriceType::All],
        };
        assert!(all.includes_usage());
    }

    #[test]
    fn lot_expiry_predicates() {
        let jan = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();

        let dated = lot(10, Some(jan));
        assert!(dated.is_consumable_at(jan));
        assert!(!dated.is_lapsed_at(jan));
        assert!(dated.is_lapsed_at(feb));
        assert!(!dated.is_consumable_at(feb));

        let undated = lot(10, None);
        assert!(undated.is_consumable_at(feb));

        let spent = lot(0, Some(jan));
        assert!(!spent.is_consumable_at(jan));
        assert!(!spent.is_lapsed_at(feb));
    }
}
