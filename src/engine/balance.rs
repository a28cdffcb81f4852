//! Real-time spendable balance.
//!
//! Subtracts outstanding invoices and unbilled current-period usage from a
//! wallet's balance. Read-only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::{CollaboratorError, LedgerError, ValidationError, WalletLedger};
use crate::Amount;
use crate::model::{Currency, CustomerId, Wallet, WalletId};

/// Outstanding invoice exposure of a customer.
#[async_trait]
pub trait InvoiceSource: Send + Sync {
    /// Sum of unpaid invoices of `customer` in `currency`.
    async fn unpaid_invoice_total(
        &self,
        customer: &CustomerId,
        currency: &Currency,
    ) -> Result<Amount, CollaboratorError>;
}

/// Unbilled usage of a customer.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Usage charges of the current billing period in `currency`, already net
    /// of any non-metered entitlement allowance the customer holds.
    async fn current_period_usage_charge(
        &self,
        customer: &CustomerId,
        currency: &Currency,
    ) -> Result<Amount, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealTimeBalance {
    pub wallet: Wallet,
    pub real_time_balance: Amount,
    pub real_time_credit_balance: Amount,
    pub unpaid_invoice_amount: Amount,
    pub current_period_usage: Amount,
    pub balance_updated_at: DateTime<Utc>,
}

impl RealTimeBalance {
    fn zeroed(wallet: Wallet) -> Self {
        let balance_updated_at = wallet.updated_at;
        Self {
            wallet,
            real_time_balance: Amount::ZERO,
            real_time_credit_balance: Amount::ZERO,
            unpaid_invoice_amount: Amount::ZERO,
            current_period_usage: Amount::ZERO,
            balance_updated_at,
        }
    }
}

pub struct BalanceAggregator {
    ledger: Arc<WalletLedger>,
    invoices: Arc<dyn InvoiceSource>,
    usage: Arc<dyn UsageSource>,
}

impl BalanceAggregator {
    pub fn new(
        ledger: Arc<WalletLedger>,
        invoices: Arc<dyn InvoiceSource>,
        usage: Arc<dyn UsageSource>,
    ) -> Self {
        Self {
            ledger,
            invoices,
            usage,
        }
    }

    /// Wallet balance minus unpaid invoices minus current-period usage.
    /// Inactive wallets report zero for every figure.
    pub async fn get_real_time_balance(
        &self,
        id: &WalletId,
    ) -> Result<RealTimeBalance, LedgerError> {
        let wallet = self.ledger.get_wallet_by_id(id).await?;
        if !wallet.is_active() {
            return Ok(RealTimeBalance::zeroed(wallet));
        }

        let unpaid = self
            .invoices
            .unpaid_invoice_total(&wallet.customer_id, &wallet.currency)
            .await?;
        // wallets restricted to fixed prices never pay for usage
        let usage = if wallet.config.includes_usage() {
            self.usage
                .current_period_usage_charge(&wallet.customer_id, &wallet.currency)
                .await?
        } else {
            Amount::ZERO
        };

        let real_time_balance = wallet
            .balance
            .checked_sub(unpaid)
            .and_then(|b| b.checked_sub(usage))
            .ok_or(ValidationError::Overflow)?;
        let real_time_credit_balance = wallet
            .conversion_rate
            .to_credits(real_time_balance)
            .ok_or(ValidationError::Overflow)?;

        debug!(
            wallet = %wallet.id,
            balance = %wallet.balance,
            unpaid = %unpaid,
            usage = %usage,
            real_time = %real_time_balance,
            "real-time balance computed"
        );

        Ok(RealTimeBalance {
            balance_updated_at: wallet.updated_at,
            wallet,
            real_time_balance,
            real_time_credit_balance,
            unpaid_invoice_amount: unpaid,
            current_period_usage: usage,
        })
    }

    /// Real-time balances of every wallet a customer owns.
    pub async fn balances_by_customer(
        &self,
        customer: &CustomerId,
    ) -> Result<Vec<RealTimeBalance>, LedgerError> {
        let wallets = self.ledger.get_wallets_by_customer(customer).await?;
        let mut balances = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            balances.push(self.get_real_time_balance(&wallet.id).await?);
        }
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::engine::{CreateWalletRequest, CreditRequest};
    use crate::model::{PriceType, TransactionReason, WalletConfig};
    use crate::store::MemoryStore;

    struct Fixed(Amount);

    #[async_trait]
    impl InvoiceSource for Fixed {
        async fn unpaid_invoice_total(
            &self,
            _customer: &CustomerId,
            _currency: &Currency,
        ) -> Result<Amount, CollaboratorError> {
            Ok(self.0)
        }
    }

    #[async_trait]
    impl UsageSource for Fixed {
        async fn current_period_usage_charge(
            &self,
            _customer: &CustomerId,
            _currency: &Currency,
        ) -> Result<Amount, CollaboratorError> {
            Ok(self.0)
        }
    }

    struct Down;

    #[async_trait]
    impl UsageSource for Down {
        async fn current_period_usage_charge(
            &self,
            _customer: &CustomerId,
            _currency: &Currency,
        ) -> Result<Amount, CollaboratorError> {
            Err(CollaboratorError::new("usage", "connection refused"))
        }
    }

    async fn funded_ledger(config: WalletConfig) -> Arc<WalletLedger> {
        let ledger = Arc::new(WalletLedger::new(
            Arc::new(MemoryStore::new()),
            LedgerConfig::default(),
        ));
        let request = CreateWalletRequest::new("cust_1".parse().unwrap(), "usd".parse().unwrap())
            .with_id("w1".parse().unwrap())
            .with_name("Prepaid")
            .with_conversion_rate("2".parse().unwrap())
            .with_config(config);
        ledger.create_wallet(request).await.unwrap();
        ledger
            .credit(CreditRequest::new(
                "w1".parse().unwrap(),
                Amount::from(100),
                TransactionReason::FreeCredit,
            ))
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn subtracts_invoices_and_usage() {
        let ledger = funded_ledger(WalletConfig::default()).await;
        let aggregator = BalanceAggregator::new(
            ledger,
            Arc::new(Fixed(Amount::from(30))),
            Arc::new(Fixed(Amount::from(20))),
        );

        let balance = aggregator
            .get_real_time_balance(&"w1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(balance.wallet.balance, Amount::from(200));
        assert_eq!(balance.wallet.name.as_deref(), Some("Prepaid"));
        assert_eq!(balance.unpaid_invoice_amount, Amount::from(30));
        assert_eq!(balance.current_period_usage, Amount::from(20));
        assert_eq!(balance.real_time_balance, Amount::from(150));
        assert_eq!(balance.real_time_credit_balance, Amount::from(75));
    }

    #[tokio::test]
    async fn fixed_price_wallet_ignores_usage() {
        let config = WalletConfig {
            allowed_price_types: vec![PriceType::Fixed],
        };
        let ledger = funded_ledger(config).await;
        let aggregator = BalanceAggregator::new(
            ledger,
            Arc::new(Fixed(Amount::from(30))),
            Arc::new(Down),
        );

        let balance = aggregator
            .get_real_time_balance(&"w1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(balance.current_period_usage, Amount::ZERO);
        assert_eq!(balance.real_time_balance, Amount::from(170));
    }

    #[tokio::test]
    async fn balance_may_go_negative() {
        let ledger = funded_ledger(WalletConfig::default()).await;
        let aggregator = BalanceAggregator::new(
            ledger,
            Arc::new(Fixed(Amount::from(250))),
            Arc::new(Fixed(Amount::ZERO)),
        );

        let balance = aggregator
            .get_real_time_balance(&"w1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(balance.real_time_balance, Amount::from(-50));
        assert_eq!(balance.real_time_credit_balance, Amount::from(-25));
    }

    #[tokio::test]
    async fn closed_wallet_reports_zeros() {
        let ledger = funded_ledger(WalletConfig::default()).await;
        ledger
            .terminate_wallet(&"w1".parse().unwrap())
            .await
            .unwrap();
        let aggregator = BalanceAggregator::new(
            ledger,
            Arc::new(Fixed(Amount::from(30))),
            Arc::new(Down),
        );

        let balance = aggregator
            .get_real_time_balance(&"w1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(balance.real_time_balance, Amount::ZERO);
        assert_eq!(balance.unpaid_invoice_amount, Amount::ZERO);
        assert_eq!(balance.current_period_usage, Amount::ZERO);
    }

    #[tokio::test]
    async fn collaborator_failure_is_retryable() {
        let ledger = funded_ledger(WalletConfig::default()).await;
        let aggregator =
            BalanceAggregator::new(ledger, Arc::new(Fixed(Amount::ZERO)), Arc::new(Down));

        let err = aggregator
            .get_real_time_balance(&"w1".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Collaborator(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_wallet_is_not_found() {
        let ledger = funded_ledger(WalletConfig::default()).await;
        let aggregator = BalanceAggregator::new(
            ledger,
            Arc::new(Fixed(Amount::ZERO)),
            Arc::new(Fixed(Amount::ZERO)),
        );

        let err = aggregator
            .get_real_time_balance(&"nope".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn balances_by_customer_covers_each_wallet() {
        let ledger = funded_ledger(WalletConfig::default()).await;
        ledger
            .create_wallet(CreateWalletRequest::new(
                "cust_1".parse().unwrap(),
                "eur".parse().unwrap(),
            ))
            .await
            .unwrap();
        let aggregator = BalanceAggregator::new(
            ledger,
            Arc::new(Fixed(Amount::ZERO)),
            Arc::new(Fixed(Amount::ZERO)),
        );

        let balances = aggregator
            .balances_by_customer(&"cust_1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(balances.len(), 2);
    }
}
