use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::engine::{CreateWalletRequest, DebitRequest, Operation, TopUpRequest};
use crate::model::{Currency, CustomerId, TransactionReason, Wallet, WalletId};
use crate::{Amount, ConversionRate};

/// Errors that can occur when reading or writing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation type '{op_type}'")]
    UnrecognizedType { line: usize, op_type: String },

    #[error("line {line}: {op_type} missing {field}")]
    MissingField {
        line: usize,
        op_type: String,
        field: &'static str,
    },

    #[error("line {line}: invalid {field} '{value}': {reason}")]
    Invalid {
        line: usize,
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to write wallets: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    wallet: String,
    customer: Option<String>,
    currency: Option<String>,
    rate: Option<String>,
    amount: Option<String>,
    priority: Option<i32>,
    expiry: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    wallet: &'a str,
    customer: &'a str,
    currency: &'a str,
    credit_balance: String,
    balance: String,
    status: String,
}

/// One input row being turned into an [`Operation`].
struct RowParser {
    line: usize,
    row: InputRow,
}

impl RowParser {
    fn required(&self, field: &'static str, value: &Option<String>) -> Result<String, CsvError> {
        value.clone().ok_or_else(|| CsvError::MissingField {
            line: self.line,
            op_type: self.row.r#type.clone(),
            field,
        })
    }

    fn parse<T>(&self, field: &'static str, raw: &str) -> Result<T, CsvError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        raw.parse().map_err(|e: T::Err| CsvError::Invalid {
            line: self.line,
            field,
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }

    fn wallet(&self) -> Result<WalletId, CsvError> {
        self.parse("wallet", &self.row.wallet)
    }

    fn amount(&self) -> Result<Amount, CsvError> {
        let raw = self.required("amount", &self.row.amount)?;
        self.parse("amount", &raw)
    }

    fn expiry(&self) -> Result<Option<DateTime<Utc>>, CsvError> {
        let Some(raw) = &self.row.expiry else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| CsvError::Invalid {
                line: self.line,
                field: "expiry",
                value: raw.clone(),
                reason: e.to_string(),
            })
    }

    fn into_operation(self) -> Result<Operation, CsvError> {
        match self.row.r#type.as_str() {
            "open" => {
                let customer: CustomerId =
                    self.parse("customer", &self.required("customer", &self.row.customer)?)?;
                let currency: Currency =
                    self.parse("currency", &self.required("currency", &self.row.currency)?)?;
                let mut request =
                    CreateWalletRequest::new(customer, currency).with_id(self.wallet()?);
                if let Some(rate) = &self.row.rate {
                    let rate: ConversionRate = self.parse("rate", rate)?;
                    request = request.with_conversion_rate(rate);
                }
                Ok(Operation::CreateWallet(request))
            }
            "topup" => {
                let mut request = TopUpRequest::credits(self.amount()?);
                request.priority = self.row.priority;
                request.expiry_date = self.expiry()?;
                if let Some(key) = &self.row.key {
                    request.idempotency_key = Some(self.parse("key", key)?);
                }
                Ok(Operation::TopUp {
                    wallet_id: self.wallet()?,
                    request,
                })
            }
            "debit" => Ok(Operation::Debit(DebitRequest::new(
                self.wallet()?,
                self.amount()?,
                TransactionReason::InvoicePayment,
            ))),
            "terminate" => Ok(Operation::Terminate(self.wallet()?)),
            other => Err(CsvError::UnrecognizedType {
                line: self.line,
                op_type: other.to_string(),
            }),
        }
    }
}

/// Read wallet operations from a csv file
pub fn read_operations(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Operation, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            RowParser { line, row }.into_operation()
        }))
}

/// Write wallet snapshots in csv format
pub fn write_wallets<'a, W: io::Write>(
    out: W,
    wallets: impl IntoIterator<Item = &'a Wallet>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for wallet in wallets {
        let row = OutputRow {
            wallet: wallet.id.as_str(),
            customer: wallet.customer_id.as_str(),
            currency: wallet.currency.as_str(),
            credit_balance: wallet.credit_balance.to_string(),
            balance: wallet.balance.to_string(),
            status: wallet.status.to_string(),
        };
        writer.serialize(&row)?;
    }

    writer.flush().map_err(|e| CsvError::Write(e.into()))?;
    Ok(())
}
