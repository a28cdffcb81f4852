//! Credit lot selection.
//!
//! Decides which lots satisfy a consumption and in which order. Eligible lots
//! have credits left and have not expired. They are ordered by priority, then
//! expiry date, then creation order, with an absent priority or expiry sorting
//! after every present one.

use chrono::{DateTime, Utc};

use crate::Amount;
use crate::model::{LedgerEntry, LotRef};

/// Sort position of an optional attribute where absence ranks last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank<T> {
    Present(T),
    Absent,
}

impl<T> From<Option<T>> for Rank<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Rank::Present(v),
            None => Rank::Absent,
        }
    }
}

/// Consumption order key of a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LotOrder {
    priority: Rank<i32>,
    expiry: Rank<DateTime<Utc>>,
    seq: u64,
}

impl LotOrder {
    pub fn of(lot: &LotRef) -> Self {
        LotOrder {
            priority: lot.priority.into(),
            expiry: lot.expiry_date.into(),
            seq: lot.seq,
        }
    }
}

/// Select, in consumption order, the shortest run of eligible lots whose
/// available credits reach `amount_needed`.
///
/// When the eligible lots cannot reach `amount_needed` all of them are
/// returned. The result never holds more than `max_lots` lots.
pub fn find_eligible_credits<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    amount_needed: Amount,
    max_lots: usize,
    now: DateTime<Utc>,
) -> Vec<LotRef> {
    if max_lots == 0 || !amount_needed.is_positive() {
        return Vec::new();
    }

    let mut eligible: Vec<LotRef> = entries
        .into_iter()
        .filter(|entry| entry.is_consumable_at(now))
        .map(LedgerEntry::lot_ref)
        .collect();
    eligible.sort_by_key(LotOrder::of);

    let mut covered = Amount::ZERO;
    let mut selected = Vec::new();
    for lot in eligible {
        covered += lot.credits_available;
        selected.push(lot);
        if covered >= amount_needed || selected.len() == max_lots {
            break;
        }
    }
    selected
}

/// Lots whose expiry passed while credits were still available.
pub fn lapsed_lots<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    now: DateTime<Utc>,
) -> Vec<LotRef> {
    let mut lapsed: Vec<LotRef> = entries
        .into_iter()
        .filter(|entry| entry.is_lapsed_at(now))
        .map(LedgerEntry::lot_ref)
        .collect();
    lapsed.sort_by_key(LotOrder::of);
    lapsed
}
