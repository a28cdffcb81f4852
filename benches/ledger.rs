use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use wallet_ledger::engine::{CreateWalletRequest, CreditRequest, DebitRequest};
use wallet_ledger::{Amount, LedgerConfig, MemoryStore, TransactionReason, WalletId, WalletLedger};

/// Generates credit lots for one wallet.
///
/// Lots cycle through a handful of priorities and expiry offsets so the
/// allocator has real ordering work to do. Every lot holds 10 credits.
pub struct LotGenerator {
    wallet: WalletId,
    remaining: u32,
    step: u32,
}

impl LotGenerator {
    pub fn new(wallet: WalletId, lots: u32) -> Self {
        Self {
            wallet,
            remaining: lots,
            step: 0,
        }
    }
}

impl Iterator for LotGenerator {
    type Item = CreditRequest;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.step += 1;

        let mut request = CreditRequest::new(
            self.wallet.clone(),
            Amount::from(10),
            TransactionReason::FreeCredit,
        );
        if self.step % 3 != 0 {
            let days = 30 + i64::from(self.step % 97);
            request.expiry_date = Some(Utc::now() + Duration::days(days));
        }
        if self.step % 5 == 0 {
            request.priority = Some((self.step % 4) as i32);
        }
        Some(request)
    }
}

async fn funded_ledger(lots: u32, max_lots_per_page: usize) -> (WalletLedger, WalletId) {
    let ledger = WalletLedger::new(
        Arc::new(MemoryStore::new()),
        LedgerConfig { max_lots_per_page },
    );
    let wallet = ledger
        .create_wallet(CreateWalletRequest::new(
            "cust_bench".parse().unwrap(),
            "usd".parse().unwrap(),
        ))
        .await
        .unwrap();
    for request in LotGenerator::new(wallet.id.clone(), lots) {
        ledger.credit(request).await.unwrap();
    }
    (ledger, wallet.id)
}

fn bench_credit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("credit");
    group.sample_size(10);

    for lots in [100u32, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(lots), &lots, |b, &lots| {
            b.to_async(&rt)
                .iter(|| async move { black_box(funded_ledger(lots, 100).await) });
        });
    }

    group.finish();
}

fn bench_debit_across_lots(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("debit");
    group.sample_size(10);

    // drains half of the wallet in one debit
    for (lots, page) in [(100u32, 100usize), (1_000, 100), (1_000, 10)] {
        let label = format!("{lots}lots_page{page}");
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(lots, page),
            |b, &(lots, page)| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let mut elapsed = std::time::Duration::ZERO;
                    for _ in 0..iters {
                        let (ledger, wallet) = funded_ledger(lots, page).await;
                        let request = DebitRequest::new(
                            wallet,
                            Amount::from(i64::from(lots) * 5),
                            TransactionReason::InvoicePayment,
                        );
                        let start = Instant::now();
                        black_box(ledger.debit(request).await).unwrap();
                        elapsed += start.elapsed();
                    }
                    elapsed
                });
            },
        );
    }

    group.finish();
}

fn bench_many_small_debits(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("small_debits");
    group.sample_size(10);

    group.bench_function("1k_lots_500_debits", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let mut elapsed = std::time::Duration::ZERO;
            for _ in 0..iters {
                let (ledger, wallet) = funded_ledger(1_000, 100).await;
                let start = Instant::now();
                for _ in 0..500 {
                    let request = DebitRequest::new(
                        wallet.clone(),
                        Amount::from(7),
                        TransactionReason::InvoicePayment,
                    );
                    black_box(ledger.debit(request).await).unwrap();
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_credit,
    bench_debit_across_lots,
    bench_many_small_debits,
);

criterion_main!(benches);
