use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ledger_cc::{
    run_experiment, CoordinatorConfig, InMemoryLedger, LoadConfig, Protocol, TransferCoordinator,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const ACCOUNTS: [u32; 4] = [1, 2, 3, 4];
const TRANSFERS: usize = 1_000;

fn coordinator() -> Arc<TransferCoordinator<InMemoryLedger>> {
    let ledger = InMemoryLedger::new();
    for id in ACCOUNTS {
        ledger
            .open_account(id, &format!("account-{id}"), dec!(1000000.00), "USD")
            .unwrap();
    }
    Arc::new(TransferCoordinator::new(
        Arc::new(ledger),
        CoordinatorConfig::default(),
    ))
}

fn transfer_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");

    group.throughput(Throughput::Elements(TRANSFERS as u64));
    group.measurement_time(Duration::from_secs(20));
    group.sample_size(20);

    for protocol in Protocol::ALL {
        let config = LoadConfig {
            concurrency: 50,
            total: TRANSFERS,
            protocol,
            ..LoadConfig::default()
        };
        group.bench_with_input(
            BenchmarkId::new("4_accounts_1K_transfers", protocol.tag()),
            &config,
            |b, config| {
                let rt = Runtime::new().unwrap();
                b.to_async(rt).iter(|| async {
                    run_experiment(coordinator(), config, &ACCOUNTS, 1)
                        .await
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, transfer_throughput);
criterion_main!(benches);
