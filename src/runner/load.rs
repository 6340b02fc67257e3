use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use crate::{
    config::LoadConfig,
    dto::{Protocol, RunSummary, SampleStatus, TransferRequest, TransferSample},
    stores::{AccountId, LedgerStore},
    TransferCoordinator,
};

type Result<T, E = Box<dyn Error + Send + Sync>> = std::result::Result<T, E>;

/// Runs one randomized load experiment against the coordinator.
///
/// Issues `config.total` transfers between random distinct accounts of the
/// pool, with at most `config.concurrency` in flight at once. Amounts are
/// drawn uniformly from `[amount_min, amount_max]` in whole cents.
///
/// # Errors
/// Returns an error if:
/// * The account pool has fewer than two distinct accounts
/// * The amount range is empty or not positive
/// * A transfer task panics
pub async fn run_experiment<S>(
    coordinator: Arc<TransferCoordinator<S>>,
    config: &LoadConfig,
    accounts: &[AccountId],
    run_id: u32,
) -> Result<(Vec<TransferSample>, RunSummary)>
where
    S: LedgerStore + 'static,
{
    let requests = generate_requests(config, accounts)?;
    info!(
        run_id,
        protocol = %config.protocol,
        concurrency = config.concurrency,
        total = requests.len(),
        "starting load run"
    );

    let started = Instant::now();
    let samples = execute(coordinator, requests, config.concurrency).await?;
    let summary = summarize(
        run_id,
        config.protocol,
        config.concurrency,
        &samples,
        started.elapsed(),
    );

    info!(
        run_id,
        completed = summary.completed,
        aborted = summary.aborted,
        abort_rate_pct = summary.abort_rate_pct,
        throughput = summary.throughput_ops_per_s,
        "load run finished"
    );
    Ok((samples, summary))
}

/// Draws the whole workload up front so no RNG state crosses an await.
fn generate_requests(
    config: &LoadConfig,
    accounts: &[AccountId],
) -> Result<Vec<TransferRequest>> {
    let mut pool = accounts.to_vec();
    pool.sort_unstable();
    pool.dedup();
    if pool.len() < 2 {
        return Err("load runs need at least two distinct accounts".into());
    }

    let to_cents = |amount: Decimal| (amount * Decimal::ONE_HUNDRED).trunc().to_i64();
    let (Some(min_cents), Some(max_cents)) =
        (to_cents(config.amount_min), to_cents(config.amount_max))
    else {
        return Err("amount range out of bounds".into());
    };
    if min_cents <= 0 || min_cents > max_cents {
        return Err(format!(
            "invalid amount range {}..{}",
            config.amount_min, config.amount_max
        )
        .into());
    }

    let mut rng = rand::thread_rng();
    let mut requests = Vec::with_capacity(config.total);
    for _ in 0..config.total {
        let picked: Vec<_> = pool.choose_multiple(&mut rng, 2).copied().collect();
        requests.push(TransferRequest {
            from: picked[0],
            to: picked[1],
            amount: Decimal::new(rng.gen_range(min_cents..=max_cents), 2),
            protocol: config.protocol,
        });
    }
    Ok(requests)
}

/// Runs requests concurrently, bounded by `concurrency`, and collects one
/// sample per request.
pub(crate) async fn execute<S, I>(
    coordinator: Arc<TransferCoordinator<S>>,
    requests: I,
    concurrency: usize,
) -> Result<Vec<TransferSample>>
where
    S: LedgerStore + 'static,
    I: IntoIterator<Item = TransferRequest>,
{
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for (seq, request) in requests.into_iter().enumerate() {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        let coordinator = Arc::clone(&coordinator);
        tasks.spawn(async move {
            let sample = attempt(&coordinator, request).await;
            drop(permit);
            (seq, sample)
        });
    }
    collect_in_order(tasks).await
}

/// Drains the task set and returns samples in submission order.
pub(crate) async fn collect_in_order(
    mut tasks: JoinSet<(usize, TransferSample)>,
) -> Result<Vec<TransferSample>> {
    let mut samples = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        samples.push(joined?);
    }
    samples.sort_unstable_by_key(|(seq, _)| *seq);
    Ok(samples.into_iter().map(|(_, sample)| sample).collect())
}

/// Performs one transfer and times it.
pub(crate) async fn attempt<S: LedgerStore>(
    coordinator: &TransferCoordinator<S>,
    request: TransferRequest,
) -> TransferSample {
    let start_ts = Utc::now();
    let start = Instant::now();
    let outcome = coordinator
        .transfer(request.from, request.to, request.amount, request.protocol)
        .await;
    let latency_s = start.elapsed().as_secs_f64();

    let (status, reason, error) = match outcome {
        Ok(result) if result.is_completed() => (SampleStatus::Completed, result.reason, None),
        Ok(result) => (SampleStatus::Aborted, result.reason, None),
        Err(err) => (SampleStatus::Failed, String::new(), Some(err.to_string())),
    };
    TransferSample {
        start_ts,
        end_ts: Utc::now(),
        protocol: request.protocol,
        from: request.from,
        to: request.to,
        amount: request.amount,
        status,
        reason,
        latency_s,
        error,
    }
}

/// Aggregates the samples of one run.
pub fn summarize(
    run_id: u32,
    protocol: Protocol,
    concurrency: usize,
    samples: &[TransferSample],
    elapsed: Duration,
) -> RunSummary {
    let total_ops = samples.len();
    let completed = samples
        .iter()
        .filter(|s| s.status == SampleStatus::Completed)
        .count();
    let failed = samples
        .iter()
        .filter(|s| s.status == SampleStatus::Failed)
        .count();
    let aborted = total_ops - completed;

    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_s).collect();
    latencies.sort_by(f64::total_cmp);

    let abort_rate_pct = if total_ops > 0 {
        round_to(aborted as f64 / total_ops as f64 * 100.0, 2)
    } else {
        0.0
    };
    let elapsed_s = elapsed.as_secs_f64();
    let throughput_ops_per_s = if elapsed_s > 0.0 {
        round_to(total_ops as f64 / elapsed_s, 4)
    } else {
        0.0
    };

    RunSummary {
        run_id,
        protocol,
        concurrency,
        total_ops,
        completed,
        aborted,
        failed,
        abort_rate_pct,
        avg_latency_s: round_to(mean(&latencies), 4),
        p50_latency_s: round_to(median(&latencies), 4),
        throughput_ops_per_s,
        timestamp: Utc::now(),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of already sorted values.
fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CoordinatorConfig, stores::InMemoryLedger};
    use rust_decimal_macros::dec;

    fn coordinator(balance: Decimal) -> Arc<TransferCoordinator<InMemoryLedger>> {
        let ledger = InMemoryLedger::new();
        for id in 1..=4 {
            ledger.open_account(id, &format!("owner-{id}"), balance, "USD").unwrap();
        }
        Arc::new(TransferCoordinator::new(
            Arc::new(ledger),
            CoordinatorConfig::default(),
        ))
    }

    fn sample(status: SampleStatus, latency_s: f64) -> TransferSample {
        TransferSample {
            start_ts: Utc::now(),
            end_ts: Utc::now(),
            protocol: Protocol::TwoPhaseLocking,
            from: 1,
            to: 2,
            amount: dec!(1),
            status,
            reason: String::new(),
            latency_s,
            error: None,
        }
    }

    #[test]
    fn test_generated_requests_respect_pool_and_range() {
        let config = LoadConfig {
            total: 500,
            amount_min: dec!(1.00),
            amount_max: dec!(2.50),
            ..LoadConfig::default()
        };
        let requests = generate_requests(&config, &[1, 2, 3]).unwrap();
        assert_eq!(requests.len(), 500);
        for request in requests {
            assert_ne!(request.from, request.to);
            assert!([1, 2, 3].contains(&request.from));
            assert!([1, 2, 3].contains(&request.to));
            assert!(request.amount >= dec!(1.00) && request.amount <= dec!(2.50));
            assert_eq!(request.amount.scale(), 2);
        }
    }

    #[test]
    fn test_generate_rejects_bad_input() {
        let config = LoadConfig::default();
        assert!(generate_requests(&config, &[1]).is_err());
        assert!(generate_requests(&config, &[3, 3]).is_err());

        let inverted = LoadConfig {
            amount_min: dec!(5),
            amount_max: dec!(1),
            ..LoadConfig::default()
        };
        assert!(generate_requests(&inverted, &[1, 2]).is_err());
    }

    #[test]
    fn test_summarize() {
        let samples = vec![
            sample(SampleStatus::Completed, 0.1),
            sample(SampleStatus::Completed, 0.4),
            sample(SampleStatus::Aborted, 0.2),
            sample(SampleStatus::Failed, 0.3),
        ];
        let summary = summarize(
            3,
            Protocol::TwoPhaseLocking,
            8,
            &samples,
            Duration::from_secs(2),
        );
        assert_eq!(summary.run_id, 3);
        assert_eq!(summary.total_ops, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.aborted, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.abort_rate_pct, 50.0);
        assert_eq!(summary.avg_latency_s, 0.25);
        assert_eq!(summary.p50_latency_s, 0.25);
        assert_eq!(summary.throughput_ops_per_s, 2.0);
    }

    #[test]
    fn test_summarize_empty_run() {
        let summary = summarize(1, Protocol::Optimistic, 1, &[], Duration::ZERO);
        assert_eq!(summary.total_ops, 0);
        assert_eq!(summary.abort_rate_pct, 0.0);
        assert_eq!(summary.p50_latency_s, 0.0);
        assert_eq!(summary.throughput_ops_per_s, 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_experiment_every_protocol() -> Result<()> {
        for protocol in Protocol::ALL {
            let coordinator = coordinator(dec!(1000.00));
            let config = LoadConfig {
                concurrency: 16,
                total: 120,
                protocol,
                ..LoadConfig::default()
            };

            let (samples, summary) =
                run_experiment(Arc::clone(&coordinator), &config, &[1, 2, 3, 4], 1).await?;

            assert_eq!(samples.len(), 120);
            assert_eq!(summary.total_ops, 120);
            assert_eq!(summary.completed + summary.aborted, 120);
            assert_eq!(summary.failed, 0);
            assert!(samples.iter().all(|s| s.protocol == protocol));
            assert_eq!(coordinator.store().total_balance(), dec!(4000.00));
            assert_eq!(coordinator.store().transfers().len(), 120);
        }
        Ok(())
    }
}
