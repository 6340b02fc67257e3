use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use csv_async::{AsyncReaderBuilder, Error as CsvError, Trim};
use tokio::fs::File;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::load::{attempt, collect_in_order};
use crate::{
    dto::{TransferRequest, TransferSample},
    stores::LedgerStore,
    TransferCoordinator,
};

const BUFFER_SIZE: usize = 1024;

type Result<T, E = Box<dyn Error + Send + Sync>> = std::result::Result<T, E>;

/// Replays a CSV of transfer requests against the coordinator.
/// Spawns two tasks:
/// * CSV reader - streams `from,to,amount,protocol` rows from the input file,
///   deserializes them and sends them to the processor via channel.
/// * Processor - receives requests from the channel and runs them as
///   concurrent transfers, at most `concurrency` at a time, until the channel
///   is closed.
///
/// Returns one sample per row, in input order.
///
/// # Errors
/// Returns an error if:
/// * The input file cannot be read
/// * The CSV is malformed
/// * A transfer task panics
pub async fn replay<P, S>(
    input_path: P,
    coordinator: Arc<TransferCoordinator<S>>,
    concurrency: usize,
) -> Result<Vec<TransferSample>>
where
    P: AsRef<Path>,
    S: LedgerStore + 'static,
{
    let (tx, rx) = mpsc::channel(BUFFER_SIZE);
    let input_path = input_path.as_ref().to_owned();
    info!(input = %input_path.display(), concurrency, "replaying transfers");

    let reader_handle = tokio::spawn(read_requests(input_path, tx));
    let processor_handle = tokio::spawn(process_requests(rx, coordinator, concurrency));

    // A malformed row stops the reader and closes the channel. The processor
    // still finishes the transfers it already started before we report it.
    let read = reader_handle.await?;
    let samples = processor_handle.await??;
    if let Err(err) = read {
        warn!(completed = samples.len(), error = %err, "replay stopped on a bad row");
        return Err(err.into());
    }

    info!(transfers = samples.len(), "replay finished");
    Ok(samples)
}

async fn read_requests(
    input_path: impl AsRef<Path> + Send,
    tx: mpsc::Sender<TransferRequest>,
) -> Result<(), CsvError> {
    let file = File::open(input_path).await?;
    let mut csv_reader = AsyncReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .create_deserializer(file);

    let mut records = csv_reader.deserialize::<TransferRequest>();
    while let Some(result) = records.next().await {
        let request = result?;
        if tx.send(request).await.is_err() {
            debug!("processor gone, stopping reader");
            break;
        }
    }
    Ok(())
}

async fn process_requests<S>(
    mut rx: mpsc::Receiver<TransferRequest>,
    coordinator: Arc<TransferCoordinator<S>>,
    concurrency: usize,
) -> Result<Vec<TransferSample>>
where
    S: LedgerStore + 'static,
{
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut seq: usize = 0;
    while let Some(request) = rx.recv().await {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        let coordinator = Arc::clone(&coordinator);
        tasks.spawn(async move {
            let sample = attempt(&coordinator, request).await;
            drop(permit);
            (seq, sample)
        });
        seq += 1;
    }
    collect_in_order(tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::dto::{Protocol, SampleStatus};
    use crate::stores::InMemoryLedger;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn coordinator() -> Arc<TransferCoordinator<InMemoryLedger>> {
        let ledger = InMemoryLedger::new();
        for id in 1..=4 {
            ledger
                .open_account(id, &format!("account-{id}"), dec!(1000.00), "USD")
                .unwrap();
        }
        Arc::new(TransferCoordinator::new(
            Arc::new(ledger),
            CoordinatorConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_example_transfers() -> Result<()> {
        let coordinator = coordinator();
        let samples = replay("data/example_transfers.csv", Arc::clone(&coordinator), 1).await?;

        let statuses: Vec<_> = samples.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                SampleStatus::Completed,
                SampleStatus::Completed,
                SampleStatus::Aborted,
                SampleStatus::Aborted,
                SampleStatus::Completed,
                SampleStatus::Completed,
            ]
        );
        assert!(samples[2].reason.starts_with("insufficient funds in account 3"));
        assert_eq!(samples[3].reason, "account 404 not found");
        assert_eq!(samples[5].protocol, Protocol::Optimistic);

        let balances: Vec<_> = coordinator
            .store()
            .accounts()
            .into_iter()
            .map(|account| account.balance)
            .collect();
        assert_eq!(
            balances,
            vec![dec!(565.25), dec!(1250.00), dec!(1250.00), dec!(934.75)]
        );
        assert_eq!(coordinator.store().transfers().len(), 6);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replay_conserves_money() -> Result<()> {
        let mut input = tempfile::NamedTempFile::new()?;
        writeln!(input, "from,to,amount,protocol")?;
        for i in 0..200u32 {
            let from = i % 4 + 1;
            let to = (i + 1) % 4 + 1;
            writeln!(input, "{from},{to},{}.00,OCC", i % 50 + 1)?;
        }
        input.flush()?;

        let coordinator = coordinator();
        let samples = replay(input.path(), Arc::clone(&coordinator), 32).await?;

        assert_eq!(samples.len(), 200);
        assert!(samples.iter().all(|s| s.status != SampleStatus::Failed));
        assert_eq!(coordinator.store().total_balance(), dec!(4000.00));
        assert!(coordinator
            .store()
            .accounts()
            .iter()
            .all(|account| account.balance >= dec!(0)));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_row_is_an_error() -> Result<()> {
        let mut input = tempfile::NamedTempFile::new()?;
        writeln!(input, "from,to,amount,protocol")?;
        writeln!(input, "1,2,10.00,2PL")?;
        writeln!(input, "1,2,ten,2PL")?;
        input.flush()?;

        let coordinator = coordinator();
        assert!(replay(input.path(), Arc::clone(&coordinator), 4).await.is_err());

        // The first row ran to completion before the error came back
        let records = coordinator.store().transfers();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].from, records[0].to), (1, 2));
        assert_eq!(records[0].amount, dec!(10.00));
        assert_eq!(coordinator.store().total_balance(), dec!(4000.00));
        let balances: Vec<_> = coordinator
            .store()
            .accounts()
            .into_iter()
            .map(|account| account.balance)
            .collect();
        assert_eq!(
            balances,
            vec![dec!(990.00), dec!(1010.00), dec!(1000.00), dec!(1000.00)]
        );
        assert!(coordinator.locks().held_by(1).is_empty());
        Ok(())
    }
}
