use clap::{Parser, Subcommand};
use std::error::Error;
use std::io;
use std::process;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledger_cc::csv_utils::{append_csv, write_csv};
use ledger_cc::{
    replay, run_experiment, InMemoryLedger, LedgerArgs, LoadConfig, ReplayArgs,
    TransferCoordinator,
};

type Result<T, E = Box<dyn Error + Send + Sync>> = std::result::Result<T, E>;

#[derive(Parser)]
#[command(name = "ledger-cc")]
#[command(about = "Concurrent fund transfers under 2PL, timestamp ordering and OCC", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    ledger: LedgerArgs,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run randomized load experiments
    Load(LoadConfig),
    /// Replay transfers from a CSV file
    Replay(ReplayArgs),
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let ledger = InMemoryLedger::new();
    for &id in &cli.ledger.accounts {
        ledger.open_account(
            id,
            &format!("account-{id}"),
            cli.ledger.initial_balance,
            &cli.ledger.currency,
        )?;
    }
    let opening_total = ledger.total_balance();
    let coordinator = Arc::new(TransferCoordinator::new(
        Arc::new(ledger),
        cli.ledger.coordinator_config(),
    ));

    match cli.command {
        Command::Load(config) => {
            let mut summaries = Vec::with_capacity(config.runs as usize);
            for run_id in 1..=config.runs {
                let (samples, summary) = run_experiment(
                    Arc::clone(&coordinator),
                    &config,
                    &cli.ledger.accounts,
                    run_id,
                )
                .await?;
                append_csv(&config.out_detail, samples.iter())?;
                append_csv(&config.out_summary, [&summary].into_iter())?;
                summaries.push(summary);
            }
            write_csv(io::stdout(), summaries.iter())?;
        }
        Command::Replay(args) => {
            let samples = replay(&args.input, Arc::clone(&coordinator), args.concurrency).await?;
            match &args.out_detail {
                Some(path) => append_csv(path, samples.iter())?,
                None => write_csv(io::stdout(), samples.iter())?,
            }
        }
    }

    let closing_total = coordinator.store().total_balance();
    info!(%opening_total, %closing_total, "ledger totals");
    if closing_total != opening_total {
        return Err(format!("money not conserved: {opening_total} -> {closing_total}").into());
    }
    Ok(())
}
