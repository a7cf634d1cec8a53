//! ledger-batcher 命令行入口
//!
//! 加载环境配置与本地数据，构建 RunCoordinator，按子命令执行一次迁移运行。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use ledger_batcher::config::{load_config, EnvironmentConfig};
use ledger_batcher::core::{
    FinalizeParams, RunCoordinator, RunReport, SetupOptions, ShutdownManager,
};
use ledger_batcher::ledger::{MockLedgerClient, Operation, RelayClient, SubmissionClient};
use ledger_batcher::observability;
use ledger_batcher::progress::{FileProgressStore, MemoryProgressStore, ProgressStore, ProgressTracker};
use ledger_batcher::record::loader;

/// 批量链上数据迁移：分批、分阶段、可恢复
#[derive(Parser, Debug)]
#[command(name = "ledger-batcher")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Batch, sequence and resume bulk ledger updates", long_about = None)]
struct Cli {
    /// Environment name (config/<env>.toml)
    #[arg(global = true, long = "env", short = 'e', default_value = "test")]
    env: String,

    /// Extra config file layered over the environment file
    #[arg(global = true, long = "config", short = 'c')]
    config: Option<PathBuf>,

    /// Use the in-process mock ledger and in-memory progress
    #[arg(global = true, long = "dry-run")]
    dry_run: bool,

    /// Enable debug logging
    #[arg(global = true, long = "verbose", short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add addresses (one per line) to the mythic eligibility list
    AddEligible {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Upload token attributes from <dir>/<id>.json
    SetAttributes {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Upload token image URLs from a {"<id>": "<url>"} file
    SetImages {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Upload badge display names
    SetBadgeNames {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Upload preset badges per address
    SetPresetBadges {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Submit auction winners (finalize_start / finalize_continue)
    SetWinners {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Send finalize_end with [auction] parameters after the last batch
        #[arg(long = "finalize")]
        finalize: bool,
    },

    /// Send finalize_end for an already uploaded winner list
    Finalize,

    /// Run the auction raffle
    Raffle,

    /// Set future badges for a single token
    SetFutureBadges {
        #[arg(long = "token-id")]
        token_id: u16,

        #[arg(long = "badge-ids", value_delimiter = ',', required = true)]
        badge_ids: Vec<u16>,
    },

    /// Premint (or mark premint completed) and start minting
    Setup {
        /// Skip the premint call
        #[arg(long = "skip-premint")]
        skip_premint: bool,

        /// Skip start_minting
        #[arg(long = "skip-minting")]
        skip_minting: bool,
    },

    /// Edit one field of the NFT Display and bump its version
    UpdateDisplay {
        #[arg(long = "field", default_value = "image_url")]
        field: String,

        #[arg(long = "value")]
        value: String,
    },

    /// Show saved progress for an operation
    Status {
        #[arg(value_name = "OPERATION")]
        operation: Operation,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init(cli.verbose);

    let cfg = load_config(&cli.env, cli.config.clone())
        .with_context(|| format!("Failed to load config for environment {}", cli.env))?;
    cfg.validate().context("Invalid configuration")?;

    let store = progress_store(&cfg, cli.dry_run);

    if let Commands::Status { operation } = &cli.command {
        return print_status(store, *operation);
    }

    let client: Arc<dyn SubmissionClient> = if cli.dry_run {
        tracing::warn!("Dry run: calls go to the mock ledger, progress is not saved");
        Arc::new(MockLedgerClient::new())
    } else {
        cfg.require_ledger_ids()?;
        Arc::new(
            RelayClient::new(&cfg.ledger.relay_url, cfg.ledger.request_timeout_secs)
                .context("Failed to create relay client")?,
        )
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let coordinator = RunCoordinator::new(client, &cfg).with_cancellation(shutdown.token());

    tracing::info!(
        "Environment {} ({} records, limit {})",
        cfg.environment,
        cfg.batch.total_records,
        cfg.batch.effective_limit()
    );

    let limit = cfg.batch.effective_limit();
    match cli.command {
        Commands::AddEligible { file } => {
            let addresses = loader::read_addresses(&file)?;
            let mut tracker = ProgressTracker::open(store, Operation::AddEligible)?;
            let report = coordinator
                .run_addresses(Operation::AddEligible, &addresses, None, &mut tracker)
                .await?;
            print_report(&report)
        }
        Commands::SetAttributes { dir } => {
            let records = loader::load_attributes(&dir, limit)?;
            run_records(&coordinator, store, Operation::SetAttributes, records).await
        }
        Commands::SetImages { file } => {
            let records = loader::load_image_links(&file, limit)?;
            run_records(&coordinator, store, Operation::SetImages, records).await
        }
        Commands::SetBadgeNames { file } => {
            let records = loader::load_badge_names(&file)?;
            run_records(&coordinator, store, Operation::SetBadgeNames, records).await
        }
        Commands::SetPresetBadges { file } => {
            let records = loader::load_preset_badges(&file)?;
            run_records(&coordinator, store, Operation::SetPresetBadges, records).await
        }
        Commands::SetWinners { file, finalize } => {
            let addresses = loader::read_addresses(&file)?;
            let params = finalize.then(|| finalize_params(&cfg));
            let mut tracker = ProgressTracker::open(store, Operation::AuctionWinners)?;
            let report = coordinator
                .run_addresses(Operation::AuctionWinners, &addresses, params, &mut tracker)
                .await?;
            print_report(&report)
        }
        Commands::Finalize => {
            let mut tracker = ProgressTracker::open(store, Operation::AuctionWinners)?;
            let reference = coordinator
                .finalize(finalize_params(&cfg), &mut tracker)
                .await?;
            println!("{reference}");
            Ok(())
        }
        Commands::Raffle => {
            if cfg.auction.raffle_size == 0 {
                anyhow::bail!("auction.raffle_size must be set to run the raffle");
            }
            let call = coordinator.calls().raffle_call(cfg.auction.raffle_size);
            let reference = coordinator.submit_single(&call).await?;
            println!("{reference}");
            Ok(())
        }
        Commands::SetFutureBadges {
            token_id,
            badge_ids,
        } => {
            let call = coordinator.calls().future_badges_call(token_id, &badge_ids);
            let reference = coordinator.submit_single(&call).await?;
            println!("{reference}");
            Ok(())
        }
        Commands::Setup {
            skip_premint,
            skip_minting,
        } => {
            let options = SetupOptions::from_config(&cfg.mint, skip_premint, skip_minting);
            let report = coordinator.run_setup(&options).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to render setup report")?
            );
            Ok(())
        }
        Commands::UpdateDisplay { field, value } => {
            let call = coordinator.calls().update_display_call(&field, &value)?;
            let reference = coordinator.submit_single(&call).await?;
            println!("{reference}");
            Ok(())
        }
        Commands::Status { .. } => Ok(()),
    }
}

fn progress_store(cfg: &EnvironmentConfig, dry_run: bool) -> Arc<dyn ProgressStore> {
    if dry_run {
        Arc::new(MemoryProgressStore::new())
    } else {
        Arc::new(FileProgressStore::new(cfg.progress.dir.join(&cfg.environment)))
    }
}

fn finalize_params(cfg: &EnvironmentConfig) -> FinalizeParams {
    FinalizeParams {
        clearing_price: cfg.auction.clearing_price,
        discounts: cfg.auction.discounts,
    }
}

async fn run_records(
    coordinator: &RunCoordinator,
    store: Arc<dyn ProgressStore>,
    operation: Operation,
    records: Vec<ledger_batcher::record::Record>,
) -> anyhow::Result<()> {
    let mut tracker = ProgressTracker::open(store, operation)?;
    let report = coordinator.run(operation, records, None, &mut tracker).await?;
    print_report(&report)
}

fn print_report(report: &RunReport) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("Failed to render run report")?
    );
    Ok(())
}

fn print_status(store: Arc<dyn ProgressStore>, operation: Operation) -> anyhow::Result<()> {
    let tracker = ProgressTracker::open(store, operation)?;
    let snapshot = tracker.snapshot();
    println!("operation:         {}", operation);
    println!("batches committed: {}", snapshot.batches.len());
    println!("records committed: {}", snapshot.committed_record_count());
    match snapshot.last_committed() {
        Some(last) => println!("last committed:    #{last}"),
        None => println!("last committed:    none"),
    }
    println!("next sequence:     #{}", tracker.next_sequence());
    if operation.is_phased() {
        match &snapshot.finalized {
            Some(reference) => println!("finalized:         {reference}"),
            None => println!("finalized:         no"),
        }
    }
    if let Some(error) = &snapshot.last_error {
        println!("last error:        {error}");
    }
    if let Some(updated) = &snapshot.updated_at {
        println!("updated at:        {updated}");
    }
    Ok(())
}
