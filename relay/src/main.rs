use anyhow::Context;
use clap::{Parser, Subcommand};
use relay::logging::init_logging;
use relay::{DedupStore, PublisherConfig, RelayConfig, RelayError, RelayPipeline};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "relay", about = "Polls content sources and republishes new items")]
struct Cli {
    /// Dedup state file (overrides RELAY_DEDUP_PATH)
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Log payloads instead of publishing; the state file is left untouched
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll and publish until interrupted
    Run,
    /// Poll every source once, publish what was found, then exit
    Once,
    /// Inspect or edit the dedup state
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print every handled key
    List,
    /// Forget a key so it can be published again
    Forget { key: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            std::process::exit(2);
        }
    };
    if let Some(path) = cli.state_file {
        config.dedup_path = path;
    }
    if cli.dry_run {
        config.publisher = PublisherConfig::DryRun;
    }

    let _guard = match init_logging(config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = execute(cli.command, config).await {
        error!("Relay failed: {:#}", e);
        // Bad configuration or corrupt state: nothing was published
        let fatal = e.downcast_ref::<RelayError>().map_or(false, RelayError::is_fatal);
        std::process::exit(if fatal { 2 } else { 1 });
    }
}

async fn execute(command: Command, config: RelayConfig) -> anyhow::Result<()> {
    match command {
        Command::Run => {
            let pipeline = RelayPipeline::from_config(config).context("building pipeline")?;
            if pipeline.source_count() == 0 {
                anyhow::bail!("no sources configured");
            }
            let running = pipeline.start();

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("Interrupt received");
            running.shutdown().await?;
        }
        Command::Once => {
            let pipeline = RelayPipeline::from_config(config).context("building pipeline")?;
            let stats = pipeline.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::State { action } => {
            let store = DedupStore::open_file(config.dedup_path.clone())
                .with_context(|| format!("opening {}", config.dedup_path.display()))?;
            match action {
                StateAction::List => {
                    for key in store.keys().await {
                        println!("{}", key);
                    }
                }
                StateAction::Forget { key } => {
                    if store.unmark(&key).await? {
                        println!("Forgot {}", key);
                    } else {
                        println!("{} was not recorded", key);
                    }
                }
            }
        }
    }
    Ok(())
}
