//! Tidepool development ledger binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tidepool_devnet::{DevnetBuilder, DevnetConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tidepool-devnet")]
#[command(about = "Tidepool development ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ledger and serve its API
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// API listen address
        #[arg(long)]
        listen_addr: Option<String>,

        /// Mine a block every N milliseconds
        #[arg(long)]
        block_time_ms: Option<u64>,

        /// Only mine on request
        #[arg(long)]
        no_auto_mine: bool,
    },

    /// Write a development configuration
    Genesis {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Chain name
        #[arg(long, default_value = "Tidepool Devnet")]
        chain_name: String,

        /// Number of funded accounts
        #[arg(long, default_value = "10")]
        accounts: usize,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            listen_addr,
            block_time_ms,
            no_auto_mine,
        } => {
            let config = match config {
                Some(path) => DevnetConfig::load(&path)?,
                None => DevnetConfig::devnet(10),
            };
            init_logging(&config.log_level);

            let mut builder = DevnetBuilder::new().config(config);
            if let Some(addr) = listen_addr {
                builder = builder.listen_addr(&addr);
            }
            if let Some(ms) = block_time_ms {
                builder = builder.block_time_ms(ms);
            }
            if no_auto_mine {
                builder = builder.manual_mining();
            }

            builder.build().start().await?;
        }

        Commands::Genesis {
            output,
            chain_name,
            accounts,
        } => {
            init_logging("info");
            let config = DevnetConfig {
                chain_name,
                ..DevnetConfig::devnet(accounts)
            };

            std::fs::write(&output, config.to_json()?)?;
            info!("Configuration with {} accounts written", accounts);
            println!("Devnet configuration saved to: {}", output.display());
        }
    }

    Ok(())
}
