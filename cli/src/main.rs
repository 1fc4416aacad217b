//! Tidepool CLI - Command Line Interface

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tidepool_cli::{
    render_connection, render_pool, render_pool_state, render_validation, ApiClient, HttpPool,
    HttpProvider,
};
use tidepool_core::route::{self, SourceRouter};
use tidepool_core::{Address, ClientConfig, TidepoolResult};
use tidepool_pool::{PoolClient, PoolForm};
use tidepool_state::ValidationStore;
use tidepool_wallet::ConnectionManager;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tidepool")]
#[command(about = "Tidepool - funding pools on a ledger")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to <config dir>/tidepool/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node URL
    #[arg(short, long)]
    node: Option<String>,

    /// Pool program address
    #[arg(long)]
    pool: Option<String>,

    /// Logging level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and show the account
    Status,

    /// Funding pool operations
    Pool {
        #[command(subcommand)]
        action: PoolAction,
    },

    /// Mine blocks on a development ledger
    #[cfg(feature = "dev-tools")]
    Mine {
        /// Number of blocks
        #[arg(short, long, default_value = "1")]
        blocks: u64,
    },

    /// Source browser routes
    Route {
        #[command(subcommand)]
        action: RouteAction,
    },

    /// Client configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PoolAction {
    /// Show the connected account's pool
    Show,

    /// Set the amount disbursed per block
    SetRate {
        amount: String,
    },

    /// Add receivers (comma-separated addresses)
    SetReceivers {
        members: String,
    },

    /// Deposit funds into the pool
    TopUp {
        amount: String,
    },

    /// Remove receivers (comma-separated addresses)
    RemoveReceivers {
        members: String,
    },

    /// Collect funds received from other pools
    Collect,
}

#[derive(Subcommand)]
enum RouteAction {
    /// Extract revision, kind and path from a source location
    Extract {
        location: String,
    },

    /// Check whether a location matches a route pattern
    Match {
        pattern: String,
        location: String,

        /// Also match locations below the pattern
        #[arg(long)]
        loose: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tidepool").join("config.json"))
}

/// Config file overridden by flags
fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => ClientConfig::load_or_default(&path)?,
        None => ClientConfig::default(),
    };

    if let Some(node) = &cli.node {
        config.node_url = node.clone();
    }
    if let Some(pool) = &cli.pool {
        config.pool_address = Address::from_hex(pool)
            .map_err(|e| anyhow::anyhow!("invalid pool address {}: {}", pool, e))?;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn connection_manager(config: &ClientConfig) -> anyhow::Result<Arc<ConnectionManager>> {
    let provider = Arc::new(HttpProvider::from_config(config)?);
    let manager = ConnectionManager::new(provider.clone());
    #[cfg(feature = "dev-tools")]
    let manager = manager.with_dev_control(provider);
    Ok(Arc::new(manager))
}

async fn connect(config: &ClientConfig) -> anyhow::Result<Arc<ConnectionManager>> {
    let connection = connection_manager(config)?;
    let _render = connection
        .state()
        .subscribe(|state| println!("{}", render_connection(state)));
    connection
        .connect()
        .await
        .with_context(|| format!("cannot connect to {}", config.node_url))?;
    Ok(connection)
}

/// Surface the field's messages before failing
fn validated<T>(result: TidepoolResult<T>, store: &ValidationStore) -> anyhow::Result<T> {
    result.map_err(|e| {
        if let Some(line) = render_validation(store.field(), &store.get()) {
            eprintln!("{}", line);
        }
        e.into()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.log_level);

    match cli.command {
        Commands::Status => {
            let connection = connect(&config).await?;
            let api = ApiClient::new(&config.node_url)?;
            let status = api.status().await?;
            println!("Node:    {}", api.base_url());
            println!("Chain:   {}", status.chain_name);
            println!("Head:    #{}", status.head);
            println!("Pending: {}", status.pending);
            connection.disconnect().await?;
        }

        Commands::Pool { action } => {
            let connection = connect(&config).await?;
            handle_pool_command(action, &config, connection.clone()).await?;
            connection.disconnect().await?;
        }

        #[cfg(feature = "dev-tools")]
        Commands::Mine { blocks } => {
            let control = connection_manager(&config)?
                .dev_control()
                .context("development controls unavailable")?;
            let head = control.mine_blocks(blocks).await?;
            println!("Mined {} block(s), head {}", blocks, head);
        }

        Commands::Route { action } => match action {
            RouteAction::Extract { location } => {
                let source = SourceRouter::new(config.default_revision.clone()).extract(&location);
                println!("Revision: {}", source.revision);
                println!("Kind:     {}", source.kind);
                println!("Path:     {}", source.path);
            }
            RouteAction::Match {
                pattern,
                location,
                loose,
            } => {
                let active = route::active(&pattern, &location, loose);
                println!("{}", if active { "match" } else { "no match" });
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", config.to_json()?);
            }
            ConfigAction::Init { force } => {
                let path = cli
                    .config
                    .or_else(default_config_path)
                    .context("no configuration directory on this system")?;
                if path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force)", path.display());
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, ClientConfig::default().to_json()?)?;
                println!("Configuration saved to: {}", path.display());
            }
        },
    }

    Ok(())
}

async fn handle_pool_command(
    action: PoolAction,
    config: &ClientConfig,
    connection: Arc<ConnectionManager>,
) -> anyhow::Result<()> {
    let program = Arc::new(HttpPool::new(
        ApiClient::new(&config.node_url)?,
        config.pool_address,
    ));
    let client = PoolClient::from_config(program, connection, config);
    let form = PoolForm::new();
    let _render = client.subscribe(|state| println!("{}", render_pool_state(state)));

    match action {
        PoolAction::Show => {
            let data = client.refresh().await?;
            println!("{}", render_pool(&data));
        }

        PoolAction::SetRate { amount } => {
            let amount = validated(form.submit_amount(&amount), form.amount())?;
            client.update_amount_per_block(amount).await?;
        }

        PoolAction::SetReceivers { members } => {
            let addresses = validated(form.submit_members(&members), form.members())?;
            if addresses.is_empty() {
                anyhow::bail!("no receivers given");
            }
            client.update_receivers(&addresses).await?;
        }

        PoolAction::TopUp { amount } => {
            let amount = validated(form.submit_amount(&amount), form.amount())?;
            client.top_up(amount).await?;
        }

        PoolAction::RemoveReceivers { members } => {
            let addresses = validated(form.submit_members(&members), form.members())?;
            let settings = client.refresh().await?.settings().without_receivers(&addresses);
            let writes = client.apply_settings(&settings).await?;
            if writes == 0 {
                println!("No matching receivers");
            }
        }

        PoolAction::Collect => {
            client.collect().await?;
        }
    }

    Ok(())
}
