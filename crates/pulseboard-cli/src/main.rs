mod refresh;

use clap::{Parser, Subcommand};
use pulseboard_core::Platform;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pulseboard-cli")]
#[command(about = "Pulseboard command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Refresh post metrics and snapshots for every tracked handle on a platform.
    Refresh {
        /// Platform to refresh (tiktok, instagram, youtube).
        #[arg(long)]
        platform: String,
        /// Refresh this single handle instead of sweeping the full list.
        #[arg(long)]
        handle: Option<String>,
        /// Position in the sorted handle list to resume from.
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Handles per batch; defaults to the configured batch size.
        #[arg(long)]
        batch: Option<usize>,
    },
    /// List entries in the persisted retry queue.
    Retries {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// List recent refresh runs.
    Runs {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = pulseboard_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = pulseboard_db::PoolConfig::from_app_config(&config);
    let pool = pulseboard_db::connect_pool(&config.database_url, pool_config).await?;
    pulseboard_db::run_migrations(&pool).await?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Refresh {
            platform,
            handle,
            offset,
            batch,
        } => {
            let platform: Platform = platform
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let key_pools = pulseboard_core::keys::load_key_pools(&config.keys_path)?;
            let refresher = pulseboard_ingest::Refresher::new(pool, config, key_pools);
            match handle {
                Some(handle) => refresh::run_refresh_single(&refresher, platform, &handle).await?,
                None => refresh::run_refresh(&refresher, platform, offset, batch).await?,
            }
        }
        Commands::Retries { limit } => refresh::run_list_retries(&pool, limit).await?,
        Commands::Runs { limit } => refresh::run_list_runs(&pool, limit).await?,
    }

    Ok(())
}
