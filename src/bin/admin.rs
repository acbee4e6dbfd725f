//! Admin daemon binary

use clap::{Parser, Subcommand};
use shardpilot::{common::AdminConfig, AdminServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardpilot-admin")]
#[command(about = "shardpilot failover coordination daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admin server
    Serve {
        /// Bind address for HTTP
        #[arg(long, default_value = "0.0.0.0:7000")]
        bind: String,

        /// Topology database directory
        #[arg(long, default_value = "./topo-data")]
        db: PathBuf,

        /// Default bound on waiting for reparent outcomes (seconds)
        #[arg(long, default_value = "60")]
        wait_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            db,
            wait_timeout,
        } => {
            // File config first, CLI arguments take priority
            let file_config = shardpilot::common::config::Config::load();
            let mut admin_config = AdminConfig {
                bind_addr: bind.parse()?,
                db_path: db,
                default_wait_timeout_secs: wait_timeout,
            };
            if let Some(file_admin) = file_config.admin {
                if admin_config.bind_addr == "0.0.0.0:7000".parse().unwrap() {
                    admin_config.bind_addr = file_admin.bind_addr;
                }
                if admin_config.db_path.as_path() == std::path::Path::new("./topo-data") {
                    admin_config.db_path = file_admin.db_path;
                }
            }

            let server = AdminServer::new(admin_config);
            server.serve().await?;
        }
    }

    Ok(())
}
