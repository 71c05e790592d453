//! Wallet coordination service CLI
//!
//! Runs the REST + WebSocket service with its background tasks, or
//! generates copayer key material.

use clap::{Parser, Subcommand};
use quorum_wallet::api::{create_router, ApiState};
use quorum_wallet::crypto::KeyPair;
use quorum_wallet::derivation::AddressDeriver;
use quorum_wallet::dispatch::{EventBus, NotificationSink, SubscriptionDispatcher};
use quorum_wallet::ledger::{LedgerGateway, LoopbackLedger};
use quorum_wallet::quorum::{CoordinatorConfig, QuorumCoordinator};
use quorum_wallet::registry::CopayerRegistry;
use quorum_wallet::store::{MemoryStore, SnapshotConfig, Snapshotter, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "walletd")]
#[command(version = "0.1.0")]
#[command(about = "Multi-signature wallet coordination service", long_about = None)]
struct Cli {
    /// Data directory for store snapshots
    #[arg(short, long, default_value = ".wallet_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination service
    Serve {
        /// Bind address
        #[arg(short, long, default_value = "127.0.0.1:3380")]
        bind: String,

        /// Proposal TTL in hours
        #[arg(long, default_value = "24")]
        proposal_ttl_hours: i64,

        /// Expiry sweep interval in seconds
        #[arg(long, default_value = "60")]
        sweep_interval_secs: u64,

        /// Store snapshot interval in seconds
        #[arg(long, default_value = "30")]
        snapshot_interval_secs: u64,
    },

    /// Generate a copayer key bundle
    Keygen,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            proposal_ttl_hours,
            sweep_interval_secs,
            snapshot_interval_secs,
        } => {
            serve(
                cli.data_dir,
                bind,
                proposal_ttl_hours,
                sweep_interval_secs,
                snapshot_interval_secs,
            )
            .await
        }
        Commands::Keygen => {
            keygen();
            Ok(())
        }
    }
}

async fn serve(
    data_dir: PathBuf,
    bind: String,
    proposal_ttl_hours: i64,
    sweep_interval_secs: u64,
    snapshot_interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshotter = Snapshotter::new(SnapshotConfig {
        data_dir,
        ..Default::default()
    })?;

    let store: Arc<MemoryStore> = if snapshotter.exists() {
        log::info!("loading store snapshot");
        Arc::new(snapshotter.load()?)
    } else {
        log::info!("starting with an empty store");
        Arc::new(MemoryStore::new())
    };
    let store_dyn: Arc<dyn Store> = Arc::clone(&store) as Arc<dyn Store>;

    let bus = Arc::new(EventBus::new());
    let ledger: Arc<dyn LedgerGateway> = Arc::new(LoopbackLedger);
    let config = CoordinatorConfig {
        proposal_ttl: chrono::Duration::hours(proposal_ttl_hours),
        ..Default::default()
    };

    let registry = Arc::new(CopayerRegistry::new(Arc::clone(&store_dyn)));
    let coordinator = Arc::new(QuorumCoordinator::new(
        Arc::clone(&store_dyn),
        ledger,
        Arc::clone(&bus) as Arc<dyn NotificationSink>,
        config,
    ));
    let deriver = Arc::new(AddressDeriver::new(Arc::clone(&store_dyn)));
    let dispatcher = Arc::new(SubscriptionDispatcher::new(
        Arc::clone(&store_dyn),
        Arc::clone(&bus) as Arc<dyn NotificationSink>,
    ));

    // Background expiry sweep; uses the same atomic transitions as act()
    {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval_secs));
            loop {
                ticker.tick().await;
                match coordinator.sweep_expired() {
                    Ok(0) => {}
                    Ok(n) => log::info!("expired {} proposal(s)", n),
                    Err(e) => log::error!("expiry sweep failed: {}", e),
                }
            }
        });
    }

    // Periodic store snapshots
    {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(snapshot_interval_secs));
            // The first tick fires immediately; nothing to save yet
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = snapshotter.save(&store) {
                    log::error!("store snapshot failed: {}", e);
                }
            }
        });
    }

    let state = ApiState {
        registry,
        coordinator,
        deriver,
        dispatcher,
        store: store_dyn,
        bus,
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    log::info!("wallet service listening on {}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

fn keygen() {
    let key = KeyPair::generate();
    println!("private key:     {}", key.private_key_hex());
    println!("request pub key: {}", key.public_key_hex());
}
