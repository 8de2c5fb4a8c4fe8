//! quill-daemon: the Quill ledger and revenue daemon.
//!
//! Single OS process running a Tokio async runtime. Clients talk to the
//! daemon with JSON-RPC over a Unix socket; a scheduler runs subscription
//! pool distribution and reconciliation in the background.

mod commands;
mod config;
mod rpc;
mod scheduler;

use std::sync::Arc;

use quill_access::{AccessGate, DbContentDirectory, DbSubscriptions};
use quill_db::Db;
use quill_exchange::{CurrencyConverter, DbRateFeed};
use quill_ledger::Ledger;
use quill_licensing::LicensingEngine;
use quill_payout::PayoutProcessor;
use quill_revenue::{PurchaseEngagement, RevenueEngine};
use quill_types::{Clock, SystemClock};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;
use crate::scheduler::SingleFlight;

/// Daemon-wide shared state.
pub struct DaemonState {
    pub config: DaemonConfig,
    pub clock: Arc<dyn Clock>,
    pub ledger: Ledger,
    pub rates: DbRateFeed,
    pub converter: Arc<CurrencyConverter>,
    pub revenue: RevenueEngine,
    pub payouts: PayoutProcessor,
    pub access: AccessGate,
    pub subscriptions: DbSubscriptions,
    pub directory: DbContentDirectory,
    pub licensing: LicensingEngine,
    /// Guards subscription pool runs started by the scheduler or by RPC.
    pub pool_job: SingleFlight,
}

impl DaemonState {
    /// Wire every component onto one database handle.
    pub fn new(config: DaemonConfig, db: Db, clock: Arc<dyn Clock>) -> Self {
        let rates = DbRateFeed::new(db.clone());
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(rates.clone()),
            clock.clone(),
            config.exchange.clone(),
        ));
        let ledger = Ledger::new(db.clone(), clock.clone());
        let revenue = RevenueEngine::new(
            db.clone(),
            clock.clone(),
            converter.clone(),
            config.revenue.splits.clone(),
            Arc::new(PurchaseEngagement::new(db.clone())),
        );
        let payouts = PayoutProcessor::new(
            db.clone(),
            ledger.clone(),
            clock.clone(),
            config.payout.clone(),
        );
        let subscriptions = DbSubscriptions::new(db.clone(), clock.clone());
        let directory = DbContentDirectory::new(db.clone(), clock.clone());
        let access = AccessGate::new(
            ledger.clone(),
            revenue.clone(),
            config.pricing.clone(),
            Arc::new(subscriptions.clone()),
            Arc::new(directory.clone()),
            clock.clone(),
        );
        let licensing = LicensingEngine::new(
            db,
            clock.clone(),
            converter.clone(),
            revenue.clone(),
            payouts.clone(),
            config.licensing.clone(),
        );

        Self {
            config,
            clock,
            ledger,
            rates,
            converter,
            revenue,
            payouts,
            access,
            subscriptions,
            directory,
            licensing,
            pool_job: SingleFlight::new(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config; a bad split table or pricing policy aborts startup
    let config = DaemonConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Quill daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db = Db::open(&data_dir.join("quill.db"))?;

    // 3. Build state
    let socket_path = config.socket_path();
    let scheduler_enabled = config.scheduler.enabled;
    let state = Arc::new(DaemonState::new(config, db, Arc::new(SystemClock)));
    let (shutdown_tx, _) = broadcast::channel(1);

    // 4. Start scheduler
    let scheduler = if scheduler_enabled {
        Some(tokio::spawn(scheduler::run(state.clone(), shutdown_tx.subscribe())))
    } else {
        info!("scheduler disabled");
        None
    };

    // 5. Run the RPC server until shutdown
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "RPC server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    let _ = shutdown_tx.send(());
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
