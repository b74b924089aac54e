// Coinflip Reconciler - Main Entry Point
// Runs the sweep scheduler against the configured chain and relay

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use coinflip_reconciler::mock::{InMemoryFundLocks, InMemoryLedger, LogNotifier, MockChain, MockRelay};
use coinflip_reconciler::rpc::{ChainQuery, HttpRelayClient, LcdChainClient};
use coinflip_reconciler::{
    Collaborators, Reconciler, ReconcilerConfig, ReconcilerError, SledPendingSecretStore,
    SweepScheduler, TxRelay,
};

const LEDGER_SNAPSHOT_PATH: &str = "data/ledger.json";

#[tokio::main]
async fn main() -> Result<(), ReconcilerError> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,coinflip_reconciler=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    println!("\n═══════════════════════════════════════════════");
    println!("     🪙 Coinflip Wager Reconciler");
    println!("═══════════════════════════════════════════════\n");

    let mut config = ReconcilerConfig::from_env();
    config
        .poll
        .validate()
        .map_err(|e| ReconcilerError::Config(e.to_string()))?;

    if let Some(dir) = std::path::Path::new(&config.secrets_db_path).parent() {
        std::fs::create_dir_all(dir).map_err(|e| ReconcilerError::Config(e.to_string()))?;
    }
    let secrets = Arc::new(SledPendingSecretStore::open(&config.secrets_db_path)?);
    info!(path = %config.secrets_db_path, pending = secrets.len(), "🔐 pending-secret store opened");

    // ===== CHAIN & RELAY =====
    let (chain, mock_chain): (Arc<dyn ChainQuery>, Option<Arc<MockChain>>) = match &config.chain_rest_url {
        Some(url) => {
            info!(url = %url, contract = %config.contract_address, "📡 using LCD chain client");
            (Arc::new(LcdChainClient::new(url, &config.contract_address)) as Arc<dyn ChainQuery>, None)
        }
        None => {
            info!("🧪 standalone mode: in-memory chain");
            let chain = Arc::new(MockChain::new());
            (chain.clone() as Arc<dyn ChainQuery>, Some(chain))
        }
    };
    let relay: Arc<dyn TxRelay> = match &config.relay_url {
        Some(relay_url) => Arc::new(HttpRelayClient::new(relay_url)),
        None if config.is_mock_chain() => Arc::new(MockRelay::new(mock_chain)),
        None => {
            // Nothing to broadcast to: the relay reports not ready and every
            // reveal, claim and cancel waits for a configured one
            warn!("RELAY_URL unset with a real chain; relayed actions are disabled");
            Arc::new(MockRelay::new(None))
        }
    };

    match chain.query_config().await {
        Ok(contract) => {
            info!(
                reveal_timeout_secs = contract.reveal_timeout_secs,
                bet_ttl_secs = contract.bet_ttl_secs,
                "⚙️ contract config applied"
            );
            config.apply_contract_config(contract.reveal_timeout_secs, contract.bet_ttl_secs);
        }
        Err(e) => warn!(error = %e, "contract config unavailable, keeping configured timings"),
    }

    // ===== LEDGER & FUNDS =====
    let funds = Arc::new(InMemoryFundLocks::new());
    let ledger = Arc::new(InMemoryLedger::with_funds(funds.clone()));

    let reconciler = Reconciler::new(
        Collaborators {
            chain,
            relay,
            ledger: ledger.clone(),
            funds,
            notifier: Arc::new(LogNotifier),
            secrets: secrets.clone(),
        },
        config,
    );

    println!("\n╔════════════════════════════════════════════╗");
    println!("║   🚀 RECONCILER RUNNING                    ║");
    println!("║   🔁 sweep every {:>4}s                     ║", reconciler.config().sweep_interval.as_secs());
    println!("╚════════════════════════════════════════════╝\n");

    // ===== SCHEDULER & SHUTDOWN =====
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(SweepScheduler::new(reconciler.clone()).run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    println!("\n\n🛑 Shutdown signal received...");
    shutdown_tx.send_replace(true);
    if let Err(e) = scheduler.await {
        error!(error = %e, "scheduler task ended abnormally");
    }

    println!("💾 Saving state to disk...");
    if let Err(e) = secrets.flush() {
        error!(error = %e, "❌ failed to flush pending secrets");
    }
    if let Some(dir) = std::path::Path::new(LEDGER_SNAPSHOT_PATH).parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    match serde_json::to_string_pretty(&ledger.snapshot()) {
        Ok(json) => match std::fs::write(LEDGER_SNAPSHOT_PATH, json) {
            Ok(()) => println!("✅ Ledger snapshot written to {}", LEDGER_SNAPSHOT_PATH),
            Err(e) => error!(error = %e, "❌ failed to write ledger snapshot"),
        },
        Err(e) => error!(error = %e, "❌ failed to encode ledger snapshot"),
    }

    println!("👋 Goodbye!\n");
    Ok(())
}
