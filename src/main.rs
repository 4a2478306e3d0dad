mod billing_log;
mod chain;
mod config;
mod error;
mod keeper;
mod plans;
mod server;
mod storage;
mod subscriptions;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::chain::{ChainClient, EthChainGateway};
use crate::keeper::Keeper;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Settings::load()?;
    let signer_key = std::env::var("KEEPER_SIGNER_KEY")
        .map_err(|_| "KEEPER_SIGNER_KEY is not set; the keeper cannot sign charges")?;

    let ledger = storage::Ledger::open(&config.ledger.database_path).await?;
    let gateway = Arc::new(EthChainGateway::connect(&config.chain, &signer_key)?);
    let chain_client: Arc<dyn ChainClient + Send + Sync> = gateway.clone();

    let verifier = Arc::new(chain::verifier::TransactionVerifier::new(
        chain_client.clone(),
        gateway.contract_address(),
    ));
    let keeper = Arc::new(Keeper::new(
        Arc::new(ledger.clone()),
        Arc::new(ledger.clone()),
        chain_client,
    ));

    let _keeper_loop = keeper::scheduler::spawn(
        keeper.clone(),
        Duration::from_secs(config.keeper.tick_interval_secs),
    );
    tracing::info!("Keeper sweep scheduled every {}s", config.keeper.tick_interval_secs);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = server::create_app(AppState {
        subscriptions: Arc::new(ledger.clone()),
        billing_log: Arc::new(ledger.clone()),
        plans: Arc::new(ledger),
        verifier,
        keeper,
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Billing service running on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
