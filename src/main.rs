use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::{debug, info, warn};

use peer_ledger::api::{self, AppState};
use peer_ledger::config::NodeConfig;
use peer_ledger::network::HttpPeerClient;
use peer_ledger::{LedgerError, Node};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let config = NodeConfig::from_env().map_err(std::io::Error::other)?;
    let client = HttpPeerClient::new(config.peer_request_timeout).map_err(std::io::Error::other)?;
    let node = Arc::new(Node::new(&config, Arc::new(client)).map_err(std::io::Error::other)?);

    println!(
        "⛓️ Starting ledger node at {} (difficulty {})",
        node.address(),
        config.difficulty
    );

    spawn_keep_alive(node.clone(), config.keep_alive_interval);
    spawn_miner(node.clone(), config.mine_interval);

    let state = web::Data::new(AppState::new(node));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

/// Liveness tick plus keep-alive broadcast on a fixed period.
fn spawn_keep_alive(node: Arc<Node>, period: Duration) {
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match node.send_keep_alive().await {
                Ok(evicted) if !evicted.is_empty() => info!("evicted peers: {evicted:?}"),
                Ok(_) => debug!("keep-alive sent"),
                Err(e) => warn!("keep-alive failed: {e}"),
            }
        }
    });
}

/// Periodic mining attempt.
fn spawn_miner(node: Arc<Node>, period: Duration) {
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match node.mine().await {
                Ok(id) => info!("scheduled mining sealed block #{id}"),
                Err(LedgerError::NothingToMine) => debug!("scheduled mining: pool empty"),
                Err(e) => warn!("scheduled mining failed: {e}"),
            }
        }
    });
}
