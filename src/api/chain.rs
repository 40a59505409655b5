use actix_web::{HttpResponse, Responder, get, post, web};
use log::{info, warn};

use super::models::{AppState, ConsensusResponse, MineResponse};
use crate::blockchain::Block;
use crate::error::LedgerError;

/// Get the full blockchain.
#[get("/chain")]
pub async fn get_chain(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.node.chain_snapshot())
}

/// Seal the pending transactions into a new block.
#[post("/mine")]
pub async fn mine_block(state: web::Data<AppState>) -> Result<HttpResponse, LedgerError> {
    match state.node.mine().await {
        Ok(id) => Ok(HttpResponse::Ok().json(MineResponse {
            mined_id: Some(id),
            message: format!("Block #{id} is mined."),
        })),
        Err(LedgerError::NothingToMine) => Ok(HttpResponse::Ok().json(MineResponse {
            mined_id: None,
            message: "No transactions to mine".into(),
        })),
        Err(e) => Err(e),
    }
}

/// Block announced by a peer.
#[post("/add_block")]
pub async fn add_block(
    state: web::Data<AppState>,
    body: web::Json<Block>,
) -> Result<HttpResponse, LedgerError> {
    let block = body.into_inner();
    let id = block.id;
    if let Err(e) = state.node.add_block(block) {
        warn!("POST /add_block - block #{id} discarded: {e}");
        return Err(e);
    }
    Ok(HttpResponse::Created().body("Block added to the chain"))
}

/// Run the longest-chain procedure against all known peers.
#[post("/consensus")]
pub async fn run_consensus(state: web::Data<AppState>) -> impl Responder {
    let replaced = state.node.consensus().await;
    let length = state.node.chain_snapshot().length;
    if replaced {
        info!("POST /consensus - chain replaced (length {length})");
    }
    HttpResponse::Ok().json(ConsensusResponse { replaced, length })
}
