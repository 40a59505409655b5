use actix_web::{HttpResponse, Responder, get, post, web};
use log::{info, warn};

use super::models::{AppState, PeersResponse, RegisterWithRequest};
use crate::error::LedgerError;
use crate::message::{Introduction, KeepAlive, PeerUpdate, SignedEnvelope};

/// First contact from a node joining through us.
#[post("/register_node")]
pub async fn register_node(
    state: web::Data<AppState>,
    body: web::Json<Introduction>,
) -> Result<HttpResponse, LedgerError> {
    let intro = body.into_inner();
    let newcomer = intro.msg.node_address.clone();
    let reply = state.node.introduce(intro).await?;
    info!("POST /register_node - {newcomer} registered");
    Ok(HttpResponse::Ok().json(reply))
}

/// Ask this node to join the network through `node_address`.
#[post("/register_with")]
pub async fn register_with(
    state: web::Data<AppState>,
    body: web::Json<RegisterWithRequest>,
) -> Result<HttpResponse, LedgerError> {
    let remote = body.into_inner().node_address;
    if remote.trim().is_empty() {
        return Err(LedgerError::Structural("node_address required".into()));
    }
    if let Err(e) = state.node.register_with(&remote).await {
        warn!("POST /register_with - {remote}: {e}");
        return Err(e);
    }
    Ok(HttpResponse::Ok().body("Registration successful"))
}

#[post("/keep_alive")]
pub async fn keep_alive(
    state: web::Data<AppState>,
    body: web::Json<SignedEnvelope<KeepAlive>>,
) -> Result<HttpResponse, LedgerError> {
    state.node.receive_keep_alive(&body)?;
    Ok(HttpResponse::Ok().body("Keep alive received"))
}

#[post("/update_peers")]
pub async fn update_peers(
    state: web::Data<AppState>,
    body: web::Json<SignedEnvelope<PeerUpdate>>,
) -> Result<HttpResponse, LedgerError> {
    let added = state.node.update_peers(&body)?;
    Ok(HttpResponse::Ok().body(format!("Peers updated ({added} new)")))
}

#[get("/peers")]
pub async fn get_peers(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(PeersResponse {
        peers: state.node.peers(),
    })
}
