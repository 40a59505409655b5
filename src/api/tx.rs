use actix_web::{HttpResponse, Responder, get, post, web};
use log::{debug, info};

use super::models::{AppState, PendingResponse};
use crate::error::LedgerError;
use crate::transaction::{NewTransaction, Transaction};

/// Submit a new transaction; it is queued and gossiped to every peer.
#[post("/new_transaction")]
pub async fn new_transaction(
    state: web::Data<AppState>,
    body: web::Json<NewTransaction>,
) -> Result<HttpResponse, LedgerError> {
    let tx = state.node.submit_transaction(body.into_inner()).await?;
    info!("POST /new_transaction - tx {} accepted", tx.hash);
    Ok(HttpResponse::Created().json(tx))
}

/// Transaction gossiped by a peer. Same body as a submission; time and hash
/// are stamped when the sender left them out.
#[post("/announce_transaction")]
pub async fn announce_transaction(
    state: web::Data<AppState>,
    body: web::Json<NewTransaction>,
) -> Result<HttpResponse, LedgerError> {
    let tx = Transaction::from_request(body.into_inner())?;
    let fresh = state.node.announce_transaction(tx)?;
    debug!("POST /announce_transaction - fresh={fresh}");
    Ok(HttpResponse::Created().body("Success"))
}

/// List transactions waiting to be mined.
#[get("/pending_transactions")]
pub async fn get_pending(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(PendingResponse {
        unconfirmed_transactions: state.node.pending(),
    })
}
