use actix_web::{HttpResponse, Responder, get, web};
use serde_json::json;

use super::AppState;

#[get("/health")]
pub async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let node = &data.node;
    HttpResponse::Ok().json(json!({
        "status": "up",
        "node_address": node.address(),
        "height": node.chain_snapshot().length,
        "peers": node.peers().len(),
    }))
}
