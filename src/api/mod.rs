mod chain;
mod health;
pub mod models;
mod peers;
mod tx;

use actix_web::http::StatusCode;
use actix_web::web::{self, ServiceConfig};
use actix_web::{HttpResponse, ResponseError};

use crate::error::LedgerError;
use crate::network::API_PREFIX;

pub use models::AppState;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope(API_PREFIX)
            .service(health::health_check)
            .service(chain::get_chain)
            .service(chain::mine_block)
            .service(chain::add_block)
            .service(chain::run_consensus)
            .service(tx::new_transaction)
            .service(tx::announce_transaction)
            .service(tx::get_pending)
            .service(peers::register_node)
            .service(peers::register_with)
            .service(peers::keep_alive)
            .service(peers::update_peers)
            .service(peers::get_peers),
    );
}

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::Structural(_)
            | LedgerError::Linkage { .. }
            | LedgerError::Proof { .. }
            | LedgerError::Serialization(_) => StatusCode::BAD_REQUEST,
            LedgerError::Auth(_) | LedgerError::UnknownPeer(_) => StatusCode::UNAUTHORIZED,
            LedgerError::PeerUnreachable { .. } | LedgerError::Rejected { .. } => {
                StatusCode::BAD_GATEWAY
            }
            LedgerError::NothingToMine | LedgerError::Superseded => StatusCode::CONFLICT,
            LedgerError::Worker(_) | LedgerError::Key(_) | LedgerError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}
