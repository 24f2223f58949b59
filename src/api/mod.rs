mod chain;
mod health;
pub mod models;
mod peers;
mod stats;
mod tx;
mod wallet;

use actix_web::HttpResponse;
use actix_web::web::{self, ServiceConfig};
use log::warn;

use powchain::ChainError;

pub use models::AppState;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(chain::get_chain)
            .service(chain::validate_chain)
            .service(chain::mine_block)
            .service(chain::get_difficulty)
            .service(tx::post_transaction)
            .service(tx::get_mempool)
            .service(stats::get_stats)
            .service(wallet::create_wallet)
            .service(peers::get_height)
            .service(peers::get_block)
            .service(peers::post_sync),
    );
}

/// Map a chain error onto an HTTP status with the message as body.
pub(crate) fn error_response(err: &ChainError) -> HttpResponse {
    warn!("request failed: {err}");
    let mut resp = match err {
        ChainError::MalformedInput(_)
        | ChainError::Signature(_)
        | ChainError::InvalidTransaction(_)
        | ChainError::Serialization(_) => HttpResponse::BadRequest(),
        ChainError::OutputNotFound { .. } => HttpResponse::NotFound(),
        ChainError::ChainLinkage { .. }
        | ChainError::InvalidBlock { .. }
        | ChainError::ConsensusDivergence(_) => HttpResponse::Conflict(),
        ChainError::Peer(_) => HttpResponse::BadGateway(),
        ChainError::MiningCancelled(_) => HttpResponse::ServiceUnavailable(),
        ChainError::NotReady(_) | ChainError::NonceSpaceExhausted { .. } => {
            HttpResponse::InternalServerError()
        }
    };
    resp.body(err.to_string())
}
