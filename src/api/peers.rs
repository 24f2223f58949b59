use actix_web::{HttpResponse, Responder, get, post, web};

use super::error_response;
use super::models::{AppState, SyncResponse};
use powchain::consensus::HeightResponse;

/// Height of the newest block; polled by syncing peers.
#[get("/height/")]
pub async fn get_height(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    HttpResponse::Ok().json(HeightResponse {
        height: bc.height(),
    })
}

#[get("/blocks/{height}/")]
pub async fn get_block(state: web::Data<AppState>, path: web::Path<u64>) -> impl Responder {
    let height = path.into_inner();
    let bc = state.blockchain.lock().expect("mutex poisoned");
    match bc.block_at(height) {
        Some(block) => HttpResponse::Ok().json(block),
        None => HttpResponse::NotFound().body(format!("no block at height {height}")),
    }
}

/// Pull missing blocks from the configured peers now.
#[post("/sync/")]
pub async fn post_sync(state: web::Data<AppState>) -> impl Responder {
    let Some(sync) = state.sync.as_ref() else {
        return HttpResponse::BadRequest().body("no peers configured");
    };
    match sync.sync(&state.blockchain).await {
        Ok(report) => HttpResponse::Ok().json(SyncResponse {
            local_height: report.local_height,
            network_height: report.network_height,
            applied: report.applied,
        }),
        Err(e) => error_response(&e),
    }
}
