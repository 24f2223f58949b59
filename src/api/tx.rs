use actix_web::{HttpResponse, Responder, get, post, web};
use log::{debug, info};
use std::time::Instant;

use super::error_response;
use super::models::{AppState, MempoolResponse, NewTxResponse};
use powchain::transaction::Transaction;

/// Submit a signed transaction into the mempool (validated against the chain).
#[post("/tx/")]
pub async fn post_transaction(
    state: web::Data<AppState>,
    body: web::Json<Transaction>,
) -> impl Responder {
    let t0 = Instant::now();
    let tx = body.into_inner();
    debug!(
        "POST /tx/ - received: inputs={}, outputs={}",
        tx.inputs.len(),
        tx.outputs.len()
    );

    let result = {
        let mut bc = state.blockchain.lock().expect("mutex poisoned");
        bc.submit_transaction(tx)
    };

    match result {
        Ok(tx_hash) => {
            info!(
                "POST /tx/ - tx={} OK ({} ms)",
                tx_hash,
                t0.elapsed().as_millis()
            );
            HttpResponse::Ok().json(NewTxResponse { tx_hash })
        }
        Err(e) => error_response(&e),
    }
}

/// List current mempool (just tx hashes to keep it compact).
#[get("/mempool/")]
pub async fn get_mempool(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    let mempool = bc.mempool();
    match mempool.iter().map(|t| t.id()).collect::<powchain::Result<Vec<_>>>() {
        Ok(transactions) => HttpResponse::Ok().json(MempoolResponse {
            size: mempool.len(),
            transactions,
        }),
        Err(e) => error_response(&e),
    }
}
