use actix_web::{HttpResponse, Responder, get, post, web};
use log::{error, info};

use super::error_response;
use super::models::{
    AppState, ChainResponse, DifficultyResponse, MineResponse, ValidateResponse,
};

/// Get the full blockchain.
#[get("/chain/")]
pub async fn get_chain(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    let resp = ChainResponse {
        length: bc.len(),
        height: bc.height(),
        difficulty: bc.difficulty(),
        chain: bc.blocks(),
    };
    HttpResponse::Ok().json(resp)
}

/// Validate the whole chain.
#[get("/validate/")]
pub async fn validate_chain(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    let resp = ValidateResponse {
        valid: bc.is_valid_chain(),
        length: bc.len(),
        difficulty: bc.difficulty(),
    };
    HttpResponse::Ok().json(resp)
}

/// Mine a new block from the current mempool. The nonce search runs on
/// the blocking pool with the chain unlocked, so reads and sync keep going;
/// a block accepted meanwhile cancels the search.
#[post("/mine/")]
pub async fn mine_block(state: web::Data<AppState>) -> impl Responder {
    let job = {
        let bc = state.blockchain.lock().expect("mutex poisoned");
        bc.prepare_mining()
    };
    let mut job = match job {
        Ok(job) => job,
        Err(e) => return error_response(&e),
    };

    let searched = web::block(move || job.run().map(|_| job)).await;
    let sealed = match searched {
        Ok(Ok(job)) => job,
        Ok(Err(e)) => return error_response(&e),
        Err(e) => {
            error!("MINER - blocking task failed: {e}");
            return HttpResponse::InternalServerError().body("mining task failed");
        }
    };

    let committed = {
        let mut bc = state.blockchain.lock().expect("mutex poisoned");
        bc.commit_mined(sealed).map(|b| MineResponse {
            mined_index: b.index,
            proof: b.proof.clone(),
            nonce: b.nonce,
            difficulty: b.difficulty,
            transactions: b.transactions.len(),
        })
    };

    match committed {
        Ok(resp) => {
            info!(
                "MINER - sealed block #{} (proof={}, nonce={})",
                resp.mined_index, resp.proof, resp.nonce
            );
            HttpResponse::Ok().json(resp)
        }
        Err(e) => error_response(&e),
    }
}

/// Difficulty the next block must meet.
#[get("/difficulty/")]
pub async fn get_difficulty(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    HttpResponse::Ok().json(DifficultyResponse {
        difficulty: bc.difficulty(),
        strategy: bc.strategy_name(),
    })
}
