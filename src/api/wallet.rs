use actix_web::{HttpResponse, Responder, post};
use serde::Serialize;

use powchain::wallet::KeyPair;

#[derive(Serialize)]
struct NewWalletResponse {
    private_key: Option<String>,
    public_key: String,
    address: String,
}

/// Dev helper: mint a fresh key pair. Nothing is stored server-side.
#[post("/wallet/new/")]
pub async fn create_wallet() -> impl Responder {
    let kp = KeyPair::generate();
    HttpResponse::Ok().json(NewWalletResponse {
        private_key: kp.secret_hex(),
        public_key: kp.public_hex(),
        address: kp.address(),
    })
}
