mod api;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::{debug, error, info, warn};

use api::AppState;
use powchain::config::NodeConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let config = NodeConfig::from_env();
    let host = config.host.clone();
    let port = config.port;
    info!(
        "node config: workers={} peers={} strategy={:?}",
        config.chain.mining_workers,
        config.peers.len(),
        config.chain.strategy
    );

    let state = match AppState::new(config) {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            error!("failed to initialize chain: {e}");
            return Err(std::io::Error::other(e.to_string()));
        }
    };

    if state.sync.is_some() && !state.config.sync_interval.is_zero() {
        actix_web::rt::spawn(background_sync(state.clone()));
    }

    println!("⛓️ Starting powchain node at http://{host}:{port}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}

/// Periodically reconcile with peers, every `config.sync_interval`.
async fn background_sync(state: web::Data<AppState>) {
    let Some(sync) = state.sync.as_ref() else {
        return;
    };
    let mut ticker = tokio::time::interval(state.config.sync_interval);
    loop {
        ticker.tick().await;
        match sync.sync(&state.blockchain).await {
            Ok(report) if report.applied > 0 => {
                info!("background sync applied {} block(s)", report.applied)
            }
            Ok(_) => debug!("background sync: nothing to do"),
            Err(e) => warn!("background sync failed: {e}"),
        }
    }
}
