use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, StatsResponse};

/// Blocks averaged for `avg_interval_secs`.
const STATS_WINDOW: usize = 10;

#[get("/stats/")]
pub async fn get_stats(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    let blocks = bc.blocks();

    let intervals: Vec<f64> = blocks
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).max(0) as f64 / 1000.0)
        .collect();
    let recent = &intervals[intervals.len().saturating_sub(STATS_WINDOW)..];
    let avg_interval_secs =
        (!recent.is_empty()).then(|| recent.iter().sum::<f64>() / recent.len() as f64);

    let params = bc.params();
    HttpResponse::Ok().json(StatsResponse {
        height: bc.height(),
        length: bc.len(),
        difficulty: bc.difficulty(),
        strategy: bc.strategy_name(),
        target_block_time_secs: params.ema.target_interval_secs,
        adjustment_interval: params.ema.adjustment_interval,
        last_interval_secs: intervals.last().copied(),
        avg_interval_secs,
        mempool_size: bc.mempool().len(),
        mining_workers: params.mining_workers,
        peers: state.config.peers.len(),
        active_peers: state.sync.as_ref().map_or(0, |s| s.peers().len()),
        peer_timeout_ms: state.config.peer_timeout.as_millis() as u64,
        sync_interval_secs: state.config.sync_interval.as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};
    use powchain::config::NodeConfig;
    use std::time::Duration;

    #[actix_web::test]
    async fn stats_report_node_settings() {
        let config = NodeConfig {
            peers: vec!["http://127.0.0.1:9".into()],
            peer_timeout: Duration::from_millis(250),
            sync_interval: Duration::from_secs(7),
            ..NodeConfig::default()
        };
        let state = web::Data::new(AppState::new(config).unwrap());
        let app = test::init_service(App::new().app_data(state).service(get_stats)).await;

        let req = test::TestRequest::get().uri("/stats/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["height"], 0);
        assert_eq!(body["peers"], 1);
        assert_eq!(body["active_peers"], 1);
        assert_eq!(body["peer_timeout_ms"], 250);
        assert_eq!(body["sync_interval_secs"], 7);
    }
}
