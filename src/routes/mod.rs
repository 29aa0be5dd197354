//! HTTP routes

pub mod api;
pub mod dashboard;
pub mod health;
pub mod metrics;

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    middleware,
    routing::get,
    BoxError, Router,
};
use std::time::Duration;
use tower::{
    buffer::BufferLayer,
    limit::RateLimitLayer,
    load_shed::{error::Overloaded, LoadShedLayer},
    ServiceBuilder,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the router with every route mounted under the configured base path.
///
/// `rate` is the request budget per period enforced across all clients.
pub fn router(state: AppState, rate: (u64, Duration)) -> Router {
    let routes = Router::new()
        .route("/", get(dashboard::main_page))
        .route("/workflows", get(dashboard::workflows_page))
        .route("/api/stats", get(api::stats))
        .route("/api/workflows", get(api::workflows))
        .route("/healthz", get(health::healthz))
        .route("/ready", get(health::ready))
        .route("/serverinfo", get(health::server_info))
        .route("/metrics", get(metrics::prometheus_metrics));

    let base = state.config.base_path();
    let app = if base.is_empty() {
        routes
    } else {
        // A nested "/" only matches the bare base path; page links use "{base}/".
        Router::new()
            .route(&format!("{}/", base), get(dashboard::main_page))
            .nest(&base, routes)
    };

    let (count, period) = rate;
    app.layer(middleware::from_fn_with_state(
        state.clone(),
        metrics::track_requests,
    ))
    .with_state(state)
    .layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_middleware_error))
            .layer(BufferLayer::new(1024))
            .layer(LoadShedLayer::new())
            .layer(RateLimitLayer::new(count, period)),
    )
    .layer(TraceLayer::new_for_http())
    .layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

async fn handle_middleware_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<Overloaded>() {
        (StatusCode::TOO_MANY_REQUESTS, "Too many requests".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled internal error: {}", err),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::cache::SnapshotCache;
    use crate::config::Config;
    use crate::fetch::SnapshotSource;

    const SNAPSHOT: &str = r#"{"Result": [{
        "wf1": {"RequestName": "wf1", "Campaign": "C1", "CMSSWVersion": "CMSSW_12",
            "RequestStatus": "running-open", "RequestType": "ReReco", "RequestPriority": 5,
            "AgentJobInfo": {"agent1": {"Workflow": "wf1",
                "Status": {"success": 8, "failure": {"Create": 2}},
                "Sites": {"site1": {"success": 8, "failure": {"Create": 2}}}}}},
        "wf2": {"RequestName": "wf2", "Campaign": "C2", "CMSSWVersion": "CMSSW_13"}
    }]}"#;

    const OPEN: (u64, Duration) = (1000, Duration::from_secs(1));

    /// Router over a snapshot file; the file handle must outlive the router.
    fn app(body: &str, base: &str, rate: (u64, Duration)) -> (Router, tempfile::NamedTempFile) {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), body).unwrap();

        let config = Config {
            access_uri: file.path().to_string_lossy().to_string(),
            base: base.to_string(),
            ..Default::default()
        };
        let source =
            SnapshotSource::new(config.access_uri.clone(), Some("t".into()), None).unwrap();
        let cache = SnapshotCache::new(source, config.renew_interval());
        let state = AppState::new(config, cache).unwrap();
        (router(state, rate), file)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[tokio::test]
    async fn test_healthz() {
        let (app, _file) = app(SNAPSHOT, "", OPEN);
        let (status, body) = get(&app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_api_stats() {
        let (app, _file) = app(SNAPSHOT, "", OPEN);
        let (status, body) = get(&app, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["campaigns"]["C1"]["requests"], 1);
        assert_eq!(json["campaigns"]["C1"]["failure_rate"], 20.0);
        assert_eq!(json["sites"]["site1"]["requests"], 1);
        assert_eq!(json["agents"]["agent1"]["requests"], 1);
        assert_eq!(json["release_workflows"]["CMSSW_13"][0]["workflow"], "wf2");
    }

    #[tokio::test]
    async fn test_api_stats_with_filters() {
        let (app, _file) = app(SNAPSHOT, "", OPEN);
        let (_, body) = get(&app, "/api/stats?filters=campaign%3D%5EC2%24").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        let campaigns = json["campaigns"].as_object().unwrap();
        assert_eq!(campaigns.len(), 1);
        assert!(campaigns.contains_key("C2"));
    }

    #[tokio::test]
    async fn test_dashboard_renders_site_table() {
        let (app, _file) = app(SNAPSHOT, "", OPEN);
        let (status, body) = get(&app, "/?stats=site").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("site-stats"));
        assert!(body.contains("site1"));
    }

    #[tokio::test]
    async fn test_workflows_page() {
        let (app, _file) = app(SNAPSHOT, "", OPEN);
        let (status, body) = get(&app, "/workflows?campaign=C1").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("wf1"));
        assert!(!body.contains("wf2"));

        let (status, body) = get(&app, "/workflows").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Unknown key"));
    }

    #[tokio::test]
    async fn test_api_workflows_not_found() {
        let (app, _file) = app(SNAPSHOT, "", OPEN);
        let (status, _) = get(&app, "/api/workflows?agent=nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(&app, "/api/workflows").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_garbage_snapshot_is_service_unavailable() {
        let (app, _file) = app("<html>maintenance</html>", "", OPEN);
        let (status, body) = get(&app, "/api/stats").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("Aggregation failed"));
    }

    #[tokio::test]
    async fn test_routes_under_base_path() {
        let (app, _file) = app(SNAPSHOT, "/wmstats", OPEN);
        let (status, _) = get(&app, "/wmstats/healthz").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get(&app, "/healthz").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dashboard_under_base_path_with_trailing_slash() {
        let (app, _file) = app(SNAPSHOT, "/wmstats", OPEN);
        let (status, body) = get(&app, "/wmstats/?stats=site").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("site-stats"));
        assert!(body.contains("href=\"/wmstats/?stats=agent\""));

        let (status, _) = get(&app, "/wmstats").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get(&app, "/wmstats/workflows?site=site1").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_counts_requests() {
        let (app, _file) = app(SNAPSHOT, "", OPEN);
        get(&app, "/api/stats").await;
        let (status, body) = get(&app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("wmstats_requests_total 2"));
        assert!(body.contains("wmstats_aggregations_total 1"));
        assert!(body.contains("wmstats_snapshot_refresh_total 1"));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_excess_requests() {
        let (app, _file) = app(SNAPSHOT, "", (1, Duration::from_secs(60)));
        let (status, _) = get(&app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get(&app, "/healthz").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
