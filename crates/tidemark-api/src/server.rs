//! HTTP server implementation using axum.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use tidemark_core::TradeSignal;
use tidemark_engine::Reporter;
use tidemark_router::SignalRouter;
use tidemark_store::HistoryQuery;

use crate::config::ApiConfig;

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }

    fn fail(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            message: message.into(),
            data: None,
        })
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<SignalRouter>,
    pub reporter: Arc<Reporter>,
    pub config: ApiConfig,
}

/// Create the axum router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/trigger", post(trigger))
        .route("/api/close_all", post(close_all))
        .route("/api/status", get(status))
        .route("/api/position_history", get(position_history))
        .route("/api/daily_pnl", get(daily_pnl))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the token is cancelled.
pub async fn serve(state: ApiState, cancel: CancellationToken) -> std::io::Result<()> {
    let addr = state.config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

fn check_bearer_auth(headers: &HeaderMap, config: &ApiConfig) -> bool {
    let Some(expected) = &config.auth_token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
}

/// POST /api/trigger — body is a canonical trade signal.
async fn trigger(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(signal): Json<TradeSignal>,
) -> Response {
    if !check_bearer_auth(&headers, &state.config) {
        return unauthorized();
    }
    let result = state.router.dispatch(signal).await;
    let envelope = ApiResponse {
        success: result.success,
        message: result.message.clone(),
        data: Some(result.outcomes),
    };
    Json(envelope).into_response()
}

/// POST /api/close_all — close every open position.
async fn close_all(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if !check_bearer_auth(&headers, &state.config) {
        return unauthorized();
    }
    let result = state.router.close_all().await;
    let envelope = ApiResponse {
        success: result.success,
        message: result.message.clone(),
        data: Some(result.outcomes),
    };
    Json(envelope).into_response()
}

/// GET /api/status — open positions with live PnL.
async fn status(State(state): State<ApiState>) -> Response {
    let report = state.reporter.status();
    ApiResponse::ok(format!("{} open position(s)", report.positions.len()), report)
        .into_response()
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    symbol: Option<String>,
    limit: Option<u32>,
}

/// GET /api/position_history?start_date&end_date&symbol&limit
async fn position_history(
    State(state): State<ApiState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let today = Utc::now().date_naive();
    let start_date = params
        .start_date
        .unwrap_or_else(|| today - chrono::Duration::days(30));
    let end_date = params.end_date.unwrap_or(today);

    let query = HistoryQuery {
        symbol: params.symbol,
        start: NaiveDateTime::new(start_date, NaiveTime::MIN).and_utc(),
        // Inclusive end date: cover the whole final day.
        end: NaiveDateTime::new(end_date, NaiveTime::MIN).and_utc() + chrono::Duration::days(1),
        limit: params.limit.unwrap_or(100).min(1000),
    };

    match state.reporter.history(&query).await {
        Ok(positions) => {
            ApiResponse::ok(format!("{} closed position(s)", positions.len()), positions)
                .into_response()
        }
        Err(err) => ApiResponse::<Vec<()>>::fail(err.to_string()).into_response(),
    }
}

/// GET /api/daily_pnl — today's realized PnL, win rate, closed count.
async fn daily_pnl(State(state): State<ApiState>) -> Response {
    match state.reporter.daily_pnl().await {
        Ok(report) => ApiResponse::ok("ok", report).into_response(),
        Err(err) => ApiResponse::<()>::fail(err.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tidemark_core::{ContractSpec, Price};
    use tidemark_engine::{ManagerConfig, PositionManager};
    use tidemark_exchange::PaperExchange;
    use tidemark_feed::PriceCache;
    use tidemark_router::RouterConfig;
    use tidemark_store::PositionStore;
    use tower::util::ServiceExt;

    async fn test_state(auth_token: Option<String>) -> (tempfile::TempDir, ApiState) {
        let paper = Arc::new(PaperExchange::new().with_instrument(
            ContractSpec {
                symbol: "BTC-USDT-SWAP".to_string(),
                contract_size: dec!(0.01),
                price_precision: 1,
                size_precision: 0,
                min_size: dec!(1),
            },
            Price::new(dec!(50000)),
        ));
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            PositionStore::open(&dir.path().join("positions.db"))
                .await
                .unwrap(),
        );
        let cache = Arc::new(PriceCache::new(Duration::from_secs(30)));
        let manager = PositionManager::new(
            paper,
            store.clone(),
            cache.clone(),
            ManagerConfig::default(),
        );
        let router = Arc::new(SignalRouter::new(
            manager.clone(),
            store.clone(),
            RouterConfig::default(),
        ));
        let reporter = Arc::new(Reporter::new(manager, store, cache));
        let state = ApiState {
            router,
            reporter,
            config: ApiConfig {
                listen_addr: "127.0.0.1:0".to_string(),
                auth_token,
            },
        };
        (dir, state)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_returns_envelope() {
        let (_dir, state) = test_state(None).await;
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert!(json["data"]["positions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_opens_position() {
        let (_dir, state) = test_state(None).await;
        let app = create_router(state.clone());

        let payload = serde_json::json!({
            "action": "open",
            "symbol": "BTC-USDT-SWAP",
            "direction": "long",
            "quantity": "2",
            "unit_type": "contract"
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/trigger")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true, "{json}");

        let status = state.reporter.status();
        assert_eq!(status.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_requires_token_when_configured() {
        let (_dir, state) = test_state(Some("sekret".to_string())).await;
        let app = create_router(state);

        let payload = serde_json::json!({
            "action": "close",
            "symbol": "BTC-USDT-SWAP"
        });

        let response = app
            .clone()
            .oneshot(create_request(&payload, None).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(create_request(&payload, Some("sekret")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    fn create_request(
        payload: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<Request<Body>, axum::http::Error> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/trigger")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(payload.to_string()))
    }

    #[tokio::test]
    async fn test_daily_pnl_empty_day() {
        let (_dir, state) = test_state(None).await;
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/daily_pnl")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["closed_count"], 0);
        assert!(json["data"]["win_rate"].is_null());
    }
}
