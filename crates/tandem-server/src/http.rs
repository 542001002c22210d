use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Json, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use tandem_research::{HttpReader, HttpSearcher, JsonPlanner, Mode, NullSearcher, Orchestrator, ResearchProfile, Searcher};
use tandem_types::{OrchestratorResult, Progress, StopReason};
use tandem_wire::{WireCitations, WireEvent, WireMetadata, WireProgress, WireWarning};

use crate::AppState;

/// Default Brave Search endpoint: the provider whose API convention
/// (`X-Subscription-Token` header, not `Authorization: Bearer`) the reader
/// contract in `spec.md` §4.4 is modeled on.
const DEFAULT_SEARCH_BASE_URL: &str = "https://api.search.brave.com/res/v1/web/search";

fn default_mode() -> Mode {
    Mode::Chat
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResearchRequest {
    question: String,
    #[serde(default)]
    time_sensitive: bool,
    #[serde(default = "default_mode")]
    mode: Mode,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let router = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tandem-server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/research/stream", post(research_stream))
        .route("/v1/research/stream/{run_id}", axum::routing::delete(cancel_run))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn cancel_run(
    State(state): State<AppState>,
    axum::extract::Path(run_id): axum::extract::Path<String>,
) -> StatusCode {
    if state.cancellations.cancel(&run_id).await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

fn build_searcher(state: &AppState) -> Arc<dyn Searcher> {
    match state.search.api_key.clone() {
        Some(api_key) => {
            let base_url = state
                .search
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_SEARCH_BASE_URL.to_string());
            Arc::new(HttpSearcher::new(base_url, Some(api_key)))
        }
        None => Arc::new(NullSearcher),
    }
}

fn build_orchestrator(state: &AppState, profile: ResearchProfile) -> Orchestrator {
    let searcher = build_searcher(state);
    let reader = Arc::new(HttpReader::new(&profile));
    let planner = Arc::new(JsonPlanner::new(state.providers.clone()));
    Orchestrator::new(Some(searcher), reader, planner, profile)
}

/// Runs one research request (`spec.md` §4.1) and, over its lifetime, emits
/// `WireEvent`s onto `tx` in the phase order `spec.md` §5 requires:
/// metadata, then progress* / warning*, then citations, then done. The
/// sender outliving every receiver (the SSE branch may briefly have zero
/// live subscribers) is expected and non-fatal.
async fn run_and_publish(
    state: AppState,
    run_id: String,
    req: ResearchRequest,
    tx: broadcast::Sender<WireEvent>,
) -> OrchestratorResult {
    let profile = ResearchProfile::for_mode(req.mode);
    let orchestrator = build_orchestrator(&state, profile);
    let cancel = state.cancellations.register(run_id.clone()).await;

    let _ = tx.send(WireEvent::Metadata(WireMetadata {
        grounding: state.search.api_key.is_some(),
        deep_research: req.mode == Mode::DeepResearch,
        model_id: None,
        reasoning_effort: None,
        conversation_id: Some(run_id.clone()),
    }));

    let progress_tx = tx.clone();
    let (result, outcome) = orchestrator
        .run(&req.question, req.time_sensitive, cancel, move |progress: Progress| {
            let _ = progress_tx.send(WireEvent::Progress(WireProgress::from(&progress)));
        })
        .await;

    if let Err(err) = outcome {
        let _ = tx.send(WireEvent::Error(tandem_wire::WireError {
            message: err.to_string(),
        }));
    }

    for warning in &result.warnings {
        let _ = tx.send(WireEvent::Warning(WireWarning {
            scope: "research".to_string(),
            message: warning.clone(),
        }));
    }

    let _ = tx.send(WireEvent::Citations(WireCitations::from(&result)));
    let _ = tx.send(WireEvent::Done);

    state.cancellations.forget(&run_id).await;
    result
}

async fn research_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResearchRequest>,
) -> Response {
    if req.question.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "question must not be empty").into_response();
    }

    let accept_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);

    let run_id = Uuid::new_v4().to_string();

    if !accept_sse {
        let (tx, _rx) = broadcast::channel(1);
        let result = run_and_publish(state, run_id, req, tx).await;
        return Json(result).into_response();
    }

    let (tx, rx) = broadcast::channel(256);
    let stream = sse_stream(rx);
    tokio::spawn(run_and_publish(state, run_id, req, tx));

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
        .into_response()
}

fn sse_stream(
    rx: broadcast::Receiver<WireEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    BroadcastStream::new(rx)
        .take_while(|msg| !matches!(msg, Ok(WireEvent::Done)))
        .chain(tokio_stream::once(Ok(WireEvent::Done)))
        .filter_map(|msg| match msg {
            Ok(event) => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                Some(Ok(Event::default().data(payload)))
            }
            Err(_) => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tandem_providers::{AppConfig, ProviderRegistry};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(
            ProviderRegistry::new(AppConfig::default()),
            crate::SearchConfig::default(),
        )
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let router = app_router(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn research_sync_mode_rejects_empty_question() {
        let router = app_router(test_state());
        let body = json!({"question": "   "});
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/research/stream")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn research_sync_mode_returns_grounding_warning_without_search_key() {
        let router = app_router(test_state());
        let body = json!({"question": "what is rust ownership"});
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/research/stream")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let result: OrchestratorResult = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(result.stop_reason, StopReason::Error);
    }
}
