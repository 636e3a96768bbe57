use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::graph_catalog::DatabaseInfo;
use crate::pipeline::{self, EventSink, PipelineEvent, RefreshStatus, TurnRequest};

use super::{
    models::{ConfirmRequest, GraphListResponse, QueryRequest, RefreshResponse},
    AppState,
};

/// Events buffered between a running turn and the response body
const EVENT_BUFFER: usize = 32;

const MAX_GRAPH_ID_LEN: usize = 100;

type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
}

fn validate_graph_id(graph_id: &str) -> Result<String, ApiError> {
    let graph_id = graph_id.trim();
    if graph_id.is_empty() || graph_id.chars().count() > MAX_GRAPH_ID_LEN {
        return Err(bad_request(format!(
            "Invalid graph_id: must be 1-{} characters",
            MAX_GRAPH_ID_LEN
        )));
    }
    Ok(graph_id.to_string())
}

fn validate_chat(chat: &[String]) -> Result<(), ApiError> {
    if chat.is_empty() {
        return Err(bad_request("Invalid or missing chat data"));
    }
    Ok(())
}

/// Frame each event onto a chunked body as it arrives
fn event_stream_response(rx: mpsc::Receiver<PipelineEvent>) -> Response {
    let frames = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_frame()));
    let mut response = Response::new(Body::from_stream(frames));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "service": "querygraph",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn list_graphs_handler(State(app_state): State<Arc<AppState>>) -> Json<GraphListResponse> {
    let graphs = app_state.pipeline.store().list_graphs().await;
    log::debug!("Listing {} graphs", graphs.len());
    Json(GraphListResponse { graphs })
}

pub async fn query_graph_handler(
    State(app_state): State<Arc<AppState>>,
    Path(graph_id): Path<String>,
    Json(payload): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    let graph_id = validate_graph_id(&graph_id)?;
    validate_chat(&payload.chat)?;

    let request = TurnRequest {
        graph_id,
        chat: payload.chat,
        result: payload.result.unwrap_or_default(),
        instructions: payload.instructions,
    };

    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let pipeline = app_state.pipeline.clone();
    tokio::spawn(async move {
        let graph_id = request.graph_id.clone();
        let outcome = pipeline.run_turn(request, &sink).await;
        log::debug!("Turn on '{}' ended: {:?}", graph_id, outcome);
    });

    Ok(event_stream_response(rx))
}

pub async fn confirm_handler(
    State(app_state): State<Arc<AppState>>,
    Path(graph_id): Path<String>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Response, ApiError> {
    let graph_id = validate_graph_id(&graph_id)?;
    validate_chat(&payload.chat)?;

    let request = pipeline::ConfirmRequest {
        graph_id,
        confirmation: payload.confirmation,
        confirmation_token: payload.confirmation_token,
        sql_query: payload.sql_query,
        chat: payload.chat,
    };

    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let pipeline = app_state.pipeline.clone();
    tokio::spawn(async move {
        let graph_id = request.graph_id.clone();
        let outcome = pipeline.resume(request, &sink).await;
        log::debug!("Confirmation on '{}' ended: {:?}", graph_id, outcome);
    });

    Ok(event_stream_response(rx))
}

/// Where to reload `graph_id` from: the loaded graph, else the startup configuration
async fn refresh_target(app_state: &AppState, graph_id: &str) -> Option<DatabaseInfo> {
    if let Ok(graph) = app_state.pipeline.store().select_graph(graph_id).await {
        return Some(graph.database().clone());
    }
    app_state
        .config
        .databases
        .iter()
        .find(|spec| spec.graph_id == graph_id)
        .map(|spec| DatabaseInfo {
            name: spec.database.clone(),
            description: spec.description.clone(),
            url: spec.url.clone(),
        })
}

pub async fn refresh_graph_handler(
    State(app_state): State<Arc<AppState>>,
    Path(graph_id): Path<String>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let graph_id = validate_graph_id(&graph_id)?;

    let Some(database) = refresh_target(&app_state, &graph_id).await else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Unknown graph '{}'", graph_id) })),
        ));
    };

    match app_state.pipeline.refresher().refresh(&graph_id, &database).await {
        Ok(summary) => Ok(Json(RefreshResponse {
            graph_id,
            refresh_status: RefreshStatus::Success,
            message: format!("Graph schema refreshed successfully. {}", summary),
        })),
        Err(e) => {
            log::error!("Manual refresh of '{}' failed: {}", graph_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "graph_id": graph_id,
                    "refresh_status": RefreshStatus::Failed,
                    "error": format!("Failed to refresh graph schema: {}", e)
                })),
            ))
        }
    }
}
