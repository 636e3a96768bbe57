use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dotenvy::dotenv;
use handlers::{
    confirm_handler, health_check, list_graphs_handler, query_graph_handler,
    refresh_graph_handler,
};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer,
};

use crate::config::{self, DatabaseSpec, ServerConfig};
use crate::executor::{ClickHouseExecutor, ClickHouseSchemaRefresher, SchemaRefresher};
use crate::graph_catalog::{DatabaseInfo, InMemoryGraphStore, SchemaGraphStore};
use crate::llm::OpenAiClient;
use crate::pipeline::{Collaborators, ConfirmationStore, Pipeline};
use crate::resolver::RelevanceResolver;

mod clickhouse_client;
pub mod handlers;
pub mod models;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub config: ServerConfig,
}

/// Routes and middleware; streaming routes are exempt from the request timeout
pub fn build_router(app_state: AppState) -> Router {
    let body_limit = app_state.config.request_body_limit_bytes;
    let request_timeout = app_state.config.request_timeout();

    let streaming = Router::new()
        .route("/graphs/{graph_id}", post(query_graph_handler))
        .route("/graphs/{graph_id}/confirm", post(confirm_handler));

    let bounded = Router::new()
        .route("/health", get(health_check))
        .route("/graphs", get(list_graphs_handler))
        .route("/graphs/{graph_id}/refresh", post(refresh_graph_handler))
        .layer(TimeoutLayer::new(request_timeout));

    streaming
        .merge(bounded)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CatchPanicLayer::new())
        .with_state(Arc::new(app_state))
}

/// Load every configured database; a failure only costs that graph
pub async fn load_configured_graphs(databases: &[DatabaseSpec], refresher: &dyn SchemaRefresher) {
    for spec in databases {
        let database = DatabaseInfo {
            name: spec.database.clone(),
            description: spec.description.clone(),
            url: spec.url.clone(),
        };
        match refresher.refresh(&spec.graph_id, &database).await {
            Ok(summary) => log::info!("✓ {}", summary),
            Err(e) => log::error!("✗ Failed to load graph '{}': {}", spec.graph_id, e),
        }
    }
}

pub async fn run_with_config(config: ServerConfig) {
    dotenv().ok();

    log::info!(
        "Server configuration: http={}:{}, top_k={}, path_max_depth={}, pair_timeout={}ms, resolve_timeout={}s",
        config.http_host,
        config.http_port,
        config.top_k,
        config.path_max_depth,
        config.pair_timeout_ms,
        config.resolve_timeout_secs
    );

    let client = match clickhouse_client::try_get_client() {
        Some(client) => {
            log::info!("✓ ClickHouse client created successfully");
            client
        }
        None => {
            log::warn!("⚠ CLICKHOUSE_URL not set, falling back to http://localhost:8123");
            clickhouse::Client::default().with_url("http://localhost:8123")
        }
    };

    let api_key = match config::llm_api_key() {
        Ok(key) => key,
        Err(e) => {
            log::error!("✗ LLM_API_KEY is required: {}", e);
            std::process::exit(1);
        }
    };
    let llm = Arc::new(OpenAiClient::new(
        api_key,
        config.llm_base_url.clone(),
        config.completion_model.clone(),
        config.embedding_model.clone(),
    ));
    log::debug!("Language model client: {:?}", llm);

    let store: Arc<dyn SchemaGraphStore> = Arc::new(InMemoryGraphStore::new());
    let refresher = Arc::new(ClickHouseSchemaRefresher::new(
        client.clone(),
        llm.clone(),
        store.clone(),
    ));
    load_configured_graphs(&config.databases, refresher.as_ref()).await;

    let resolver = Arc::new(RelevanceResolver::new(
        store.clone(),
        llm.clone(),
        config.resolver_settings(),
    ));
    let pipeline = Arc::new(Pipeline::new(
        store,
        resolver,
        Collaborators::from_provider(llm),
        Arc::new(ClickHouseExecutor::new(client)),
        refresher,
        Arc::new(ConfirmationStore::new(config.max_pending_confirmations)),
        config.resolve_timeout(),
    ));

    let app = build_router(AppState {
        pipeline,
        config: config.clone(),
    });

    // Start HTTP server
    let http_bind_address = format!("{}:{}", config.http_host, config.http_port);
    log::info!("Starting HTTP server on {}", http_bind_address);

    let http_listener = match TcpListener::bind(&http_bind_address).await {
        Ok(listener) => {
            log::info!("Successfully bound HTTP listener to {}", http_bind_address);
            listener
        }
        Err(e) => {
            log::error!(
                "✗ FATAL: Failed to bind HTTP listener to {}: {}",
                http_bind_address,
                e
            );
            log::error!("  Is another process using port {}?", config.http_port);
            std::process::exit(1);
        }
    };

    log::info!("QueryGraph server is running on http://{}", http_bind_address);
    if let Err(e) = axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!("HTTP server fatal error: {:?}", e);
        std::process::exit(1);
    }
    log::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to register SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received SIGINT, shutting down..."),
        _ = terminate => log::info!("Received SIGTERM, shutting down..."),
    }
}
