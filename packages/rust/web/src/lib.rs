//! HTTP front end for RepoSearch.
//!
//! Routes:
//!
//! | Method | Path          | Response                                   |
//! |--------|---------------|--------------------------------------------|
//! | GET    | `/`           | search form                                |
//! | POST   | `/search`     | HTML results for form field `query`        |
//! | GET    | `/api/search` | JSON results for `q`, optional `limit`     |
//! | GET    | `/health`     | `{"status":"ok","files":N}`                |
//!
//! Malformed full-text queries answer 400 on both search routes.

pub mod pages;

mod handlers;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use reposearch_shared::{RepoSearchError, Result, SearchConfig, ServerConfig};
use reposearch_storage::Storage;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub search: SearchConfig,
}

impl AppState {
    pub fn new(storage: Storage, search: SearchConfig) -> Self {
        Self {
            storage: Arc::new(storage),
            search,
        }
    }
}

/// Build the application router with tracing, body-size and timeout layers.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let routes = Router::new()
        .route("/", get(handlers::index_page))
        .route("/search", post(handlers::search_page))
        .route("/api/search", get(handlers::api_search))
        .route("/health", get(handlers::health));
    with_middleware(routes, config).with_state(state)
}

/// Outermost first: tracing, then the body limit, then the per-request timeout.
fn with_middleware<S>(router: Router<S>, config: &ServerConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_secs.max(1),
            ))),
    )
}

/// Bind `config.bind_addr()` and serve until Ctrl-C or SIGTERM.
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| RepoSearchError::Server(format!("failed to bind {addr}: {e}")))?;

    if let Ok(local) = listener.local_addr() {
        info!(addr = %local, "listening");
    }

    serve_on(listener, build_router(state, config), shutdown_signal()).await
}

/// Serve `router` on an already-bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| RepoSearchError::Server(e.to_string()))?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
