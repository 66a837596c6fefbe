//! Route handlers.

use axum::Json;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, error};

use reposearch_shared::RepoSearchError;

use crate::AppState;
use crate::pages;

/// Body of `POST /search`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchForm {
    #[serde(default)]
    query: String,
}

/// Query string of `GET /api/search`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiSearchParams {
    #[serde(default)]
    q: String,
    limit: Option<u32>,
}

/// `GET /`
pub(crate) async fn index_page() -> Html<String> {
    Html(pages::render_index())
}

/// `POST /search`
///
/// A request without a form content type is treated as an empty query.
/// Other rejections, such as an oversized body, are returned as-is.
pub(crate) async fn search_page(
    State(state): State<AppState>,
    form: Result<Form<SearchForm>, FormRejection>,
) -> Response {
    let query = match form {
        Ok(Form(form)) => form.query,
        Err(FormRejection::InvalidFormContentType(rejection)) => {
            debug!(%rejection, "no form body, using empty query");
            String::new()
        }
        Err(rejection) => return rejection.into_response(),
    };

    match state
        .storage
        .search(&query, state.search.limit, state.search.snippet_tokens)
        .await
    {
        Ok(hits) => Html(pages::render_results(&query, &hits)).into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(error = %e, "search failed");
            }
            (status, Html(pages::render_error(&query, &e.to_string()))).into_response()
        }
    }
}

/// `GET /api/search?q=&limit=`
pub(crate) async fn api_search(
    State(state): State<AppState>,
    Query(params): Query<ApiSearchParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(state.search.limit)
        .min(state.search.limit)
        .max(1);

    match state
        .storage
        .search(&params.q, limit, state.search.snippet_tokens)
        .await
    {
        Ok(hits) => Json(serde_json::json!({
            "query": params.q,
            "count": hits.len(),
            "hits": hits,
        }))
        .into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(error = %e, "api search failed");
            }
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// `GET /health`
pub(crate) async fn health(State(state): State<AppState>) -> Response {
    match state.storage.count_files(None).await {
        Ok(files) => Json(serde_json::json!({
            "status": "ok",
            "files": files,
            "version": env!("CARGO_PKG_VERSION"),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable", "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn status_for(e: &RepoSearchError) -> StatusCode {
    if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
