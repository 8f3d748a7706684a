use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::Method,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::api::models::ScrapeRequest;
use crate::api::response;
use crate::error::{AppError, Result};
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    let cors_enabled = app_state.config.cors_enabled;

    let mut router = Router::new()
        .route("/api/scrape", any(scrape_handler))
        .route("/.netlify/functions/scrape", any(scrape_handler))
        .route("/api/status", get(status_handler))
        .with_state(app_state);

    if cors_enabled {
        for (name, value) in response::cors_headers() {
            router = router.layer(SetResponseHeaderLayer::overriding(name, value));
        }
    }

    router
}

async fn scrape_handler(
    State(state): State<AppState>,
    method: Method,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let start_time = Instant::now();
    info!(%method, mode = %state.invoker.mode(), "Processing scrape request");

    let response = match process_scrape_request(&state, &method, body).await {
        Ok(response) => response,
        Err(err) => {
            warn!(%method, status = err.status().as_u16(), error = %err, "Scrape request failed");
            err.into_response()
        }
    };

    info!(
        status = response.status().as_u16(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Scrape request finished"
    );
    response
}

async fn process_scrape_request(
    state: &AppState,
    method: &Method,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    if *method == Method::OPTIONS && state.config.cors_enabled {
        return Ok(response::preflight());
    }

    if *method != Method::POST {
        return Err(AppError::MethodNotAllowed);
    }

    // Body limit and read errors surface as JSON 400s.
    let body = body?;
    let request = ScrapeRequest::from_body(&body)?;
    info!(tag_count = request.tags.len(), "Validated scrape request");
    debug!(tags = ?request.tags, "Requested tags");

    let data = state.invoker.invoke(&request.tags).await?;
    Ok(response::success(data))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.invoker.tracker().snapshot())
}
