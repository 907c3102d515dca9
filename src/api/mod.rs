//! HTTP surface. Every response body carries `success`, and failures add
//! `error`; validation problems are 400s, everything else a 500.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::app::App;
use crate::error::{AppError, Result};
use crate::models::{CacheMode, Effort};
use crate::scrape::parse_date;

pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("Request failed: {}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = json!({ "success": false, "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;

/// Merge `value`'s fields into a `{success: true}` body.
fn success(value: impl serde::Serialize) -> ApiResult {
    let mut body = json!({ "success": true });
    match serde_json::to_value(value).map_err(AppError::from)? {
        Value::Object(fields) => {
            if let Value::Object(map) = &mut body {
                map.extend(fields);
            }
        }
        Value::Null => {}
        other => body["result"] = other,
    }
    Ok(Json(body))
}

fn parse_effort(raw: Option<&str>) -> Result<Effort> {
    raw.map(str::parse::<Effort>).transpose().map(Option::unwrap_or_default)
}

#[derive(Debug, Deserialize)]
pub struct RangeRequest {
    start_date: String,
    end_date: String,
}

#[derive(Debug, Deserialize)]
pub struct DateRequest {
    date: String,
}

#[derive(Debug, Deserialize)]
pub struct CacheModeRequest {
    mode: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveUrlRequest {
    url: String,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    url: String,
    effort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TldrRequest {
    url: String,
    date: String,
    effort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    url: String,
    date: String,
    #[serde(default = "default_true")]
    is_read: bool,
}

fn default_true() -> bool {
    true
}

async fn scrape(State(app): State<Arc<App>>, Json(req): Json<RangeRequest>) -> ApiResult {
    let start = parse_date(&req.start_date)?;
    let end = parse_date(&req.end_date)?;
    let outcome = app.scrape(start, end).await?;
    let articles = outcome.articles();
    success(json!({
        "source": outcome.source,
        "cacheMode": outcome.cache_mode,
        "payloads": outcome.payloads,
        "articles": articles,
        "stats": outcome.stats,
    }))
}

async fn get_cache_mode(State(app): State<Arc<App>>) -> ApiResult {
    success(app.cache_mode().await)
}

async fn set_cache_mode(State(app): State<Arc<App>>, Json(req): Json<CacheModeRequest>) -> ApiResult {
    let mode: CacheMode = req.mode.parse()?;
    success(app.set_cache_mode(mode).await?)
}

async fn invalidate_cache(State(app): State<Arc<App>>, Json(req): Json<RangeRequest>) -> ApiResult {
    let start = parse_date(&req.start_date)?;
    let end = parse_date(&req.end_date)?;
    let invalidated = app.invalidate_cache(start, end).await?;
    success(json!({ "invalidated": invalidated }))
}

async fn invalidate_date_cache(State(app): State<Arc<App>>, Json(req): Json<DateRequest>) -> ApiResult {
    let date = parse_date(&req.date)?;
    app.invalidate_date_cache(date).await?;
    success(json!({ "date": date }))
}

async fn remove_url(State(app): State<Arc<App>>, Json(req): Json<RemoveUrlRequest>) -> ApiResult {
    let date = req.date.as_deref().map(parse_date).transpose()?;
    success(app.remove_url(&req.url, date).await?)
}

async fn removed_urls(State(app): State<Arc<App>>) -> ApiResult {
    let urls = app.removed_urls().await;
    success(json!({ "count": urls.len(), "urls": urls }))
}

async fn summarize_url(State(app): State<Arc<App>>, Json(req): Json<SummarizeRequest>) -> ApiResult {
    let effort = parse_effort(req.effort.as_deref())?;
    success(app.summarize_url(&req.url, effort).await?)
}

async fn tldr_url(State(app): State<Arc<App>>, Json(req): Json<TldrRequest>) -> ApiResult {
    let date = parse_date(&req.date)?;
    let effort = parse_effort(req.effort.as_deref())?;
    let article = app.tldr_url(date, &req.url, effort).await?;
    success(json!({ "article": article }))
}

async fn mark_read(State(app): State<Arc<App>>, Json(req): Json<MarkReadRequest>) -> ApiResult {
    let date = parse_date(&req.date)?;
    let article = app.mark_read(date, &req.url, req.is_read).await?;
    success(json!({ "article": article }))
}

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/api/scrape", post(scrape))
        .route("/api/cache-mode", get(get_cache_mode).post(set_cache_mode))
        .route("/api/invalidate-cache", post(invalidate_cache))
        .route("/api/invalidate-date-cache", post(invalidate_date_cache))
        .route("/api/remove-url", post(remove_url))
        .route("/api/removed-urls", get(removed_urls))
        .route("/api/summarize-url", post(summarize_url))
        .route("/api/tldr-url", post(tldr_url))
        .route("/api/mark-read", post(mark_read))
        .with_state(app)
}

pub async fn serve(app: Arc<App>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(app)).await?;
    Ok(())
}
