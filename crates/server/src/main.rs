use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use server_api::{
    create_page, create_widget, delete_page, delete_widget, list_pages, list_widgets,
    page_with_widgets, reorder_widgets, update_page, update_widget, ApiContext,
};
use shared::{
    domain::{PageId, WidgetId},
    error::{ApiError, ErrorCode},
    protocol::{
        CreatePageRequest, CreateWidgetRequest, PageDetail, PageListResponse, PageSummary,
        ReorderWidgetsRequest, ReorderWidgetsResponse, UpdatePageRequest, UpdateWidgetRequest,
        WidgetListResponse, WidgetPayload,
    },
};
use storage::Storage;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::{AppState, HttpSettings};
use config::{load_settings, prepare_database_url};

type HttpError = (StatusCode, Json<ApiError>);
type HttpResult<T> = Result<T, HttpError>;

#[derive(Debug, Default, Deserialize)]
struct ListPagesQuery {
    page: Option<String>,
    per_page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListWidgetsQuery {
    #[serde(rename = "type")]
    widget_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext::new(storage),
        http: HttpSettings {
            cors_allow_origin: settings.cors_allow_origin,
            max_body_bytes: settings.max_body_bytes,
        },
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, %database_url, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.http.cors_allow_origin);
    let body_limit = state.http.max_body_bytes;

    Router::new()
        .route("/healthz", get(healthz))
        .route("/health", get(health))
        .route("/pages", get(http_list_pages).post(http_create_page))
        .route(
            "/pages/:page_id",
            get(http_get_page)
                .put(http_update_page)
                .delete(http_delete_page),
        )
        .route(
            "/pages/:page_id/widgets",
            get(http_list_widgets).post(http_create_widget),
        )
        .route("/pages/:page_id/widgets/reorder", post(http_reorder_widgets))
        .route(
            "/widgets/:widget_id",
            put(http_update_widget).delete(http_delete_widget),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

fn cors_layer(allow_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let allow_origin = allow_origin.trim();
    if allow_origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(allow_origin) {
        Ok(origin) => layer.allow_origin(AllowOrigin::exact(origin)),
        Err(error) => {
            warn!(allow_origin, %error, "invalid CORS origin; allowing any origin");
            layer.allow_origin(Any)
        }
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    state.api.storage.health_check().await.map_err(|e| {
        error!(error = %e, "health check failed");
        http_error(ApiError::new(ErrorCode::Internal, "storage unavailable"))
    })?;
    Ok("ok")
}

async fn health(State(state): State<Arc<AppState>>) -> HttpResult<Json<HealthReport>> {
    healthz(State(state)).await?;
    Ok(Json(HealthReport {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    }))
}

async fn http_list_pages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPagesQuery>,
) -> HttpResult<Json<PageListResponse>> {
    let listing = list_pages(
        &state.api,
        lenient_number(query.page.as_deref()),
        lenient_number(query.per_page.as_deref()),
    )
    .await
    .map_err(http_error)?;
    Ok(Json(listing))
}

async fn http_create_page(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePageRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<PageSummary>)> {
    let Json(request) = payload.map_err(invalid_body)?;
    let page = create_page(&state.api, request)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(page)))
}

async fn http_get_page(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
) -> HttpResult<Json<PageDetail>> {
    let page_id = parse_page_id(&page_id)?;
    let detail = page_with_widgets(&state.api, page_id)
        .await
        .map_err(http_error)?
        .ok_or_else(|| http_error(ApiError::new(ErrorCode::NotFound, "page not found")))?;
    Ok(Json(detail))
}

async fn http_update_page(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    payload: Result<Json<UpdatePageRequest>, JsonRejection>,
) -> HttpResult<Json<PageSummary>> {
    let page_id = parse_page_id(&page_id)?;
    let Json(request) = payload.map_err(invalid_body)?;
    let page = update_page(&state.api, page_id, request)
        .await
        .map_err(http_error)?;
    Ok(Json(page))
}

async fn http_delete_page(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
) -> HttpResult<StatusCode> {
    let page_id = parse_page_id(&page_id)?;
    delete_page(&state.api, page_id)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_widgets(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    Query(query): Query<ListWidgetsQuery>,
) -> HttpResult<Json<WidgetListResponse>> {
    let page_id = parse_page_id(&page_id)?;
    // `?type=` with no value lists every widget.
    let type_filter = query
        .widget_type
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty());
    let widgets = list_widgets(&state.api, page_id, type_filter)
        .await
        .map_err(http_error)?;
    Ok(Json(widgets))
}

async fn http_create_widget(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    payload: Result<Json<CreateWidgetRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<WidgetPayload>)> {
    let page_id = parse_page_id(&page_id)?;
    let Json(request) = payload.map_err(invalid_body)?;
    let widget = create_widget(&state.api, page_id, request)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(widget)))
}

async fn http_reorder_widgets(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    payload: Result<Json<ReorderWidgetsRequest>, JsonRejection>,
) -> HttpResult<Json<ReorderWidgetsResponse>> {
    let page_id = parse_page_id(&page_id)?;
    let Json(request) = payload.map_err(invalid_body)?;
    let reordered = reorder_widgets(&state.api, page_id, request)
        .await
        .map_err(http_error)?;
    Ok(Json(reordered))
}

async fn http_update_widget(
    State(state): State<Arc<AppState>>,
    Path(widget_id): Path<String>,
    payload: Result<Json<UpdateWidgetRequest>, JsonRejection>,
) -> HttpResult<Json<WidgetPayload>> {
    let widget_id = parse_widget_id(&widget_id)?;
    let Json(request) = payload.map_err(invalid_body)?;
    let widget = update_widget(&state.api, widget_id, request)
        .await
        .map_err(http_error)?;
    Ok(Json(widget))
}

async fn http_delete_widget(
    State(state): State<Arc<AppState>>,
    Path(widget_id): Path<String>,
) -> HttpResult<StatusCode> {
    let widget_id = parse_widget_id(&widget_id)?;
    delete_widget(&state.api, widget_id)
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_page_id(raw: &str) -> HttpResult<PageId> {
    raw.parse::<PageId>().map_err(|_| {
        http_error(ApiError::new(
            ErrorCode::BadRequest,
            "invalid page ID format",
        ))
    })
}

fn parse_widget_id(raw: &str) -> HttpResult<WidgetId> {
    raw.parse::<WidgetId>().map_err(|_| {
        http_error(ApiError::new(
            ErrorCode::BadRequest,
            "invalid widget ID format",
        ))
    })
}

/// Paging values that fail to parse fall back to the defaults.
fn lenient_number(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
}

fn invalid_body(rejection: JsonRejection) -> HttpError {
    let status = rejection.status();
    let error = ApiError::new(
        ErrorCode::Validation,
        format!("invalid request body: {}", rejection.body_text()),
    );
    // Oversized bodies keep their 413.
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return (status, Json(error));
    }
    http_error(error)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation | ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(error: ApiError) -> HttpError {
    (status_for(error.code), Json(error))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
