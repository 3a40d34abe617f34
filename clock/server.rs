// ========================================================================================
//
//                      HTTP transport: routing, CORS, limits & the panic boundary
//
// ========================================================================================
//
// The transport owns everything the handler deliberately ignores: status codes,
// headers, the body-size cap, the caller-facing timeout, and the guarantee that no
// panic ever reaches the connection unhandled.

use crate::coefficients::{CoefficientError, CoefficientProvider, LazyCoefficients};
use crate::config::{CoefficientConfig, ConfigError, ServerConfig, ServiceConfig};
use crate::handler::{
    CORS_HEADERS, INTERNAL_ERROR_MESSAGE, ResponseBody, ResponseClass, handle_estimate_request,
};
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::middleware::map_response;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Coefficients(#[from] CoefficientError),
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    provider: Arc<dyn CoefficientProvider>,
}

impl AppState {
    pub fn new(provider: Arc<dyn CoefficientProvider>) -> Self {
        Self { provider }
    }

    /// Resolves the configured table. An eager load that fails is fatal here, before
    /// any listener is bound; a lazy one defers the load to the first request.
    pub fn from_config(config: &CoefficientConfig) -> Result<Self, CoefficientError> {
        let source = config.source();
        if config.lazy {
            log::info!("Coefficient table will be loaded on first use from {source:?}");
            return Ok(Self::new(Arc::new(LazyCoefficients::new(source))));
        }
        let table = source.load()?;
        log::info!(
            "Loaded coefficient table '{}' ({} sites)",
            table.version(),
            table.weights().len()
        );
        Ok(Self::new(Arc::new(table)))
    }
}

/// Builds the service router.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route(
            &config.route,
            post(estimate).options(preflight).fallback(method_not_allowed),
        )
        .route("/health", get(health).fallback(method_not_allowed))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(CatchPanicLayer::custom(panic_response))
        // Outermost, so responses built by the layers above carry CORS too.
        .layer(map_response(with_cors))
        .with_state(state)
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(config: ServiceConfig, state: AppState) -> Result<(), ServeError> {
    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!(
        "Epigenetic clock service listening on http://{}{}",
        listener.local_addr()?,
        config.server.route
    );
    axum::serve(listener, router(state, &config.server))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("Epigenetic clock service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Could not listen for the shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received, draining connections");
}

// ========================================================================================
//                                    Handlers
// ========================================================================================

async fn estimate(State(state): State<AppState>, body: Result<Bytes, BytesRejection>) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            log::warn!("Rejected request body: {}", rejection.body_text());
            return error_response(rejection.status(), rejection.body_text());
        }
    };
    let response = handle_estimate_request(&body, state.provider.as_ref());
    json_response(status_for(response.class), response.to_json())
}

async fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_cors(response.headers_mut());
    response
}

async fn health(State(state): State<AppState>) -> Response {
    match state.provider.table() {
        Ok(table) => {
            let body = json!({
                "status": "ok",
                "tableVersion": table.version(),
                "sites": table.weights().len(),
            });
            json_response(StatusCode::OK, body.to_string().into_bytes())
        }
        Err(err) => {
            log::error!("Health check failed: {err}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR_MESSAGE.to_string(),
            )
        }
    }
}

async fn method_not_allowed(method: Method) -> Response {
    if method == Method::OPTIONS {
        return preflight().await;
    }
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
}

async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return preflight().await;
    }
    error_response(StatusCode::NOT_FOUND, "Not found".to_string())
}

// ========================================================================================
//                                Response helpers
// ========================================================================================

pub fn status_for(class: ResponseClass) -> StatusCode {
    match class {
        ResponseClass::Success => StatusCode::OK,
        ResponseClass::ClientError => StatusCode::BAD_REQUEST,
        ResponseClass::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn with_cors(mut response: Response) -> Response {
    apply_cors(response.headers_mut());
    response
}

fn apply_cors(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    apply_cors(headers);
    response
}

fn error_response(status: StatusCode, error: String) -> Response {
    let body = ResponseBody::Error {
        error,
        details: None,
    };
    let bytes = serde_json::to_vec(&body)
        .unwrap_or_else(|_| format!("{{\"error\":\"{INTERNAL_ERROR_MESSAGE}\"}}").into_bytes());
    json_response(status, bytes)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    log::error!("Request handler panicked: {detail}");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        INTERNAL_ERROR_MESSAGE.to_string(),
    )
}
