//! HTTP front door: `GET /health` and `POST /ocr` (alias `/convert`).

mod payload;
mod shutdown;

pub use payload::{FILE_FIELD, PdfPayload};
pub use shutdown::shutdown_signal;

use crate::{
    config::Config,
    convert::Converter,
    engine::Engine,
    error::{Error, ErrorKind},
    postprocess::Postprocessor,
    util::ensure_dir,
};
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<Config>,
    converter: Arc<Converter>,
}

impl AppState {
    pub fn new(cfg: Config, engine: Arc<dyn Engine>) -> Result<Self> {
        let temp_dir = cfg.temp_dir();
        ensure_dir(&temp_dir)?;
        let postprocess = Postprocessor::new(&cfg.postprocess)?;
        let converter = Converter::new(engine, temp_dir, postprocess);
        Ok(Self {
            cfg: Arc::new(cfg),
            converter: Arc::new(converter),
        })
    }
}

/// Conversion failure rendered as a plain-text response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0.kind() {
            ErrorKind::Input => {
                warn!("rejected request: {}", self.0);
                (StatusCode::BAD_REQUEST, format!("Error: {}", self.0)).into_response()
            }
            ErrorKind::Conversion => {
                error!("conversion failed: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error processing PDF: {}", self.0),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConvertQuery {
    /// Overrides the configured default profile for this request.
    pub ocr: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.cfg.server.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/ocr", post(convert))
        .route("/convert", post(convert))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn convert(
    State(state): State<AppState>,
    Query(query): Query<ConvertQuery>,
    PdfPayload(bytes): PdfPayload,
) -> Result<Response, ApiError> {
    if bytes.is_empty() {
        return Err(Error::EmptyPayload.into());
    }
    let options = state.cfg.convert_options(query.ocr);
    let converter = state.converter.clone();
    let markdown = tokio::task::spawn_blocking(move || converter.convert_bytes(&bytes, &options))
        .await
        .map_err(|e| Error::Task(e.to_string()))??;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        markdown,
    )
        .into_response())
}

/// Binds the configured address and serves until SIGINT/SIGTERM.
pub async fn serve(cfg: Config, engine: Arc<dyn Engine>) -> Result<()> {
    let addr = cfg.server.addr();
    let default_profile = cfg.server.default_profile;
    let drain_limit = cfg.server.shutdown_timeout();
    let state = AppState::new(cfg, engine)?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        "listening on http://{addr} default_profile={}",
        default_profile.as_str()
    );

    serve_with_shutdown(listener, router(state), shutdown_signal(), drain_limit).await?;

    info!("server stopped");
    Ok(())
}

/// Serves `app` until `signal` resolves, then lets in-flight requests finish
/// for at most `drain_limit` before dropping their connections.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    drain_limit: Option<Duration>,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            let _ = stopping_tx.send(true);
        })
        .into_future();

    let drain_expired = async move {
        if stopping_rx.wait_for(|stopping| *stopping).await.is_err() {
            std::future::pending::<()>().await;
        }
        match drain_limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        res = server => res.with_context(|| "http server")?,
        () = drain_expired => {
            warn!(
                "in-flight requests still running after {:?}; dropping their connections",
                drain_limit.unwrap_or_default()
            );
        }
    }
    Ok(())
}
