//! Purpose: Provide the HTTP/JSON server for the list protocol.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based server wiring the versioned table, the list orchestrator, and history purge.
//! Invariants: Handlers hold no state between requests; continuation lives in tokens.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Client errors map to 4xx with a stable `{"error":{...}}` envelope.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pagesync::api::{
    Clock, Error, ErrorKind, ListOptions, ListQuery, SystemClock, VersionedTable, list,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub retention: Duration,
    pub default_max_results: usize,
    pub max_results_cap: usize,
    pub purge_interval: Duration,
}

struct AppState {
    table: Arc<VersionedTable>,
    clock: Arc<dyn Clock>,
    options: ListOptions,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let table = Arc::new(VersionedTable::new(clock.clone()));
    let options = ListOptions {
        retention: config.retention,
        default_max_results: config.default_max_results,
        max_results_cap: config.max_results_cap,
    };
    let state = Arc::new(AppState {
        table: table.clone(),
        clock: clock.clone(),
        options,
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/list", get(list_records))
        .route("/insert", post(insert_record))
        .route("/update", post(update_record))
        .route("/delete", post(delete_record))
        .route("/clear", post(clear_records))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(bind = %config.bind, retention_secs = config.retention.as_secs(), "listening");

    let purge = tokio::spawn(purge_history_loop(
        table,
        clock,
        config.retention,
        config.purge_interval,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("server failed")
                    .with_source(err)
            })
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("server failed")
                        .with_source(err)
                }),
                Err(_) => {
                    Err(Error::new(ErrorKind::Internal).with_message("server shutdown timed out"))
                }
            }
        }
    };
    purge.abort();
    result
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.retention.is_zero() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--retention-secs must be greater than zero")
            .with_hint("Use a positive value like 86400."));
    }

    if config.default_max_results == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--default-max-results must be greater than zero")
            .with_hint("Use a positive value like 10."));
    }

    if config.max_results_cap < config.default_max_results {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-results-cap must be at least --default-max-results")
            .with_hint("Use a cap like 1000."));
    }

    if config.purge_interval.is_zero() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--purge-interval-secs must be greater than zero")
            .with_hint("Use a positive value like 300."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn purge_history_loop(
    table: Arc<VersionedTable>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let horizon = clock.now().saturating_sub(retention);
        match table.purge_history(horizon) {
            Ok(report) if report.versions_removed > 0 => {
                tracing::info!(
                    removed = report.versions_removed,
                    kept = report.versions_kept,
                    horizon = %horizon,
                    "purged history"
                );
            }
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "history purge failed"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsertRequest {
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    id: u64,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    id: u64,
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match list(
        state.table.as_ref(),
        state.clock.as_ref(),
        &state.options,
        &query,
    ) {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err),
    }
}

async fn insert_record(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InsertRequest>,
) -> Response {
    if payload.name.trim().is_empty() {
        return error_response(Error::new(ErrorKind::Usage).with_message("name must not be empty"));
    }
    match state.table.insert(payload.name, payload.email) {
        Ok(record) => Json(json!({ "record": record })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_record(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateRequest>,
) -> Response {
    if payload.name.is_none() && payload.email.is_none() {
        return error_response(
            Error::new(ErrorKind::Usage)
                .with_message("update requires name or email")
                .with_hint("Send at least one of \"name\" or \"email\"."),
        );
    }
    match state
        .table
        .update(payload.id, payload.name, payload.email)
    {
        Ok(record) => Json(json!({ "record": record })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_record(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DeleteRequest>,
) -> Response {
    match state.table.delete(payload.id) {
        Ok(()) => Json(json!({ "deleted": payload.id })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn clear_records(State(state): State<Arc<AppState>>) -> Response {
    match state.table.clear() {
        Ok(affected_rows) => Json(json!({ "affected_rows": affected_rows })).into_response(),
        Err(err) => error_response(err),
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        kind if kind.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    let mut body = serde_json::Map::new();
    body.insert("kind".to_string(), json!(err.kind().as_str()));
    body.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("error")),
    );
    if let Some(hint) = err.hint() {
        body.insert("hint".to_string(), json!(hint));
    }
    (status, Json(json!({ "error": body }))).into_response()
}
