use std::io;
use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use meme_vault_api::{MemeVaultApi, StoreConfig, API_CONTRACT_VERSION};
use meme_vault_core::{MemeId, MemePatch, MemeRecord, StoreError};
use meme_vault_store_json::{DOCUMENT_FILE, SNAPSHOT_FILE};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: MemeVaultApi,
    storage_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service_contract_version: &'static str,
    api_contract_version: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "meme-vault-service")]
#[command(about = "Local HTTP service for the meme vault")]
struct Args {
    /// Directory holding `memes.json` and `original-memes.json`.
    #[arg(long, env = "MEME_VAULT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
    #[arg(long, env = "MEME_VAULT_DOCUMENT")]
    document: Option<PathBuf>,
    #[arg(long, env = "MEME_VAULT_SNAPSHOT")]
    snapshot: Option<PathBuf>,
    #[arg(long, env = "MEME_VAULT_BIND", default_value = "127.0.0.1:3001")]
    bind: SocketAddr,
    #[arg(long, env = "MEME_VAULT_STORAGE_TIMEOUT_MS", default_value_t = 5000)]
    storage_timeout_ms: u64,
    /// Run updates and resets one at a time instead of last-write-wins.
    #[arg(long, env = "MEME_VAULT_SERIALIZE_WRITES", default_value_t = false)]
    serialize_writes: bool,
    /// Built frontend to serve for every path the API does not handle.
    #[arg(long, env = "MEME_VAULT_STATIC_DIR")]
    static_dir: Option<PathBuf>,
}

impl Args {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            document_path: self.document.clone().unwrap_or_else(|| self.data_dir.join(DOCUMENT_FILE)),
            snapshot_path: self.snapshot.clone().unwrap_or_else(|| self.data_dir.join(SNAPSHOT_FILE)),
            serialize_writes: self.serialize_writes,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn not_found() -> Self {
        Self { status: StatusCode::NOT_FOUND, error: "Meme not found".to_string() }
    }

    /// Map an API failure onto a status code. `action` completes "Failed to ...".
    fn from_api(err: &anyhow::Error, action: &str) -> Self {
        if err.downcast_ref::<StoreError>().is_some_and(StoreError::is_not_found) {
            return Self::not_found();
        }
        tracing::error!(error = %format!("{err:#}"), "failed to {action}");
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, error: format!("Failed to {action}") }
    }

    fn bad_request(rejection: &JsonRejection) -> Self {
        Self { status: rejection.status(), error: rejection.body_text() }
    }
}

fn meme_routes() -> Router<ServiceState> {
    Router::new()
        .route("/memes", get(list_memes))
        .route("/memes/reset", post(reset_memes))
        .route("/memes/:id", get(get_meme).put(update_meme))
}

fn app(state: ServiceState, static_dir: Option<&FsPath>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/openapi", get(openapi))
        .merge(meme_routes())
        .nest("/api", meme_routes());

    if let Some(dir) = static_dir {
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.store_config();

    // Snapshot capture happens here, before the listener accepts any write.
    let api = MemeVaultApi::open(&config);
    let state =
        ServiceState { api, storage_timeout: Duration::from_millis(args.storage_timeout_ms) };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        bind = %args.bind,
        document = %config.document_path.display(),
        snapshot = %config.snapshot_path.display(),
        "meme vault service listening"
    );
    axum::serve(listener, app(state, args.static_dir.as_deref())).await?;
    Ok(())
}

/// Run one store call on the blocking pool, bounded by the storage timeout.
async fn with_api<T, F>(state: &ServiceState, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&MemeVaultApi) -> Result<T> + Send + 'static,
{
    let api = state.api.clone();
    let task = tokio::task::spawn_blocking(move || op(&api));
    match tokio::time::timeout(state.storage_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(anyhow!("storage task failed: {join_err}")),
        Err(_) => Err(StoreError::io(
            "storage operation timed out",
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer within {}ms", state.storage_timeout.as_millis()),
            ),
        )
        .into()),
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
    })
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn list_memes(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<MemeRecord>>, ServiceError> {
    let records = with_api(&state, MemeVaultApi::list)
        .await
        .map_err(|err| ServiceError::from_api(&err, "retrieve memes"))?;
    Ok(Json(records))
}

async fn get_meme(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<MemeRecord>, ServiceError> {
    let id = MemeId::parse(&id).ok_or_else(ServiceError::not_found)?;
    let record = with_api(&state, move |api| api.get(id))
        .await
        .map_err(|err| ServiceError::from_api(&err, "retrieve meme"))?;
    Ok(Json(record))
}

async fn update_meme(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    patch: Result<Json<MemePatch>, JsonRejection>,
) -> Result<Json<MemeRecord>, ServiceError> {
    let id = MemeId::parse(&id).ok_or_else(ServiceError::not_found)?;
    let Json(patch) = patch.map_err(|rejection| ServiceError::bad_request(&rejection))?;
    let record = with_api(&state, move |api| api.update(id, &patch))
        .await
        .map_err(|err| ServiceError::from_api(&err, "update meme"))?;
    Ok(Json(record))
}

async fn reset_memes(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<MemeRecord>>, ServiceError> {
    let records = with_api(&state, MemeVaultApi::reset)
        .await
        .map_err(|err| ServiceError::from_api(&err, "reset memes data"))?;
    Ok(Json(records))
}
