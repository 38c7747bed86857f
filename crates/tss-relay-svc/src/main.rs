//! TSS Relay Service
//!
//! HTTP service storing keychains and transaction requests and playing the
//! Server party of every wallet.

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tss_core::api::{AddKeychainRequest, CreateKeychainRequest, SignatureShareRequest, TssApi};
use tss_core::messaging::{MessagingKey, MessagingPublicKey};
use tss_core::{Error, TxIntent};
use tss_relay::{MemoryApi, RelayStore};

/// Relay service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tss-relay-svc")]
#[command(about = "Relay service and Server party for tri-party TSS")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Hex encoded long-lived service messaging key; generated if absent
    #[arg(long, env = "TSS_SERVICE_KEY", hide_env_values = true)]
    service_key: Option<String>,

    /// Tx request TTL in seconds
    #[arg(long, default_value = "3600")]
    ttl: i64,
}

/// Application state
struct AppState {
    api: MemoryApi,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let service_key = match &args.service_key {
        Some(encoded) => MessagingKey::from_hex(encoded).context("Invalid service key")?,
        None => {
            warn!("No service key configured, generating an ephemeral one");
            MessagingKey::generate()
        }
    };

    info!(
        listen = %args.listen,
        ttl = args.ttl,
        service_key = %service_key.public_key(),
        "Starting TSS relay service"
    );

    let store = RelayStore::new(args.ttl);

    // Spawn cleanup task
    let cleanup_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = cleanup_store.cleanup();
            if removed > 0 {
                info!(removed, "Removed expired tx requests");
            }
        }
    });

    let state = Arc::new(AppState {
        api: MemoryApi::with_store(store, service_key),
    });

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v2/tss/pubkey", get(service_public_key))
        .route("/api/v2/key", post(create_keychain))
        .route("/api/v2/key/add", post(add_keychain))
        .route("/api/v2/key/:id", delete(delete_keychain))
        .route("/api/v2/wallet/:wallet_id/txrequests", post(create_tx_request))
        .route("/api/v2/txrequests/:id", get(get_tx_request))
        .route(
            "/api/v2/txrequests/:id/signatureshares",
            post(post_signature_share).delete(delete_signature_shares),
        )
        .route("/api/v2/txrequests/:id/send", post(send_tx))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Protocol error rendered as `{"error": ...}`
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.root() {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ProtocolState(_) => StatusCode::CONFLICT,
            Error::Consistency(_) | Error::Crypto(_) | Error::VerificationFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResponse {
    public_key: MessagingPublicKey,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tss-relay-svc",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn service_public_key(State(state): State<Arc<AppState>>) -> ApiResult<PublicKeyResponse> {
    let public_key = state.api.service_public_key().await?;
    Ok(Json(PublicKeyResponse { public_key }))
}

async fn create_keychain(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateKeychainRequest>,
) -> ApiResult<tss_core::Keychain> {
    Ok(Json(state.api.create_keychain(&req).await?))
}

async fn add_keychain(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddKeychainRequest>,
) -> ApiResult<tss_core::Keychain> {
    Ok(Json(state.api.add_keychain(&req).await?))
}

async fn delete_keychain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state.api.delete_keychain(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_tx_request(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<String>,
    Json(intent): Json<TxIntent>,
) -> ApiResult<tss_core::TxRequest> {
    Ok(Json(state.api.create_tx_request(&wallet_id, &intent).await?))
}

async fn get_tx_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<tss_core::TxRequest> {
    Ok(Json(state.api.get_tx_request(&id).await?))
}

async fn post_signature_share(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SignatureShareRequest>,
) -> ApiResult<tss_core::SignatureShareRecord> {
    Ok(Json(state.api.post_signature_share(&id, &req).await?))
}

async fn delete_signature_shares(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<tss_core::SignatureShareRecord>> {
    Ok(Json(state.api.delete_signature_shares(&id).await?))
}

async fn send_tx(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<tss_core::SendTxResult> {
    Ok(Json(state.api.send_tx(&id).await?))
}
