use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use fleetota_core::protocol::{
    CatalogQuery, DownloadRequest, OrderCreated, OrderRequest, StatusReport, StatusResponse,
    is_signature_file,
};
use fleetota_core::{ReleaseId, ServerConfig, Validate};
use fleetota_crypto::{CryptoError, TrustedSigners};
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::boards::BoardRegistry;
use crate::catalog::{Catalog, ReleaseListing};
use crate::error::ServiceError;
use crate::orders::{Download, OrderManager};
use crate::upload::{ReleaseUploader, UploadBundle, UploadOutcome};

/// Multipart field whose part takes its file name from the part's filename.
const FILE_FIELD: &str = "file";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderManager>,
    pub uploader: Arc<ReleaseUploader>,
    pub catalog: Catalog,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Build the service from configuration, loading trusted keys from
    /// `{storage_dir}/keys`.
    pub fn from_config(config: &ServerConfig) -> Result<Self, CryptoError> {
        let trust = Arc::new(TrustedSigners::load_dir(&config.keys_dir())?);
        info!(signers = trust.len(), "Trusted signers loaded");
        Ok(Self::new(config, trust))
    }

    pub fn new(config: &ServerConfig, trust: Arc<TrustedSigners>) -> Self {
        let catalog = Catalog::new(&config.storage_dir);
        let boards = BoardRegistry::from_config(config);
        let orders = OrderManager::new(
            Arc::clone(&trust),
            catalog.clone(),
            boards,
            config.order_ttl(),
        )
        .with_test_mode(config.test_mode.clone());
        let uploader =
            ReleaseUploader::new(catalog.clone(), trust).with_test_mode(config.test_mode.clone());
        Self {
            orders: Arc::new(orders),
            uploader: Arc::new(uploader),
            catalog,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/status", post(report_status))
        .route("/upload", put(upload_release))
        .route(
            "/update/{board_id}",
            post(create_order)
                .put(overwrite_order)
                .get(download_release)
                .delete(confirm_install),
        )
        .route("/firmware", get(list_firmware))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    serde_json::from_slice(body).map_err(|e| ServiceError::BadRequest(e.to_string()))
}

fn bad_request(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::BadRequest(e.to_string())
}

/// Decoded multipart form: plain fields, file parts and the signature part.
#[derive(Debug, Default)]
struct Form {
    fields: HashMap<String, String>,
    files: BTreeMap<String, Bytes>,
    signature: Option<Bytes>,
}

impl Form {
    fn field(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }
}

async fn read_form(mut multipart: Multipart) -> Result<Form, ServiceError> {
    let mut form = Form::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_owned);

        if file_name.is_none() && name != FILE_FIELD && !is_signature_file(&name) {
            let value = field.text().await.map_err(bad_request)?;
            form.fields.insert(name, value);
            continue;
        }

        let name = if name == FILE_FIELD {
            file_name
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ServiceError::BadRequest("Unnamed file".into()))?
        } else {
            name
        };
        let content = field.bytes().await.map_err(bad_request)?;
        if is_signature_file(&name) {
            debug!(name = %name, "Signature part received");
            form.signature = Some(content);
        } else if form.files.insert(name.clone(), content).is_some() {
            return Err(ServiceError::BadRequest(format!("Duplicate file '{name}'")));
        }
    }
    Ok(form)
}

/// `POST /status`
async fn report_status(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ServiceError> {
    let report: StatusReport = parse_json(&body)?;
    Ok(Json(state.orders.report_status(&report).await?))
}

/// `PUT /upload`
async fn upload_release(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let form = read_form(multipart).await?;
    let bundle = UploadBundle {
        release: ReleaseId::new(form.field("firmware"), form.field("version")),
        files: form.files,
        signature: form.signature,
    };
    Ok(match state.uploader.ingest(bundle).await? {
        UploadOutcome::Stored { release, files, .. } => (
            StatusCode::CREATED,
            format!("Release {release} uploaded ({files} files)"),
        )
            .into_response(),
        UploadOutcome::DryRun { release, .. } => {
            (StatusCode::OK, format!("Test release {release} verified, dry run")).into_response()
        }
    })
}

async fn order(
    state: &AppState,
    board_id: String,
    multipart: Multipart,
    allow_overwrite: bool,
) -> Result<(StatusCode, Json<OrderCreated>), ServiceError> {
    let form = read_form(multipart).await?;
    let request = OrderRequest {
        board_id,
        firmware: form.field("firmware"),
        version: form.field("version"),
    };
    let message = form.fields.get("message").map(String::as_bytes);
    let created = state
        .orders
        .create_order(&request, form.signature.as_deref(), message, allow_overwrite)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `POST /update/{board_id}`: create, failing if an order exists.
async fn create_order(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<OrderCreated>), ServiceError> {
    order(&state, board_id, multipart, false).await
}

/// `PUT /update/{board_id}`: create or overwrite.
async fn overwrite_order(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<OrderCreated>), ServiceError> {
    order(&state, board_id, multipart, true).await
}

/// `GET /update/{board_id}`
async fn download_release(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let request: DownloadRequest = parse_json(&body)?;
    Ok(match state.orders.fetch_download(&board_id, &request).await? {
        Download::AlreadyCurrent(_) => StatusCode::NOT_MODIFIED.into_response(),
        Download::Archive { release, bytes } => (
            [
                (header::CONTENT_TYPE, "application/x-tar".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{release}.tar\""),
                ),
            ],
            bytes,
        )
            .into_response(),
    })
}

/// `DELETE /update/{board_id}`
async fn confirm_install(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    body: Bytes,
) -> Result<&'static str, ServiceError> {
    let request: DownloadRequest = parse_json(&body)?;
    state.orders.confirm_install(&board_id, &request).await?;
    Ok("Update confirmed")
}

/// `GET /firmware?firmware=..&version=..`
async fn list_firmware(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<ReleaseListing>, ServiceError> {
    query.validate()?;
    let catalog = state.catalog.clone();
    let listing = tokio::task::spawn_blocking(move || {
        catalog.list_releases(query.firmware.as_deref(), query.version.as_deref())
    })
    .await
    .map_err(|e| ServiceError::Internal(e.to_string()))??;
    Ok(Json(listing))
}
