//! In-process stand-in for a QNXtainer runtime, speaking the real HTTP API.

#![allow(dead_code)]

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use qnxtainer_common::chrono::Utc;
use qnxtainer_common::{
    Container, ContainerActionResponse, ContainerStatus, EndpointConfig, Image, ImageRef,
    ImageSummary, ServerSnapshot, UploadResponse,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// What the fake saw in an upload request.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub name: String,
    pub tag: String,
}

#[derive(Debug, Default)]
pub struct Runtime {
    pub snapshot: ServerSnapshot,
    pub uploads: Vec<UploadRecord>,
    pub state_requests: usize,
    /// Answer `GET /state` with a plain-text 500.
    pub broken: bool,
}

pub type SharedRuntime = Arc<Mutex<Runtime>>;

type ApiError = (StatusCode, Json<serde_json::Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

async fn get_state(State(runtime): State<SharedRuntime>) -> Response {
    let mut runtime = runtime.lock().await;
    runtime.state_requests += 1;
    if runtime.broken {
        return (StatusCode::INTERNAL_SERVER_ERROR, "runtime crashed").into_response();
    }
    Json(runtime.snapshot.clone()).into_response()
}

async fn upload_image(
    State(runtime): State<SharedRuntime>,
    mut multipart: Multipart,
) -> ApiResult<UploadResponse> {
    let mut archive = None;
    let mut name = None;
    let mut tag = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let key = field.name().map(str::to_string);
        match key.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                archive = Some((file_name, content_type, bytes.len()));
            }
            Some(key @ ("name" | "tag")) => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                if key == "name" {
                    name = Some(value);
                } else {
                    tag = Some(value);
                }
            }
            _ => {}
        }
    }

    let (file_name, content_type, size) =
        archive.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No file provided"))?;
    let name = name.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No name provided"))?;
    let tag = tag.unwrap_or_else(|| "latest".to_string());

    let mut runtime = runtime.lock().await;
    runtime.snapshot.images.push(Image {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.clone(),
        tag: tag.clone(),
        created_at: Utc::now(),
    });
    runtime.uploads.push(UploadRecord {
        file_name,
        content_type,
        size,
        name,
        tag,
    });
    Ok(Json(UploadResponse {
        status: "uploaded".to_string(),
    }))
}

async fn create_container(
    State(runtime): State<SharedRuntime>,
    mut multipart: Multipart,
) -> ApiResult<ContainerActionResponse> {
    let mut image_id = None;
    let mut name = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let key = field.name().map(str::to_string);
        let value = field
            .text()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
        match key.as_deref() {
            Some("image_id") => image_id = Some(value),
            Some("name") => name = Some(value),
            _ => {}
        }
    }
    let image_id =
        image_id.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No image_id provided"))?;
    let name = name.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No name provided"))?;

    let mut runtime = runtime.lock().await;
    add_container(&mut runtime, &image_id, name, ContainerStatus::Prepared).map(Json)
}

async fn start_from_image(
    State(runtime): State<SharedRuntime>,
    Path(image_id): Path<String>,
) -> ApiResult<ContainerActionResponse> {
    let mut runtime = runtime.lock().await;
    add_container(&mut runtime, &image_id, String::new(), ContainerStatus::Running).map(Json)
}

async fn start_container(
    State(runtime): State<SharedRuntime>,
    Path(container_id): Path<String>,
) -> ApiResult<ContainerActionResponse> {
    set_status(&runtime, &container_id, ContainerStatus::Running).await
}

async fn stop_container(
    State(runtime): State<SharedRuntime>,
    Path(container_id): Path<String>,
) -> ApiResult<ContainerActionResponse> {
    set_status(&runtime, &container_id, ContainerStatus::Stopped).await
}

fn add_container(
    runtime: &mut Runtime,
    image_id: &str,
    name: String,
    status: ContainerStatus,
) -> Result<ContainerActionResponse, ApiError> {
    let image = runtime
        .snapshot
        .image(image_id)
        .cloned()
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Image not found"))?;
    let id = uuid::Uuid::new_v4().simple().to_string();
    let (cpu_percent, memory_mb) = match status {
        ContainerStatus::Running => (2.5, 48.0),
        _ => (0.0, 0.0),
    };
    runtime.snapshot.containers.push(Container {
        id: id.clone(),
        name,
        status,
        cpu_percent,
        memory_mb,
        image: Some(ImageRef::Embedded(ImageSummary {
            id: image.id,
            name: image.name,
            tag: image.tag,
        })),
    });
    Ok(ContainerActionResponse {
        status: status.as_str().to_string(),
        container_id: id,
    })
}

async fn set_status(
    runtime: &SharedRuntime,
    container_id: &str,
    status: ContainerStatus,
) -> ApiResult<ContainerActionResponse> {
    let mut runtime = runtime.lock().await;
    let container = runtime
        .snapshot
        .containers
        .iter_mut()
        .find(|c| c.id == container_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not found"))?;
    container.status = status;
    Ok(Json(ContainerActionResponse {
        status: status.as_str().to_string(),
        container_id: container_id.to_string(),
    }))
}

pub fn router(runtime: SharedRuntime) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/upload-image", post(upload_image))
        .route("/create-container", post(create_container))
        .route("/start-from-image/:image_id", post(start_from_image))
        .route("/start/:container_id", post(start_container))
        .route("/stop/:container_id", post(stop_container))
        .with_state(runtime)
}

pub struct FakeRuntime {
    pub endpoint: EndpointConfig,
    pub runtime: SharedRuntime,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeRuntime {
    pub async fn snapshot(&self) -> ServerSnapshot {
        self.runtime.lock().await.snapshot.clone()
    }

    pub async fn set_broken(&self, broken: bool) {
        self.runtime.lock().await.broken = broken;
    }
}

// Helper to spawn the fake runtime in background
pub async fn spawn_runtime() -> FakeRuntime {
    init_tracing();
    let runtime = SharedRuntime::default();
    let app = router(runtime.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    FakeRuntime {
        endpoint: EndpointConfig::new(addr.ip().to_string(), addr.port()),
        runtime,
        handle,
    }
}

/// An endpoint nothing listens on.
pub async fn dead_endpoint() -> EndpointConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    EndpointConfig::new("127.0.0.1", port)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,qnxtainer_sync=debug")
        .with_test_writer()
        .try_init();
}
