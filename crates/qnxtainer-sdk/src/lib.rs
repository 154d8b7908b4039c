//! # QNXtainer SDK
//!
//! Async HTTP transport for a QNXtainer server: the container runtime that
//! manages images and containers on a QNX target.
//!
//! The server exposes a small, fixed API:
//!
//! | Operation | Method & Path | Body |
//! |-----------|---------------|------|
//! | `fetch_state` | `GET /state` | - |
//! | `upload_image` | `POST /upload-image` | multipart `file`, `name`, `tag` |
//! | `create_container` | `POST /create-container` | multipart `image_id`, `name` |
//! | `start_from_image` | `POST /start-from-image/{image_id}` | - |
//! | `start` | `POST /start/{container_id}` | - |
//! | `stop` | `POST /stop/{container_id}` | - |
//!
//! ## Quick Start
//!
//! ```no_run
//! use qnxtainer_sdk::{QnxtainerClient, Transport};
//! use qnxtainer_common::EndpointConfig;
//!
//! # async fn example() -> qnxtainer_common::Result<()> {
//! let client = QnxtainerClient::new(EndpointConfig::new("10.0.0.5", 8080))?;
//!
//! let state = client.fetch_state().await?;
//! for container in &state.containers {
//!     println!("{} {}", container.display_name(), container.status.as_str());
//! }
//!
//! client.start("c42").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every call fails with one of three transport classes:
//!
//! - [`QnxtainerError::Network`]: the server could not be reached
//! - [`QnxtainerError::Remote`]: non-2xx status; the message is the server's
//!   `error` field when the body is JSON, otherwise the status code
//! - [`QnxtainerError::Protocol`]: a 2xx body that is not the expected shape
//!
//! Input is validated before any request is made and fails with
//! [`QnxtainerError::InvalidInput`]. The client never retries and keeps no
//! cache; that is the sync engine's job.

use async_trait::async_trait;
use qnxtainer_common::{
    ContainerActionResponse, EndpointConfig, ErrorBody, QnxtainerError, Result, ServerSnapshot,
    UploadResponse,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::error::Error as _;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

mod route;

pub use route::Route;

/// Tag applied to uploads that do not name one.
pub const DEFAULT_TAG: &str = "latest";

/// HTTP client settings shared by every transport the engine builds.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("qnxtainer-sdk/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// The six remote operations.
///
/// [`QnxtainerClient`] is the HTTP implementation; the sync engine only sees
/// this trait, so tests can substitute scripted transports.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_state(&self) -> Result<ServerSnapshot>;

    /// Uploads an image archive. An empty `tag` means [`DEFAULT_TAG`].
    async fn upload_image(&self, file: Vec<u8>, name: &str, tag: &str) -> Result<UploadResponse>;

    async fn create_container(&self, image_id: &str, name: &str)
        -> Result<ContainerActionResponse>;

    async fn start_from_image(&self, image_id: &str) -> Result<ContainerActionResponse>;

    async fn start(&self, container_id: &str) -> Result<ContainerActionResponse>;

    async fn stop(&self, container_id: &str) -> Result<ContainerActionResponse>;
}

/// HTTP transport bound to one endpoint.
///
/// A client is cheap to build and is replaced, never re-pointed, when the
/// operator changes the endpoint.
#[derive(Debug, Clone)]
pub struct QnxtainerClient {
    client: Client,
    endpoint: EndpointConfig,
    base_url: Url,
}

impl QnxtainerClient {
    /// Create a client with default [`ClientSettings`].
    pub fn new(endpoint: EndpointConfig) -> Result<Self> {
        Self::with_settings(endpoint, &ClientSettings::default())
    }

    /// Create a client with explicit timeout and user agent.
    ///
    /// Fails with `InvalidConfig` when the endpoint does not validate.
    pub fn with_settings(endpoint: EndpointConfig, settings: &ClientSettings) -> Result<Self> {
        endpoint.validate()?;
        let base_url = Url::parse(&endpoint.base_url()).map_err(|e| {
            QnxtainerError::InvalidConfig(format!("invalid endpoint {}: {}", endpoint, e))
        })?;
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| {
                QnxtainerError::InvalidConfig(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint,
            base_url,
        })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Absolute URL for a route, with ids encoded as single path segments.
    pub fn url_for(&self, route: Route<'_>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                QnxtainerError::InvalidConfig(format!(
                    "endpoint {} cannot carry a path",
                    url_base(&self.base_url)
                ))
            })?
            .pop_if_empty()
            .extend(route.segments());
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, route: Route<'_>, form: Option<Form>) -> Result<T> {
        let url = self.url_for(route)?;
        debug!("{} {}", route.method(), url);

        let mut request = self.client.request(route.method(), url);
        if let Some(form) = form {
            request = request.multipart(form);
        }

        let response = request.send().await.map_err(|e| network_error(route, e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| network_error(route, e))?;

        if !status.is_success() {
            let err = remote_error(status, &body);
            warn!("{} failed with status {}: {}", route.name(), status.as_u16(), err);
            return Err(err);
        }

        serde_json::from_slice(&body).map_err(|e| {
            warn!("{} returned an unexpected body: {}", route.name(), e);
            QnxtainerError::Protocol(format!("{} response: {}", route.name(), e))
        })
    }
}

#[async_trait]
impl Transport for QnxtainerClient {
    async fn fetch_state(&self) -> Result<ServerSnapshot> {
        self.send(Route::State, None).await
    }

    async fn upload_image(&self, file: Vec<u8>, name: &str, tag: &str) -> Result<UploadResponse> {
        let name = required("image name", name)?;
        let tag = match tag.trim() {
            "" => DEFAULT_TAG,
            tag => tag,
        };
        if file.is_empty() {
            return Err(QnxtainerError::InvalidInput(
                "image archive is empty".to_string(),
            ));
        }

        let archive = Part::bytes(file)
            .file_name(format!("{}-{}.tar", name, tag))
            .mime_str("application/octet-stream")
            .map_err(|e| QnxtainerError::InvalidInput(format!("image archive: {}", e)))?;
        let form = Form::new()
            .part("file", archive)
            .text("name", name.to_string())
            .text("tag", tag.to_string());

        self.send(Route::UploadImage, Some(form)).await
    }

    async fn create_container(
        &self,
        image_id: &str,
        name: &str,
    ) -> Result<ContainerActionResponse> {
        let image_id = required("image id", image_id)?;
        let name = required("container name", name)?;
        let form = Form::new()
            .text("image_id", image_id.to_string())
            .text("name", name.to_string());

        self.send(Route::CreateContainer, Some(form)).await
    }

    async fn start_from_image(&self, image_id: &str) -> Result<ContainerActionResponse> {
        let image_id = path_id("image id", image_id)?;
        self.send(Route::StartFromImage(image_id), None).await
    }

    async fn start(&self, container_id: &str) -> Result<ContainerActionResponse> {
        let container_id = path_id("container id", container_id)?;
        self.send(Route::Start(container_id), None).await
    }

    async fn stop(&self, container_id: &str) -> Result<ContainerActionResponse> {
        let container_id = path_id("container id", container_id)?;
        self.send(Route::Stop(container_id), None).await
    }
}

/// Read an image archive from disk for [`Transport::upload_image`].
pub async fn read_image_archive(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    Ok(tokio::fs::read(path).await?)
}

/// Classify a non-2xx response body.
pub fn remote_error(status: StatusCode, body: &[u8]) -> QnxtainerError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .map(|body| body.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("server responded with status {}", status.as_u16()));
    QnxtainerError::Remote {
        status: status.as_u16(),
        message,
    }
}

fn network_error(route: Route<'_>, err: reqwest::Error) -> QnxtainerError {
    let mut message = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    };
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    warn!("{} failed: {}", route.name(), message);
    QnxtainerError::Network(format!("{} failed: {}", route.name(), message))
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(QnxtainerError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(value)
}

// Ids become path segments; dot segments would be normalized away.
fn path_id<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = required(field, value)?;
    if value == "." || value == ".." {
        return Err(QnxtainerError::InvalidInput(format!("{} '{}' is not valid", field, value)));
    }
    Ok(value)
}

fn url_base(url: &Url) -> &str {
    url.as_str().trim_end_matches('/')
}
