use crate::{QnxtainerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use crate::timestamp::parse_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub tag: String,
    #[serde(with = "crate::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Image {
    /// `name:tag`, as shown in image listings.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// Image details embedded in a container record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
}

/// A container's image, either embedded by value or referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Embedded(ImageSummary),
    Id(String),
}

impl ImageRef {
    pub fn id(&self) -> &str {
        match self {
            ImageRef::Embedded(summary) => &summary.id,
            ImageRef::Id(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    /// Created but never started.
    Prepared,
    #[serde(other)]
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Prepared => "prepared",
            ContainerStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub status: ContainerStatus,
    #[serde(rename = "cpu", alias = "cpu_percent", default)]
    pub cpu_percent: f64,
    #[serde(rename = "memory", alias = "memory_mb", default)]
    pub memory_mb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
}

impl Container {
    pub fn image_id(&self) -> Option<&str> {
        self.image.as_ref().map(ImageRef::id)
    }

    /// Name to show an operator; unnamed containers get a short id.
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            return &self.name;
        }
        match self.id.char_indices().nth(8) {
            Some((end, _)) => &self.id[..end],
            None => &self.id,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

/// Everything `GET /state` reports, replaced as a whole on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub images: Vec<Image>,
    pub containers: Vec<Container>,
}

impl ServerSnapshot {
    pub fn image(&self, id: &str) -> Option<&Image> {
        self.images.iter().find(|image| image.id == id)
    }

    pub fn container(&self, id: &str) -> Option<&Container> {
        self.containers.iter().find(|container| container.id == id)
    }

    pub fn containers_for_image<'a>(
        &'a self,
        image_id: &'a str,
    ) -> impl Iterator<Item = &'a Container> + 'a {
        self.containers
            .iter()
            .filter(move |container| container.image_id() == Some(image_id))
    }

    pub fn running_count(&self) -> usize {
        self.containers.iter().filter(|c| c.is_running()).count()
    }

    pub fn stopped_count(&self) -> usize {
        self.containers
            .iter()
            .filter(|c| c.status == ContainerStatus::Stopped)
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingPolicy {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl PollingPolicy {
    pub const MIN_INTERVAL_MS: u64 = 1_000;
    pub const MAX_INTERVAL_MS: u64 = 60_000;
    pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

    pub fn new(enabled: bool, interval_ms: u64) -> Result<Self> {
        Self::check_interval(interval_ms)?;
        Ok(Self {
            enabled,
            interval_ms,
        })
    }

    pub fn check_interval(interval_ms: u64) -> Result<()> {
        if !(Self::MIN_INTERVAL_MS..=Self::MAX_INTERVAL_MS).contains(&interval_ms) {
            return Err(QnxtainerError::InvalidConfig(format!(
                "polling interval {}ms outside {}..={}ms",
                interval_ms,
                Self::MIN_INTERVAL_MS,
                Self::MAX_INTERVAL_MS
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: Self::DEFAULT_INTERVAL_MS,
        }
    }
}

/// `POST /upload-image` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
}

/// Response of every container-level mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerActionResponse {
    pub status: String,
    pub container_id: String,
}

/// Body of a non-2xx response, when the server sent one.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
