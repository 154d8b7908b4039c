#![allow(dead_code)]

use async_trait::async_trait;
use qnxtainer_common::chrono::Utc;
use qnxtainer_common::{
    Container, ContainerActionResponse, ContainerStatus, EndpointConfig, Image, ImageRef,
    PollingPolicy, QnxtainerError, Result, ServerSnapshot, UploadResponse,
};
use qnxtainer_sdk::Transport;
use qnxtainer_sync::{EngineSettings, InMemoryConfigStore, SyncEngine, TransportFactory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("qnxtainer_sync=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub fetch: AtomicUsize,
    pub upload: AtomicUsize,
    pub create: AtomicUsize,
    pub start_from_image: AtomicUsize,
    pub start: AtomicUsize,
    pub stop: AtomicUsize,
}

/// Scripted in-memory server.
///
/// Fetches can be gated so a test can hold a refresh in flight, and both
/// fetches and mutations can be told to fail.
#[derive(Debug)]
pub struct FakeTransport {
    pub label: String,
    pub calls: CallCounts,
    server: Mutex<ServerSnapshot>,
    next_id: AtomicUsize,
    gated: AtomicBool,
    gate: Semaphore,
    fetch_failure: Mutex<Option<String>>,
    mutation_failure: Mutex<Option<(u16, String)>>,
    mutation_delay: Mutex<Option<Duration>>,
}

impl FakeTransport {
    pub fn new(label: &str) -> Self {
        let server = ServerSnapshot {
            images: vec![Image {
                id: "img-1".to_string(),
                name: format!("{}-sensor", label),
                tag: "latest".to_string(),
                created_at: Utc::now(),
            }],
            containers: vec![Container {
                id: format!("{}-c1", label),
                name: "sensor-monitor".to_string(),
                status: ContainerStatus::Stopped,
                cpu_percent: 0.0,
                memory_mb: 0.0,
                image: Some(ImageRef::Id("img-1".to_string())),
            }],
        };
        Self {
            label: label.to_string(),
            calls: CallCounts::default(),
            server: Mutex::new(server),
            next_id: AtomicUsize::new(1),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            fetch_failure: Mutex::new(None),
            mutation_failure: Mutex::new(None),
            mutation_delay: Mutex::new(None),
        }
    }

    pub fn fetches(&self) -> usize {
        self.calls.fetch.load(Ordering::SeqCst)
    }

    pub fn server_state(&self) -> ServerSnapshot {
        self.server.lock().unwrap().clone()
    }

    /// Hold every subsequent fetch until [`FakeTransport::release`].
    pub fn hold_fetches(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1_000);
    }

    pub fn fail_fetches(&self, message: Option<&str>) {
        *self.fetch_failure.lock().unwrap() = message.map(str::to_string);
    }

    pub fn fail_mutations(&self, status: u16, message: &str) {
        *self.mutation_failure.lock().unwrap() = Some((status, message.to_string()));
    }

    /// Make every mutation take `delay` before it answers.
    pub fn slow_mutations(&self, delay: Duration) {
        *self.mutation_delay.lock().unwrap() = Some(delay);
    }

    async fn mutation_latency(&self) {
        let delay = *self.mutation_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Yield until `count` fetches have been issued.
    pub async fn wait_for_fetches(&self, count: usize) {
        for _ in 0..1_000 {
            if self.fetches() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("{}: expected {} fetches, saw {}", self.label, count, self.fetches());
    }

    fn mutation_error(&self) -> Option<QnxtainerError> {
        self.mutation_failure
            .lock()
            .unwrap()
            .clone()
            .map(|(status, message)| QnxtainerError::Remote { status, message })
    }

    fn not_found() -> QnxtainerError {
        QnxtainerError::Remote {
            status: 404,
            message: "not found".to_string(),
        }
    }

    fn set_status(
        &self,
        container_id: &str,
        status: ContainerStatus,
    ) -> Result<ContainerActionResponse> {
        let mut server = self.server.lock().unwrap();
        let container = server
            .containers
            .iter_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(Self::not_found)?;
        container.status = status;
        Ok(ContainerActionResponse {
            status: status.as_str().to_string(),
            container_id: container_id.to_string(),
        })
    }

    fn add_container(
        &self,
        image_id: &str,
        name: &str,
        status: ContainerStatus,
    ) -> Result<ContainerActionResponse> {
        let mut server = self.server.lock().unwrap();
        if server.image(image_id).is_none() {
            return Err(Self::not_found());
        }
        let id = format!("{}-new-{}", self.label, self.next_id.fetch_add(1, Ordering::SeqCst));
        server.containers.push(Container {
            id: id.clone(),
            name: name.to_string(),
            status,
            cpu_percent: 0.0,
            memory_mb: 0.0,
            image: Some(ImageRef::Id(image_id.to_string())),
        });
        Ok(ContainerActionResponse {
            status: status.as_str().to_string(),
            container_id: id,
        })
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch_state(&self) -> Result<ServerSnapshot> {
        self.calls.fetch.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(|_| QnxtainerError::Network("gate closed".to_string()))?
                .forget();
        }
        let failure = self.fetch_failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(QnxtainerError::Network(message));
        }
        Ok(self.server_state())
    }

    async fn upload_image(&self, file: Vec<u8>, name: &str, tag: &str) -> Result<UploadResponse> {
        self.calls.upload.fetch_add(1, Ordering::SeqCst);
        self.mutation_latency().await;
        if let Some(err) = self.mutation_error() {
            return Err(err);
        }
        if file.is_empty() || name.is_empty() {
            return Err(QnxtainerError::InvalidInput("empty upload".to_string()));
        }
        let tag = if tag.is_empty() { "latest" } else { tag };
        let id = format!("img-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 100);
        self.server.lock().unwrap().images.push(Image {
            id,
            name: name.to_string(),
            tag: tag.to_string(),
            created_at: Utc::now(),
        });
        Ok(UploadResponse {
            status: "uploaded".to_string(),
        })
    }

    async fn create_container(
        &self,
        image_id: &str,
        name: &str,
    ) -> Result<ContainerActionResponse> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        self.mutation_latency().await;
        if let Some(err) = self.mutation_error() {
            return Err(err);
        }
        self.add_container(image_id, name, ContainerStatus::Prepared)
    }

    async fn start_from_image(&self, image_id: &str) -> Result<ContainerActionResponse> {
        self.calls.start_from_image.fetch_add(1, Ordering::SeqCst);
        self.mutation_latency().await;
        if let Some(err) = self.mutation_error() {
            return Err(err);
        }
        self.add_container(image_id, "", ContainerStatus::Running)
    }

    async fn start(&self, container_id: &str) -> Result<ContainerActionResponse> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        self.mutation_latency().await;
        if let Some(err) = self.mutation_error() {
            return Err(err);
        }
        self.set_status(container_id, ContainerStatus::Running)
    }

    async fn stop(&self, container_id: &str) -> Result<ContainerActionResponse> {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        self.mutation_latency().await;
        if let Some(err) = self.mutation_error() {
            return Err(err);
        }
        self.set_status(container_id, ContainerStatus::Stopped)
    }
}

/// One fake server per host name.
#[derive(Debug, Default)]
pub struct FakeCluster {
    servers: Mutex<HashMap<String, Arc<FakeTransport>>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn server(&self, host: &str) -> Arc<FakeTransport> {
        self.servers
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(FakeTransport::new(host)))
            .clone()
    }

    pub fn factory(self: &Arc<Self>) -> TransportFactory {
        let cluster = self.clone();
        Arc::new(move |endpoint: &EndpointConfig| {
            Ok(cluster.server(endpoint.authority_host()) as Arc<dyn Transport>)
        })
    }
}

pub fn endpoint(host: &str) -> EndpointConfig {
    EndpointConfig::new(host, 8080)
}

pub fn polling(enabled: bool, interval_ms: u64) -> PollingPolicy {
    PollingPolicy::new(enabled, interval_ms).unwrap()
}

pub fn engine_for(
    cluster: &Arc<FakeCluster>,
    store: Arc<InMemoryConfigStore>,
    policy: PollingPolicy,
) -> SyncEngine {
    let settings = EngineSettings {
        polling: policy,
        ..EngineSettings::default()
    };
    SyncEngine::with_transport_factory(store, settings, cluster.factory()).unwrap()
}

/// Engine pointed at `host`, started, initial refresh done.
pub async fn started_engine(
    cluster: &Arc<FakeCluster>,
    host: &str,
    policy: PollingPolicy,
) -> SyncEngine {
    init_tracing();
    let store = Arc::new(InMemoryConfigStore::with_config(endpoint(host)));
    let engine = engine_for(cluster, store, policy);
    engine.start().await.unwrap();
    engine
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
