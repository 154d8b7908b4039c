use crate::config_store::ConfigStore;
use crate::metrics::{MetricsSnapshot, SyncMetrics};
use crate::monitor::ConnectionMonitor;
use crate::poller::{PollTarget, Poller};
use crate::types::{EngineSettings, RefreshOutcome, SyncEvent, SyncView};
use async_trait::async_trait;
use qnxtainer_common::{
    ConnectionState, ContainerActionResponse, EndpointConfig, PollingPolicy, QnxtainerError,
    Result, ServerSnapshot, UploadResponse,
};
use qnxtainer_sdk::{ClientSettings, QnxtainerClient, Transport};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Builds the transport for an endpoint. Called once per session.
pub type TransportFactory =
    Arc<dyn Fn(&EndpointConfig) -> Result<Arc<dyn Transport>> + Send + Sync>;

/// Factory producing [`QnxtainerClient`]s with the given settings.
pub fn http_transport_factory(settings: ClientSettings) -> TransportFactory {
    Arc::new(move |endpoint: &EndpointConfig| {
        let client = QnxtainerClient::with_settings(endpoint.clone(), &settings)?;
        Ok(Arc::new(client) as Arc<dyn Transport>)
    })
}

/// Owns the cached server state and keeps it in step with the server.
///
/// Mutations run one at a time and each is followed by exactly one refresh.
/// Passive refresh comes from a background poller. Every fetch carries a
/// generation; results from a superseded session or an older generation are
/// dropped without touching the cache or the connection state.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn ConfigStore>,
    factory: TransportFactory,
    state: RwLock<SyncState>,
    loading: AtomicUsize,
    generation: AtomicU64,
    events: broadcast::Sender<SyncEvent>,
    policy: watch::Sender<PollingPolicy>,
    mutations: tokio::sync::Mutex<()>,
    poller: Mutex<Option<Poller>>,
    metrics: SyncMetrics,
}

struct SyncState {
    endpoint: EndpointConfig,
    /// Set once the endpoint came from the store or from `set_endpoint`.
    /// From then on the in-memory endpoint wins over the store.
    configured: bool,
    epoch: u64,
    session: Option<Arc<Session>>,
    snapshot: Option<Arc<ServerSnapshot>>,
    /// Newest generation whose outcome reached the cache or the monitor.
    settled_generation: u64,
    monitor: ConnectionMonitor,
}

impl SyncState {
    fn is_current(&self, session: &Session) -> bool {
        self.session.as_ref().map(|s| s.epoch) == Some(session.epoch)
    }
}

/// One transport bound to one endpoint, from start or endpoint switch until
/// the next switch or stop.
struct Session {
    epoch: u64,
    transport: Arc<dyn Transport>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
}

impl Session {
    fn new(epoch: u64, transport: Arc<dyn Transport>) -> Self {
        Self {
            epoch,
            transport,
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GuardMode {
    /// Give up if a refresh is already in flight.
    Skip,
    /// Queue behind the in-flight refresh.
    Wait,
}

struct LoadingGuard<'a> {
    inner: &'a EngineInner,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.loading.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.emit(SyncEvent::LoadingChanged(false));
        }
    }
}

impl SyncEngine {
    /// Engine talking HTTP through [`QnxtainerClient`].
    pub fn new(store: Arc<dyn ConfigStore>, settings: EngineSettings) -> Result<Self> {
        let factory = http_transport_factory(settings.client.clone());
        Self::with_transport_factory(store, settings, factory)
    }

    pub fn with_transport_factory(
        store: Arc<dyn ConfigStore>,
        settings: EngineSettings,
        factory: TransportFactory,
    ) -> Result<Self> {
        PollingPolicy::check_interval(settings.polling.interval_ms)?;
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (policy, _) = watch::channel(settings.polling);

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                factory,
                state: RwLock::new(SyncState {
                    endpoint: EndpointConfig::default(),
                    configured: false,
                    epoch: 0,
                    session: None,
                    snapshot: None,
                    settled_generation: 0,
                    monitor: ConnectionMonitor::new(),
                }),
                loading: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                events,
                policy,
                mutations: tokio::sync::Mutex::new(()),
                poller: Mutex::new(None),
                metrics: SyncMetrics::default(),
            }),
        })
    }

    /// Open a session and start polling.
    ///
    /// The first start reads the endpoint from the store; later starts keep
    /// the endpoint already in memory, including one whose persist failed.
    /// The initial refresh is awaited but its failure only lands in the
    /// connection state. Calling `start` on a running engine does nothing.
    pub async fn start(&self) -> Result<()> {
        let loaded = if self.inner.state.read().await.configured {
            None
        } else {
            Some(self.inner.store.load().await)
        };

        let (endpoint, endpoint_changed) = {
            let mut state = self.inner.state.write().await;
            if state.session.is_some() {
                debug!("sync engine already running");
                return Ok(());
            }
            let endpoint = match loaded {
                Some(loaded) if !state.configured => loaded,
                _ => state.endpoint.clone(),
            };
            let transport = (self.inner.factory)(&endpoint)?;
            state.epoch += 1;
            state.session = Some(Arc::new(Session::new(state.epoch, transport)));
            state.configured = true;

            let changed = state.endpoint != endpoint;
            if changed {
                state.endpoint = endpoint.clone();
                state.snapshot = None;
                state.monitor.reset();
            }
            (endpoint, changed)
        };

        if endpoint_changed {
            self.inner.emit(SyncEvent::EndpointChanged(endpoint.clone()));
        }
        EngineInner::respawn_poller(&self.inner);
        info!("sync engine started against {}", endpoint);

        self.initial_refresh(&endpoint).await;
        Ok(())
    }

    /// Stop polling and end the session. Results still in flight are dropped.
    pub async fn stop(&self) {
        self.inner.abort_poller();
        let ended = self.inner.state.write().await.session.take();
        if ended.is_some() {
            info!("sync engine stopped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub async fn view(&self) -> SyncView {
        let state = self.inner.state.read().await;
        SyncView {
            endpoint: state.endpoint.clone(),
            snapshot: state.snapshot.clone(),
            connection: state.monitor.state().clone(),
            loading: self.is_loading(),
            polling: self.polling(),
            running: state.session.is_some(),
        }
    }

    pub async fn snapshot(&self) -> Option<Arc<ServerSnapshot>> {
        self.inner.state.read().await.snapshot.clone()
    }

    pub async fn connection(&self) -> ConnectionState {
        self.inner.state.read().await.monitor.state().clone()
    }

    pub async fn endpoint(&self) -> EndpointConfig {
        self.inner.state.read().await.endpoint.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.read().await.session.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst) > 0
    }

    pub fn polling(&self) -> PollingPolicy {
        *self.inner.policy.borrow()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Fetch state now, unless a refresh is already in flight.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let session = self.inner.current_session().await?;
        let Some(_in_flight) = self.inner.acquire(&session, GuardMode::Skip).await else {
            return Ok(RefreshOutcome::Coalesced);
        };
        let _loading = self.inner.begin_loading();
        self.inner.fetch_locked(&session).await
    }

    pub async fn upload_image(
        &self,
        file: Vec<u8>,
        name: &str,
        tag: &str,
    ) -> Result<UploadResponse> {
        let (name, tag) = (name.to_string(), tag.to_string());
        self.mutate("upload image", move |transport| async move {
            transport.upload_image(file, &name, &tag).await
        })
        .await
    }

    pub async fn create_container(
        &self,
        image_id: &str,
        name: &str,
    ) -> Result<ContainerActionResponse> {
        let (image_id, name) = (image_id.to_string(), name.to_string());
        self.mutate("create container", move |transport| async move {
            transport.create_container(&image_id, &name).await
        })
        .await
    }

    pub async fn start_from_image(&self, image_id: &str) -> Result<ContainerActionResponse> {
        let image_id = image_id.to_string();
        self.mutate("start from image", move |transport| async move {
            transport.start_from_image(&image_id).await
        })
        .await
    }

    pub async fn start_container(&self, container_id: &str) -> Result<ContainerActionResponse> {
        let container_id = container_id.to_string();
        self.mutate("start container", move |transport| async move {
            transport.start(&container_id).await
        })
        .await
    }

    pub async fn stop_container(&self, container_id: &str) -> Result<ContainerActionResponse> {
        let container_id = container_id.to_string();
        self.mutate("stop container", move |transport| async move {
            transport.stop(&container_id).await
        })
        .await
    }

    /// Switch to another server.
    ///
    /// The endpoint is validated, its transport built and the endpoint
    /// persisted. The cache and connection state are then cleared and, when
    /// running, a new session replaces the old one and polling restarts.
    /// A failed persist is logged, not returned; the endpoint still applies
    /// for the life of this engine.
    pub async fn set_endpoint(&self, endpoint: EndpointConfig) -> Result<()> {
        endpoint.validate()?;
        let transport = (self.inner.factory)(&endpoint)?;
        if let Err(e) = self.inner.store.save(&endpoint).await {
            warn!("failed to persist endpoint {}: {}", endpoint, e);
        }

        let running = {
            let mut state = self.inner.state.write().await;
            let running = state.session.is_some();
            if running {
                state.epoch += 1;
                state.session = Some(Arc::new(Session::new(state.epoch, transport)));
            }
            state.endpoint = endpoint.clone();
            state.configured = true;
            state.snapshot = None;
            state.monitor.reset();
            running
        };

        info!("endpoint switched to {}", endpoint);
        self.inner.emit(SyncEvent::EndpointChanged(endpoint.clone()));
        self.inner.emit(SyncEvent::SnapshotCleared);
        self.inner
            .emit(SyncEvent::ConnectionChanged(ConnectionState::default()));

        if running {
            EngineInner::respawn_poller(&self.inner);
            self.initial_refresh(&endpoint).await;
        }
        Ok(())
    }

    /// Fetch state from a candidate endpoint without touching the engine.
    pub async fn probe_endpoint(&self, endpoint: &EndpointConfig) -> Result<ServerSnapshot> {
        endpoint.validate()?;
        let transport = (self.inner.factory)(endpoint)?;
        debug!("probing {}", endpoint);
        transport.fetch_state().await
    }

    pub fn set_polling_policy(&self, policy: PollingPolicy) -> Result<()> {
        PollingPolicy::check_interval(policy.interval_ms)?;
        let changed = self.inner.policy.send_if_modified(|current| {
            if *current == policy {
                return false;
            }
            *current = policy;
            true
        });
        if changed {
            info!(
                enabled = policy.enabled,
                interval_ms = policy.interval_ms,
                "polling policy changed"
            );
            self.inner.emit(SyncEvent::PollingChanged(policy));
        }
        Ok(())
    }

    pub fn set_polling_enabled(&self, enabled: bool) -> Result<()> {
        self.set_polling_policy(PollingPolicy {
            enabled,
            ..self.polling()
        })
    }

    pub fn set_polling_interval(&self, interval_ms: u64) -> Result<()> {
        self.set_polling_policy(PollingPolicy {
            interval_ms,
            ..self.polling()
        })
    }

    async fn initial_refresh(&self, endpoint: &EndpointConfig) {
        let session = match self.inner.current_session().await {
            Ok(session) => session,
            Err(_) => return,
        };
        let _loading = self.inner.begin_loading();
        if let Err(e) = self.inner.refresh_session(&session, GuardMode::Wait).await {
            warn!("initial refresh from {} failed: {}", endpoint, e);
        }
    }

    async fn mutate<T, F, Fut>(&self, name: &'static str, call: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Transport>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _serial = self.inner.mutations.lock().await;
        let session = self.inner.current_session().await?;
        let _loading = self.inner.begin_loading();
        // Held through the call and its trailing refresh.
        let _in_flight = self.inner.acquire(&session, GuardMode::Wait).await;
        self.inner.metrics.mutation();

        match call(session.transport.clone()).await {
            Ok(value) => {
                debug!("{} succeeded", name);
                self.inner.record_outcome(&session, None).await;
                if let Err(e) = self.inner.fetch_locked(&session).await {
                    warn!("refresh after {} failed, cached state is stale: {}", name, e);
                }
                Ok(value)
            }
            Err(e) => {
                warn!(kind = e.kind(), "{} failed: {}", name, e);
                if e.is_transport() {
                    self.inner.metrics.failure();
                    self.inner.record_outcome(&session, Some(&e)).await;
                }
                Err(e)
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.inner.abort_poller();
    }
}

impl EngineInner {
    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn begin_loading(&self) -> LoadingGuard<'_> {
        if self.loading.fetch_add(1, Ordering::SeqCst) == 0 {
            self.emit(SyncEvent::LoadingChanged(true));
        }
        LoadingGuard { inner: self }
    }

    async fn current_session(&self) -> Result<Arc<Session>> {
        self.state
            .read()
            .await
            .session
            .clone()
            .ok_or(QnxtainerError::NotRunning)
    }

    fn respawn_poller(this: &Arc<Self>) {
        let poller = Poller::spawn(Arc::downgrade(this), this.policy.subscribe());
        let previous = this
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(poller);
        drop(previous);
    }

    fn abort_poller(&self) {
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(previous);
    }

    /// Take the session's in-flight guard. `None` means `Skip` found it held.
    async fn acquire(&self, session: &Session, mode: GuardMode) -> Option<OwnedMutexGuard<()>> {
        match mode {
            GuardMode::Skip => match session.in_flight.clone().try_lock_owned() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    debug!("refresh already in flight, coalescing");
                    self.metrics.tick_coalesced();
                    None
                }
            },
            GuardMode::Wait => Some(session.in_flight.clone().lock_owned().await),
        }
    }

    async fn refresh_session(&self, session: &Session, mode: GuardMode) -> Result<RefreshOutcome> {
        let Some(_in_flight) = self.acquire(session, mode).await else {
            return Ok(RefreshOutcome::Coalesced);
        };
        self.fetch_locked(session).await
    }

    /// One fetch, applied or discarded. The caller holds the in-flight guard.
    async fn fetch_locked(&self, session: &Session) -> Result<RefreshOutcome> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.fetch_started();
        let result = session.transport.fetch_state().await;
        self.apply_fetch(session, generation, result).await
    }

    async fn apply_fetch(
        &self,
        session: &Session,
        generation: u64,
        result: Result<ServerSnapshot>,
    ) -> Result<RefreshOutcome> {
        let mut state = self.state.write().await;
        if !state.is_current(session) || generation <= state.settled_generation {
            drop(state);
            debug!(generation, "discarding superseded fetch result");
            self.metrics.stale_discarded();
            return Ok(RefreshOutcome::Discarded);
        }
        state.settled_generation = generation;

        match result {
            Ok(snapshot) => {
                state.snapshot = Some(Arc::new(snapshot));
                let connection_changed = state.monitor.record_success();
                let connection = state.monitor.state().clone();
                drop(state);

                self.metrics.fetch_applied();
                self.emit(SyncEvent::SnapshotReplaced { generation });
                if connection_changed {
                    self.emit(SyncEvent::ConnectionChanged(connection));
                }
                Ok(RefreshOutcome::Applied)
            }
            Err(e) => {
                let connection_changed = state.monitor.record_failure(&e);
                let connection = state.monitor.state().clone();
                drop(state);

                self.metrics.failure();
                if connection_changed {
                    self.emit(SyncEvent::ConnectionChanged(connection));
                }
                Err(e)
            }
        }
    }

    async fn record_outcome(&self, session: &Session, failure: Option<&QnxtainerError>) {
        let mut state = self.state.write().await;
        if !state.is_current(session) {
            return;
        }
        let changed = match failure {
            None => state.monitor.record_success(),
            Some(e) => state.monitor.record_failure(e),
        };
        let connection = state.monitor.state().clone();
        drop(state);

        if changed {
            self.emit(SyncEvent::ConnectionChanged(connection));
        }
    }
}

#[async_trait]
impl PollTarget for EngineInner {
    async fn poll(&self) {
        let Ok(session) = self.current_session().await else {
            return;
        };
        match self.refresh_session(&session, GuardMode::Skip).await {
            Ok(outcome) => debug!(?outcome, "poll finished"),
            Err(e) => debug!(kind = e.kind(), "poll failed: {}", e),
        }
    }
}
