use qnxtainer_common::{ConnectionState, EndpointConfig, PollingPolicy, ServerSnapshot};
use qnxtainer_sdk::ClientSettings;
use std::sync::Arc;

/// Change notifications published by the engine.
///
/// Subscribers that fall behind lose events; they should re-read
/// [`crate::SyncEngine::view`] after a `Lagged` error.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    SnapshotReplaced { generation: u64 },
    SnapshotCleared,
    ConnectionChanged(ConnectionState),
    LoadingChanged(bool),
    EndpointChanged(EndpointConfig),
    PollingChanged(PollingPolicy),
}

/// What happened to a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fetched snapshot replaced the cache.
    Applied,
    /// Another refresh was already in flight; nothing was fetched.
    Coalesced,
    /// The fetch completed but a newer result or session superseded it.
    Discarded,
}

/// Everything the presentation layer renders, read in one consistent pass.
#[derive(Debug, Clone)]
pub struct SyncView {
    pub endpoint: EndpointConfig,
    pub snapshot: Option<Arc<ServerSnapshot>>,
    pub connection: ConnectionState,
    pub loading: bool,
    pub polling: PollingPolicy,
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub polling: PollingPolicy,
    pub client: ClientSettings,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            polling: PollingPolicy::default(),
            client: ClientSettings::default(),
            event_capacity: 64,
        }
    }
}
