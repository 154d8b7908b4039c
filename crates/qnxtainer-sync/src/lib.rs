//! Client-side state synchronization for QNXtainer servers.
//!
//! [`SyncEngine`] keeps a cached [`ServerSnapshot`](qnxtainer_common::ServerSnapshot)
//! consistent with the server while the operator mutates it:
//!
//! - mutations are serialized and followed by exactly one refresh;
//! - a background [`Poller`] refreshes on a reconfigurable interval, skipping
//!   ticks while a refresh is in flight;
//! - a [`ConnectionMonitor`] turns transport outcomes into a connected flag
//!   and the last error message;
//! - the endpoint is persisted through a [`ConfigStore`].
//!
//! Observers either read [`SyncEngine::view`] or [`SyncEngine::subscribe`] to
//! a stream of [`SyncEvent`]s.

mod config_store;
mod engine;
mod metrics;
mod monitor;
mod poller;
mod types;

pub use config_store::{
    default_config_path, ConfigStore, FileConfigStore, InMemoryConfigStore, CONFIG_FILE_NAME,
};
pub use engine::{http_transport_factory, SyncEngine, TransportFactory};
pub use metrics::MetricsSnapshot;
pub use monitor::ConnectionMonitor;
pub use poller::{PollTarget, Poller};
pub use types::*;
