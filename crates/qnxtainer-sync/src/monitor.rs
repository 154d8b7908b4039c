use qnxtainer_common::{ConnectionState, QnxtainerError};

/// Connected/disconnected signal derived from transport outcomes.
///
/// Only transport errors move the monitor; input validation and engine state
/// errors never reached the server and say nothing about the connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMonitor {
    state: ConnectionState,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    /// Returns true when the visible state changed.
    pub fn record_success(&mut self) -> bool {
        self.replace(ConnectionState {
            connected: true,
            last_error: None,
        })
    }

    /// Returns true when the visible state changed.
    pub fn record_failure(&mut self, err: &QnxtainerError) -> bool {
        if !err.is_transport() {
            return false;
        }
        self.replace(ConnectionState {
            connected: false,
            last_error: Some(err.to_string()),
        })
    }

    pub fn reset(&mut self) -> bool {
        self.replace(ConnectionState::default())
    }

    fn replace(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return false;
        }
        self.state = next;
        true
    }
}
