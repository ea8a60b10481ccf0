//! Connection state observable by the host.
//!
//! Each `connect()` starts a new *epoch*. Background tasks report through a
//! [`SessionReporter`] bound to their epoch, so a task that outlives a
//! teardown can no longer change what the host sees.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use crate::error::StreamError;

/// Signals queued for the host before new ones are dropped.
const SIGNAL_BACKLOG: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
    Faulted(StreamError),
}

impl ConnectionState {
    /// Connecting or streaming.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Streaming)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, ConnectionState::Faulted(_))
    }

    fn can_become(&self, next: &ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Streaming)
                | (
                    ConnectionState::Connecting | ConnectionState::Streaming,
                    ConnectionState::Faulted(_)
                )
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub epoch: u64,
    pub state: ConnectionState,
}

/// Current state plus the discrete signal queue.
pub struct StatusBoard {
    status: watch::Sender<SessionStatus>,
    signals_tx: flume::Sender<StreamError>,
    signals_rx: flume::Receiver<StreamError>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let (signals_tx, signals_rx) = flume::bounded(SIGNAL_BACKLOG);
        Self {
            status,
            signals_tx,
            signals_rx,
        }
    }

    pub fn current(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Receiver of `ConnectionLost`, `FrameTooLarge` and `StreamDegraded`.
    pub fn signals(&self) -> flume::Receiver<StreamError> {
        self.signals_rx.clone()
    }

    /// Unconditionally start `epoch` in `state`.
    pub(crate) fn reset(&self, epoch: u64, state: ConnectionState) {
        self.status.send_replace(SessionStatus { epoch, state });
    }

    /// Apply a lifecycle transition for `epoch`. Stale epochs and illegal
    /// transitions are ignored.
    pub fn transition(&self, epoch: u64, next: ConnectionState) -> bool {
        self.status.send_if_modified(|status| {
            if status.epoch != epoch || !status.state.can_become(&next) {
                return false;
            }
            status.state = next.clone();
            true
        })
    }

    pub fn signal(&self, epoch: u64, signal: StreamError) -> bool {
        if self.status.borrow().epoch != epoch {
            return false;
        }
        match self.signals_tx.try_send(signal) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(dropped)) => {
                warn!("Signal backlog full, dropping: {}", dropped);
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn reporter(self: &Arc<Self>, epoch: u64) -> SessionReporter {
        SessionReporter {
            board: Arc::clone(self),
            epoch,
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Epoch-scoped handle used by background tasks.
#[derive(Clone)]
pub struct SessionReporter {
    board: Arc<StatusBoard>,
    epoch: u64,
}

impl SessionReporter {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self) -> bool {
        self.board.current().epoch == self.epoch
    }

    pub fn streaming(&self) -> bool {
        self.board.transition(self.epoch, ConnectionState::Streaming)
    }

    /// Move to `Faulted` and raise the matching signal.
    pub fn fault(&self, error: StreamError) -> bool {
        let changed = self
            .board
            .transition(self.epoch, ConnectionState::Faulted(error.clone()));
        if changed {
            self.board.signal(self.epoch, error);
        }
        changed
    }

    pub fn signal(&self, signal: StreamError) -> bool {
        self.board.signal(self.epoch, signal)
    }
}
