//! Uncaught-failure channel
//!
//! Errors that escape a callback's own result (a detached task panicking, a
//! body finishing after its trap gave up on it) are raised here. At most one
//! trap listens at a time; the listener is removed when its guard drops, so
//! every exit path of a trap deregisters it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::TestError;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

struct Listener {
    id: u64,
    label: String,
    tx: mpsc::UnboundedSender<TestError>,
}

/// Fault channel owned by one engine (one file)
#[derive(Clone, Default)]
pub struct FaultChannel {
    active: Arc<Mutex<Option<Listener>>>,
}

impl FaultChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a listener, replacing any previous one
    pub fn listen(&self, label: impl Into<String>) -> FaultListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        let listener = Listener {
            id,
            label: label.into(),
            tx,
        };
        *self.lock() = Some(listener);
        FaultListener {
            channel: self.clone(),
            id,
            rx,
        }
    }

    /// Deliver a fault to the active listener. Returns false if nobody was
    /// listening and the fault was dropped.
    pub fn raise(&self, error: TestError) -> bool {
        let guard = self.lock();
        match guard.as_ref() {
            Some(listener) => listener.tx.send(error).is_ok(),
            None => {
                warn!("Uncaught failure with no active trap: {}", error);
                false
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        self.lock().is_some()
    }

    /// Label of the trap currently listening
    pub fn active_label(&self) -> Option<String> {
        self.lock().as_ref().map(|l| l.label.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Listener>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FaultChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultChannel")
            .field("active", &self.active_label())
            .finish()
    }
}

/// Receiving half held by a running trap
pub struct FaultListener {
    channel: FaultChannel,
    id: u64,
    rx: mpsc::UnboundedReceiver<TestError>,
}

impl FaultListener {
    /// Wait for the next fault. Never resolves if none arrives.
    pub async fn recv(&mut self) -> TestError {
        match self.rx.recv().await {
            Some(error) => error,
            None => std::future::pending().await,
        }
    }

    /// A fault that has already been delivered, if any
    pub fn try_recv(&mut self) -> Option<TestError> {
        self.rx.try_recv().ok()
    }
}

impl Drop for FaultListener {
    fn drop(&mut self) {
        let mut guard = self.channel.lock();
        if guard.as_ref().map(|l| l.id) == Some(self.id) {
            *guard = None;
        }
    }
}
