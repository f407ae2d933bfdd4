use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::sync::Mutex;
use tracing::info;

use crate::session::ControlHandle;

/// The run-id registry. `run_id` is the identity a client presents across
/// reconnects; at most one live session may hold it at a time.
#[derive(Default)]
pub struct ControlManager {
    sessions: Mutex<HashMap<String, Arc<ControlHandle>>>,
    logins: AtomicU64,
}

impl ControlManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total successful logins (including takeovers) since the server
    /// started. The minimal stats hook the original's `StatsNewClient()`
    /// names without detailing further.
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    /// Installs `handle` under `run_id`, returning whatever session
    /// previously held that run-id. The caller is responsible for
    /// draining the returned handle (awaiting its shutdown latch) before
    /// treating the takeover as complete — mirrors the original server's
    /// `ctlManager.Add` followed by `oldCtl.allShutdown.WaitDown()`.
    pub async fn add(&self, run_id: String, handle: Arc<ControlHandle>) -> Option<Arc<ControlHandle>> {
        let mut sessions = self.sessions.lock().await;
        let old = sessions.insert(run_id.clone(), handle);
        self.logins.fetch_add(1, Ordering::Relaxed);
        if old.is_some() {
            info!(run_id, "control session taking over existing run-id");
        }
        old
    }

    pub async fn get(&self, run_id: &str) -> Option<Arc<ControlHandle>> {
        self.sessions.lock().await.get(run_id).cloned()
    }

    /// Removes `run_id` only if it still points at `handle` — a session
    /// that already lost a takeover race must not clobber its successor's
    /// registry entry when it finishes unwinding.
    pub async fn remove_if_current(&self, run_id: &str, handle: &Arc<ControlHandle>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(current) = sessions.get(run_id) {
            if Arc::ptr_eq(current, handle) {
                sessions.remove(run_id);
            }
        }
    }
}
