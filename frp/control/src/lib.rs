//! Control-session lifecycle: the run-id registry, the per-session
//! heartbeat/read/write tasks, and the work-connection pool each session
//! hands proxies dial-out connections from.

mod error;
mod manager;
mod session;

pub use error::Error;
pub use manager::ControlManager;
pub use session::{spawn, ControlEvent, ControlHandle, HeartbeatConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use frp_wire::Login;
    use std::sync::Arc;

    fn login(run_id: &str) -> Login {
        Login {
            version: "0.52.0".into(),
            hostname: "box".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            user: "alice".into(),
            privilege_key: "deadbeef".into(),
            timestamp: 1_700_000_000,
            run_id: run_id.into(),
            pool_count: 1,
        }
    }

    fn handle(run_id: &str) -> Arc<ControlHandle> {
        // Constructed directly (bypassing `spawn`) since these tests only
        // exercise the registry's bookkeeping, not the I/O tasks.
        let (work_conn_tx, _work_conn_rx) = tokio::sync::mpsc::channel(1);
        let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::channel(1);
        Arc::new(ControlHandle {
            run_id: run_id.to_string(),
            login: login(run_id),
            shutdown: frp_drain::Shutdown::new(),
            work_conn_tx,
            outbound_tx,
            last_ping_unix: std::sync::atomic::AtomicI64::new(0),
        })
    }

    #[tokio::test]
    async fn add_returns_none_for_fresh_run_id() {
        let manager = ControlManager::new();
        let h = handle("r-1");
        assert!(manager.add(h.run_id.clone(), h.clone()).await.is_none());
    }

    #[tokio::test]
    async fn add_returns_previous_session_on_takeover() {
        let manager = ControlManager::new();
        let first = handle("r-1");
        let second = handle("r-1");

        assert!(manager.add(first.run_id.clone(), first.clone()).await.is_none());
        let evicted = manager
            .add(second.run_id.clone(), second.clone())
            .await
            .expect("takeover should return the superseded session");
        assert!(Arc::ptr_eq(&evicted, &first));

        let current = manager.get("r-1").await.expect("current session present");
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn stale_session_cannot_clobber_its_successor_on_exit() {
        let manager = ControlManager::new();
        let first = handle("r-1");
        let second = handle("r-1");

        manager.add(first.run_id.clone(), first.clone()).await;
        manager.add(second.run_id.clone(), second.clone()).await;

        // The superseded session finishing its unwind must not remove the
        // registry entry that now belongs to its successor.
        manager.remove_if_current("r-1", &first).await;
        let current = manager.get("r-1").await.expect("successor must remain registered");
        assert!(Arc::ptr_eq(&current, &second));

        manager.remove_if_current("r-1", &second).await;
        assert!(manager.get("r-1").await.is_none());
    }
}
