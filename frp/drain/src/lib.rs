//! A takeover of a control session (spec.md §4.6) must wait for the old
//! session's independent workers — its heartbeat loop, its work-connection
//! pool, every proxy it owns — to actually stop before the new session can
//! claim the run-id. This is a composite version of the single-latch
//! drain pattern: one named sub-latch per worker, so the coordinator can
//! wait on the whole set without each worker needing to know about the
//! others.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{mpsc, watch, Mutex};

#[derive(Clone, Default)]
pub struct Shutdown {
    lanes: Arc<Mutex<HashMap<String, Lane>>>,
}

struct Lane {
    signal: watch::Sender<bool>,
    release_tx: mpsc::Sender<()>,
    release_rx: mpsc::Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new named sub-latch and returns the handle its worker
    /// holds for the rest of its life. Calling this again with the same
    /// name after the first watch has been dropped starts a fresh lane.
    pub async fn watch(&self, name: impl Into<String>) -> Watch {
        let name = name.into();
        let (signal_tx, signal_rx) = watch::channel(false);
        let (release_tx, release_rx) = mpsc::channel(1);
        let mut lanes = self.lanes.lock().await;
        lanes.insert(
            name,
            Lane {
                signal: signal_tx,
                release_tx: release_tx.clone(),
                release_rx,
            },
        );
        Watch {
            signal: signal_rx,
            _release: release_tx,
        }
    }

    /// Tells every registered lane to stop accepting new work, without
    /// waiting for any of them to finish.
    pub async fn signal_all(&self) {
        let lanes = self.lanes.lock().await;
        for lane in lanes.values() {
            let _ = lane.signal.send(true);
        }
    }

    /// Signals every lane and waits until each one's `Watch` (and every
    /// clone of its release sender) has been dropped. Equivalent to the
    /// original server's `allShutdown.WaitDown()` call before a takeover
    /// completes.
    pub async fn drain_all(&self) {
        self.signal_all().await;
        let mut lanes = self.lanes.lock().await;
        for lane in lanes.values_mut() {
            drop_owned_sender(lane);
            // `recv` resolves once every clone of `release_tx` (including
            // the one each `Watch` holds) has been dropped.
            let _ = lane.release_rx.recv().await;
        }
    }
}

fn drop_owned_sender(lane: &mut Lane) {
    // The lane keeps its own clone only so `watch()` can hand out further
    // clones later; drop it here so the count can reach zero.
    let (placeholder, _rx) = mpsc::channel(1);
    let _ = std::mem::replace(&mut lane.release_tx, placeholder);
}

/// A single worker's view of a [`Shutdown`] lane.
pub struct Watch {
    signal: watch::Receiver<bool>,
    _release: mpsc::Sender<()>,
}

impl Watch {
    pub fn is_draining(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once the coordinator has called `signal_all`/`drain_all`.
    pub async fn signaled(&mut self) {
        if *self.signal.borrow() {
            return;
        }
        let _ = self.signal.changed().await;
    }
}

impl Clone for Watch {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            _release: self._release.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn watch_observes_signal() {
        let shutdown = Shutdown::new();
        let mut watch = shutdown.watch("heartbeat").await;
        assert!(!watch.is_draining());
        shutdown.signal_all().await;
        watch.signaled().await;
        assert!(watch.is_draining());
    }

    #[tokio::test]
    async fn drain_all_waits_for_every_lane_to_release() {
        let shutdown = Shutdown::new();
        let watch_a = shutdown.watch("work-conn-pool").await;
        let watch_b = shutdown.watch("proxies").await;

        let shutdown2 = shutdown.clone();
        let drained = tokio::spawn(async move {
            shutdown2.drain_all().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drained.is_finished());

        drop(watch_a);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drained.is_finished());

        drop(watch_b);
        tokio::time::timeout(Duration::from_millis(200), drained)
            .await
            .expect("drain_all should finish once all watches are dropped")
            .unwrap();
    }
}
