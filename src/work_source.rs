use std::{sync::Arc, time::Duration};

use frp_proxy::WorkConnSource;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Feeds proxies from one control session's pooled work connections. Every
/// proxy owned by the same session shares this source: whichever proxy
/// needs a connection next takes whatever the client happens to have sent
/// in, and asks for one more to replace it.
pub struct PooledWorkConnSource {
    handle: Arc<frp_control::ControlHandle>,
    receiver: Mutex<tokio::sync::mpsc::Receiver<frp_io::Conn>>,
    timeout: Duration,
}

impl PooledWorkConnSource {
    pub fn new(
        handle: Arc<frp_control::ControlHandle>,
        receiver: tokio::sync::mpsc::Receiver<frp_io::Conn>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            receiver: Mutex::new(receiver),
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl WorkConnSource for PooledWorkConnSource {
    /// Asks the client for one more work connection and waits, with a
    /// deadline, for it to arrive. A late arrival past the deadline simply
    /// stays in the bounded pool for whichever `take()` asks next — the
    /// same FIFO pool the "surplus arrivals are dropped" capacity bound
    /// already guards (spec.md §4.5 "Pool: PutConn/Resource limits").
    async fn take(&self) -> Option<frp_io::Conn> {
        if let Err(error) = self.handle.request_work_conn().await {
            debug!(%error, "failed to request a replacement work connection");
        }
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(self.timeout, receiver.recv()).await {
            Ok(conn) => conn,
            Err(_) => {
                warn!(run_id = %self.handle.run_id, "timed out waiting for a work connection");
                None
            }
        }
    }
}
