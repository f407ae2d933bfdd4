use std::{collections::HashMap, sync::Arc};

use frp_proxy::WorkConnSource;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no stcp proxy registered under name {0}")]
    NotFound(String),

    #[error("no work connection available for proxy {0}")]
    NoWorkConn(String),

    #[error(transparent)]
    Auth(#[from] frp_auth::AuthError),
}

struct Entry {
    shared_key: String,
    work_conns: Arc<dyn WorkConnSource>,
}

/// Tracks every STCP proxy's shared key and work-connection source so a
/// `NewVisitorConn` can be authenticated and paired without going through a
/// world-reachable remote port.
#[derive(Default)]
pub struct VisitorManager {
    entries: Mutex<HashMap<String, Entry>>,
}

impl VisitorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, proxy_name: String, shared_key: String, work_conns: Arc<dyn WorkConnSource>) {
        self.entries.lock().await.insert(
            proxy_name,
            Entry {
                shared_key,
                work_conns,
            },
        );
    }

    pub async fn unregister(&self, proxy_name: &str) {
        self.entries.lock().await.remove(proxy_name);
    }

    /// Authenticates `sign_key`/`timestamp` against the named proxy's
    /// shared key and pulls one pooled work connection from its owning
    /// session. The caller writes the `NewVisitorConnResp` from the
    /// `Result` before splicing the returned work connection into the
    /// visitor's stream — this method never touches the visitor's own
    /// connection.
    pub async fn new_conn(
        &self,
        proxy_name: &str,
        timestamp: i64,
        sign_key: &str,
        auth_timeout_secs: i64,
    ) -> Result<frp_io::Conn, Error> {
        let (shared_key, work_conns) = {
            let entries = self.entries.lock().await;
            let entry = entries
                .get(proxy_name)
                .ok_or_else(|| Error::NotFound(proxy_name.to_string()))?;
            (entry.shared_key.clone(), entry.work_conns.clone())
        };

        frp_auth::verify_now(&shared_key, timestamp, sign_key, auth_timeout_secs)?;

        match work_conns.take().await {
            Some(work_conn) => Ok(work_conn),
            None => {
                warn!(proxy_name, "no work connection available for visitor");
                Err(Error::NoWorkConn(proxy_name.to_string()))
            }
        }
    }
}
