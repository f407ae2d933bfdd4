use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tokio::sync::Mutex;

/// A registered proxy. Each concrete proxy kind (TCP/UDP/HTTP/HTTPS/STCP)
/// owns its own listener or vhost registration; the manager only tracks
/// name uniqueness and gives callers a way to tear one down.
#[async_trait::async_trait]
pub trait ProxyHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Stops accepting new connections for this proxy and releases its
    /// remote port / vhost registration.
    async fn shutdown(&self);
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("proxy name {0} is already registered")]
    NameInUse(String),

    #[error("no proxy registered under name {0}")]
    NotFound(String),
}

#[derive(Default)]
pub struct ProxyManager {
    proxies: Mutex<HashMap<String, Arc<dyn ProxyHandle>>>,
}

impl ProxyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, handle: Arc<dyn ProxyHandle>) -> Result<(), Error> {
        let mut proxies = self.proxies.lock().await;
        if proxies.contains_key(handle.name()) {
            return Err(Error::NameInUse(handle.name().to_string()));
        }
        proxies.insert(handle.name().to_string(), handle);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ProxyHandle>> {
        self.proxies.lock().await.get(name).cloned()
    }

    /// Removes and shuts down the named proxy. A no-op (not an error) if
    /// it's already gone — `CloseProxy` can race with the control session
    /// itself tearing everything down.
    pub async fn remove(&self, name: &str) {
        let removed = self.proxies.lock().await.remove(name);
        if let Some(handle) = removed {
            handle.shutdown().await;
        }
    }

    pub async fn remove_all(&self) {
        let handles: Vec<_> = self.proxies.lock().await.drain().map(|(_, v)| v).collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str, std::sync::Arc<std::sync::atomic::AtomicBool>);

    #[async_trait::async_trait]
    impl ProxyHandle for Dummy {
        fn name(&self) -> &str {
            self.0
        }

        async fn shutdown(&self) {
            self.1.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_names() {
        let manager = ProxyManager::new();
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        manager
            .add(Arc::new(Dummy("tcp-echo", flag.clone())))
            .await
            .unwrap();
        let err = manager
            .add(Arc::new(Dummy("tcp-echo", flag.clone())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NameInUse(_)));
    }

    #[tokio::test]
    async fn remove_shuts_down_the_handle() {
        let manager = ProxyManager::new();
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        manager.add(Arc::new(Dummy("tcp-echo", flag.clone()))).await.unwrap();
        manager.remove("tcp-echo").await;
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
        assert!(manager.get("tcp-echo").await.is_none());
    }

    #[tokio::test]
    async fn remove_of_unknown_name_is_a_no_op() {
        let manager = ProxyManager::new();
        manager.remove("does-not-exist").await;
    }
}
