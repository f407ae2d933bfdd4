use std::{collections::HashMap, sync::Arc};

use frp_proxy::WorkConnSource;
use tokio::sync::Mutex;

use crate::config::ServerConfig;

/// What the vhost muxer needs once it has resolved a request to an
/// HTTP/HTTPS proxy by name: where to pull a work connection from, and the
/// proxy's optional basic-auth gate and Host-header rewrite (spec.md §4.7).
pub struct HttpRoute {
    pub work_conns: Arc<dyn WorkConnSource>,
    pub http_user: String,
    pub http_pwd: String,
    pub host_header_rewrite: String,
    pub use_encryption: bool,
    pub use_compression: bool,
}

/// Everything a dispatched connection needs a handle to. Cloned cheaply
/// (every field is already `Arc`-backed) into each connection's task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub control_manager: Arc<frp_control::ControlManager>,
    pub proxy_manager: Arc<frp_proxy::ProxyManager>,
    pub visitor_manager: Arc<frp_visitor::VisitorManager>,
    pub vhost_router: Arc<Mutex<frp_vhost::Router<String>>>,
    /// HTTP/HTTPS proxies don't bind their own listener (they share the
    /// vhost muxer's), so unlike `TcpProxy` they need a place to park their
    /// work-connection source (and auth/rewrite options) for the vhost
    /// accept loop to pull from by name once it has resolved a request's
    /// route.
    pub http_routes: Arc<Mutex<HashMap<String, Arc<HttpRoute>>>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            control_manager: Arc::new(frp_control::ControlManager::new()),
            proxy_manager: Arc::new(frp_proxy::ProxyManager::new()),
            visitor_manager: Arc::new(frp_visitor::VisitorManager::new()),
            vhost_router: Arc::new(Mutex::new(frp_vhost::Router::new())),
            http_routes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}
