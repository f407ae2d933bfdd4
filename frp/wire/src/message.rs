use serde::{Deserialize, Serialize};

/// Kind of proxy a client is requesting, carried on [`NewProxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Tcp,
    Udp,
    Http,
    Https,
    Stcp,
}

/// First message on a fresh control connection. `run_id` is empty on a
/// fresh login and non-empty when the client is asking to take over its
/// previous session after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Login {
    pub version: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub user: String,
    pub privilege_key: String,
    pub timestamp: i64,
    pub run_id: String,
    pub pool_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResp {
    pub version: String,
    pub run_id: String,
    pub server_udp_port: u16,
    /// Empty on success.
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProxy {
    pub proxy_name: String,
    pub proxy_type: ProxyKind,
    pub use_encryption: bool,
    pub use_compression: bool,
    /// TCP/UDP only.
    #[serde(default)]
    pub remote_port: u16,
    /// HTTP/HTTPS only.
    #[serde(default)]
    pub custom_domains: Vec<String>,
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub http_user: String,
    #[serde(default)]
    pub http_pwd: String,
    #[serde(default)]
    pub host_header_rewrite: String,
    /// STCP only: the shared key a visitor must present.
    #[serde(default)]
    pub sk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProxyResp {
    pub proxy_name: String,
    #[serde(default)]
    pub remote_port: u16,
    /// Empty on success.
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkConn {
    pub run_id: String,
    pub timestamp: i64,
    pub privilege_key: String,
}

/// Server asking an idle control session to open one more work connection.
/// Carries no fields; the run-id is implicit in which session sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqWorkConn {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartWorkConn {
    pub proxy_name: String,
    pub src_addr: String,
    pub src_port: u16,
    pub dst_addr: String,
    pub dst_port: u16,
    pub use_encryption: bool,
    pub use_compression: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVisitorConn {
    pub proxy_name: String,
    pub sign_key: String,
    pub timestamp: i64,
    pub use_encryption: bool,
    pub use_compression: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVisitorConnResp {
    pub proxy_name: String,
    /// Empty on success.
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Empty on success.
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpPacket {
    pub content: Vec<u8>,
    pub remote_addr: String,
    pub laddr: String,
}
