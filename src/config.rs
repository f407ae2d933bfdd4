use std::{net::IpAddr, path::PathBuf};

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "frps", about = "Reverse-tunnel relay server")]
pub struct Cli {
    /// Path to a TOML config file. CLI flags below override its values.
    #[arg(short, long, default_value = "frps.toml")]
    pub config: PathBuf,
}

/// Everything the server needs to start, assembled once at boot and then
/// handed out by reference — not reloaded at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// 0 disables the reliable-UDP control transport.
    #[serde(default)]
    pub kcp_bind_port: u16,

    /// 0 disables the shared HTTP vhost listener.
    #[serde(default)]
    pub vhost_http_port: u16,
    /// 0 disables the shared HTTPS vhost listener.
    #[serde(default)]
    pub vhost_https_port: u16,

    /// Interface proxies bind their `remote_port` on; usually the same as
    /// `bind_addr` but kept distinct for NAT/multi-home setups.
    #[serde(default = "default_bind_addr")]
    pub proxy_bind_addr: IpAddr,

    pub privilege_token: String,

    #[serde(default)]
    pub tcp_mux: bool,

    /// Rejects a login whose timestamp is older than this; 0 disables the
    /// check. Seconds, matching the original's `AuthTimeout`.
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: i64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// How long a proxy will wait for a pooled work connection to arrive
    /// before giving up on the public stream it's trying to pair (spec.md
    /// §4.5 step 2, §8 scenario S5).
    #[serde(default = "default_work_conn_timeout")]
    pub work_conn_timeout_secs: u64,

    /// `[ADDED]` interface-only per SPEC_FULL §3; no dashboard server ships
    /// in this core.
    #[serde(default)]
    pub dashboard_port: Option<u16>,
}

fn default_bind_addr() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}
fn default_bind_port() -> u16 {
    7000
}
fn default_auth_timeout() -> i64 {
    900
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_heartbeat_timeout() -> u64 {
    90
}
fn default_work_conn_timeout() -> u64 {
    10
}

impl ServerConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let cfg: ServerConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
        Ok(cfg)
    }
}
