//! Library half of the relay server: everything `main.rs` wires together,
//! exposed so integration tests can drive real listeners the same way a
//! client would, without going through the `frps` binary itself.

pub mod config;
pub mod dashboard;
pub mod dispatcher;
pub mod server;
pub mod state;
pub mod work_source;

/// Reported in `LoginResp` and checked against `Login.version`; mirrors the
/// original server's own minimum-compatible-client gate.
pub const SERVER_VERSION: &str = "0.52.0";
