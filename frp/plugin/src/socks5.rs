//! Exposes a work connection as a SOCKS5 endpoint, delegating the protocol
//! itself to `fast-socks5` rather than re-implementing the handshake and
//! address-type parsing the original's `models/plugin/socks5.go` hand-rolls
//! in Go.

use std::sync::Arc;

use fast_socks5::server::{Config, Socks5Socket};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Socks5(#[from] fast_socks5::SocksError),
}

#[derive(Debug, Clone, Default)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

/// Runs the SOCKS5 handshake and relay over `conn` until the client's
/// session ends.
pub async fn handle<C>(conn: C, auth: &BasicAuth) -> Result<(), Error>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut config = Config::default();
    if !auth.user.is_empty() || !auth.password.is_empty() {
        config.set_authentication(fast_socks5::server::SimpleUserPassword {
            username: auth.user.clone(),
            password: auth.password.clone(),
        });
    }

    let socket = Socks5Socket::new(conn, Arc::new(config));
    let socket = socket.upgrade_to_socks5().await?;
    debug!(target = ?socket.target_addr(), "socks5 session established");
    Ok(())
}
