//! Listener set: binds the control, KCP, and vhost HTTP/HTTPS sockets and
//! spawns their accept loops. Split out of `main.rs` so integration tests
//! can bind the same listeners on `127.0.0.1:0` and drive them end to end.

use std::{net::SocketAddr, panic::AssertUnwindSafe};

use frp_io::Conn;
use futures::FutureExt;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::{dispatcher, state::AppState};

pub async fn spawn_control_listener(
    state: AppState,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let addr: SocketAddr = (state.config.bind_addr, state.config.bind_port).into();
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "control listener bound");

    Ok((
        local_addr,
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(v) => v,
                    Err(error) => {
                        warn!(%error, "control accept error");
                        continue;
                    }
                };
                let state = state.clone();
                if state.config.tcp_mux {
                    tokio::spawn(catch_unwind(accept_muxed_streams(stream, peer, state)));
                } else {
                    let conn = Conn::from_tcp(stream, peer);
                    tokio::spawn(catch_unwind(dispatcher::dispatch(conn, state)));
                }
            }
        }),
    ))
}

/// With `tcp_mux` on, one physical connection from the client carries every
/// logical stream — the control session, its work connections, its visitor
/// connections — multiplexed over yamux. Each stream the multiplexer hands
/// back is dispatched exactly like a fresh accept (spec.md §4.3).
async fn accept_muxed_streams(stream: tokio::net::TcpStream, peer: SocketAddr, state: AppState) {
    let mut mux = frp_mux::Mux::new(stream, frp_mux::MuxMode::Server);
    loop {
        match mux.accept_stream().await {
            Some(Ok(substream)) => {
                let conn = Conn::from_mux(substream, peer);
                let state = state.clone();
                tokio::spawn(catch_unwind(dispatcher::dispatch(conn, state)));
            }
            Some(Err(error)) => {
                debug!(%peer, %error, "muxed control connection ended");
                return;
            }
            None => return,
        }
    }
}

pub async fn spawn_kcp_listener(
    state: AppState,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    if state.config.kcp_bind_port == 0 {
        return Ok(None);
    }
    let addr: SocketAddr = (state.config.bind_addr, state.config.kcp_bind_port).into();

    // Matches spec.md §6's bit-exact reliable-UDP tuning: stream mode,
    // write-delay on, nodelay (1, 20, 2, 1), MTU 1350, 1024/1024 window,
    // 4 MiB read/write buffers, ACK-no-delay off.
    let mut kcp_config = tokio_kcp::KcpConfig::default();
    kcp_config.nodelay = tokio_kcp::KcpNoDelayConfig {
        nodelay: true,
        interval: 20,
        resend: 2,
        nc: true,
    };
    kcp_config.mtu = 1350;
    kcp_config.wnd_size = (1024, 1024);
    kcp_config.session_expire = std::time::Duration::from_secs(90);
    kcp_config.stream = true;

    let listener = tokio_kcp::KcpListener::bind(kcp_config, addr).await?;
    info!(%addr, "kcp control listener bound");

    Ok(Some(tokio::spawn(async move {
        let mut listener = listener;
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(v) => v,
                Err(error) => {
                    warn!(%error, "kcp accept error");
                    continue;
                }
            };
            let conn = Conn::from_kcp(stream, peer);
            let state = state.clone();
            tokio::spawn(catch_unwind(dispatcher::dispatch(conn, state)));
        }
    })))
}

pub async fn spawn_vhost_http_listener(
    state: AppState,
) -> anyhow::Result<Option<(SocketAddr, tokio::task::JoinHandle<()>)>> {
    if state.config.vhost_http_port == 0 {
        return Ok(None);
    }
    let addr: SocketAddr = (state.config.bind_addr, state.config.vhost_http_port).into();
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "vhost http listener bound");

    Ok(Some((
        local_addr,
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(v) => v,
                    Err(error) => {
                        warn!(%error, "vhost http accept error");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(catch_unwind(handle_vhost_http(stream, peer, state)));
            }
        }),
    )))
}

async fn handle_vhost_http(stream: tokio::net::TcpStream, peer: SocketAddr, state: AppState) {
    let (host_and_path, mut prefixed) = match frp_vhost::detect_http(stream).await {
        Ok(v) => v,
        Err(error) => {
            warn!(%peer, %error, "failed to detect http request");
            return;
        }
    };

    let route = {
        let router = state.vhost_router.lock().await;
        let Some(proxy_name) = router.resolve(&host_and_path.host, &host_and_path.path).cloned() else {
            write_not_found(prefixed).await;
            return;
        };
        drop(router);
        state.http_routes.lock().await.get(&proxy_name).cloned()
    };

    let Some(route) = route else {
        write_not_found(prefixed).await;
        return;
    };

    if !frp_vhost::check_basic_auth(
        host_and_path.authorization.as_deref(),
        &route.http_user,
        &route.http_pwd,
    ) {
        write_unauthorized(prefixed).await;
        return;
    }

    if !route.host_header_rewrite.is_empty() {
        frp_vhost::rewrite_host_header(prefixed.prefix_mut(), &route.host_header_rewrite);
    }

    splice_vhost_request(
        prefixed,
        host_and_path.host,
        peer,
        route.work_conns.clone(),
        route.use_encryption,
        route.use_compression,
        state.config.privilege_token.clone(),
    )
    .await;
}

async fn write_not_found<I>(mut io: I)
where
    I: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;
    let _ = io
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await;
}

async fn write_unauthorized<I>(mut io: I)
where
    I: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;
    let _ = io
        .write_all(
            b"HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic realm=\"proxy\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
}

async fn splice_vhost_request<I>(
    io: I,
    host: String,
    peer: SocketAddr,
    work_conns: std::sync::Arc<dyn frp_proxy::WorkConnSource>,
    use_encryption: bool,
    use_compression: bool,
    shared_secret: String,
) where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let Some(mut work_conn) = work_conns.take().await else {
        info!(%host, %peer, "no work connection available for vhost request");
        return;
    };
    let descriptor = frp_wire::Message::StartWorkConn(frp_wire::StartWorkConn {
        proxy_name: host.clone(),
        src_addr: peer.ip().to_string(),
        src_port: peer.port(),
        dst_addr: String::new(),
        dst_port: 0,
        use_encryption,
        use_compression,
    });
    if let Err(error) = descriptor.write(&mut work_conn).await {
        warn!(%host, %error, "failed writing StartWorkConn descriptor for vhost request");
        return;
    }
    let work_conn = frp_proxy::wrap_tunnel(work_conn, &shared_secret, use_encryption, use_compression);
    if let Err(error) = frp_proxy::splice(io, work_conn).await {
        warn!(%host, %peer, %error, "vhost splice ended with an error");
    }
}

pub async fn spawn_vhost_https_listener(
    state: AppState,
) -> anyhow::Result<Option<(SocketAddr, tokio::task::JoinHandle<()>)>> {
    if state.config.vhost_https_port == 0 {
        return Ok(None);
    }
    let addr: SocketAddr = (state.config.bind_addr, state.config.vhost_https_port).into();
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "vhost https listener bound");

    Ok(Some((
        local_addr,
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(v) => v,
                    Err(error) => {
                        warn!(%error, "vhost https accept error");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(catch_unwind(handle_vhost_https(stream, peer, state)));
            }
        }),
    )))
}

async fn handle_vhost_https(stream: tokio::net::TcpStream, peer: SocketAddr, state: AppState) {
    let (sni, prefixed) = match frp_vhost::detect_sni(stream).await {
        Ok(v) => v,
        Err(error) => {
            warn!(%peer, %error, "failed to detect tls client hello sni");
            return;
        }
    };

    // The HTTPS muxer only ever sees the ClientHello; it cannot read a Basic
    // auth header or rewrite a Host line inside an encrypted session, so
    // those two route options only apply on the HTTP side.
    let route = {
        let router = state.vhost_router.lock().await;
        let Some(proxy_name) = router.resolve(&sni, "/").cloned() else {
            debug_close(prefixed).await;
            return;
        };
        drop(router);
        state.http_routes.lock().await.get(&proxy_name).cloned()
    };

    let Some(route) = route else {
        debug_close(prefixed).await;
        return;
    };

    splice_vhost_request(
        prefixed,
        sni,
        peer,
        route.work_conns.clone(),
        route.use_encryption,
        route.use_compression,
        state.config.privilege_token.clone(),
    )
    .await;
}

async fn debug_close<I>(mut io: I)
where
    I: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;
    let _ = io.shutdown().await;
}

/// Runs `fut` on the current task, converting a panic into a logged error
/// instead of taking down the whole process — every connection gets its own
/// `tokio::spawn`, so one malformed peer's bug must not touch the others.
pub async fn catch_unwind(fut: impl std::future::Future<Output = ()>) {
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        error!(%message, "connection task panicked");
    }
}
