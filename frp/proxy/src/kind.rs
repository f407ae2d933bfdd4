use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, info, warn};

use crate::{manager::ProxyHandle, splice, transform::wrap_tunnel};

/// However a proxy kind gets hold of the next work connection to pair with
/// an incoming remote-port connection: ask the owning control session for
/// one more pooled connection, then wait for it to arrive. Implemented by
/// whatever owns the `ControlHandle`/work-connection-pool receiver so this
/// crate doesn't need to depend on `frp-control`.
#[async_trait::async_trait]
pub trait WorkConnSource: Send + Sync {
    async fn take(&self) -> Option<frp_io::Conn>;
}

/// A `tcp`-kind proxy: binds `remote_port` and, for every inbound
/// connection, pairs it with one pooled work connection.
pub struct TcpProxy {
    name: String,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl TcpProxy {
    pub async fn bind(
        name: String,
        bind_addr: std::net::IpAddr,
        remote_port: u16,
        work_conns: Arc<dyn WorkConnSource>,
        use_encryption: bool,
        use_compression: bool,
        shared_secret: String,
    ) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind((bind_addr, remote_port)).await?;
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let proxy = Arc::new(Self {
            name: name.clone(),
            shutdown: shutdown_tx,
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!(proxy = %name, "tcp proxy listener shutting down");
                        return;
                    }
                    accepted = listener.accept() => {
                        let (remote, peer) = match accepted {
                            Ok(v) => v,
                            Err(error) => {
                                warn!(proxy = %name, %error, "tcp proxy accept error");
                                continue;
                            }
                        };
                        let work_conns = work_conns.clone();
                        let name = name.clone();
                        let shared_secret = shared_secret.clone();
                        tokio::spawn(async move {
                            match work_conns.take().await {
                                Some(mut work_conn) => {
                                    debug!(proxy = %name, %peer, "pairing remote connection with work connection");
                                    let descriptor = frp_wire::Message::StartWorkConn(frp_wire::StartWorkConn {
                                        proxy_name: name.clone(),
                                        src_addr: peer.ip().to_string(),
                                        src_port: peer.port(),
                                        dst_addr: String::new(),
                                        dst_port: 0,
                                        use_encryption,
                                        use_compression,
                                    });
                                    if let Err(error) = descriptor.write(&mut work_conn).await {
                                        debug!(proxy = %name, %peer, %error, "failed writing StartWorkConn descriptor");
                                        return;
                                    }
                                    let work_conn = wrap_tunnel(work_conn, &shared_secret, use_encryption, use_compression);
                                    if let Err(error) = splice::splice(remote, work_conn).await {
                                        debug!(proxy = %name, %peer, %error, "splice ended with an error");
                                    }
                                }
                                None => {
                                    info!(proxy = %name, %peer, "no work connection available, dropping remote connection");
                                }
                            }
                        });
                    }
                }
            }
        });

        Ok(proxy)
    }
}

#[async_trait::async_trait]
impl ProxyHandle for TcpProxy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// A `udp`-kind proxy: binds one UDP socket on `remote_port` and relays
/// every datagram over a single dedicated work connection, framed as
/// `UdpPacket` messages. Unlike the TCP kind there's no per-peer
/// connection to pair — `remote_addr`/`laddr` on each frame are what let
/// one tunnel carry datagrams from many external senders.
pub struct UdpProxy {
    name: String,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl UdpProxy {
    pub async fn bind(
        name: String,
        bind_addr: std::net::IpAddr,
        remote_port: u16,
        work_conns: Arc<dyn WorkConnSource>,
    ) -> std::io::Result<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind((bind_addr, remote_port)).await?);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let proxy = Arc::new(Self {
            name: name.clone(),
            shutdown: shutdown_tx,
        });

        tokio::spawn(run_udp_proxy(name, socket, work_conns, shutdown_rx));

        Ok(proxy)
    }
}

async fn run_udp_proxy(
    name: String,
    socket: Arc<UdpSocket>,
    work_conns: Arc<dyn WorkConnSource>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) {
    let local_addr = socket
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();

    loop {
        if *shutdown_rx.borrow() {
            debug!(proxy = %name, "udp proxy shutting down before acquiring a work connection");
            return;
        }

        let Some(work_conn) = work_conns.take().await else {
            warn!(proxy = %name, "no work connection available for udp proxy, retrying");
            if tokio::time::timeout(std::time::Duration::from_secs(1), shutdown_rx.changed())
                .await
                .is_ok()
            {
                return;
            }
            continue;
        };

        debug!(proxy = %name, "udp proxy acquired dedicated work connection");
        let mut work_conn = work_conn;
        let descriptor = frp_wire::Message::StartWorkConn(frp_wire::StartWorkConn {
            proxy_name: name.clone(),
            src_addr: String::new(),
            src_port: 0,
            dst_addr: String::new(),
            dst_port: 0,
            use_encryption: false,
            use_compression: false,
        });
        if let Err(error) = descriptor.write(&mut work_conn).await {
            warn!(proxy = %name, %error, "failed writing StartWorkConn descriptor for udp proxy");
            continue;
        }

        let (reader, writer) = tokio::io::split(work_conn);
        let recv_task = tokio::spawn(udp_recv_loop(
            name.clone(),
            socket.clone(),
            local_addr.clone(),
            writer,
        ));
        let send_task = tokio::spawn(udp_send_loop(name.clone(), socket.clone(), reader));

        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!(proxy = %name, "udp proxy shutting down");
                recv_task.abort();
                send_task.abort();
                return;
            }
            _ = recv_task => {
                debug!(proxy = %name, "udp proxy's inbound datagram relay ended, re-acquiring work connection");
                send_task.abort();
            }
            _ = send_task => {
                debug!(proxy = %name, "udp proxy's outbound datagram relay ended, re-acquiring work connection");
                recv_task.abort();
            }
        }
    }
}

/// Reads datagrams off the public UDP socket and frames each as a
/// `UdpPacket` message on the work connection.
async fn udp_recv_loop<W>(name: String, socket: Arc<UdpSocket>, local_addr: String, mut writer: W)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(error) => {
                warn!(proxy = %name, %error, "udp proxy recv error");
                return;
            }
        };
        let packet = frp_wire::Message::UdpPacket(frp_wire::UdpPacket {
            content: buf[..n].to_vec(),
            remote_addr: peer.to_string(),
            laddr: local_addr.clone(),
        });
        if let Err(error) = packet.write(&mut writer).await {
            debug!(proxy = %name, %error, "failed writing udp packet to work connection");
            return;
        }
    }
}

/// Reads `UdpPacket` messages off the work connection and sends their
/// content back out the public UDP socket to the packet's `remote_addr`.
async fn udp_send_loop<R>(name: String, socket: Arc<UdpSocket>, mut reader: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        let msg = match frp_wire::Message::read(&mut reader).await {
            Ok(msg) => msg,
            Err(error) => {
                debug!(proxy = %name, %error, "udp proxy work connection closed");
                return;
            }
        };
        let frp_wire::Message::UdpPacket(packet) = msg else {
            debug!(proxy = %name, "ignoring non-udp-packet message on udp work connection");
            continue;
        };
        let Ok(remote_addr) = packet.remote_addr.parse() else {
            warn!(proxy = %name, remote_addr = %packet.remote_addr, "udp packet carried an unparsable remote address");
            continue;
        };
        if let Err(error) = socket.send_to(&packet.content, remote_addr).await {
            warn!(proxy = %name, %error, "udp proxy send error");
        }
    }
}

#[async_trait::async_trait]
impl ProxyHandle for UdpProxy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
