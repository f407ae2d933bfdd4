use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use frp_wire::{Login, Message};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, Mutex},
};
use tracing::{debug, info, warn};

use crate::{error::Error, manager::ControlManager};

/// Events a control session's read loop hands off to whatever owns proxy
/// registration (`frp-proxy`'s `ProxyManager`), so this crate never needs
/// to depend on it.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    NewProxy(frp_wire::NewProxy),
    CloseProxy(frp_wire::CloseProxyMsg),
}

/// The shared handle stored in the [`ControlManager`] registry and cloned
/// out to anything that needs to hand this session a work connection or
/// push an outbound control message.
pub struct ControlHandle {
    pub run_id: String,
    pub login: Login,
    pub shutdown: frp_drain::Shutdown,
    pub(crate) work_conn_tx: mpsc::Sender<frp_io::Conn>,
    pub(crate) outbound_tx: mpsc::Sender<Message>,
    /// Unix seconds of the last `Ping` seen from the client. The heartbeat
    /// loop self-closes the session once this falls too far behind —
    /// clients are the ones that ping, per spec.md §4.6.
    pub(crate) last_ping_unix: AtomicI64,
}

impl ControlHandle {
    /// Non-blocking enqueue-or-close: a work connection dialed in without
    /// room in the pool is rejected immediately rather than made to wait,
    /// matching the original server's fire-and-forget `RegisterWorkConn`.
    pub fn push_work_conn(&self, conn: frp_io::Conn) -> Result<(), Error> {
        use tokio::sync::mpsc::error::TrySendError;
        match self.work_conn_tx.try_send(conn) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::WorkConnPoolFull),
            Err(TrySendError::Closed(_)) => Err(Error::SessionClosed),
        }
    }

    /// Asks the client to open one more pooled work connection.
    pub async fn request_work_conn(&self) -> Result<(), Error> {
        self.outbound_tx
            .send(Message::ReqWorkConn(frp_wire::ReqWorkConn {}))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    pub async fn send(&self, msg: Message) -> Result<(), Error> {
        self.outbound_tx.send(msg).await.map_err(|_| Error::SessionClosed)
    }
}

pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Registers a freshly authenticated login as a control session: installs
/// it in the registry (awaiting any superseded session's full drain first),
/// then spawns the read/write/heartbeat tasks that keep it alive.
///
/// `pool_capacity` bounds the work-connection pool (`login.pool_count`,
/// clamped server-side).
pub async fn spawn<C>(
    conn: C,
    login: Login,
    manager: Arc<ControlManager>,
    heartbeat: HeartbeatConfig,
    pool_capacity: usize,
) -> (
    Arc<ControlHandle>,
    mpsc::Receiver<ControlEvent>,
    mpsc::Receiver<frp_io::Conn>,
    frp_drain::Watch,
)
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (work_conn_tx, work_conn_rx) = mpsc::channel(pool_capacity.max(1));
    let (outbound_tx, outbound_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(32);
    let shutdown = frp_drain::Shutdown::new();

    let handle = Arc::new(ControlHandle {
        run_id: login.run_id.clone(),
        login,
        shutdown,
        work_conn_tx,
        outbound_tx,
        last_ping_unix: AtomicI64::new(now_unix()),
    });

    // Registered before `manager.add` can hand this run-id's slot to any
    // later takeover, so a concurrent takeover's `drain_all()` is always
    // guaranteed to see this lane and block on it. The caller holds this
    // `Watch` for as long as this session owns any proxies and drops it
    // only once every one of them has been torn down (spec.md §3, §8 S2) —
    // otherwise a takeover's new session could register proxies under the
    // same name while this session's old ones are still being freed.
    let proxies_watch = handle.shutdown.watch("proxies").await;

    if let Some(old) = manager.add(handle.run_id.clone(), handle.clone()).await {
        info!(run_id = %handle.run_id, "awaiting previous session to drain before takeover completes");
        old.shutdown.drain_all().await;
    }

    let (reader, writer) = tokio::io::split(conn);
    let writer = Arc::new(Mutex::new(writer));

    tokio::spawn(write_loop(
        writer.clone(),
        outbound_rx,
        handle.shutdown.watch("writer").await,
    ));
    tokio::spawn(read_loop(
        reader,
        event_tx,
        handle.clone(),
        manager.clone(),
        handle.shutdown.watch("reader").await,
    ));
    tokio::spawn(heartbeat_loop(handle.clone(), manager, heartbeat));

    (handle, event_rx, work_conn_rx, proxies_watch)
}

async fn write_loop<W>(
    writer: Arc<Mutex<W>>,
    mut outbound_rx: mpsc::Receiver<Message>,
    mut watch: frp_drain::Watch,
)
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = watch.signaled() => {
                debug!("control session write loop draining");
                return;
            }
            msg = outbound_rx.recv() => {
                match msg {
                    Some(msg) => {
                        let mut w = writer.lock().await;
                        if let Err(error) = msg.write(&mut *w).await {
                            warn!(%error, "failed writing control message");
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    events: mpsc::Sender<ControlEvent>,
    handle: Arc<ControlHandle>,
    manager: Arc<ControlManager>,
    mut watch: frp_drain::Watch,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = watch.signaled() => {
                debug!(run_id = %handle.run_id, "control session read loop draining");
                break;
            }
            msg = Message::read(&mut reader) => {
                match msg {
                    Ok(Message::Ping(_ping)) => {
                        handle.last_ping_unix.store(now_unix(), Ordering::Relaxed);
                        let pong = Message::Pong(frp_wire::Pong { error: String::new() });
                        if handle.send(pong).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::NewProxy(m)) => {
                        if events.send(ControlEvent::NewProxy(m)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::CloseProxy(m)) => {
                        if events.send(ControlEvent::CloseProxy(m)).await.is_err() {
                            break;
                        }
                    }
                    Ok(other) => {
                        debug!(run_id = %handle.run_id, ?other, "unexpected message on control channel");
                    }
                    Err(error) => {
                        debug!(run_id = %handle.run_id, %error, "control connection closed");
                        break;
                    }
                }
            }
        }
    }
    manager.remove_if_current(&handle.run_id, &handle).await;
}

/// The client pings; this session only answers with `Pong` (in
/// [`read_loop`]) and tracks the last time it saw one. This loop's own job
/// is the other half of spec.md §4.6: if no `Ping` arrives within
/// `cfg.timeout`, the session gives up on the client and self-closes.
async fn heartbeat_loop(handle: Arc<ControlHandle>, manager: Arc<ControlManager>, cfg: HeartbeatConfig) {
    let mut watch = handle.shutdown.watch("heartbeat").await;
    let mut ticker = tokio::time::interval(cfg.interval);
    loop {
        tokio::select! {
            _ = watch.signaled() => {
                debug!(run_id = %handle.run_id, "heartbeat loop draining");
                return;
            }
            _ = ticker.tick() => {
                let last_seen = handle.last_ping_unix.load(Ordering::Relaxed);
                let silence = now_unix() - last_seen;
                if silence > cfg.timeout.as_secs() as i64 {
                    warn!(run_id = %handle.run_id, silence, "no heartbeat from client, dropping session");
                    manager.remove_if_current(&handle.run_id, &handle).await;
                    handle.shutdown.signal_all().await;
                    return;
                }
            }
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
