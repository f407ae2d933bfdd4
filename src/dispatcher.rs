use std::{sync::Arc, time::Duration};

use frp_io::Conn;
use frp_wire::{Message, ProxyKind};
use tracing::{debug, info, warn};

use crate::{state::AppState, work_source::PooledWorkConnSource};

/// First-message read deadline, applied before any message type is known —
/// mirrors the original server's `conn.SetReadDeadline(time.Now().Add(connReadTimeout))`.
const FIRST_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads exactly one framed message off a freshly accepted connection and
/// branches on its kind. Every branch either takes ownership of `conn` for
/// the rest of its life (Login, NewWorkConn) or responds and closes it
/// (NewVisitorConn, and Login on failure). Never blocks the accept loop:
/// the caller spawns this on its own task per connection.
pub async fn dispatch(mut conn: Conn, state: AppState) {
    let msg = match tokio::time::timeout(FIRST_MESSAGE_TIMEOUT, Message::read(&mut conn)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(error)) => {
            debug!(%error, "failed to read first message");
            return;
        }
        Err(_) => {
            debug!("timed out waiting for first message");
            return;
        }
    };

    match msg {
        Message::Login(login) => handle_login(conn, login, state).await,
        Message::NewWorkConn(m) => handle_new_work_conn(conn, m, state).await,
        Message::NewVisitorConn(m) => handle_new_visitor_conn(conn, m, state).await,
        other => {
            warn!(?other, "unexpected message kind for a fresh connection");
        }
    }
}

async fn handle_login(mut conn: Conn, login: frp_wire::Login, state: AppState) {
    info!(
        version = %login.version,
        hostname = %login.hostname,
        os = %login.os,
        arch = %login.arch,
        "client login"
    );

    if let Err(error) = frp_auth::check_version_compat(&login.version, crate::SERVER_VERSION) {
        reject_login(&mut conn, &error.to_string()).await;
        return;
    }

    if let Err(error) = frp_auth::verify(
        &state.config.privilege_token,
        login.timestamp,
        &login.privilege_key,
        now_unix(),
        state.config.auth_timeout_secs,
    ) {
        reject_login(&mut conn, &error.to_string()).await;
        return;
    }

    let mut login = login;
    if login.run_id.is_empty() {
        login.run_id = mint_run_id();
    }
    let run_id = login.run_id.clone();
    let pool_count = login.pool_count.max(1) as usize;

    let (handle, mut events, work_conn_rx, proxies_watch) = frp_control::spawn(
        conn,
        login,
        state.control_manager.clone(),
        frp_control::HeartbeatConfig {
            interval: Duration::from_secs(state.config.heartbeat_interval_secs),
            timeout: Duration::from_secs(state.config.heartbeat_timeout_secs),
        },
        pool_count,
    )
    .await;

    let work_conns = PooledWorkConnSource::new(
        handle.clone(),
        work_conn_rx,
        Duration::from_secs(state.config.work_conn_timeout_secs),
    );

    handle
        .send(Message::LoginResp(frp_wire::LoginResp {
            version: crate::SERVER_VERSION.to_string(),
            run_id: run_id.clone(),
            server_udp_port: state.config.kcp_bind_port,
            error: String::new(),
        }))
        .await
        .ok();

    let mut owned_proxies: Vec<String> = Vec::new();

    while let Some(event) = events.recv().await {
        match event {
            frp_control::ControlEvent::NewProxy(new_proxy) => {
                let name = new_proxy.proxy_name.clone();
                handle_new_proxy(new_proxy, &handle, &state, &work_conns).await;
                owned_proxies.push(name);
            }
            frp_control::ControlEvent::CloseProxy(close) => {
                owned_proxies.retain(|name| name != &close.proxy_name);
                teardown_proxy(&close.proxy_name, &state).await;
            }
        }
    }

    // The read loop exited (connection dropped, or this session lost a
    // takeover race) without an explicit `CloseProxy` for everything it
    // still owns — free it all now so a vanished client doesn't leave
    // dangling listeners or vhost routes behind.
    for name in owned_proxies {
        teardown_proxy(&name, &state).await;
    }

    // Only now is every proxy this session owned actually gone. Dropping
    // the watch releases the "proxies" lane so a takeover's `drain_all()`
    // (awaited in `frp_control::spawn` for the session replacing this one)
    // can unblock and let the new session start registering proxies of its
    // own under the same names.
    drop(proxies_watch);
}

async fn teardown_proxy(name: &str, state: &AppState) {
    state.proxy_manager.remove(name).await;
    state.visitor_manager.unregister(name).await;
    state.http_routes.lock().await.remove(name);
    let mut router = state.vhost_router.lock().await;
    router.unregister_all_for(|registered: &String| registered == name);
}

async fn handle_new_proxy(
    new_proxy: frp_wire::NewProxy,
    handle: &Arc<frp_control::ControlHandle>,
    state: &AppState,
    work_conns: &Arc<PooledWorkConnSource>,
) {
    let name = new_proxy.proxy_name.clone();
    let result: Result<u16, String> = match new_proxy.proxy_type {
        ProxyKind::Tcp => {
            match frp_proxy::TcpProxy::bind(
                name.clone(),
                state.config.proxy_bind_addr,
                new_proxy.remote_port,
                work_conns.clone(),
                new_proxy.use_encryption,
                new_proxy.use_compression,
                state.config.privilege_token.clone(),
            )
            .await
            {
                Ok(proxy) => match state.proxy_manager.add(proxy).await {
                    Ok(()) => Ok(new_proxy.remote_port),
                    Err(error) => Err(error.to_string()),
                },
                Err(error) => Err(error.to_string()),
            }
        }
        ProxyKind::Stcp => {
            state
                .visitor_manager
                .register(name.clone(), new_proxy.sk.clone(), work_conns.clone())
                .await;
            Ok(0)
        }
        ProxyKind::Http | ProxyKind::Https => {
            let mut domains: Vec<&str> = new_proxy.custom_domains.iter().map(String::as_str).collect();
            if !new_proxy.subdomain.is_empty() {
                domains.push(&new_proxy.subdomain);
            }
            {
                let mut router = state.vhost_router.lock().await;
                for domain in &domains {
                    if new_proxy.locations.is_empty() {
                        router.register(domain, "", name.clone());
                    } else {
                        for location in &new_proxy.locations {
                            router.register(domain, location, name.clone());
                        }
                    }
                }
            }
            state.http_routes.lock().await.insert(
                name.clone(),
                Arc::new(crate::state::HttpRoute {
                    work_conns: work_conns.clone(),
                    http_user: new_proxy.http_user.clone(),
                    http_pwd: new_proxy.http_pwd.clone(),
                    host_header_rewrite: new_proxy.host_header_rewrite.clone(),
                    use_encryption: new_proxy.use_encryption,
                    use_compression: new_proxy.use_compression,
                }),
            );
            Ok(0)
        }
        ProxyKind::Udp => {
            match frp_proxy::UdpProxy::bind(
                name.clone(),
                state.config.proxy_bind_addr,
                new_proxy.remote_port,
                work_conns.clone(),
            )
            .await
            {
                Ok(proxy) => match state.proxy_manager.add(proxy).await {
                    Ok(()) => Ok(new_proxy.remote_port),
                    Err(error) => Err(error.to_string()),
                },
                Err(error) => Err(error.to_string()),
            }
        }
    };

    match result {
        Ok(remote_port) => {
            let _ = handle
                .send(Message::NewProxyResp(frp_wire::NewProxyResp {
                    proxy_name: name,
                    remote_port,
                    error: String::new(),
                }))
                .await;
        }
        Err(error) => {
            let _ = handle
                .send(Message::NewProxyResp(frp_wire::NewProxyResp {
                    proxy_name: name,
                    remote_port: 0,
                    error,
                }))
                .await;
        }
    }
}

async fn handle_new_work_conn(conn: Conn, msg: frp_wire::NewWorkConn, state: AppState) {
    let Some(handle) = state.control_manager.get(&msg.run_id).await else {
        warn!(run_id = %msg.run_id, "no control session for this run id");
        return;
    };

    if frp_auth::verify(
        &state.config.privilege_token,
        msg.timestamp,
        &msg.privilege_key,
        now_unix(),
        state.config.auth_timeout_secs,
    )
    .is_err()
    {
        warn!(run_id = %msg.run_id, "work connection failed auth");
        return;
    }

    if let Err(error) = handle.push_work_conn(conn) {
        debug!(run_id = %msg.run_id, %error, "dropping work connection, pool has no room");
    }
}

async fn handle_new_visitor_conn(mut conn: Conn, msg: frp_wire::NewVisitorConn, state: AppState) {
    let result = state
        .visitor_manager
        .new_conn(
            &msg.proxy_name,
            msg.timestamp,
            &msg.sign_key,
            state.config.auth_timeout_secs,
        )
        .await;

    let error = match &result {
        Ok(_) => String::new(),
        Err(error) => error.to_string(),
    };
    let resp = Message::NewVisitorConnResp(frp_wire::NewVisitorConnResp {
        proxy_name: msg.proxy_name.clone(),
        error: error.clone(),
    });
    if let Err(write_error) = resp.write(&mut conn).await {
        debug!(%write_error, "failed writing NewVisitorConnResp");
        return;
    }

    match result {
        Ok(mut work_conn) => {
            let peer = conn.peer_addr();
            let descriptor = Message::StartWorkConn(frp_wire::StartWorkConn {
                proxy_name: msg.proxy_name.clone(),
                src_addr: peer.ip().to_string(),
                src_port: peer.port(),
                dst_addr: String::new(),
                dst_port: 0,
                use_encryption: msg.use_encryption,
                use_compression: msg.use_compression,
            });
            if let Err(error) = descriptor.write(&mut work_conn).await {
                debug!(proxy_name = %msg.proxy_name, %error, "failed writing StartWorkConn descriptor");
                return;
            }
            let work_conn = frp_proxy::wrap_tunnel(
                work_conn,
                &state.config.privilege_token,
                msg.use_encryption,
                msg.use_compression,
            );
            if let Err(error) = frp_proxy::splice(conn, work_conn).await {
                debug!(proxy_name = %msg.proxy_name, %error, "visitor splice ended with an error");
            }
        }
        Err(error) => {
            debug!(proxy_name = %msg.proxy_name, %error, "visitor connection rejected");
        }
    }
}

async fn reject_login(conn: &mut Conn, error: &str) {
    let resp = Message::LoginResp(frp_wire::LoginResp {
        version: crate::SERVER_VERSION.to_string(),
        run_id: String::new(),
        server_udp_port: 0,
        error: error.to_string(),
    });
    let _ = resp.write(conn).await;
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn mint_run_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}
