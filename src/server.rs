//! The accept loop / supervisor (spec §4.H, §5): binds a TCP listener and
//! spawns one task per accepted connection to run the session state
//! machine (component E). No multiplexed draining on shutdown: an
//! interrupt signal stops the loop and drops the listener; in-flight
//! sessions are left to finish on their own (spec §5, §7).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::consts::{LISTEN_BACKLOG, REAP_POLL_DURATION};
use crate::session::WorkerKind;

/// Binds `bind_host:port` with `SO_REUSEADDR` set before bind, matching
/// `ssh_forward_proxy/__init__.py`'s `run_server`, which does the same on
/// the stdlib socket ahead of `bind` (SPEC_FULL.md §4.H).
fn bind(bind_host: &str, port: u16) -> Result<TcpSocket> {
    let ip: IpAddr = if bind_host.is_empty() { "0.0.0.0".parse().unwrap() } else { bind_host.parse().context("parsing bind host")? };
    let addr = SocketAddr::new(ip, port);

    let socket = if addr.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() }.context("creating listen socket")?;
    socket.set_reuseaddr(true).context("setting SO_REUSEADDR")?;
    socket.bind(addr).with_context(|| format!("binding {addr}"))?;
    Ok(socket)
}

/// Runs the accept loop until ctrl-c. Bind/listen failure is fatal per
/// spec §7; accept failures are logged and the loop continues.
pub async fn serve(
    bind_host: &str,
    port: u16,
    ssh_config: Arc<russh::server::Config>,
    allow_env: bool,
    worker: WorkerKind,
) -> Result<()> {
    let socket = bind(bind_host, port)?;
    let listener = socket.listen(LISTEN_BACKLOG).context("listening")?;
    info!(bind_host, port, "listening for inbound SSH connections");
    crate::test_hooks::emit!("server-about-to-listen");

    let mut live: Vec<JoinHandle<()>> = Vec::new();
    let mut reap_interval = tokio::time::interval(REAP_POLL_DURATION);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        // A random id, not a sequential counter, is good
                        // enough for log correlation and avoids any
                        // shared mutable counter across accepted
                        // connections (rand crate).
                        let conn_id: u64 = rand::random();
                        debug!(conn_id, %peer, "accepted connection");
                        let ssh_config = Arc::clone(&ssh_config);
                        let worker = worker.clone();
                        let handle = tokio::spawn(async move {
                            crate::session::run(stream, conn_id, ssh_config, allow_env, worker).await;
                        });
                        live.push(handle);
                    }
                    Err(e) => {
                        // Accept failure: logged, loop continues (spec §7).
                        error!(error = ?e, "accept failed");
                    }
                }
            }

            _ = reap_interval.tick() => {
                live.retain(|h| !h.is_finished());
                debug!(live_sessions = live.len(), "periodic liveness reap");
            }

            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, closing listener; in-flight sessions are left to finish on their own");
                break;
            }
        }
    }

    let _ = live; // tasks are detached; dropping the listener is the only required action

    Ok(())
}

/// Runs the session state machine once over a pre-established transport:
/// the relay variant (spec §2) has no accept loop at all, since the
/// "connection" is this process's own stdio, supplied once by the outer
/// SSH client's `ProxyCommand` invocation.
pub async fn serve_once<S>(stream: S, ssh_config: Arc<russh::server::Config>, allow_env: bool, worker: WorkerKind)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let conn_id: u64 = rand::random();
    crate::session::run(stream, conn_id, ssh_config, allow_env, worker).await;
    warn!(conn_id, "relay session ended");
}
