//! The session state machine (spec §4.E): terminates one inbound SSH
//! connection as a server, waits for the single exec request, and hands
//! off to whichever worker (forwarding or subprocess) this binary was
//! built to run.
//!
//! The per-connection "single producer/single consumer queue" spec §3/§9
//! describes for the first exec request is a `tokio::sync::oneshot`: the
//! `Handler` (driven by russh's own connection task) sends once when the
//! first `exec` request arrives, and `run` receives once. Any further
//! exec requests still get acknowledged (so a confused client doesn't
//! hang retrying) but have nothing left to consume them, matching spec
//! §3's "additional exec requests enqueue but are never consumed".

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use russh::server::{Auth, Msg, Session as RusshSession};
use russh::{Channel, ChannelId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::consts::AWAIT_EXEC_TIMEOUT;
use crate::stream::{ChannelEvent, ChannelStream};

/// The `__HOST__` env sentinel name (spec §4.E, §6): the negotiated,
/// non-standard protocol between this proxy and the outer SSH client's
/// `SendEnv`/`SetEnv` configuration, used to carry the dynamic forwarding
/// target in `server` mode.
pub const HOST_ENV_SENTINEL: &str = "__HOST__";

/// What to do once the single exec request has been dequeued. Data-driven
/// per spec §9 ("pass the worker as a value ... rather than parameterizing
/// by subclass") instead of one `Handler` impl per mode.
#[derive(Clone)]
pub enum WorkerKind {
    /// Open an outbound SSH session and splice it with the inbound one.
    Forward(Arc<crate::config::ProxyConfig>),
    /// Spawn `sh -c <command>` locally and splice its pipes.
    Subprocess,
}

/// Everything the `Handler` learned about the single accepted exec
/// request, bundled so the main per-connection task can build a
/// `ChannelStream` without a second round trip through the handler.
struct PendingCommand {
    channel_id: ChannelId,
    command: Vec<u8>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    handle: russh::server::Handle,
    username: Option<String>,
    env: HashMap<String, String>,
}

/// The russh server `Handler` for one connection. Lives entirely inside
/// the task russh spawns to drive the connection's wire protocol; the
/// `run` function below is the "main task" from spec §5 that blocks on
/// `exec_rx` waiting for the first exec request.
struct Handler {
    conn_id: u64,
    allow_env: bool,
    handle: Option<russh::server::Handle>,
    username: Option<String>,
    env: HashMap<String, String>,
    /// Senders for channels that are open but haven't had their event
    /// receiver claimed by an exec request yet.
    pending_rx: HashMap<ChannelId, mpsc::UnboundedReceiver<ChannelEvent>>,
    channels: HashMap<ChannelId, mpsc::UnboundedSender<ChannelEvent>>,
    exec_tx: Option<oneshot::Sender<PendingCommand>>,
}

impl Handler {
    fn new(conn_id: u64, allow_env: bool, exec_tx: oneshot::Sender<PendingCommand>) -> Handler {
        Handler {
            conn_id,
            allow_env,
            handle: None,
            username: None,
            env: HashMap::new(),
            pending_rx: HashMap::new(),
            channels: HashMap::new(),
            exec_tx: Some(exec_tx),
        }
    }
}

#[async_trait]
impl russh::server::Handler for Handler {
    type Error = anyhow::Error;

    /// Auth is unconditionally "none" (spec §3, §4.E): the proxy trusts
    /// whoever can reach its listener and merely records the requested
    /// username for later use by the forwarding worker.
    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        debug!(conn_id = self.conn_id, user, "auth-none accepted");
        self.username = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        if self.handle.is_none() {
            self.handle = Some(session.handle());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(id, tx);
        self.pending_rx.insert(id, rx);
        debug!(conn_id = self.conn_id, channel = ?id, "session channel opened");
        Ok(true)
    }

    // Port-forward, X11, and agent-forwarding channel kinds are not
    // overridden: russh's default `Handler` behavior for every
    // channel-open variant besides `channel_open_session` is to deny the
    // request, which is exactly spec §4.E's "else reject with
    // administratively-prohibited".

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        if self.allow_env {
            if variable_name == HOST_ENV_SENTINEL {
                debug!(conn_id = self.conn_id, "received __HOST__ sentinel");
                self.env.insert(variable_name.to_string(), variable_value.to_string());
            }
            session.channel_success(channel);
        } else {
            // The plain exec server has no use for env-forwarded
            // targets and rejects env requests outright (spec §4.E).
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut RusshSession,
    ) -> Result<(), Self::Error> {
        // Interactive PTY/shell channels are out of scope (spec §1).
        session.channel_failure(channel);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut RusshSession) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut RusshSession) -> Result<(), Self::Error> {
        match self.exec_tx.take() {
            Some(tx) => {
                let events = self.pending_rx.remove(&channel).unwrap_or_else(|| {
                    // Shouldn't happen: exec always follows a
                    // channel_open_session for the same id. Fall back to
                    // an already-closed receiver rather than panicking.
                    let (_tx, rx) = mpsc::unbounded_channel();
                    rx
                });
                let handle = self.handle.clone().unwrap_or_else(|| session.handle());
                let pending = PendingCommand {
                    channel_id: channel,
                    command: data.to_vec(),
                    events,
                    handle,
                    username: self.username.clone(),
                    env: self.env.clone(),
                };
                session.channel_success(channel);
                if tx.send(pending).is_err() {
                    warn!(conn_id = self.conn_id, "exec receiver already gone");
                }
            }
            None => {
                // spec §3/§4.E: at most one exec command is consumed per
                // session. This one is acknowledged so the client doesn't
                // hang, but nothing will ever read its channel events.
                warn!(conn_id = self.conn_id, "additional exec request ignored (single-shot policy)");
                session.channel_success(channel);
            }
        }
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut RusshSession) -> Result<(), Self::Error> {
        if let Some(tx) = self.channels.get(&channel) {
            let _ = tx.send(ChannelEvent::Data(data.to_vec()));
        }
        Ok(())
    }

    async fn extended_data(&mut self, channel: ChannelId, _code: u32, data: &[u8], _session: &mut RusshSession) -> Result<(), Self::Error> {
        if let Some(tx) = self.channels.get(&channel) {
            let _ = tx.send(ChannelEvent::ExtendedData(data.to_vec()));
        }
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut RusshSession) -> Result<(), Self::Error> {
        if let Some(tx) = self.channels.get(&channel) {
            let _ = tx.send(ChannelEvent::Eof);
        }
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut RusshSession) -> Result<(), Self::Error> {
        if let Some(tx) = self.channels.remove(&channel) {
            let _ = tx.send(ChannelEvent::Close);
        }
        Ok(())
    }
}

/// Runs the full session state machine over an already-accepted transport
/// (spec §4.E). `conn_id` is only used for log correlation. Errors are
/// swallowed after being logged: per spec §7, "the session state machine
/// catches all errors from its worker, runs teardown unconditionally, and
/// never re-raises into the accept loop."
pub async fn run<S>(stream: S, conn_id: u64, ssh_config: Arc<russh::server::Config>, allow_env: bool, worker: WorkerKind)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = run_inner(stream, conn_id, ssh_config, allow_env, worker).await {
        error!(conn_id, error = ?e, "session ended with error");
    }
}

async fn run_inner<S>(
    stream: S,
    conn_id: u64,
    ssh_config: Arc<russh::server::Config>,
    allow_env: bool,
    worker: WorkerKind,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // spec §3's InboundSession.startedAt, kept around purely to log
    // connection duration at teardown.
    let started_at = chrono::Utc::now();

    let (exec_tx, exec_rx) = oneshot::channel();
    let handler = Handler::new(conn_id, allow_env, exec_tx);

    crate::test_hooks::emit!("session-handshaking");
    let protocol_task = tokio::spawn(async move {
        russh::server::run_stream(ssh_config, stream, handler).await
    });

    debug!(conn_id, "awaiting single exec request");
    let pending = match tokio::time::timeout(AWAIT_EXEC_TIMEOUT, exec_rx).await {
        Ok(Ok(pending)) => pending,
        Ok(Err(_)) => {
            // The handler (and with it the whole connection) ended
            // before ever sending us an exec request, e.g. handshake
            // failure (spec §4.E HANDSHAKING -> CLOSED).
            warn!(conn_id, "connection closed before any exec request");
            let _ = protocol_task.await;
            close(conn_id, started_at);
            return Ok(());
        }
        Err(_) => {
            error!(conn_id, "client passed no commands");
            protocol_task.abort();
            crate::test_hooks::emit!("session-await-exec-timeout");
            close(conn_id, started_at);
            return Ok(());
        }
    };

    crate::test_hooks::emit!("session-running");
    let channel_id = pending.channel_id;
    let inbound = ChannelStream::new_server(pending.handle.clone(), channel_id, pending.events);
    let command = String::from_utf8_lossy(&pending.command).to_string();

    let result = crate::worker::dispatch(worker, inbound, command, pending.username, pending.env).await;

    if let Err(e) = result {
        warn!(conn_id, error = ?e, "worker returned an error");
    }

    // Teardown: close the inbound channel and transport regardless of
    // which side produced the error (spec §3, §4.E RUNNING -> CLOSED).
    let _ = pending.handle.close(channel_id).await;
    protocol_task.abort();
    close(conn_id, started_at);
    Ok(())
}

/// Every path into CLOSED (spec §4.E) logs and emits the same way,
/// whether the session ever reached RUNNING or not.
fn close(conn_id: u64, started_at: chrono::DateTime<chrono::Utc>) {
    let elapsed = chrono::Utc::now().signed_duration_since(started_at);
    debug!(conn_id, elapsed_ms = elapsed.num_milliseconds(), "session closed");
    crate::test_hooks::emit!("session-closed");
}
