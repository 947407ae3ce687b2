//! The stream abstraction (spec §4.C): a uniform read/write interface over
//! an SSH channel, a local subprocess's pipes, and the StdSocket adapter,
//! with stdout/stderr kept distinct.
//!
//! The original draws these three variants from a common base class; a
//! sum type fits Rust better (spec §9), so `Stream` is a three-armed enum
//! rather than a trait object hierarchy.
//!
//! russh's client and server roles expose channel I/O differently: a
//! client-side `Channel<Msg>` is a pull interface (`channel.wait()` yields
//! the next message), while a server-side channel is *pushed into* by the
//! `Handler::data`/`extended_data`/`channel_eof` callbacks as the shared
//! connection task parses frames off the wire. `ChannelStream` hides that
//! asymmetry behind one read/write surface so the pump (component D) never
//! has to know which side of the rendezvous it's pumping.

use anyhow::Result;
use russh::{Channel, ChannelId, ChannelMsg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc;

use crate::stdsocket::StdSocket;

/// Which direction of a stream a read/write call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Stdout,
    Stderr,
}

/// The concrete `StdSocket` instantiation used when it appears as a pump
/// endpoint: this process's own stdio. Per the redesign note in spec §9,
/// the relay variant's *transport* (the raw bytes the SSH library parses
/// the wire protocol out of) is attached directly via `tokio::io::join` on
/// stdin/stdout rather than going through this adapter — this variant
/// exists for the cases upstream code still wants a `Stream`-shaped handle
/// onto stdio (e.g. tests exercising the StdSocket contract in isolation).
pub type StdSocketStream = StdSocket<tokio::io::Stdin, tokio::io::Stdout>;

/// One endpoint of a pump (spec §4.C). Streams are *views* onto
/// channels/pipes they don't own; closing the underlying resource is the
/// session's job during teardown, not the Stream's.
pub enum Stream {
    /// Wraps one SSH channel, server- or client-side (see module docs).
    Channel(ChannelStream),
    /// Wraps a local child process's three OS pipes.
    Process(ProcessStream),
    /// Wraps this process's own stdin/stdout (the relay variant).
    StdSocket(StdSocketStream),
}

impl Stream {
    pub async fn read(&mut self, kind: Kind, n: usize) -> Result<Vec<u8>> {
        match self {
            Stream::Channel(c) => c.read(kind, n).await,
            Stream::Process(p) => p.read(kind, n).await,
            Stream::StdSocket(s) => s.read(kind, n).await,
        }
    }

    /// Pulls the next chunk off *either* direction, whichever is ready
    /// first, instead of pulling one direction to completion before even
    /// starting the other (spec §4.D: the pump waits on the union of both
    /// directions' readiness, not on them serially). `stdout_done`/
    /// `stderr_done` tell the callee which directions are already known
    /// exhausted, so it doesn't bother polling them again.
    pub async fn read_output(&mut self, n: usize, stdout_done: bool, stderr_done: bool) -> Result<StreamEvent> {
        match self {
            Stream::Channel(c) => c.read_output(n).await,
            Stream::Process(p) => p.read_output(n, stdout_done, stderr_done).await,
            Stream::StdSocket(s) => s.read_output(n).await,
        }
    }

    pub async fn write(&mut self, kind: Kind, data: &[u8]) -> Result<()> {
        match self {
            Stream::Channel(c) => c.write(kind, data).await,
            Stream::Process(p) => p.write(kind, data).await,
            Stream::StdSocket(s) => s.write(kind, data).await,
        }
    }

    /// Teardown hook for the subprocess worker (spec §4.G step 4): drops
    /// the child's stdin handle if this is a `Process` stream. No-op for
    /// the other two variants, whose teardown is handled elsewhere.
    pub fn close_process_stdin(&mut self) {
        if let Stream::Process(p) = self {
            p.close_stdin();
        }
    }
}

/// Events the server-side `Handler` callbacks forward into a `ChannelStream`
/// so that reads of an inbound (server-role) channel look pull-based too.
pub enum ChannelEvent {
    Data(Vec<u8>),
    ExtendedData(Vec<u8>),
    Eof,
    Close,
}

/// Result of a `read_output` call (spec §4.D): either a chunk for one
/// direction, that direction alone running dry, or — for a channel, where
/// both directions share a single underlying source — both at once.
pub enum StreamEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    StdoutEof,
    StderrEof,
    BothEof,
}

enum Source {
    /// Inbound channel: we're the SSH server. Writes go through a cloned
    /// `server::Handle`; reads drain an mpsc fed by the connection
    /// `Handler`'s push-based callbacks.
    Server { handle: russh::server::Handle, id: ChannelId, rx: mpsc::UnboundedReceiver<ChannelEvent> },
    /// Outbound channel: we're the SSH client talking to the upstream
    /// target. Both reads and writes go straight through the `Channel`.
    Client(Channel<russh::client::Msg>),
}

/// A view onto a single SSH channel (spec §4.C). Maintains small per-kind
/// buffers so that a single underlying message (which may carry more bytes
/// than the caller asked for) can be drained across multiple `read` calls.
pub struct ChannelStream {
    source: Source,
    pending_stdout: Vec<u8>,
    pending_stderr: Vec<u8>,
    eof: bool,
    closed: bool,
    exit_status: Option<u32>,
}

impl ChannelStream {
    pub fn new_server(handle: russh::server::Handle, id: ChannelId, rx: mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelStream {
        ChannelStream {
            source: Source::Server { handle, id, rx },
            pending_stdout: Vec::new(),
            pending_stderr: Vec::new(),
            eof: false,
            closed: false,
            exit_status: None,
        }
    }

    pub fn new_client(channel: Channel<russh::client::Msg>) -> ChannelStream {
        ChannelStream {
            source: Source::Client(channel),
            pending_stdout: Vec::new(),
            pending_stderr: Vec::new(),
            eof: false,
            closed: false,
            exit_status: None,
        }
    }

    /// Pulls the next chunk of bytes for `kind`, up to `n`. Empty bytes
    /// means that direction is exhausted (spec §4.C); callers (the pump)
    /// must treat a spurious empty read as "mark done on that side", not a
    /// hard error.
    pub async fn read(&mut self, kind: Kind, n: usize) -> Result<Vec<u8>> {
        loop {
            let pending = match kind {
                Kind::Stdout => &mut self.pending_stdout,
                Kind::Stderr => &mut self.pending_stderr,
            };
            if !pending.is_empty() {
                let take = n.min(pending.len());
                return Ok(pending.drain(..take).collect());
            }
            if self.eof {
                return Ok(Vec::new());
            }
            if !self.fill_once().await? {
                self.eof = true;
                return Ok(Vec::new());
            }
        }
    }

    /// Pulls one event off the underlying source, stashing it into the
    /// appropriate pending buffer. Returns `false` once the source is
    /// exhausted (Eof/Close/channel stream ended).
    async fn fill_once(&mut self) -> Result<bool> {
        match &mut self.source {
            Source::Server { rx, .. } => match rx.recv().await {
                Some(ChannelEvent::Data(d)) => {
                    self.pending_stdout.extend(d);
                    Ok(true)
                }
                Some(ChannelEvent::ExtendedData(d)) => {
                    self.pending_stderr.extend(d);
                    Ok(true)
                }
                Some(ChannelEvent::Close) => {
                    self.closed = true;
                    Ok(false)
                }
                Some(ChannelEvent::Eof) | None => Ok(false),
            },
            Source::Client(channel) => match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    self.pending_stdout.extend_from_slice(&data);
                    Ok(true)
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    self.pending_stderr.extend_from_slice(&data);
                    Ok(true)
                }
                Some(ChannelMsg::ExtendedData { .. }) => Ok(true), // unknown ext stream, drop and keep polling
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_status = Some(exit_status);
                    Ok(true)
                }
                Some(ChannelMsg::Close) => {
                    self.closed = true;
                    Ok(false)
                }
                Some(ChannelMsg::Eof) | None => Ok(false),
                Some(_) => Ok(true), // other channel requests we don't model; keep polling
            },
        }
    }

    /// Pulls the next available chunk for *either* direction (spec §4.D):
    /// unlike `read`, this never blocks on one direction while the other
    /// already has data or has already gone quiet. A `ChannelStream` has a
    /// single underlying event source feeding both directions, so once that
    /// source is exhausted both directions are exhausted together
    /// (`StreamEvent::BothEof`) — there's no way for stdout to EOF on its
    /// own while stderr keeps flowing on a single SSH channel.
    pub async fn read_output(&mut self, n: usize) -> Result<StreamEvent> {
        loop {
            if !self.pending_stdout.is_empty() {
                let take = n.min(self.pending_stdout.len());
                return Ok(StreamEvent::Stdout(self.pending_stdout.drain(..take).collect()));
            }
            if !self.pending_stderr.is_empty() {
                let take = n.min(self.pending_stderr.len());
                return Ok(StreamEvent::Stderr(self.pending_stderr.drain(..take).collect()));
            }
            if self.eof {
                return Ok(StreamEvent::BothEof);
            }
            if !self.fill_once().await? {
                self.eof = true;
                return Ok(StreamEvent::BothEof);
            }
        }
    }

    /// Whether a `CHANNEL_CLOSE` (not merely `CHANNEL_EOF`) has been
    /// observed on this channel. Distinct from `eof`: a well-behaved client
    /// sends EOF after writing all its input but still expects output and
    /// an exit status back, so `eof` alone doesn't mean the channel is gone
    /// (spec §4.G step 3; spec §8 scenario #1).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn write(&mut self, kind: Kind, data: &[u8]) -> Result<()> {
        // Writes MUST tolerate a broken-pipe/closed-channel condition by
        // silently returning (spec §4.C): the remote side having given up
        // is equivalent to "done" for the pump, not an error.
        match &mut self.source {
            Source::Server { handle, id, .. } => {
                let res = match kind {
                    Kind::Stdout => handle.data(*id, data.to_vec().into()).await,
                    Kind::Stderr => handle.extended_data(*id, 1, data.to_vec().into()).await,
                };
                let _ = res;
            }
            Source::Client(channel) => {
                let res = match kind {
                    Kind::Stdout => channel.data(data).await,
                    Kind::Stderr => channel.extended_data(data, 1).await,
                };
                let _ = res;
            }
        }
        Ok(())
    }

    /// Exit status observed on an outbound (client-role) channel, if any
    /// `ChannelMsg::ExitStatus` has been read so far. Only meaningful after
    /// the pump has drained the channel (spec §4.F step 5).
    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    /// Sends an exit-status message on an inbound (server-role) channel.
    /// No-op on a client-role channel, which only ever observes exit
    /// status rather than producing it (spec §3: "Exit status is
    /// propagated to the inbound channel if and only if the worker
    /// observed an exit status from its downstream").
    pub async fn send_exit_status(&mut self, status: u32) {
        if let Source::Server { handle, id, .. } = &self.source {
            let _ = handle.exit_status_request(*id, status).await;
        }
    }
}

/// A view onto a locally spawned child process's three pipes (spec §4.C,
/// §4.G). `read(STDERR, ...)` pulls from the process's stderr pipe;
/// `write` of either kind is coalesced onto the single stdin pipe, because
/// a local process has no client-side stderr to write into.
pub struct ProcessStream {
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl ProcessStream {
    pub fn new(child: &mut Child) -> ProcessStream {
        ProcessStream {
            stdin: child.stdin.take(),
            stdout: child.stdout.take().expect("piped stdout"),
            stderr: child.stderr.take().expect("piped stderr"),
        }
    }

    pub async fn read(&mut self, kind: Kind, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let read = match kind {
            Kind::Stdout => self.stdout.read(&mut buf).await?,
            Kind::Stderr => self.stderr.read(&mut buf).await?,
        };
        buf.truncate(read);
        Ok(buf)
    }

    /// Races the two OS pipes instead of draining one before even starting
    /// the other (spec §4.D). `stdout`/`stderr` are disjoint fields, so
    /// racing `&mut self.stdout` against `&mut self.stderr` inside one
    /// `select!` borrows each independently — no contention, and no risk of
    /// a silent stderr pipe starving stdout forwarding the way a serial
    /// `read(STDOUT)` then `read(STDERR)` would.
    pub async fn read_output(&mut self, n: usize, stdout_done: bool, stderr_done: bool) -> Result<StreamEvent> {
        let mut stdout_buf = vec![0u8; n];
        let mut stderr_buf = vec![0u8; n];
        tokio::select! {
            biased;

            res = self.stdout.read(&mut stdout_buf), if !stdout_done => {
                let read = res?;
                if read == 0 {
                    Ok(StreamEvent::StdoutEof)
                } else {
                    stdout_buf.truncate(read);
                    Ok(StreamEvent::Stdout(stdout_buf))
                }
            }

            res = self.stderr.read(&mut stderr_buf), if !stderr_done => {
                let read = res?;
                if read == 0 {
                    Ok(StreamEvent::StderrEof)
                } else {
                    stderr_buf.truncate(read);
                    Ok(StreamEvent::Stderr(stderr_buf))
                }
            }
        }
    }

    pub async fn write(&mut self, _kind: Kind, data: &[u8]) -> Result<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            if let Err(e) = stdin.write_all(data).await {
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    // The downstream process exited before consuming all
                    // input; writes MUST tolerate this silently (spec §4.C).
                    return Ok(());
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Drops the stdin handle, signaling EOF to whatever is reading it.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }
}

/// Runs `sh -c <command>` with all three stdio streams piped, per spec
/// §4.G step 1.
pub fn spawn_shell(command: &str) -> std::io::Result<Child> {
    tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
}

pub fn exit_code(status: std::process::ExitStatus) -> u32 {
    // On unix a process killed by a signal has no meaningful exit code;
    // report 128+signal like a shell would, falling back to 1.
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            return code as u32;
        }
        if let Some(sig) = status.signal() {
            return 128 + sig as u32;
        }
        1
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1) as u32
    }
}
