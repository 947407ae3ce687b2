//! StdSocket adapter (spec §4.B): presents a process's own stdin/stdout as
//! a socket-shaped endpoint so the relay variant can run the session state
//! machine (component E) over a `ProxyCommand`'s stdio instead of a TCP
//! accept.
//!
//! The production constructor wires this to `tokio::io::{stdin, stdout}`;
//! tests build one over an in-memory duplex pipe so the timeout/EOF
//! semantics can be exercised without real process stdio (SPEC_FULL.md
//! §4.B).

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;

use crate::stream::{Kind, StreamEvent};

/// Wraps any `AsyncRead + AsyncWrite` pair and gives it the `send`/`recv`/
/// `close` contract spec §4.B describes for a socket-shaped duck: `send`
/// returns 0 rather than erroring once the write half is gone, `recv`
/// returns empty bytes on EOF, and a `recv` that sees no data before the
/// configured timeout elapses fails with a timeout error.
pub struct StdSocket<R, W> {
    reader: Option<R>,
    writer: Option<W>,
    timeout: Duration,
}

/// Default timeout used before the first `settimeout` call, matching the
/// AWAIT_EXEC timeout so a relay invocation with a silent outer client
/// doesn't hang forever waiting on the handshake.
const DEFAULT_TIMEOUT: Duration = crate::consts::AWAIT_EXEC_TIMEOUT;

impl<R, W> StdSocket<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> StdSocket<R, W> {
        StdSocket { reader: Some(reader), writer: Some(writer), timeout: DEFAULT_TIMEOUT }
    }

    /// Records the latest requested timeout; repeated calls simply
    /// overwrite it (spec §8 idempotence law).
    pub fn settimeout(&mut self, d: Duration) {
        self.timeout = d;
    }

    /// `read(STDOUT, n)` pulls from stdin; `read(STDERR, ...)` is not a
    /// concept this adapter has (there is no separate error stream on
    /// stdio), so it degenerates to the same source.
    pub async fn read(&mut self, _kind: Kind, n: usize) -> Result<Vec<u8>> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };

        let mut buf = vec![0u8; n];
        let fut = reader.read(&mut buf);
        match time::timeout(self.timeout, fut).await {
            Ok(Ok(0)) => {
                // stdin closed: EOF is "empty bytes", not an error.
                self.reader = None;
                Ok(Vec::new())
            }
            Ok(Ok(read)) => {
                buf.truncate(read);
                Ok(buf)
            }
            Ok(Err(e)) => Err(e).context("reading StdSocket stdin"),
            Err(_) => Err(anyhow::anyhow!("timed out waiting for StdSocket stdin")),
        }
    }

    /// There's only one real source here (stdin), so unlike a channel or a
    /// subprocess there's nothing to race: this always reports on stdout,
    /// and closure is always `BothEof` since there's no separate stderr to
    /// go quiet independently.
    pub async fn read_output(&mut self, n: usize) -> Result<StreamEvent> {
        let data = self.read(Kind::Stdout, n).await?;
        if data.is_empty() {
            Ok(StreamEvent::BothEof)
        } else {
            Ok(StreamEvent::Stdout(data))
        }
    }

    /// `write(STDOUT, ...)` writes to stdout. A write on STDERR is
    /// silently discarded unless the caller constructed this adapter with
    /// a writer that already multiplexes stderr itself; this type only
    /// exposes one writer so STDOUT is the only kind that does anything
    /// (spec §4.C: "writes on STDERR silently discarded").
    pub async fn write(&mut self, kind: Kind, data: &[u8]) -> Result<()> {
        if kind == Kind::Stderr {
            return Ok(());
        }
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Ok(()),
        };
        if let Err(e) = writer.write_all(data).await {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                self.writer = None;
                return Ok(());
            }
            return Err(e).context("writing StdSocket stdout");
        }
        Ok(())
    }

    /// `send` in the spec's socket-shaped vocabulary: returns the number
    /// of bytes written, or 0 if stdout is already closed, matching the
    /// "signals EOF to the SSH library without raising" contract.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize> {
        if self.writer.is_none() {
            return Ok(0);
        }
        self.write(Kind::Stdout, data).await?;
        if self.writer.is_none() {
            Ok(0)
        } else {
            Ok(data.len())
        }
    }

    /// `recv` in the spec's socket-shaped vocabulary.
    pub async fn recv(&mut self, n: usize) -> Result<Vec<u8>> {
        self.read(Kind::Stdout, n).await
    }

    /// Closes both stdio ends.
    pub fn close(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}
