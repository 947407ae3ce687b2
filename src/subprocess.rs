//! The subprocess worker (spec §4.G): spawns `sh -c <command>` locally and
//! splices its three pipes with the inbound channel via the stream pump.

use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::warn;

use crate::pump;
use crate::stream::{spawn_shell, ChannelStream, ProcessStream, Stream};

pub async fn run(inbound: ChannelStream, command: &str) -> Result<()> {
    let mut child = spawn_shell(command).context("spawning sh -c")?;
    let pid = child.id();

    let mut process_stream = Stream::Process(ProcessStream::new(&mut child));
    let mut inbound_stream = Stream::Channel(inbound);

    crate::test_hooks::emit!("subprocess-pump-start");
    pump::run(&mut inbound_stream, &mut process_stream).await?;
    crate::test_hooks::emit!("subprocess-pump-done");

    // The pump only ever forwards bytes; it never closes the downstream
    // pipe it was writing into. A stdin-reading command (`cat`) would
    // otherwise never see EOF on its own input and `wait` below would
    // hang forever (spec §4.G step 4: "close all three subprocess pipes").
    process_stream.close_process_stdin();

    // spec §4.G step 3: only wait for (and propagate an exit status to) the
    // inbound channel if it's still open. A plain `eof` isn't enough to
    // skip this — a well-behaved client sends EOF after its input while
    // still expecting output and a status back (spec §8 scenario #1) — so
    // this checks the stronger `is_closed()` signal instead. If the client
    // has actually gone (spec §8 scenario #5), there's nowhere to send a
    // status and the process may never exit on its own (e.g. `yes`), so
    // waiting here would hang teardown indefinitely.
    if let Stream::Channel(inbound_cs) = &mut inbound_stream {
        if !inbound_cs.is_closed() {
            match child.wait().await {
                Ok(status) => inbound_cs.send_exit_status(crate::stream::exit_code(status)).await,
                Err(e) => warn!(error = ?e, "failed to wait on subprocess"),
            }
        }
    }

    kill_if_running(pid);
    Ok(())
}

/// Ensures the subprocess is dead even if the pump exited early because
/// the client vanished mid-stream (spec §8 scenario #5). A SIGKILL here is
/// best-effort: "no such process" (the child already exited on its own)
/// is swallowed, everything else is logged.
fn kill_if_running(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = ?e, "failed to kill subprocess"),
    }
}
