// Shared helpers for the integration tests in this directory. Each test
// file in tests/ is compiled into its own binary, so this module (and the
// `#![allow(dead_code)]` on it) is pulled in piecemeal by whichever test
// actually uses a given helper.
#![allow(dead_code)]

pub mod events;
pub mod sshclient;

use std::net::TcpListener as StdTcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};

use events::Events;

/// Picks a free TCP port by binding then immediately dropping a listener.
/// There is an inherent TOCTOU race against anything else on the machine
/// grabbing the same port between the drop and the proxy's own bind, but
/// it's the same approach the proxy's own tests of its peers use and is
/// good enough for a single-host test run.
pub fn free_port() -> Result<u16> {
    let listener = StdTcpListener::bind("127.0.0.1:0").context("binding to find a free port")?;
    Ok(listener.local_addr()?.port())
}

/// A running `sshexecd` or `sshfwd` subprocess, killed on drop.
pub struct Proc {
    child: Child,
    pub events: Option<Events>,
}

impl Proc {
    /// Spawns `bin` with `args`, wiring up the test-hook socket so the
    /// test can synchronize on real proxy events instead of sleeping.
    pub fn spawn(bin: &str, args: &[&str], tmp_dir: &std::path::Path) -> Result<Proc> {
        let hook_sock = tmp_dir.join(format!("{}-test-hook.socket", bin));
        let log_file = tmp_dir.join(format!("{}.log", bin));

        let child = Command::new(bin_path(bin))
            .args(args)
            .arg("--log-file")
            .arg(&log_file)
            .arg("-vv")
            .env("SSHFWD_TEST_HOOK_SOCKET_PATH", &hook_sock)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning {bin}"))?;

        let events = Events::new(&hook_sock)?;

        Ok(Proc { child, events: Some(events) })
    }

    pub fn await_event(&mut self, event: &str) -> Result<()> {
        self.events.as_mut().context("no events stream")?.await_event(event)
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn bin_path(name: &str) -> PathBuf {
    match name {
        "sshexecd" => PathBuf::from(env!("CARGO_BIN_EXE_sshexecd")),
        "sshfwd" => PathBuf::from(env!("CARGO_BIN_EXE_sshfwd")),
        other => panic!("unknown test binary {other}"),
    }
}
