// A trimmed-down client for the test_hooks unix-socket event bus (see
// src/test_hooks.rs): connects once, then lets callers block until a
// named event line shows up. Unlike the teacher's `Events`, this proxy
// only ever has one interested waiter per connection, so there's no need
// for the teacher's multi-waiter queue machinery — a single buffered
// line reader is enough.
#![allow(dead_code)]

use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time;

use anyhow::{anyhow, Result};

pub struct Events {
    lines: std::io::Lines<BufReader<UnixStream>>,
}

impl Events {
    pub fn new<P: AsRef<Path>>(sock: P) -> Result<Events> {
        let mut sleep_dur = time::Duration::from_millis(5);
        for _ in 0..12 {
            if let Ok(stream) = UnixStream::connect(sock.as_ref()) {
                return Ok(Events { lines: BufReader::new(stream).lines() });
            }
            std::thread::sleep(sleep_dur);
            sleep_dur *= 2;
        }
        Err(anyhow!("timed out connecting to test hook socket at {}", sock.as_ref().display()))
    }

    /// Blocks until `event` appears on the stream, skipping any other
    /// events seen first.
    pub fn await_event(&mut self, event: &str) -> Result<()> {
        for line in &mut self.lines {
            let line = line?;
            if line == event {
                return Ok(());
            }
        }
        Err(anyhow!("event stream ended before '{}' was seen", event))
    }
}
