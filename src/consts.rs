use std::time;

/// How long AWAIT_EXEC waits for the client's single exec request before
/// giving up and tearing the session down (spec §4.E).
pub const AWAIT_EXEC_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Buffer size used by the stream pump for each read (spec §4.D).
pub const PUMP_BUF_SIZE: usize = 1024;

/// TCP listen backlog for the accept loop (spec §4.H).
pub const LISTEN_BACKLOG: u32 = 100;

/// Default SSH port used when a HostSpec omits one or the given port text
/// isn't all-digits (spec §4.A).
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How often the accept loop logs the number of live per-connection tasks.
pub const REAP_POLL_DURATION: time::Duration = time::Duration::from_secs(30);
