//! Worker dispatch (spec §9: "pass the worker as a value to the accept
//! loop rather than parameterizing by subclass"). The session state
//! machine (component E) doesn't know or care whether it's forwarding or
//! running a local shell; it just calls `dispatch` with whichever
//! `WorkerKind` this binary was configured for.

use std::collections::HashMap;

use anyhow::Result;

use crate::session::WorkerKind;
use crate::stream::ChannelStream;

/// Runs the configured worker to completion and tears down the inbound
/// channel's exit status. Errors are returned, not swallowed, so the
/// caller (the state machine) can log them — but the caller is the one
/// responsible for closing the transport regardless of outcome (spec §4.E
/// RUNNING -> CLOSED applies to both the worker-returns and the
/// any-error transitions identically).
pub async fn dispatch(
    worker: WorkerKind,
    inbound: ChannelStream,
    command: String,
    username: Option<String>,
    env: HashMap<String, String>,
) -> Result<()> {
    match worker {
        WorkerKind::Forward(cfg) => crate::forward::run(&cfg, inbound, command, username, env).await,
        WorkerKind::Subprocess => crate::subprocess::run(inbound, &command).await,
    }
}
