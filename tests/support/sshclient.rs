// A minimal SSH client used only by the integration tests to drive a
// running sshexecd/sshfwd instance end to end, exercising the same
// russh client machinery the forwarding worker itself uses against a
// real upstream (src/outbound.rs, src/forward.rs) — just pointed at our
// own proxy instead.
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;

pub struct AcceptAnyKey;

#[async_trait]
impl russh::client::Handler for AcceptAnyKey {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
}

/// Connects to `127.0.0.1:port` as `user` with auth-none, execs `command`
/// with no stdin of its own (closes its input side immediately, per spec
/// §8 scenario #1's "client ... closes stdin"), and collects every byte of
/// stdout/stderr along with the exit status before disconnecting.
pub async fn exec(port: u16, user: &str, command: &str) -> Result<ExecResult> {
    exec_with_input(port, user, command, b"").await
}

/// Like `exec`, but writes `input` to the channel before sending EOF,
/// exercising the same round trip as spec §8 scenario #1 ("sends
/// 'hello world\n', closes stdin").
pub async fn exec_with_input(port: u16, user: &str, command: &str, input: &[u8]) -> Result<ExecResult> {
    let config = Arc::new(russh::client::Config::default());
    let mut session = russh::client::connect(config, ("127.0.0.1", port), AcceptAnyKey)
        .await
        .context("connecting to proxy under test")?;

    let authenticated = session.authenticate_none(user).await.context("auth-none against proxy under test")?;
    anyhow::ensure!(authenticated, "proxy under test rejected auth-none");

    let mut channel = session.channel_open_session().await.context("opening session channel")?;
    channel.exec(true, command.as_bytes()).await.context("issuing exec")?;
    if !input.is_empty() {
        channel.data(input).await.context("writing channel input")?;
    }
    channel.eof().await.context("sending channel eof")?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { .. }) => {}
            Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    let _ = session.disconnect(Disconnect::ByApplication, "", "English").await;
    Ok(ExecResult { stdout, stderr, exit_status })
}
