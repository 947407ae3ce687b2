//! The forwarding worker (spec §4.F): opens an outbound SSH session to the
//! resolved target, execs the client's command on it, and splices the two
//! sides together with the stream pump (component D).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{ProxyConfig, Target};
use crate::hostspec::HostSpec;
use crate::outbound::ClientHandler;
use crate::pump;
use crate::session::HOST_ENV_SENTINEL;
use crate::stream::{ChannelStream, Stream};

/// Resolves the outbound target and the username to authenticate as,
/// per spec §4.F step 1's three-way precedence (explicit override, then
/// env-derived user, then the inbound auth-none username) — collapsed to
/// a two-way `Option::or` per mode, since only one of "explicit" or
/// "env-derived" can apply to a given `Target` (see config.rs).
fn resolve_target(cfg: &ProxyConfig, env: &HashMap<String, String>, inbound_username: Option<String>) -> Result<HostSpec> {
    let mut spec = match &cfg.target {
        Target::Fixed(spec) => spec.clone(),
        Target::Dynamic => {
            let raw = env
                .get(HOST_ENV_SENTINEL)
                .context("client never set the __HOST__ env sentinel; no forwarding target")?;
            HostSpec::parse(raw)
        }
    };
    if spec.user.is_none() {
        spec.user = inbound_username;
    }
    Ok(spec)
}

pub async fn run(
    cfg: &ProxyConfig,
    mut inbound: ChannelStream,
    command: String,
    inbound_username: Option<String>,
    env: HashMap<String, String>,
) -> Result<()> {
    let target = resolve_target(cfg, &env, inbound_username)?;
    let username = target.user.clone().unwrap_or_else(|| "root".to_string());
    info!(host = %target.host, port = target.port, %username, "forwarding to upstream");

    let client_config = Arc::new(russh::client::Config::default());
    let handler = ClientHandler { host_key_check: cfg.host_key_check, host: target.host.clone(), port: target.port };

    let mut handle = russh::client::connect(client_config, (target.host.as_str(), target.port), handler)
        .await
        .with_context(|| format!("connecting to upstream {}:{}", target.host, target.port))?;

    let authenticated = match &cfg.identity_file {
        Some(path) => {
            let key = crate::outbound::load_identity(path)?;
            handle
                .authenticate_publickey(&username, Arc::new(key))
                .await
                .context("authenticating to upstream with identity file")?
        }
        None => {
            debug!("no identity file configured; trying auth-none against upstream");
            handle.authenticate_none(&username).await.context("auth-none against upstream")?
        }
    };
    if !authenticated {
        anyhow::bail!("upstream {}:{} rejected authentication for user {}", target.host, target.port, username);
    }

    let mut channel = handle.channel_open_session().await.context("opening outbound session channel")?;
    channel.exec(true, command.as_bytes()).await.context("issuing exec on upstream")?;

    let mut outbound_stream = Stream::Channel(ChannelStream::new_client(channel));
    let mut inbound_stream = Stream::Channel(inbound);

    crate::test_hooks::emit!("forward-pump-start");
    pump::run(&mut inbound_stream, &mut outbound_stream).await?;
    crate::test_hooks::emit!("forward-pump-done");

    // Exit status is propagated if and only if the worker actually
    // observed one from the upstream (spec §3, §4.F step 5); absence is
    // tolerated silently.
    if let (Stream::Channel(inbound_cs), Stream::Channel(outbound_cs)) = (&mut inbound_stream, &outbound_stream) {
        if let Some(status) = outbound_cs.exit_status() {
            inbound_cs.send_exit_status(status).await;
        }
    }

    let _ = handle.disconnect(russh::Disconnect::ByApplication, "", "English").await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_target_keeps_its_own_user() {
        let cfg = ProxyConfig {
            target: Target::Fixed(HostSpec { user: Some("alice".into()), host: "upstream".into(), port: 22 }),
            identity_file: None,
            host_key_check: false,
            server_key: None,
        };
        let resolved = resolve_target(&cfg, &HashMap::new(), Some("bob".into())).unwrap();
        assert_eq!(resolved.user.as_deref(), Some("alice"));
    }

    #[test]
    fn fixed_target_falls_back_to_inbound_username_when_unset() {
        let cfg = ProxyConfig {
            target: Target::Fixed(HostSpec { user: None, host: "upstream".into(), port: 22 }),
            identity_file: None,
            host_key_check: false,
            server_key: None,
        };
        let resolved = resolve_target(&cfg, &HashMap::new(), Some("bob".into())).unwrap();
        assert_eq!(resolved.user.as_deref(), Some("bob"));
    }

    #[test]
    fn dynamic_target_is_decoded_from_host_env_sentinel() {
        let cfg = ProxyConfig { target: Target::Dynamic, identity_file: None, host_key_check: false, server_key: None };
        let mut env = HashMap::new();
        env.insert(HOST_ENV_SENTINEL.to_string(), "carol@upstream:2200".to_string());
        let resolved = resolve_target(&cfg, &env, Some("bob".into())).unwrap();
        assert_eq!(resolved, HostSpec { user: Some("carol".into()), host: "upstream".into(), port: 2200 });
    }

    #[test]
    fn dynamic_target_without_sentinel_is_an_error() {
        let cfg = ProxyConfig { target: Target::Dynamic, identity_file: None, host_key_check: false, server_key: None };
        assert!(resolve_target(&cfg, &HashMap::new(), Some("bob".into())).is_err());
    }
}
