//! The outbound SSH client handler (spec §4.F step 2): host-key policy for
//! the connection this proxy opens to the configured upstream target.
//!
//! "Host-key check" true means: consult the system `known_hosts` file,
//! and if the upstream isn't in it yet, auto-accept and remember the key
//! for the rest of this process (spec §4.F: "add to session cache for the
//! rest of this process") rather than writing it back to disk — the
//! proxy has no business mutating the operator's `~/.ssh/known_hosts`
//! just because an ephemeral forwarding session saw a new host.
//! "Host-key check" false means known_hosts is never consulted at all and
//! every key is accepted, matching the original's
//! `if host_key_check: client.load_system_host_keys()`.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use russh_keys::key::PublicKey;
use tracing::{debug, warn};

lazy_static! {
    /// Per-process cache of host keys this proxy has already seen and
    /// accepted for hosts not present in the system `known_hosts`.
    static ref ACCEPTED_HOST_KEYS: Mutex<HashMap<(String, u16), String>> = Mutex::new(HashMap::new());
}

/// Resolves `~/.ssh/known_hosts`, the "system location" spec §4.F refers
/// to, the same way `ssh`(1) itself does.
fn known_hosts_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

pub struct ClientHandler {
    pub host_key_check: bool,
    pub host: String,
    pub port: u16,
}

#[async_trait]
impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        if !self.host_key_check {
            return Ok(true);
        }

        let fingerprint = server_public_key.fingerprint();

        let known_hosts_result = match known_hosts_path() {
            Some(path) => russh_keys::check_known_hosts_path(&self.host, self.port as i32, server_public_key, &path),
            None => russh_keys::check_known_hosts(&self.host, self.port as i32, server_public_key),
        };

        match known_hosts_result {
            Ok(true) => {
                debug!(host = %self.host, port = self.port, "host key matches known_hosts");
                Ok(true)
            }
            Ok(false) => {
                // Present in known_hosts under a *different* key: a real
                // mismatch, not merely "unknown host". Don't silently
                // paper over it.
                Err(anyhow::anyhow!(
                    "host key for {}:{} does not match known_hosts (possible MITM or rekeyed host)",
                    self.host,
                    self.port
                ))
            }
            Err(_) => {
                let mut cache = ACCEPTED_HOST_KEYS.lock().unwrap();
                let key = (self.host.clone(), self.port);
                match cache.get(&key) {
                    Some(cached) if *cached == fingerprint => Ok(true),
                    Some(_) => Err(anyhow::anyhow!(
                        "host key for {}:{} changed since this process last saw it",
                        self.host,
                        self.port
                    )),
                    None => {
                        warn!(host = %self.host, port = self.port, "auto-accepting unknown host key for this process's lifetime");
                        cache.insert(key, fingerprint);
                        Ok(true)
                    }
                }
            }
        }
    }
}

/// Loads an identity (private) key from disk for public-key auth against
/// the upstream target (spec §4.F step 2).
pub fn load_identity(path: &std::path::Path) -> Result<russh_keys::key::KeyPair> {
    russh_keys::load_secret_key(path, None)
        .with_context(|| format!("loading identity file {}", path.display()))
}
