//! Strongly typed configuration resolved once at startup (SPEC_FULL.md §6
//! "Configuration"). This proxy has no TOML config file — spec §3 fixes
//! `SessionConfig` as built entirely from CLI flags and, in dynamic-target
//! mode, the `__HOST__` env sentinel — but the struct that holds resolved
//! per-connection settings is still validated once and shared immutably,
//! which is the part of "config layer" this system actually has.

use std::path::PathBuf;

use crate::hostspec::HostSpec;

/// How a connection's outbound target is determined (spec §4.F step 1).
#[derive(Debug, Clone)]
pub enum Target {
    /// `sshfwd relay`: the target is given directly on the command line.
    Fixed(HostSpec),
    /// `sshfwd server`: the target is decoded from the `__HOST__` env
    /// sentinel the inbound client sends before its exec request.
    Dynamic,
}

/// Auth material and policy shared by every connection a forwarding
/// `sshfwd` process handles (spec §3 `SessionConfig`, minus the
/// per-connection `remoteHost`/`remotePort`/`username` fields, which are
/// resolved per connection from `Target` — see `forward::resolve`).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// In `Fixed` mode, the `HostSpec`'s own `user` field already carries
    /// the explicit CLI override (`relay <port> <host> <user>`); in
    /// `Dynamic` mode, it's whatever the `__HOST__` sentinel parsed out.
    /// Either way the fallback to the inbound auth-none username (spec
    /// §4.F step 1's three-way precedence, collapsed per-mode since only
    /// one of "explicit" or "env-derived" can apply to a given
    /// connection) happens in `forward::resolve_target`.
    pub target: Target,
    pub identity_file: Option<PathBuf>,
    pub host_key_check: bool,
    pub server_key: Option<PathBuf>,
}
