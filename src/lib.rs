//! sshfwd: an SSH transparent forwarding proxy (see `spec.md`/`SPEC_FULL.md`
//! for the full design). This crate is a library of components shared by
//! the two binaries in `src/bin/`: `sshfwd` (forwarding proxy / relay) and
//! `sshexecd` (plain local exec server).

pub mod config;
pub mod consts;
pub mod forward;
pub mod hostkey;
pub mod hostspec;
pub mod outbound;
pub mod pump;
pub mod server;
pub mod session;
pub mod stdsocket;
pub mod stream;
pub mod subprocess;
pub mod test_hooks;
pub mod worker;
