//! Host-string parser (spec §4.A): decodes `[user@]host[:port]`.

use std::fmt;

use crate::consts::DEFAULT_SSH_PORT;

/// A parsed `[user@]host[:port]` target, as sent by a client over the
/// `__HOST__` env sentinel or given directly on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
}

impl HostSpec {
    /// Parses `[user@]host[:port]`.
    ///
    /// Splits on the LAST `@` so that an `@` in the user component is
    /// impossible and an `@` in the host component is impossible. The
    /// remainder is split on the FIRST `:`; the tail is only treated as a
    /// port if it is entirely ASCII digits, otherwise the whole
    /// pre-split string is kept as the host and the port defaults to 22.
    /// See spec §4.A for the exact edge-case table this preserves.
    pub fn parse(s: &str) -> HostSpec {
        let (user, host_port) = match s.rfind('@') {
            Some(idx) => {
                let (u, rest) = s.split_at(idx);
                let rest = &rest[1..]; // drop the '@' itself
                (if u.is_empty() { None } else { Some(u.to_string()) }, rest)
            }
            None => (None, s),
        };

        match host_port.split_once(':') {
            Some((host, port_str)) if !port_str.is_empty() && port_str.bytes().all(|b| b.is_ascii_digit()) => {
                // port_str is all-digits; parse always succeeds, but an
                // overlong string could overflow u16 — fall back to the
                // default in that case rather than erroring.
                match port_str.parse::<u16>() {
                    Ok(port) => HostSpec { user, host: host.to_string(), port },
                    Err(_) => HostSpec { user, host: host_port.to_string(), port: DEFAULT_SSH_PORT },
                }
            }
            _ => HostSpec { user, host: host_port.to_string(), port: DEFAULT_SSH_PORT },
        }
    }
}

impl fmt::Display for HostSpec {
    /// Renders `user@host:port`, the inverse of `parse` when both `user`
    /// and a numeric `port` were present (spec §8 round-trip law).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{}@{}:{}", user, self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host() {
        assert_eq!(HostSpec::parse("host"), HostSpec { user: None, host: "host".into(), port: 22 });
    }

    #[test]
    fn empty_user() {
        assert_eq!(HostSpec::parse("@host"), HostSpec { user: None, host: "host".into(), port: 22 });
    }

    #[test]
    fn trailing_colon_is_not_a_port() {
        assert_eq!(HostSpec::parse("host:"), HostSpec { user: None, host: "host:".into(), port: 22 });
    }

    #[test]
    fn non_numeric_port_tail() {
        assert_eq!(HostSpec::parse("host:abcd"), HostSpec { user: None, host: "host:abcd".into(), port: 22 });
    }

    #[test]
    fn full_spec() {
        assert_eq!(
            HostSpec::parse("user@host:1234"),
            HostSpec { user: Some("user".into()), host: "host".into(), port: 1234 }
        );
    }

    #[test]
    fn at_in_user_uses_last_at() {
        // "a@b@host:22" must split on the LAST '@', so the user is "a@b".
        let spec = HostSpec::parse("a@b@host:22");
        assert_eq!(spec, HostSpec { user: Some("a@b".into()), host: "host".into(), port: 22 });
    }

    #[test]
    fn round_trip_with_user_and_numeric_port() {
        let spec = HostSpec { user: Some("alice".into()), host: "example.com".into(), port: 2222 };
        assert_eq!(HostSpec::parse(&spec.to_string()), spec);
    }

    #[test]
    fn round_trip_without_user() {
        let spec = HostSpec { user: None, host: "example.com".into(), port: 22 };
        assert_eq!(HostSpec::parse(&spec.to_string()), spec);
    }

    #[test]
    fn overlong_port_falls_back_to_default() {
        // "99999999999" is all-digits but overflows u16; preserved as host.
        let spec = HostSpec::parse("host:99999999999");
        assert_eq!(spec, HostSpec { user: None, host: "host:99999999999".into(), port: 22 });
    }
}
