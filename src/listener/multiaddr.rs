//! Minimal multiaddress subset: `/proto/value/proto/value/...` pairs for
//! `ip4`, `ip6`, `tcp`, `udp`, `unix`.

use crate::error::{Errno, Error, FsResult};

pub const KNOWN_PROTOCOLS: &[&str] = &["ip4", "ip6", "tcp", "udp", "unix"];

pub fn is_known_protocol(protocol: &str) -> bool {
    KNOWN_PROTOCOLS.contains(&protocol)
}

/// `unix` values are filesystem paths: any non-empty string is accepted
pub fn is_path_typed(protocol: &str) -> bool {
    protocol == "unix"
}

pub fn is_valid_value(protocol: &str, value: &str) -> bool {
    match protocol {
        "ip4" => value.parse::<std::net::Ipv4Addr>().is_ok(),
        "ip6" => value.parse::<std::net::Ipv6Addr>().is_ok(),
        "tcp" | "udp" => value.parse::<u16>().is_ok(),
        "unix" => !value.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multiaddr {
    pub components: Vec<(String, String)>,
}

impl Multiaddr {
    pub fn from_components(components: Vec<(String, String)>) -> Self {
        Multiaddr { components }
    }

    /// Parses `/proto/value/proto/value/...`, e.g. `/ip4/127.0.0.1/tcp/1564`.
    /// A path-typed protocol (`unix`) consumes the remainder of the string
    /// as its value, since the value itself may contain slashes.
    pub fn parse(s: &str) -> FsResult<Self> {
        let mut rest = s.strip_prefix('/').ok_or_else(|| Error::new(Errno::Inval))?;
        let mut components = Vec::new();
        while !rest.is_empty() {
            let (proto, after_proto) = rest.split_once('/').ok_or_else(|| Error::new(Errno::Inval))?;
            if !is_known_protocol(proto) {
                return Err(Error::new(Errno::Inval));
            }
            if is_path_typed(proto) {
                components.push((proto.to_string(), after_proto.to_string()));
                rest = "";
            } else {
                let (value, remainder) = after_proto.split_once('/').unwrap_or((after_proto, ""));
                if !is_valid_value(proto, value) {
                    return Err(Error::new(Errno::Inval));
                }
                components.push((proto.to_string(), value.to_string()));
                rest = remainder;
            }
        }
        if components.is_empty() {
            return Err(Error::new(Errno::Inval));
        }
        Ok(Multiaddr { components })
    }

    pub fn tcp_socket_addr(&self) -> Option<std::net::SocketAddr> {
        let mut ip = None;
        let mut port = None;
        for (proto, value) in &self.components {
            match proto.as_str() {
                "ip4" | "ip6" => ip = value.parse().ok(),
                "tcp" => port = value.parse::<u16>().ok(),
                _ => {}
            }
        }
        Some(std::net::SocketAddr::new(ip?, port?))
    }

    pub fn unix_path(&self) -> Option<&str> {
        self.components
            .iter()
            .find(|(proto, _)| proto == "unix")
            .map(|(_, value)| value.as_str())
    }
}

impl std::fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (proto, value) in &self.components {
            write!(f, "/{}/{}", proto, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_over_ip4() {
        let m = Multiaddr::parse("/ip4/127.0.0.1/tcp/1564").unwrap();
        assert_eq!(m.components, vec![("ip4".into(), "127.0.0.1".into()), ("tcp".into(), "1564".into())]);
        assert_eq!(m.tcp_socket_addr().unwrap().to_string(), "127.0.0.1:1564");
    }

    #[test]
    fn parses_unix_path() {
        let m = Multiaddr::parse("/unix//run/fs/server").unwrap();
        assert_eq!(m.unix_path(), Some("/run/fs/server"));
    }

    #[test]
    fn rejects_unknown_protocol() {
        assert!(Multiaddr::parse("/sctp/127.0.0.1").is_err());
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Multiaddr::parse("/ip4/127.0.0.1/tcp/notaport").is_err());
    }

    #[test]
    fn round_trips_to_string() {
        let m = Multiaddr::parse("/ip4/127.0.0.1/tcp/1564").unwrap();
        assert_eq!(m.to_string(), "/ip4/127.0.0.1/tcp/1564");
    }
}
