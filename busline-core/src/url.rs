//! URL grammar (spec §4.2, §6): `scheme "://" body`.
//!
//! - `ipc://<path>` — Unix domain socket path.
//! - `tcp://<host>:<port>` — `host` may be a bare IP or bracketed IPv6;
//!   `port` of `0` or `*` requests autoselect.
//! - `svc://<service-name>` — resolved by the name server, never bound or
//!   connected directly.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusUrl {
    Ipc { path: String },
    Tcp { host: String, port: PortSpec },
    Svc { service_name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortSpec {
    Fixed(u16),
    Autoselect,
}

#[derive(Debug, Error)]
pub enum UrlParseError {
    #[error("missing \"://\" separator in url {0:?}")]
    MissingSeparator(String),
    #[error("unknown scheme {0:?}")]
    UnknownScheme(String),
    #[error("empty body for scheme {0:?}")]
    EmptyBody(String),
    #[error("tcp url {0:?} is missing a port")]
    MissingPort(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

impl BusUrl {
    pub fn parse(raw: &str) -> Result<Self, UrlParseError> {
        let (scheme, body) = raw
            .split_once("://")
            .ok_or_else(|| UrlParseError::MissingSeparator(raw.to_string()))?;
        if body.is_empty() {
            return Err(UrlParseError::EmptyBody(scheme.to_string()));
        }
        match scheme {
            "ipc" => Ok(BusUrl::Ipc {
                path: body.to_string(),
            }),
            "tcp" => Self::parse_tcp_body(raw, body),
            "svc" => Ok(BusUrl::Svc {
                service_name: body.to_string(),
            }),
            other => Err(UrlParseError::UnknownScheme(other.to_string())),
        }
    }

    fn parse_tcp_body(raw: &str, body: &str) -> Result<Self, UrlParseError> {
        // Bracketed IPv6: "[::1]:port".
        if let Some(rest) = body.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| UrlParseError::MissingPort(raw.to_string()))?;
            let port_str = rest
                .strip_prefix(':')
                .ok_or_else(|| UrlParseError::MissingPort(raw.to_string()))?;
            let port = Self::parse_port(port_str)?;
            return Ok(BusUrl::Tcp {
                host: host.to_string(),
                port,
            });
        }
        let (host, port_str) = body
            .rsplit_once(':')
            .ok_or_else(|| UrlParseError::MissingPort(raw.to_string()))?;
        let port = Self::parse_port(port_str)?;
        Ok(BusUrl::Tcp {
            host: host.to_string(),
            port,
        })
    }

    fn parse_port(s: &str) -> Result<PortSpec, UrlParseError> {
        if s == "*" {
            return Ok(PortSpec::Autoselect);
        }
        let port: u16 = s
            .parse()
            .map_err(|_| UrlParseError::InvalidPort(s.to_string()))?;
        Ok(if port == 0 {
            PortSpec::Autoselect
        } else {
            PortSpec::Fixed(port)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipc() {
        assert_eq!(
            BusUrl::parse("ipc:///tmp/fdb-test-1").unwrap(),
            BusUrl::Ipc {
                path: "/tmp/fdb-test-1".to_string()
            }
        );
    }

    #[test]
    fn parses_tcp_with_fixed_port() {
        assert_eq!(
            BusUrl::parse("tcp://127.0.0.1:60002").unwrap(),
            BusUrl::Tcp {
                host: "127.0.0.1".to_string(),
                port: PortSpec::Fixed(60002)
            }
        );
    }

    #[test]
    fn parses_tcp_autoselect_star_and_zero() {
        assert_eq!(
            BusUrl::parse("tcp://0.0.0.0:*").unwrap(),
            BusUrl::Tcp {
                host: "0.0.0.0".to_string(),
                port: PortSpec::Autoselect
            }
        );
        assert_eq!(
            BusUrl::parse("tcp://0.0.0.0:0").unwrap(),
            BusUrl::Tcp {
                host: "0.0.0.0".to_string(),
                port: PortSpec::Autoselect
            }
        );
    }

    #[test]
    fn parses_tcp_bracketed_ipv6() {
        assert_eq!(
            BusUrl::parse("tcp://[::1]:60001").unwrap(),
            BusUrl::Tcp {
                host: "::1".to_string(),
                port: PortSpec::Fixed(60001)
            }
        );
    }

    #[test]
    fn parses_svc() {
        assert_eq!(
            BusUrl::parse("svc://media.player").unwrap(),
            BusUrl::Svc {
                service_name: "media.player".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            BusUrl::parse("http://x"),
            Err(UrlParseError::UnknownScheme(_))
        ));
    }
}
