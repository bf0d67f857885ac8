use crate::errors::IngestError;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_ADDR: &str = ":8900";

const ANY_HOST: &str = "[::]";

/// Network listener configuration
///
/// Parsed from `host:port`. An empty host (`:8900`) binds the IPv6
/// wildcard `[::]`, which also accepts IPv4 where the OS allows dual-stack
/// sockets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    /// Host address to bind to (e.g., "[::]" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: ANY_HOST.into(),
            port: 8900,
        }
    }
}

impl FromStr for Listener {
    type Err = IngestError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| IngestError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        let port = port.parse().map_err(|_| invalid("port is not a number"))?;
        let host = if host.is_empty() { ANY_HOST } else { host };

        Ok(Listener {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_address_listens_everywhere() {
        let listener: Listener = DEFAULT_ADDR.parse().unwrap();
        assert_eq!(listener, Listener::default());
        assert_eq!(listener.to_string(), "[::]:8900");
    }

    #[test]
    fn empty_host_binds_the_ipv6_wildcard() {
        let listener: Listener = ":8288".parse().unwrap();
        let addr: std::net::SocketAddr = listener.to_string().parse().unwrap();
        assert!(addr.is_ipv6());
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 8288);
    }

    #[test]
    fn host_and_port() {
        let listener: Listener = "127.0.0.1:8288".parse().unwrap();
        assert_eq!(listener.host, "127.0.0.1");
        assert_eq!(listener.port, 8288);

        let listener: Listener = "[::1]:8900".parse().unwrap();
        assert_eq!(listener.to_string(), "[::1]:8900");
    }

    #[test]
    fn invalid_addresses() {
        assert!(matches!(
            "localhost".parse::<Listener>(),
            Err(IngestError::InvalidAddress { .. })
        ));
        assert!("localhost:http".parse::<Listener>().is_err());
        assert!(":70000".parse::<Listener>().is_err());
    }
}
