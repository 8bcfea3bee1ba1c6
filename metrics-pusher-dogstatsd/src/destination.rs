use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs as _},
    str::FromStr,
};

use thiserror::Error;

use crate::transport::UdpTransport;

/// Prefix used when a destination does not specify one.
pub const DEFAULT_PREFIX: &str = "uwsgi";

/// Maximum number of inline tags kept from a destination string. Any further tags are dropped.
pub const MAX_INLINE_TAGS: usize = 64;

const TAG_BLOCK_MARKER: char = '#';

/// Errors that could occur while configuring a destination.
#[derive(Debug, Error)]
pub enum DestinationError {
    /// The destination string had no `:` separating the host from the port.
    #[error("invalid destination '{spec}': expected host:port")]
    MissingPort {
        /// The destination string.
        spec: String,
    },

    /// The port was not a valid 16-bit port number.
    #[error("invalid port '{port}'")]
    InvalidPort {
        /// The port as written.
        port: String,
    },

    /// A `|` was present but was not followed by `#`.
    #[error("invalid tag block '{block}': expected '|#' followed by tags")]
    InvalidTagBlock {
        /// The tag block as written, starting after the `|`.
        block: String,
    },

    /// The host could not be resolved.
    #[error("failed to resolve '{host}:{port}': {source}")]
    Resolve {
        /// The host.
        host: String,
        /// The port.
        port: u16,
        /// The underlying resolution error.
        source: std::io::Error,
    },

    /// The host resolved, but not to any IPv4 address.
    #[error("'{host}:{port}' did not resolve to an IPv4 address")]
    NoIpv4Address {
        /// The host.
        host: String,
        /// The port.
        port: u16,
    },

    /// The UDP socket could not be created.
    #[error("failed to create socket: {0}")]
    Socket(#[source] std::io::Error),
}

/// A parsed destination string.
///
/// Destination strings take the form `host:port[,prefix][|#tag1,tag2,...]`:
///
/// - `127.0.0.1:8125`
/// - `127.0.0.1:8125,myinstance`
/// - `127.0.0.1:8125|#env:staging,svc:api`
/// - `127.0.0.1:8125,myinstance|#env:staging`
///
/// Parsing never modifies the input, so the same string always parses to an equal `DestinationSpec`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationSpec {
    host: String,
    port: u16,
    prefix: String,
    tags: Vec<String>,
}

impl DestinationSpec {
    /// Parses a destination string.
    ///
    /// # Errors
    ///
    /// If the string has no `:`, if the port is not a valid port number, or if a `|` is not followed by `#`, an error
    /// is returned.
    pub fn parse(spec: &str) -> Result<Self, DestinationError> {
        let (host, rest) = spec
            .split_once(':')
            .ok_or_else(|| DestinationError::MissingPort { spec: spec.to_string() })?;

        // A comma only introduces a prefix when it comes before the tag block. Commas after a `|` separate tags.
        let comma = rest.find(',');
        let pipe = rest.find('|');
        let (port, prefix, tag_block) = match (comma, pipe) {
            (Some(c), Some(p)) if c < p => (&rest[..c], Some(&rest[c + 1..p]), Some(&rest[p + 1..])),
            (Some(c), None) => (&rest[..c], Some(&rest[c + 1..]), None),
            (_, Some(p)) => (&rest[..p], None, Some(&rest[p + 1..])),
            (None, None) => (rest, None, None),
        };

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| DestinationError::InvalidPort { port: port.to_string() })?;

        let prefix = match prefix {
            Some(prefix) if !prefix.is_empty() => prefix.to_string(),
            _ => DEFAULT_PREFIX.to_string(),
        };

        let tags = match tag_block {
            Some(block) => parse_tag_block(block)?,
            None => Vec::new(),
        };

        Ok(DestinationSpec { host: host.to_string(), port, prefix, tags })
    }

    /// Returns the host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the metric name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the inline tags, in the order they were written.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Resolves the host and port to the first IPv4 socket address.
    ///
    /// # Errors
    ///
    /// If the host cannot be resolved, or resolves only to non-IPv4 addresses, an error is returned.
    pub fn resolve(&self) -> Result<SocketAddr, DestinationError> {
        let mut addrs = (self.host.as_str(), self.port).to_socket_addrs().map_err(|source| {
            DestinationError::Resolve { host: self.host.clone(), port: self.port, source }
        })?;

        addrs
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| DestinationError::NoIpv4Address { host: self.host.clone(), port: self.port })
    }
}

impl FromStr for DestinationSpec {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DestinationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}", self.host, self.port, self.prefix)?;
        if !self.tags.is_empty() {
            write!(f, "|#{}", self.tags.join(","))?;
        }
        Ok(())
    }
}

fn parse_tag_block(block: &str) -> Result<Vec<String>, DestinationError> {
    let tags = block
        .strip_prefix(TAG_BLOCK_MARKER)
        .ok_or_else(|| DestinationError::InvalidTagBlock { block: block.to_string() })?;

    Ok(tags
        .split(',')
        .filter(|tag| !tag.is_empty())
        .take(MAX_INLINE_TAGS)
        .map(str::to_string)
        .collect())
}

/// A configured destination: where to send, what to prefix, which static tags to add, and the socket to send on.
pub(crate) struct Destination {
    prefix: String,
    static_tags: Vec<String>,
    transport: UdpTransport,
}

impl Destination {
    /// Configures a destination from its destination string.
    ///
    /// The static tags are the inline tags from the destination string followed by `extra_tags`.
    pub fn configure(spec: &str, extra_tags: &[String]) -> Result<Self, DestinationError> {
        let spec = DestinationSpec::parse(spec)?;
        let addr = spec.resolve()?;
        let transport = UdpTransport::open(addr).map_err(DestinationError::Socket)?;

        let DestinationSpec { prefix, mut tags, .. } = spec;
        tags.extend(extra_tags.iter().cloned());

        Ok(Destination { prefix, static_tags: tags, transport })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn static_tags(&self) -> &[String] {
        &self.static_tags
    }

    pub fn transport(&self) -> &UdpTransport {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::{Destination, DestinationError, DestinationSpec, DEFAULT_PREFIX, MAX_INLINE_TAGS};

    #[test]
    fn parse() {
        // Cases are defined as: destination string, expected host, port, prefix, and tags.
        let cases = [
            ("127.0.0.1:8125", "127.0.0.1", 8125, DEFAULT_PREFIX, &[][..]),
            ("127.0.0.1:8125,myinstance", "127.0.0.1", 8125, "myinstance", &[][..]),
            (
                "127.0.0.1:8125|#env:staging,svc:api",
                "127.0.0.1",
                8125,
                DEFAULT_PREFIX,
                &["env:staging", "svc:api"][..],
            ),
            (
                "127.0.0.1:8125,myinstance|#env:staging,svc:api",
                "127.0.0.1",
                8125,
                "myinstance",
                &["env:staging", "svc:api"][..],
            ),
            ("localhost:9125,app|#bare", "localhost", 9125, "app", &["bare"][..]),
            ("localhost:9125,app|#", "localhost", 9125, "app", &[][..]),
            ("localhost:9125,|#a:b", "localhost", 9125, DEFAULT_PREFIX, &["a:b"][..]),
            ("localhost:9125,", "localhost", 9125, DEFAULT_PREFIX, &[][..]),
            ("localhost:9125|#a:b,,c:d,", "localhost", 9125, DEFAULT_PREFIX, &["a:b", "c:d"][..]),
        ];

        for (input, host, port, prefix, tags) in cases {
            let spec = DestinationSpec::parse(input).unwrap();
            assert_eq!(spec.host(), host, "host for '{input}'");
            assert_eq!(spec.port(), port, "port for '{input}'");
            assert_eq!(spec.prefix(), prefix, "prefix for '{input}'");
            assert_eq!(spec.tags(), tags, "tags for '{input}'");
        }
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            DestinationSpec::parse("127.0.0.1"),
            Err(DestinationError::MissingPort { .. })
        ));
        assert!(matches!(
            DestinationSpec::parse("127.0.0.1,prefix"),
            Err(DestinationError::MissingPort { .. })
        ));
        assert!(matches!(
            DestinationSpec::parse("127.0.0.1:notaport"),
            Err(DestinationError::InvalidPort { .. })
        ));
        assert!(matches!(
            DestinationSpec::parse("127.0.0.1:99999,prefix"),
            Err(DestinationError::InvalidPort { .. })
        ));
        assert!(matches!(
            DestinationSpec::parse("127.0.0.1:8125|env:staging"),
            Err(DestinationError::InvalidTagBlock { .. })
        ));
    }

    #[test]
    fn parse_is_idempotent() {
        let input = String::from("127.0.0.1:8125,myinstance|#env:staging,svc:api");
        let first = DestinationSpec::parse(&input).unwrap();
        let second = DestinationSpec::parse(&input).unwrap();
        assert_eq!(first, second);
        assert_eq!(input, "127.0.0.1:8125,myinstance|#env:staging,svc:api");

        let reparsed: DestinationSpec = first.to_string().parse().unwrap();
        assert_eq!(first, reparsed);
    }

    #[test]
    fn excess_inline_tags_are_dropped() {
        let tags = (0..MAX_INLINE_TAGS + 10).map(|i| format!("t{i}:v")).collect::<Vec<_>>();
        let input = format!("127.0.0.1:8125|#{}", tags.join(","));

        let spec = DestinationSpec::parse(&input).unwrap();
        assert_eq!(spec.tags().len(), MAX_INLINE_TAGS);
        assert_eq!(spec.tags()[..], tags[..MAX_INLINE_TAGS]);
    }

    #[test]
    fn resolve() {
        let spec = DestinationSpec::parse("127.0.0.1:8125").unwrap();
        assert_eq!(spec.resolve().unwrap(), SocketAddr::from(([127, 0, 0, 1], 8125)));

        // IPv6 literals are not supported: the first `:` always separates the host from the port.
        let err = DestinationSpec::parse("[::1]:8125").unwrap_err();
        assert!(matches!(err, DestinationError::InvalidPort { .. }));
    }

    #[test]
    fn configure_merges_inline_and_extra_tags() {
        let extra_tags = vec!["qin".to_string(), "baz:qux".to_string()];
        let destination =
            Destination::configure("127.0.0.1:8125,app|#env:staging", &extra_tags).unwrap();

        assert_eq!(destination.prefix(), "app");
        assert_eq!(destination.static_tags(), &["env:staging", "qin", "baz:qux"]);
    }
}
