//! Persistence of flushed metric documents.
//!
//! Every [`FlushDocument`] produced by the aggregator is written to a [`DocumentSink`]. The
//! production sink is [`MongoSink`], which stores each document in a MongoDB collection named
//! after the document's namespace. [`MemorySink`] keeps documents in memory.
#![warn(missing_docs)]

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use mouth_metrics::FlushDocument;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

mod memory;
mod mongo;

pub use memory::*;
pub use mongo::*;

/// The port assumed for a [`SinkAddress`] without an explicit port.
pub const DEFAULT_SINK_PORT: u16 = 27017;

/// An error returned by a [`DocumentSink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink was configured with a number of addresses other than one.
    #[error("expected exactly one sink address, got {0}")]
    UnsupportedTopology(usize),

    /// The client for the sink could not be created.
    #[error("failed to connect to the sink")]
    Connect(#[source] mongodb::error::Error),

    /// Writing a document failed.
    #[error("failed to insert document into collection {collection}")]
    Insert {
        /// The collection the document was written to.
        collection: String,
        /// The underlying driver error.
        #[source]
        source: mongodb::error::Error,
    },

    /// The sink refused the document.
    #[error("sink rejected document for collection {0}")]
    Rejected(String),
}

/// An error returned when parsing a [`SinkAddress`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseSinkAddressError {
    /// The host part is empty.
    #[error("missing host")]
    EmptyHost,
    /// The port is not a valid port number.
    #[error("invalid port")]
    InvalidPort,
}

/// The network address of a sink server, written as `host[:port]`.
///
/// ```
/// use mouth_sink::SinkAddress;
///
/// let address: SinkAddress = "db.internal:27018".parse().unwrap();
/// assert_eq!(address.host, "db.internal");
/// assert_eq!(address.port, 27018);
///
/// let address: SinkAddress = "localhost".parse().unwrap();
/// assert_eq!(address.port, 27017);
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SinkAddress {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl SinkAddress {
    /// Creates an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for SinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for SinkAddress {
    type Err = ParseSinkAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse()
                    .map_err(|_| ParseSinkAddressError::InvalidPort)?,
            ),
            None => (s, DEFAULT_SINK_PORT),
        };

        if host.is_empty() {
            return Err(ParseSinkAddressError::EmptyHost);
        }

        Ok(Self::new(host, port))
    }
}

impl Serialize for SinkAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SinkAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(de::Error::custom)
    }
}

/// Storage for flushed documents.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Writes a single document into the given collection.
    async fn insert(&self, collection: &str, document: &FlushDocument) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            "mongo:1234".parse::<SinkAddress>(),
            Ok(SinkAddress::new("mongo", 1234))
        );
        assert_eq!(
            "mongo".parse::<SinkAddress>(),
            Ok(SinkAddress::new("mongo", DEFAULT_SINK_PORT))
        );
    }

    #[test]
    fn test_parse_address_invalid() {
        assert_eq!(
            "".parse::<SinkAddress>(),
            Err(ParseSinkAddressError::EmptyHost)
        );
        assert_eq!(
            ":27017".parse::<SinkAddress>(),
            Err(ParseSinkAddressError::EmptyHost)
        );
        assert_eq!(
            "mongo:http".parse::<SinkAddress>(),
            Err(ParseSinkAddressError::InvalidPort)
        );
        assert_eq!(
            "mongo:70000".parse::<SinkAddress>(),
            Err(ParseSinkAddressError::InvalidPort)
        );
    }

    #[test]
    fn test_address_serde() {
        let address: SinkAddress = serde_json::from_str(r#""mongo:1234""#).unwrap();
        assert_eq!(address, SinkAddress::new("mongo", 1234));
        assert_eq!(serde_json::to_string(&address).unwrap(), r#""mongo:1234""#);

        assert!(serde_json::from_str::<SinkAddress>(r#""mongo:x""#).is_err());
    }
}
