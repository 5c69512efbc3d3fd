use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::options::{ClientOptions, ServerAddress};
use mongodb::{Client, Collection};
use mouth_metrics::FlushDocument;
use tokio::sync::OnceCell;

use crate::{DocumentSink, SinkAddress, SinkError};

/// Time to wait for a suitable server before an insert fails.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// A sink writing documents into a MongoDB database.
///
/// The client is created on the first insert and reused afterwards. Only a single server is
/// supported; replica sets and sharded clusters are rejected when creating the sink.
pub struct MongoSink {
    address: SinkAddress,
    database: String,
    client: OnceCell<Client>,
}

impl fmt::Debug for MongoSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoSink")
            .field("address", &self.address)
            .field("database", &self.database)
            .field("connected", &self.client.initialized())
            .finish()
    }
}

impl MongoSink {
    /// Creates a sink for the given server addresses and database.
    ///
    /// Fails with [`SinkError::UnsupportedTopology`] unless exactly one address is given. This
    /// does not connect to the server yet.
    pub fn new(addresses: Vec<SinkAddress>, database: impl Into<String>) -> Result<Self, SinkError> {
        let address = match <[SinkAddress; 1]>::try_from(addresses) {
            Ok([address]) => address,
            Err(addresses) => return Err(SinkError::UnsupportedTopology(addresses.len())),
        };

        Ok(Self {
            address,
            database: database.into(),
            client: OnceCell::new(),
        })
    }

    /// Returns the address of the server.
    pub fn address(&self) -> &SinkAddress {
        &self.address
    }

    async fn client(&self) -> Result<&Client, SinkError> {
        self.client
            .get_or_try_init(|| async {
                mouth_log::info!(address = %self.address, database = %self.database, "connecting to sink");
                Client::with_options(self.client_options()?).map_err(SinkError::Connect)
            })
            .await
    }

    /// Options for a direct connection to the configured server, without topology discovery.
    fn client_options(&self) -> Result<ClientOptions, SinkError> {
        let mut options = ClientOptions::default();
        options.hosts =
            vec![ServerAddress::parse(self.address.to_string()).map_err(SinkError::Connect)?];
        options.direct_connection = Some(true);
        options.app_name = Some("mouth".to_owned());
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        Ok(options)
    }

    async fn collection(&self, name: &str) -> Result<Collection<FlushDocument>, SinkError> {
        let client = self.client().await?;
        Ok(client.database(&self.database).collection(name))
    }
}

#[async_trait]
impl DocumentSink for MongoSink {
    async fn insert(&self, collection: &str, document: &FlushDocument) -> Result<(), SinkError> {
        self.collection(collection)
            .await?
            .insert_one(document)
            .await
            .map_err(|source| SinkError::Insert {
                collection: collection.to_owned(),
                source,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_address() {
        let sink = MongoSink::new(vec![SinkAddress::new("localhost", 27017)], "mouth").unwrap();
        assert_eq!(sink.address(), &SinkAddress::new("localhost", 27017));
        assert!(!sink.client.initialized());
    }

    #[test]
    fn test_direct_connection() {
        let sink = MongoSink::new(vec![SinkAddress::new("mongo1", 27018)], "mouth").unwrap();
        let options = sink.client_options().unwrap();

        assert_eq!(options.direct_connection, Some(true));
        assert_eq!(
            options.hosts,
            vec![ServerAddress::parse("mongo1:27018").unwrap()]
        );
    }

    #[test]
    fn test_rejects_multiple_addresses() {
        let addresses = vec![
            SinkAddress::new("mongo1", 27017),
            SinkAddress::new("mongo2", 27017),
        ];

        let result = MongoSink::new(addresses, "mouth");
        assert!(matches!(result, Err(SinkError::UnsupportedTopology(2))));
    }

    #[test]
    fn test_rejects_no_address() {
        let result = MongoSink::new(vec![], "mouth");
        assert!(matches!(result, Err(SinkError::UnsupportedTopology(0))));
    }
}
