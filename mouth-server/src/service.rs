use std::net::SocketAddr;

use mouth_config::Config;
use mouth_metrics::{Aggregator, AggregatorService};
use mouth_sink::{DocumentSink, MongoSink};
use mouth_system::{Addr, ServiceRunner};

use crate::ServerError;
use crate::services::listener::UdpListener;
use crate::services::store::StoreService;

/// Creates the multi-threaded runtime the services run on.
pub fn create_runtime(name: &'static str) -> Result<tokio::runtime::Runtime, ServerError> {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name(name)
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)
}

/// Addresses of the running services.
///
/// Dropping the state releases the handles, which lets the store drain and stop once the
/// aggregator has finished.
#[derive(Debug)]
pub struct ServiceState {
    aggregator: Addr<Aggregator>,
    listen_addr: SocketAddr,
}

impl ServiceState {
    /// Starts all services, writing documents to the configured MongoDB sink.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &Config, runner: &mut ServiceRunner) -> Result<Self, ServerError> {
        let sink = MongoSink::new(config.sink_addresses(), config.sink_database())?;
        Self::start_with_sink(config, Box::new(sink), runner)
    }

    /// Starts all services, writing documents to the given sink.
    pub fn start_with_sink(
        config: &Config,
        sink: Box<dyn DocumentSink>,
        runner: &mut ServiceRunner,
    ) -> Result<Self, ServerError> {
        // Bind first, so that a taken port does not leave services behind.
        let (aggregator, aggregator_rx) = mouth_system::channel("aggregator");
        let listener =
            UdpListener::bind(config.listen_host(), config.listen_port(), aggregator.clone())?;
        let listen_addr = listener.local_addr().map_err(ServerError::BindFailed)?;

        let store = runner.start(StoreService::new(sink, config.collection_prefix()));
        let aggregator_service = AggregatorService::new(
            config.aggregator_config().clone(),
            Some(store.recipient()),
        );
        runner.start_with(aggregator_service, aggregator_rx);
        runner.start(listener);

        Ok(Self {
            aggregator,
            listen_addr,
        })
    }

    /// Returns the address of the aggregator service.
    pub fn aggregator(&self) -> &Addr<Aggregator> {
        &self.aggregator
    }

    /// Returns the address the UDP listener is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}
