//! The Mouth server.
//!
//! The server is assembled from three services, all started by [`run`]:
//!
//!  - The UDP listener receives datagrams in the metrics line protocol and forwards every parsed
//!    batch of samples to the aggregator.
//!  - The aggregator sums up samples into time buckets and, once per flush interval, turns all
//!    elapsed buckets into one document per namespace.
//!  - The store writes each flushed document to the sink, a MongoDB database, into a collection
//!    named after the document's namespace.
//!
//! ```text
//!  UDP --> Listener --(InsertSamples)--> Aggregator --(FlushDocuments)--> Store --> MongoDB
//! ```
//!
//! On shutdown, the listener stops receiving, the aggregator performs a final flush of all
//! elapsed buckets and the store writes the remaining documents before the process exits. Samples
//! in the current, still open bucket are dropped.
#![warn(missing_docs)]

use std::io;

use mouth_config::Config;
use mouth_sink::SinkError;
use mouth_system::{Controller, ServiceRunner, Shutdown};

mod service;
mod services;
mod statsd;

pub use service::*;
pub use services::listener::UdpListener;
pub use services::store::{Store, StoreService};

/// An error returned when starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the UDP socket failed.
    #[error("bind to interface failed")]
    BindFailed(#[source] io::Error),

    /// The async runtime could not be created.
    #[error("failed to create the runtime")]
    Runtime(#[source] io::Error),

    /// The sink is misconfigured.
    #[error("failed to create the document sink")]
    Sink(#[from] SinkError),
}

/// Runs a Mouth server and spawns all internal worker threads.
///
/// This effectively boots the entire server application. It blocks the current thread until a
/// shutdown signal is received or a fatal error happens. Behavior on signals:
///
///  - `SIGINT` and `SIGTERM` perform a graceful shutdown, waiting at most the configured shutdown
///    timeout for the final flush to be stored.
///  - `SIGQUIT` exits immediately without a final flush.
pub fn run(config: Config) -> Result<(), ServerError> {
    let runtime = create_runtime("mouth-worker")?;

    runtime.block_on(async {
        Controller::start(config.shutdown_timeout());

        let mut runner = ServiceRunner::new();
        let state = ServiceState::start(&config, &mut runner)?;
        mouth_log::info!("mouth server started on udp://{}/", state.listen_addr());

        let Shutdown { timeout } = Controller::shutdown_handle().notified().await;
        drop(state);

        match timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, runner.join()).await.is_err() {
                    mouth_log::error!(
                        "services did not stop within {}s, exiting anyway",
                        timeout.as_secs()
                    );
                }
            }
            None => mouth_log::info!("shutting down immediately"),
        }

        mouth_log::info!("mouth server shut down");
        Ok(())
    })
}
