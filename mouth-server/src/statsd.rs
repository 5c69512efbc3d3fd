use mouth_statsd::{CounterMetric, TimerMetric};

/// Counter metrics for the server services.
pub enum ServerCounters {
    /// Incremented for every datagram with at least one valid sample.
    ///
    /// Datagrams without any valid line are dropped without being counted.
    DatagramsAccepted,
    /// Incremented for every document written to the sink.
    DocumentsStored,
    /// Incremented for every document the sink failed to write.
    ///
    /// Failed documents are dropped and never retried.
    StoreFailures,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::DatagramsAccepted => "server.datagrams.accepted",
            Self::DocumentsStored => "store.documents.stored",
            Self::StoreFailures => "store.documents.failed",
        }
    }
}

/// Timer metrics for the server services.
pub enum ServerTimers {
    /// Time spent writing a single document to the sink.
    StoreDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::StoreDuration => "store.insert.duration",
        }
    }
}
