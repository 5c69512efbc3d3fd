use mouth_statsd::{CounterMetric, DistributionMetric, GaugeMetric, TimerMetric};

/// Counter metrics for the metrics aggregator.
pub enum MetricCounters {
    /// Incremented for every sample inserted into the aggregator.
    SamplesInserted,

    /// Incremented by the number of open buckets when the aggregator stops.
    ///
    /// Buckets of the current interval are always open, so this is expected to be non-zero on
    /// every shutdown.
    BucketsDropped,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::SamplesInserted => "metrics.samples.inserted",
            Self::BucketsDropped => "metrics.buckets.dropped",
        }
    }
}

/// Timer metrics for the metrics aggregator.
pub enum MetricTimers {
    /// Time spent removing elapsed buckets and assembling flush documents.
    ///
    /// Sending the documents to the store is outside of this timer.
    FlushDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::FlushDuration => "metrics.flush.duration",
        }
    }
}

/// Distribution metrics for the metrics aggregator.
pub enum MetricDistributions {
    /// Number of documents produced by a single flush pass.
    DocumentsFlushed,
}

impl DistributionMetric for MetricDistributions {
    fn name(&self) -> &'static str {
        match *self {
            Self::DocumentsFlushed => "metrics.documents.flushed",
        }
    }
}

/// Gauge metrics for the metrics aggregator.
pub enum MetricGauges {
    /// Number of buckets left open after a flush pass.
    OpenBuckets,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::OpenBuckets => "metrics.buckets.open",
        }
    }
}
