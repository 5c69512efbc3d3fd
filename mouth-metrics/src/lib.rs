//! Metric protocol, aggregation and flushing.
//!
//! # Protocol
//!
//! Clients submit metrics in a [text-based protocol](MetricSample) over UDP. Each line of a
//! datagram carries one sample:
//!
//! ```text
//! <key>:<value>|<type>[|@<sampling_rate>]
//! ```
//!
//! The key consists of a namespace and a subkey separated by the first dot, see [`MetricKey`].
//! The type is one of `c` (counter), `ms` (timer) or `g` (gauge). The sampling rate only applies
//! to counters and scales the submitted value up by its inverse.
//!
//! ```text
//! app.signups:1|c|@0.1
//! app.render:320|ms
//! queue.depth:333|g
//! ```
//!
//! # Aggregation
//!
//! Samples are sorted into buckets by the time they were received, truncated to the flush
//! interval. Counters are summed, timers collect all raw values and gauges keep the last value.
//! See [`aggregator::Aggregator`].
//!
//! # Flushing
//!
//! The [`AggregatorService`] flushes all buckets older than the current bucket at a fixed
//! interval. Buckets of the same namespace are merged into one [`FlushDocument`], timers are
//! reduced to a [`TimerSummary`], and the documents are sent to a [`FlushDocuments`] receiver.
//!
//! ```
//! use mouth_common::UnixTimestamp;
//! use mouth_metrics::aggregator::{Aggregator, AggregatorConfig};
//! use mouth_metrics::MetricSample;
//!
//! let mut aggregator = Aggregator::new(AggregatorConfig::default());
//! for sample in MetricSample::parse_all(b"app.signups:1|c\napp.signups:2|c") {
//!     aggregator.insert(sample.unwrap(), UnixTimestamp::from_secs(95));
//! }
//!
//! let documents = aggregator.pop_flush_documents(UnixTimestamp::from_secs(100));
//! assert_eq!(documents[0].namespace, "app");
//! assert_eq!(documents[0].counters["signups"], 3.0);
//! ```

#![warn(missing_docs)]

pub mod aggregator;

mod aggregatorservice;
mod document;
mod key;
mod protocol;
mod stats;
mod statsd;

pub use aggregatorservice::*;
pub use document::*;
pub use key::*;
pub use protocol::*;
pub use stats::*;
