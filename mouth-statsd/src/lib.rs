//! Internal metrics of the Mouth server, reported to a StatsD server through cadence.
//!
//! Mouth aggregates metrics of other applications, but it also measures itself: samples received,
//! flush durations, documents stored. These internal metrics are sent to a separate StatsD server
//! and are disabled unless one is configured.
//!
//! ## Defining Metrics
//!
//! Every metric is declared as a variant of an enum implementing one of [`CounterMetric`],
//! [`TimerMetric`], [`DistributionMetric`] or [`GaugeMetric`]. The traits only provide the name,
//! but they ensure that a counter cannot be emitted as a gauge by accident.
//!
//! ## Recording
//!
//! All metrics are recorded through the [`metric!`] macro. Without a configured client, the macro
//! does nothing and the value expressions are still evaluated.
//!
//! ```
//! use mouth_statsd::{CounterMetric, metric};
//!
//! enum ListenerCounters {
//!     Datagrams,
//! }
//!
//! impl CounterMetric for ListenerCounters {
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Self::Datagrams => "listener.datagrams",
//!         }
//!     }
//! }
//!
//! metric!(counter(ListenerCounters::Datagrams) += 1);
//! metric!(counter(ListenerCounters::Datagrams) += 1, peer = "local");
//! ```
//!
//! To report to a server, call [`init`] once at startup:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! mouth_statsd::init(mouth_statsd::MetricsConfig {
//!     prefix: "mouth".to_owned(),
//!     host: "127.0.0.1:8125".to_owned(),
//!     buffer_size: None,
//!     default_tags: BTreeMap::new(),
//! })
//! .unwrap();
//! ```
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::Arc;

use cadence::{
    BufferedUdpMetricSink, Metric, MetricBuilder, MetricResult, QueuingMetricSink, StatsdClient,
};
use parking_lot::RwLock;

/// Number of metrics buffered for the background sender. Further metrics are dropped.
const QUEUE_CAPACITY: usize = 100_000;

/// A configured StatsD client together with the tags attached to every metric.
#[derive(Debug)]
pub struct MetricsClient {
    /// The cadence client sending the metrics.
    pub statsd: StatsdClient,
    /// Tags added to every metric.
    pub default_tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Attaches the default tags and sends the metric.
    ///
    /// Errors are logged and the metric is dropped.
    pub fn send<'a, T>(&'a self, mut builder: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (key, value) in &self.default_tags {
            builder = builder.with_tag(key, value);
        }

        if let Err(error) = builder.try_send() {
            mouth_log::error!(
                error = &error as &dyn std::error::Error,
                capacity = QUEUE_CAPACITY,
                "failed to send internal metric",
            );
        }
    }
}

/// Configuration for [`init`].
#[derive(Debug)]
pub struct MetricsConfig {
    /// Prefix prepended to all metric names, separated by a dot.
    pub prefix: String,
    /// Address of the StatsD server as `host:port`.
    pub host: String,
    /// Size of the datagram buffer. `None` uses cadence's default.
    pub buffer_size: Option<usize>,
    /// Tags added to every metric.
    pub default_tags: BTreeMap<String, String>,
}

static GLOBAL_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static THREAD_CLIENT: RefCell<Option<Arc<MetricsClient>>> =
        RefCell::new(GLOBAL_CLIENT.read().clone());
}

#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Installs `client` for all threads.
///
/// Threads which recorded a metric before keep their previous client, except for the calling
/// thread.
pub fn set_client(client: MetricsClient) {
    let client = Arc::new(client);
    *GLOBAL_CLIENT.write() = Some(Arc::clone(&client));
    THREAD_CLIENT.with(|cell| cell.replace(Some(client)));
}

/// Runs `f` with a client that records metrics instead of sending them.
///
/// Only metrics emitted on the current thread are captured. Returns the metrics in the StatsD
/// line format, without prefix.
#[cfg(any(test, feature = "test"))]
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let client = MetricsClient {
        statsd: StatsdClient::from_sink("", sink),
        default_tags: BTreeMap::new(),
    };

    let previous = THREAD_CLIENT.with(|cell| cell.replace(Some(Arc::new(client))));
    f();
    // Dropping the capturing client closes the spy channel.
    THREAD_CLIENT.with(|cell| cell.replace(previous));

    rx.iter()
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect()
}

/// Starts reporting metrics to the configured StatsD server.
///
/// Metrics are handed to a background thread through a bounded queue, so recording never blocks
/// on the network.
pub fn init(config: MetricsConfig) -> MetricResult<()> {
    mouth_log::info!("reporting internal metrics to statsd at {}", config.host);

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let host = config.host.as_str();
    let udp_sink = match config.buffer_size {
        Some(capacity) => BufferedUdpMetricSink::with_capacity(host, socket, capacity)?,
        None => BufferedUdpMetricSink::from(host, socket)?,
    };

    set_client(MetricsClient {
        statsd: StatsdClient::from_sink(
            &config.prefix,
            QueuingMetricSink::with_capacity(udp_sink, QUEUE_CAPACITY),
        ),
        default_tags: config.default_tags,
    });

    Ok(())
}

/// Calls `f` with the client of the current thread.
///
/// Returns the default value of `R` without calling `f` if no client is configured.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    THREAD_CLIENT.with(|cell| match cell.borrow().as_deref() {
        Some(client) => f(client),
        None => R::default(),
    })
}

/// A counter, incremented by an integer amount.
///
/// Emit with `metric!(counter(Name) += value)`. Increments of zero are skipped.
pub trait CounterMetric {
    /// The name sent to StatsD.
    fn name(&self) -> &'static str;
}

/// A duration, reported in milliseconds.
///
/// Emit with `metric!(timer(Name) = duration)`, or wrap a block to measure its runtime:
///
/// ```
/// use mouth_statsd::{TimerMetric, metric};
///
/// struct Flush;
///
/// impl TimerMetric for Flush {
///     fn name(&self) -> &'static str {
///         "flush"
///     }
/// }
///
/// let documents = metric!(timer(Flush), { vec!["app", "queue"] });
/// assert_eq!(documents.len(), 2);
/// ```
pub trait TimerMetric {
    /// The name sent to StatsD.
    fn name(&self) -> &'static str;
}

/// A distribution of values, for instance the size of a batch.
pub trait DistributionMetric {
    /// The name sent to StatsD.
    fn name(&self) -> &'static str;
}

/// A gauge, set to the current value of some quantity.
pub trait GaugeMetric {
    /// The name sent to StatsD.
    fn name(&self) -> &'static str;
}

/// Records a metric.
///
/// Every form accepts trailing tags as `key = "value"` pairs. See the [crate documentation](self).
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::metric!(@send count_with_tags, $crate::CounterMetric::name(&$id), value $(, $k = $v)*)
            }
            _ => {}
        }
    };

    (gauge($id:expr) = $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::metric!(@send gauge_with_tags, $crate::GaugeMetric::name(&$id), $value $(, $k = $v)*)
    };

    (distribution($id:expr) = $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::metric!(@send distribution_with_tags, $crate::DistributionMetric::name(&$id), $value $(, $k = $v)*)
    };

    // Cadence reports durations in nanoseconds, so timers are sent as fractional milliseconds.
    (timer($id:expr) = $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::metric!(
            @send distribution_with_tags,
            $crate::TimerMetric::name(&$id),
            $value.as_nanos() as f64 / 1e6
            $(, $k = $v)*
        )
    };

    (timer($id:expr), $($k:ident = $v:expr,)* $block:block) => {{
        let started = ::std::time::Instant::now();
        let result = $block;
        $crate::metric!(timer($id) = started.elapsed() $(, $k = $v)*);
        result
    }};

    (@send $method:ident, $name:expr, $value:expr $(, $k:ident = $v:expr)*) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send(
                client.statsd.$method($name, $value)
                    $(.with_tag(stringify!($k), $v))*
            )
        })
    };
}
