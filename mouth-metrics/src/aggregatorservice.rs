use std::time::Duration;

use mouth_common::UnixTimestamp;
use mouth_system::{
    AsyncResponse, Controller, FromMessage, Interface, NoResponse, Recipient, Sender, Service,
    Shutdown, ShutdownHandle,
};
use tokio::time::{Instant, MissedTickBehavior};

use crate::aggregator::{self, AggregatorConfig, AggregatorStats};
use crate::statsd::{MetricCounters, MetricDistributions, MetricGauges, MetricTimers};
use crate::{FlushDocument, MetricSample};

/// Aggregator for metric samples.
///
/// Samples are collected into buckets and flushed to a receiver once their interval has passed.
/// See [`aggregator::Aggregator`] for the aggregation rules.
///
/// Receivers must implement a handler for the [`FlushDocuments`] message.
#[derive(Debug)]
pub enum Aggregator {
    /// Inserts samples into their buckets.
    InsertSamples(InsertSamples),
    /// Returns the running totals of the aggregator.
    GetStats(GetStats, Sender<AggregatorStats>),
}

impl Aggregator {
    /// Returns the name of the message variant.
    fn variant(&self) -> &'static str {
        match self {
            Aggregator::InsertSamples(_) => "InsertSamples",
            Aggregator::GetStats(_, _) => "GetStats",
        }
    }
}

impl Interface for Aggregator {}

impl FromMessage<InsertSamples> for Aggregator {
    type Response = NoResponse;

    fn from_message(message: InsertSamples, _: ()) -> Self {
        Self::InsertSamples(message)
    }
}

impl FromMessage<GetStats> for Aggregator {
    type Response = AsyncResponse<AggregatorStats>;

    fn from_message(message: GetStats, sender: Sender<AggregatorStats>) -> Self {
        Self::GetStats(message, sender)
    }
}

/// A batch of samples received at the same time, usually from a single datagram.
#[derive(Debug)]
pub struct InsertSamples {
    /// The parsed samples.
    pub samples: Vec<MetricSample>,
    /// Time at which the samples were received, used to select their bucket.
    pub received_at: UnixTimestamp,
}

/// Requests the running totals of the aggregator.
#[derive(Debug)]
pub struct GetStats;

/// A message containing all documents of a flush pass.
#[derive(Clone, Debug)]
pub struct FlushDocuments {
    /// The documents, one per namespace.
    pub documents: Vec<FlushDocument>,
}

/// Service implementing the [`Aggregator`] interface.
pub struct AggregatorService {
    aggregator: aggregator::Aggregator,
    receiver: Option<Recipient<FlushDocuments, NoResponse>>,
    shutdown: Option<ShutdownHandle>,
}

impl AggregatorService {
    /// Create a new aggregator service and connect it to `receiver`.
    ///
    /// The aggregator sends documents to the receiver at the configured flush interval. It stops
    /// when the [`Controller`] initiates a shutdown.
    pub fn new(
        config: AggregatorConfig,
        receiver: Option<Recipient<FlushDocuments, NoResponse>>,
    ) -> Self {
        Self {
            aggregator: aggregator::Aggregator::new(config),
            receiver,
            shutdown: None,
        }
    }

    /// Listens to the given handle for shutdown instead of the global [`Controller`].
    pub fn with_shutdown_handle(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.aggregator.config().flush_interval.max(1))
    }

    /// Applies all queued messages, then flushes.
    ///
    /// Samples received before the tick must be inserted before their bucket is flushed.
    fn handle_tick(&mut self, rx: &mut mouth_system::Receiver<Aggregator>) {
        while let Some(message) = rx.try_recv() {
            self.handle_message(message);
        }
        self.try_flush();
    }

    /// Flushes all elapsed buckets and sends the documents to the receiver.
    fn try_flush(&mut self) {
        let now = self.aggregator.bucket_timestamp(UnixTimestamp::now());
        let documents = mouth_statsd::metric!(timer(MetricTimers::FlushDuration), {
            self.aggregator.pop_flush_documents(now)
        });

        let stats = self.aggregator.stats();
        mouth_log::info!(
            samples_received = stats.samples_received,
            flushes = stats.flush_count,
            documents = documents.len(),
            open_buckets = stats.open_buckets,
            "flush tick",
        );
        mouth_statsd::metric!(gauge(MetricGauges::OpenBuckets) = stats.open_buckets as u64);

        if documents.is_empty() {
            return;
        }

        mouth_statsd::metric!(
            distribution(MetricDistributions::DocumentsFlushed) = documents.len() as u64
        );

        if let Some(ref receiver) = self.receiver {
            receiver.send(FlushDocuments { documents })
        }
    }

    fn handle_insert_samples(&mut self, message: InsertSamples) {
        let InsertSamples {
            samples,
            received_at,
        } = message;

        mouth_statsd::metric!(counter(MetricCounters::SamplesInserted) += samples.len() as i64);
        for sample in samples {
            self.aggregator.insert(sample, received_at);
        }
    }

    fn handle_message(&mut self, message: Aggregator) {
        mouth_log::trace!(message = message.variant(), "aggregator message");
        match message {
            Aggregator::InsertSamples(message) => self.handle_insert_samples(message),
            Aggregator::GetStats(_, sender) => sender.send(self.aggregator.stats()),
        }
    }

    fn handle_shutdown(&mut self, message: Shutdown) {
        mouth_log::info!(timeout = ?message.timeout, "shutting down metrics aggregator");
        if message.timeout.is_some() {
            self.try_flush();
        }
    }
}

impl Service for AggregatorService {
    type Interface = Aggregator;

    async fn run(mut self, mut rx: mouth_system::Receiver<Self::Interface>) {
        let flush_interval = self.flush_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self
            .shutdown
            .take()
            .unwrap_or_else(Controller::shutdown_handle);

        let stats = self.aggregator.stats();
        mouth_log::info!(
            flush_interval = self.aggregator.config().flush_interval,
            samples_received = stats.samples_received,
            flushes = stats.flush_count,
            "metrics aggregator started",
        );

        loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => self.handle_tick(&mut rx),
                Some(message) = rx.recv() => self.handle_message(message),
                shutdown = shutdown.notified() => {
                    self.handle_shutdown(shutdown);
                    break;
                }

                else => break,
            }
        }
    }
}

impl Drop for AggregatorService {
    fn drop(&mut self) {
        let remaining_buckets = self.aggregator.bucket_count();
        if remaining_buckets > 0 {
            mouth_log::warn!("metrics aggregator dropping {remaining_buckets} open buckets");
            mouth_statsd::metric!(
                counter(MetricCounters::BucketsDropped) += remaining_buckets as i64
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, RwLock};

    use mouth_system::Receiver;
    use tokio::sync::watch;

    use super::*;

    #[derive(Default)]
    struct ReceivedData {
        documents: Vec<FlushDocument>,
    }

    struct TestInterface(FlushDocuments);

    impl Interface for TestInterface {}

    impl FromMessage<FlushDocuments> for TestInterface {
        type Response = NoResponse;

        fn from_message(message: FlushDocuments, _: ()) -> Self {
            Self(message)
        }
    }

    #[derive(Clone, Default)]
    struct TestReceiver {
        data: Arc<RwLock<ReceivedData>>,
    }

    impl TestReceiver {
        fn documents(&self) -> Vec<FlushDocument> {
            self.data.read().unwrap().documents.clone()
        }
    }

    impl Service for TestReceiver {
        type Interface = TestInterface;

        async fn run(self, mut rx: Receiver<Self::Interface>) {
            while let Some(message) = rx.recv().await {
                let documents = message.0.documents;
                mouth_log::debug!(?documents, "received documents");
                self.data.write().unwrap().documents.extend(documents);
            }
        }
    }

    fn samples(data: &str) -> Vec<MetricSample> {
        MetricSample::parse_all(data.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn shutdown_channel() -> (watch::Sender<Option<Shutdown>>, ShutdownHandle) {
        let (tx, rx) = watch::channel(None);
        (tx, ShutdownHandle::from_receiver(rx))
    }

    #[tokio::test]
    async fn test_flush_documents() {
        mouth_log::init_test!();
        tokio::time::pause();

        let receiver = TestReceiver::default();
        let recipient = receiver.clone().start_detached().recipient();

        let (_tx, handle) = shutdown_channel();
        let aggregator = AggregatorService::new(AggregatorConfig::default(), Some(recipient))
            .with_shutdown_handle(handle)
            .start_detached();

        aggregator.send(InsertSamples {
            samples: samples("app.signups:1|c|@0.5\napp.render:320|ms\ngorets:7|g"),
            // Far in the past, so the bucket is elapsed at the next tick.
            received_at: UnixTimestamp::from_secs(4711),
        });

        let stats = aggregator.send(GetStats).await.unwrap();
        assert_eq!(stats.samples_received, 3);
        assert_eq!(stats.open_buckets, 3);

        // Wait for the next tick, plus a buffer of 100ms.
        tokio::time::sleep(Duration::from_millis(10_100)).await;

        let documents = receiver.documents();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].namespace, "app");
        assert_eq!(documents[0].counters["signups"], 2.0);
        assert_eq!(documents[0].timers["render"].count, 1);
        assert_eq!(documents[1].namespace, "default");
        assert_eq!(documents[1].gauges["gorets"], 7.0);

        let stats = aggregator.send(GetStats).await.unwrap();
        assert_eq!(stats.flush_count, 1);
        assert_eq!(stats.open_buckets, 0);
    }

    #[tokio::test]
    async fn test_queued_samples_flushed_once() {
        mouth_log::init_test!();
        tokio::time::pause();

        let receiver = TestReceiver::default();
        let recipient = receiver.clone().start_detached().recipient();

        let (_tx, handle) = shutdown_channel();
        let aggregator = AggregatorService::new(AggregatorConfig::default(), Some(recipient))
            .with_shutdown_handle(handle)
            .start_detached();

        aggregator.send(InsertSamples {
            samples: samples("app.x:1|c"),
            received_at: UnixTimestamp::from_secs(4711),
        });
        assert_eq!(aggregator.send(GetStats).await.unwrap().open_buckets, 1);

        // Queued when the tick fires, for the same bucket.
        aggregator.send(InsertSamples {
            samples: samples("app.x:5|c"),
            received_at: UnixTimestamp::from_secs(4711),
        });
        tokio::time::advance(Duration::from_secs(10)).await;

        let stats = aggregator.send(GetStats).await.unwrap();
        assert_eq!(stats.samples_received, 2);
        assert_eq!(stats.open_buckets, 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let documents = receiver.documents();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].counters["x"], 6.0);

        // The next pass has nothing left to write.
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(receiver.documents().len(), 1);
        assert_eq!(aggregator.send(GetStats).await.unwrap().flush_count, 1);
    }

    #[tokio::test]
    async fn test_flush_on_shutdown() {
        mouth_log::init_test!();
        tokio::time::pause();

        let receiver = TestReceiver::default();
        let recipient = receiver.clone().start_detached().recipient();

        let (tx, handle) = shutdown_channel();
        let aggregator = AggregatorService::new(AggregatorConfig::default(), Some(recipient))
            .with_shutdown_handle(handle)
            .start_detached();

        aggregator.send(InsertSamples {
            samples: samples("app.signups:1|c"),
            received_at: UnixTimestamp::from_secs(4711),
        });
        aggregator.send(InsertSamples {
            samples: samples("app.current:1|c"),
            received_at: UnixTimestamp::from_secs(UnixTimestamp::now().as_secs() + 3600),
        });
        assert_eq!(aggregator.send(GetStats).await.unwrap().open_buckets, 2);

        tx.send_replace(Some(Shutdown {
            timeout: Some(Duration::from_secs(1)),
        }));

        // The service stops after the final flush and closes its inbox.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(aggregator.is_closed());

        let documents = receiver.documents();
        assert_eq!(documents.len(), 1);
        assert!(documents[0].counters.contains_key("signups"));
        assert!(!documents[0].counters.contains_key("current"));
    }

    #[test]
    fn test_drop_reports_open_buckets() {
        let captures = mouth_statsd::with_capturing_test_client(|| {
            let mut service = AggregatorService::new(AggregatorConfig::default(), None);
            service.handle_insert_samples(InsertSamples {
                samples: samples("app.signups:1|c\napp.render:320|ms"),
                received_at: UnixTimestamp::from_secs(4711),
            });
            drop(service);
        });

        assert_eq!(
            captures,
            [
                "metrics.samples.inserted:2|c",
                "metrics.buckets.dropped:2|c"
            ]
        );
    }

    #[tokio::test]
    async fn test_without_receiver() {
        tokio::time::pause();

        let (_tx, handle) = shutdown_channel();
        let aggregator = AggregatorService::new(AggregatorConfig::default(), None)
            .with_shutdown_handle(handle)
            .start_detached();

        aggregator.send(InsertSamples {
            samples: samples("app.signups:1|c"),
            received_at: UnixTimestamp::from_secs(4711),
        });

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        let stats = aggregator.send(GetStats).await.unwrap();
        assert_eq!(stats.flush_count, 1);
        assert_eq!(stats.open_buckets, 0);
    }
}
