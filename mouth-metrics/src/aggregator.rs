//! Core functionality of metrics aggregation.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::mem;

use mouth_common::UnixTimestamp;
use serde::{Deserialize, Serialize};

use crate::{FlushDocument, MetricKey, MetricSample, MetricType, TimerSummary};

/// Parameters used by the [`Aggregator`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Determines the wall clock time interval for buckets and flushes in seconds.
    ///
    /// Defaults to `10` seconds. Every sample is sorted into a bucket of this size based on the
    /// time it was received, and the aggregator flushes elapsed buckets at the same interval.
    pub flush_interval: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { flush_interval: 10 }
    }
}

/// Running totals of an [`Aggregator`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct AggregatorStats {
    /// Number of samples inserted since startup.
    pub samples_received: u64,
    /// Number of flush passes that produced at least one document.
    pub flush_count: u64,
    /// Number of buckets that have not been flushed yet.
    pub open_buckets: usize,
}

type Buckets<T> = BTreeMap<UnixTimestamp, HashMap<MetricKey, T>>;

/// A collector of [`MetricSample`] submissions.
///
/// # Aggregation
///
/// Each sample is assigned to a bucket by the time it was received, truncated to a multiple of
/// the [flush interval](AggregatorConfig::flush_interval). Within a bucket, samples with the same
/// key are aggregated depending on their type:
///
///  - Counters are summed after applying the [sampling correction](MetricSample::sample_factor).
///  - Timers keep a list of all values.
///  - Gauges keep the last value.
///
/// The aggregation is commutative for counters and timers: the order in which samples arrive does
/// not change the result.
///
/// # Flushing
///
/// [`pop_flush_documents`](Self::pop_flush_documents) removes every bucket older than the current
/// one and assembles them into one [`FlushDocument`] per namespace. A flushed bucket is never
/// opened again: samples received for it afterwards go into the oldest bucket that is still open.
#[derive(Debug)]
pub struct Aggregator {
    config: AggregatorConfig,
    counters: Buckets<f64>,
    timers: Buckets<Vec<f64>>,
    gauges: Buckets<f64>,
    last_flush: Option<UnixTimestamp>,
    samples_received: u64,
    flush_count: u64,
}

impl Aggregator {
    /// Creates a new, empty aggregator.
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            counters: BTreeMap::new(),
            timers: BTreeMap::new(),
            gauges: BTreeMap::new(),
            last_flush: None,
            samples_received: 0,
            flush_count: 0,
        }
    }

    /// Returns the configuration of this aggregator.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Returns the bucket timestamp for a sample received at the given time.
    pub fn bucket_timestamp(&self, received_at: UnixTimestamp) -> UnixTimestamp {
        received_at.truncate(self.config.flush_interval)
    }

    /// Inserts a sample received at `received_at` into its bucket.
    ///
    /// If the bucket has already been flushed, the sample is moved into the oldest open bucket.
    pub fn insert(&mut self, sample: MetricSample, received_at: UnixTimestamp) {
        let mut timestamp = self.bucket_timestamp(received_at);
        if let Some(last_flush) = self.last_flush {
            timestamp = timestamp.max(last_flush);
        }
        let value = sample.effective_value();

        match sample.ty {
            MetricType::Counter => {
                *self
                    .counters
                    .entry(timestamp)
                    .or_default()
                    .entry(sample.key)
                    .or_insert(0.0) += value;
            }
            MetricType::Timer => {
                self.timers
                    .entry(timestamp)
                    .or_default()
                    .entry(sample.key)
                    .or_default()
                    .push(value);
            }
            MetricType::Gauge => {
                self.gauges
                    .entry(timestamp)
                    .or_default()
                    .insert(sample.key, value);
            }
        }

        self.samples_received += 1;
    }

    /// Returns the number of open buckets across all metric types.
    ///
    /// A bucket is the set of all values of one type sharing a bucket timestamp.
    pub fn bucket_count(&self) -> usize {
        self.counters.len() + self.timers.len() + self.gauges.len()
    }

    /// Returns the running totals of this aggregator.
    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            samples_received: self.samples_received,
            flush_count: self.flush_count,
            open_buckets: self.bucket_count(),
        }
    }

    /// Removes all elapsed buckets and returns them as documents.
    ///
    /// `now` is the timestamp of the current bucket. Every bucket with a timestamp of at most
    /// `now - 1` is removed. Its values are merged into one document per namespace, all stamped
    /// with `now`. Documents are returned in order of their namespace.
    ///
    /// If more than one elapsed bucket holds values for the same key, counters are summed, timer
    /// values are combined into one summary and the gauge of the newest bucket wins.
    pub fn pop_flush_documents(&mut self, now: UnixTimestamp) -> Vec<FlushDocument> {
        self.last_flush = self.last_flush.max(Some(now));

        let mut documents = BTreeMap::<String, FlushDocument>::new();

        for (key, value) in merge_elapsed(&mut self.counters, now, |sum, value| *sum += value) {
            let (namespace, subkey) = key.into_parts();
            document_for(&mut documents, namespace, now)
                .counters
                .insert(subkey, value);
        }

        for (key, values) in merge_elapsed(&mut self.timers, now, |all, values| all.extend(values))
        {
            let (namespace, subkey) = key.into_parts();
            // Timer entries are only created along with their first value.
            let Some(summary) = TimerSummary::from_values(&values) else {
                continue;
            };
            document_for(&mut documents, namespace, now)
                .timers
                .insert(subkey, summary);
        }

        for (key, value) in merge_elapsed(&mut self.gauges, now, |last, value| *last = value) {
            let (namespace, subkey) = key.into_parts();
            document_for(&mut documents, namespace, now)
                .gauges
                .insert(subkey, value);
        }

        if !documents.is_empty() {
            self.flush_count += 1;
        }

        documents.into_values().collect()
    }
}

fn document_for(
    documents: &mut BTreeMap<String, FlushDocument>,
    namespace: String,
    now: UnixTimestamp,
) -> &mut FlushDocument {
    documents
        .entry(namespace)
        .or_insert_with_key(|namespace| FlushDocument::new(namespace.as_str(), now))
}

/// Removes all buckets older than `now` and merges their values per key.
///
/// Buckets are merged in ascending order of their timestamp.
fn merge_elapsed<T>(
    buckets: &mut Buckets<T>,
    now: UnixTimestamp,
    mut merge: impl FnMut(&mut T, T),
) -> HashMap<MetricKey, T> {
    let open = buckets.split_off(&now);
    let elapsed = mem::replace(buckets, open);

    let mut merged = HashMap::new();
    for (key, value) in elapsed.into_values().flatten() {
        match merged.entry(key) {
            Entry::Occupied(mut entry) => merge(entry.get_mut(), value),
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn sample(line: &str) -> MetricSample {
        MetricSample::parse(line.as_bytes()).unwrap()
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(AggregatorConfig::default())
    }

    fn ts(secs: u64) -> UnixTimestamp {
        UnixTimestamp::from_secs(secs)
    }

    #[test]
    fn test_sampling_correction() {
        let mut aggregator = aggregator();
        aggregator.insert(sample("app.signups:1|c|@0.1"), ts(95));
        aggregator.insert(sample("app.zero:1|c|@0"), ts(95));
        aggregator.insert(sample("app.over:1|c|@2.0"), ts(95));

        let documents = aggregator.pop_flush_documents(ts(100));
        assert_eq!(documents.len(), 1);

        let counters = &documents[0].counters;
        assert_eq!(counters["signups"], 10.0);
        assert_eq!(counters["zero"], 1.0);
        assert_eq!(counters["over"], 1.0);
    }

    #[test]
    fn test_counter_order_independent() {
        let lines = ["a.x:1|c", "a.x:2.5|c|@0.5", "a.x:-1|c", "a.x:7|c"];

        let mut forward = aggregator();
        for line in lines {
            forward.insert(sample(line), ts(91));
        }

        let mut backward = aggregator();
        for line in lines.iter().rev() {
            backward.insert(sample(line), ts(98));
        }

        let forward = forward.pop_flush_documents(ts(100));
        let backward = backward.pop_flush_documents(ts(100));
        assert_eq!(forward, backward);
        assert_eq!(forward[0].counters["x"], 12.0);
    }

    #[test]
    fn test_timer_order_independent() {
        let mut forward = aggregator();
        let mut backward = aggregator();
        for value in [5, 1, 4, 2, 3] {
            forward.insert(sample(&format!("a.t:{value}|ms")), ts(90));
            backward.insert(sample(&format!("a.t:{}|ms", 6 - value)), ts(90));
        }

        let forward = forward.pop_flush_documents(ts(100));
        let backward = backward.pop_flush_documents(ts(100));
        assert_eq!(forward, backward);
        assert_eq!(forward[0].timers["t"].median, 3.0);
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let mut aggregator = aggregator();
        aggregator.insert(sample("queue.depth:5|g"), ts(90));
        aggregator.insert(sample("queue.depth:3|g"), ts(90));

        let documents = aggregator.pop_flush_documents(ts(100));
        assert_eq!(documents[0].gauges["depth"], 3.0);
    }

    #[test]
    fn test_flush_boundary() {
        let mut aggregator = aggregator();
        aggregator.insert(sample("app.old:1|c"), ts(95));
        aggregator.insert(sample("app.new:1|c"), ts(104));

        let documents = aggregator.pop_flush_documents(ts(100));
        assert_eq!(documents.len(), 1);
        assert!(documents[0].counters.contains_key("old"));
        assert!(!documents[0].counters.contains_key("new"));

        // The current bucket stays open.
        assert_eq!(aggregator.bucket_count(), 1);
    }

    #[test]
    fn test_no_double_flush() {
        let mut aggregator = aggregator();
        aggregator.insert(sample("app.signups:1|c"), ts(90));

        assert_eq!(aggregator.pop_flush_documents(ts(100)).len(), 1);
        assert!(aggregator.pop_flush_documents(ts(100)).is_empty());
        assert!(aggregator.pop_flush_documents(ts(110)).is_empty());
        assert_eq!(aggregator.bucket_count(), 0);
    }

    #[test]
    fn test_late_sample_after_flush() {
        let mut aggregator = aggregator();
        aggregator.insert(sample("app.x:1|c"), ts(95));
        assert_eq!(aggregator.pop_flush_documents(ts(100)).len(), 1);

        // Received before the flush, but inserted after it.
        aggregator.insert(sample("app.x:5|c"), ts(95));
        assert!(aggregator.pop_flush_documents(ts(100)).is_empty());
        assert_eq!(aggregator.bucket_count(), 1);

        let documents = aggregator.pop_flush_documents(ts(110));
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].timestamp, ts(110));
        assert_eq!(documents[0].counters["x"], 5.0);
        assert_eq!(aggregator.stats().flush_count, 2);
    }

    #[test]
    fn test_documents_merge_kinds() {
        let mut aggregator = aggregator();
        aggregator.insert(sample("app.signups:2|c"), ts(90));
        aggregator.insert(sample("app.render:320|ms"), ts(90));
        aggregator.insert(sample("app.users:42|g"), ts(90));
        aggregator.insert(sample("queue.depth:7|g"), ts(90));
        aggregator.insert(sample("gorets:1|c"), ts(90));

        let documents = aggregator.pop_flush_documents(ts(100));
        let namespaces: Vec<_> = documents.iter().map(|d| d.namespace.as_str()).collect();
        assert_eq!(namespaces, vec!["app", "default", "queue"]);

        insta::assert_json_snapshot!(documents[0], @r###"
        {
          "t": 100,
          "c": {
            "signups": 2.0
          },
          "m": {
            "render": {
              "count": 1,
              "min": 320.0,
              "max": 320.0,
              "mean": 320.0,
              "sum": 320.0,
              "median": 320.0,
              "stddev": 0.0
            }
          },
          "g": {
            "users": 42.0
          }
        }
        "###);
    }

    #[test]
    fn test_documents_stamped_with_flush_time() {
        let mut aggregator = aggregator();
        aggregator.insert(sample("app.a:1|c"), ts(70));
        aggregator.insert(sample("app.a:2|c"), ts(80));
        aggregator.insert(sample("app.b:1|g"), ts(70));
        aggregator.insert(sample("app.b:9|g"), ts(85));

        let documents = aggregator.pop_flush_documents(ts(100));
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].timestamp, ts(100));
        assert_eq!(documents[0].counters["a"], 3.0);
        assert_eq!(documents[0].gauges["b"], 9.0);
    }

    #[test]
    fn test_stats() {
        let mut aggregator = aggregator();
        assert_eq!(aggregator.stats(), AggregatorStats::default());

        aggregator.insert(sample("app.a:1|c"), ts(90));
        aggregator.insert(sample("app.b:1|ms"), ts(90));
        aggregator.insert(sample("app.c:1|g"), ts(100));

        assert_eq!(
            aggregator.stats(),
            AggregatorStats {
                samples_received: 3,
                flush_count: 0,
                open_buckets: 3,
            }
        );

        aggregator.pop_flush_documents(ts(100));
        // Empty passes are not counted.
        aggregator.pop_flush_documents(ts(100));

        assert_eq!(
            aggregator.stats(),
            AggregatorStats {
                samples_received: 3,
                flush_count: 1,
                open_buckets: 1,
            }
        );
    }

    #[test]
    fn test_bucket_timestamp() {
        let aggregator = Aggregator::new(AggregatorConfig { flush_interval: 60 });
        assert_eq!(aggregator.bucket_timestamp(ts(119)), ts(60));
        assert_eq!(aggregator.bucket_timestamp(ts(120)), ts(120));
    }
}
