use mouth_log::LogError;
use mouth_metrics::FlushDocuments;
use mouth_sink::DocumentSink;
use mouth_system::{FromMessage, Interface, NoResponse, Receiver, Service};

use crate::statsd::{ServerCounters, ServerTimers};

/// Persists flushed documents.
///
/// Each document is written to the collection named after its namespace.
#[derive(Debug)]
pub struct Store(FlushDocuments);

impl Interface for Store {}

impl FromMessage<FlushDocuments> for Store {
    type Response = NoResponse;

    fn from_message(message: FlushDocuments, _: ()) -> Self {
        Self(message)
    }
}

/// Service implementing the [`Store`] interface.
///
/// Documents are written one after another. A failed write is logged and the document is dropped,
/// the remaining documents of the flush are still written. The service stops once all senders are
/// gone and the queue is drained.
pub struct StoreService {
    sink: Box<dyn DocumentSink>,
    collection_prefix: String,
}

impl StoreService {
    /// Creates a store writing to `sink`, with collections named `{collection_prefix}{namespace}`.
    pub fn new(sink: Box<dyn DocumentSink>, collection_prefix: impl Into<String>) -> Self {
        Self {
            sink,
            collection_prefix: collection_prefix.into(),
        }
    }

    async fn handle_flush(&self, message: FlushDocuments) {
        for document in message.documents {
            let collection = document.collection_name(&self.collection_prefix);

            let result = mouth_statsd::metric!(timer(ServerTimers::StoreDuration), {
                self.sink.insert(&collection, &document).await
            });

            match result {
                Ok(()) => {
                    mouth_log::debug!(collection = %collection, timestamp = %document.timestamp, "stored document");
                    mouth_statsd::metric!(counter(ServerCounters::DocumentsStored) += 1);
                }
                Err(error) => {
                    mouth_log::error!(
                        collection = %collection,
                        "failed to store document: {}",
                        LogError(&error),
                    );
                    mouth_statsd::metric!(counter(ServerCounters::StoreFailures) += 1);
                }
            }
        }
    }
}

impl Service for StoreService {
    type Interface = Store;

    async fn run(self, mut rx: Receiver<Self::Interface>) {
        mouth_log::info!(prefix = %self.collection_prefix, "document store started");

        while let Some(Store(message)) = rx.recv().await {
            self.handle_flush(message).await;
        }

        mouth_log::info!("document store stopped");
    }
}

#[cfg(test)]
mod tests {
    use mouth_common::UnixTimestamp;
    use mouth_metrics::FlushDocument;
    use mouth_sink::MemorySink;
    use mouth_system::ServiceRunner;

    use super::*;

    fn document(namespace: &str, counter: f64) -> FlushDocument {
        let mut document = FlushDocument::new(namespace, UnixTimestamp::from_secs(100));
        document.counters.insert("signups".to_owned(), counter);
        document
    }

    #[tokio::test]
    async fn test_store_documents() {
        mouth_log::init_test!();

        let sink = MemorySink::new();
        let mut runner = ServiceRunner::new();
        let store = runner.start(StoreService::new(Box::new(sink.clone()), "mouth_"));

        store.send(FlushDocuments {
            documents: vec![document("app", 1.0), document("queue", 2.0)],
        });
        drop(store);
        runner.join().await;

        let stored = sink.documents();
        let collections: Vec<_> = stored.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(collections, vec!["mouth_app", "mouth_queue"]);
        assert_eq!(stored[1].1.counters["signups"], 2.0);
    }

    #[tokio::test]
    async fn test_failed_insert_continues() {
        mouth_log::init_test!();

        let sink = MemorySink::new();
        sink.reject_collection("mouth_bad");

        let mut runner = ServiceRunner::new();
        let store = runner.start(StoreService::new(Box::new(sink.clone()), "mouth_"));

        store.send(FlushDocuments {
            documents: vec![document("bad", 1.0), document("good", 2.0)],
        });
        store.send(FlushDocuments {
            documents: vec![document("bad", 3.0)],
        });
        drop(store);
        runner.join().await;

        let stored = sink.documents();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, "mouth_good");
    }

    #[test]
    fn test_store_metrics() {
        let captures = mouth_statsd::with_capturing_test_client(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();

            let sink = MemorySink::new();
            sink.reject_collection("mouth_bad");
            let service = StoreService::new(Box::new(sink), "mouth_");

            runtime.block_on(service.handle_flush(FlushDocuments {
                documents: vec![document("bad", 1.0), document("good", 2.0)],
            }));
        });

        let counters: Vec<_> = captures
            .iter()
            .filter(|metric| metric.starts_with("store.documents"))
            .map(String::as_str)
            .collect();
        assert_eq!(
            counters,
            vec!["store.documents.failed:1|c", "store.documents.stored:1|c"]
        );
    }
}
