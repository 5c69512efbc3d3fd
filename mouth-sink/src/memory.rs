use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use mouth_metrics::FlushDocument;
use parking_lot::Mutex;

use crate::{DocumentSink, SinkError};

#[derive(Debug, Default)]
struct MemoryState {
    documents: Vec<(String, FlushDocument)>,
    rejected: BTreeSet<String>,
}

/// A sink keeping all documents in memory.
///
/// Clones share the same storage. Inserts into collections marked with
/// [`reject_collection`](Self::reject_collection) fail with [`SinkError::Rejected`].
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets all subsequent inserts into `collection` fail.
    pub fn reject_collection(&self, collection: impl Into<String>) {
        self.state.lock().rejected.insert(collection.into());
    }

    /// Returns all stored documents with their collection, in insertion order.
    pub fn documents(&self) -> Vec<(String, FlushDocument)> {
        self.state.lock().documents.clone()
    }

    /// Returns the number of stored documents.
    pub fn len(&self) -> usize {
        self.state.lock().documents.len()
    }

    /// Returns `true` if no documents have been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn insert(&self, collection: &str, document: &FlushDocument) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.rejected.contains(collection) {
            return Err(SinkError::Rejected(collection.to_owned()));
        }

        state
            .documents
            .push((collection.to_owned(), document.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mouth_common::UnixTimestamp;

    use super::*;

    #[tokio::test]
    async fn test_insert() {
        let sink = MemorySink::new();
        let document = FlushDocument::new("app", UnixTimestamp::from_secs(100));

        sink.insert("mouth_app", &document).await.unwrap();

        assert_eq!(sink.documents(), vec![("mouth_app".to_owned(), document)]);
    }

    #[tokio::test]
    async fn test_reject_collection() {
        let sink = MemorySink::new();
        sink.clone().reject_collection("mouth_bad");

        let document = FlushDocument::new("bad", UnixTimestamp::from_secs(100));
        let result = sink.insert("mouth_bad", &document).await;

        assert!(matches!(result, Err(SinkError::Rejected(c)) if c == "mouth_bad"));
        assert!(sink.is_empty());
    }
}
