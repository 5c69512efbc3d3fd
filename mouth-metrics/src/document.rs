use std::collections::BTreeMap;

use mouth_common::UnixTimestamp;
use serde::{Deserialize, Serialize};

use crate::TimerSummary;

/// All metrics of a namespace produced by a single flush.
///
/// Counters, timers and gauges of the namespace are merged into one document, keyed by their
/// subkey. Kinds without any values are omitted when serializing:
///
/// ```json
/// {
///   "t": 1700000000,
///   "c": {"signups": 10.0},
///   "m": {"render": {"count": 1, "min": 320.0, "max": 320.0, "mean": 320.0, "sum": 320.0, "median": 320.0, "stddev": 0.0}},
///   "g": {"depth": 333.0}
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct FlushDocument {
    /// The namespace of all metrics in this document.
    ///
    /// This selects the collection the document is stored in and is not part of the payload.
    #[serde(skip)]
    pub namespace: String,
    /// Time of the flush that produced this document.
    #[serde(rename = "t")]
    pub timestamp: UnixTimestamp,
    /// Summed counter values.
    #[serde(rename = "c", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, f64>,
    /// Timer statistics.
    #[serde(rename = "m", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub timers: BTreeMap<String, TimerSummary>,
    /// Last gauge values.
    #[serde(rename = "g", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gauges: BTreeMap<String, f64>,
}

impl FlushDocument {
    /// Creates an empty document for the given namespace.
    pub fn new(namespace: impl Into<String>, timestamp: UnixTimestamp) -> Self {
        Self {
            namespace: namespace.into(),
            timestamp,
            ..Default::default()
        }
    }

    /// Returns `true` if the document contains no metrics.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.timers.is_empty() && self.gauges.is_empty()
    }

    /// Returns the name of the collection this document is stored in.
    pub fn collection_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_omits_empty_kinds() {
        let mut document = FlushDocument::new("app", UnixTimestamp::from_secs(100));
        document.counters.insert("signups".to_owned(), 10.0);
        document.gauges.insert("depth".to_owned(), 333.0);

        insta::assert_json_snapshot!(document, @r###"
        {
          "t": 100,
          "c": {
            "signups": 10.0
          },
          "g": {
            "depth": 333.0
          }
        }
        "###);
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{"t": 100, "m": {"render": {"count": 1, "min": 3.0, "max": 3.0, "mean": 3.0, "sum": 3.0, "median": 3.0, "stddev": 0.0}}}"#;
        let document: FlushDocument = serde_json::from_str(json).unwrap();

        assert_eq!(document.timestamp, UnixTimestamp::from_secs(100));
        assert!(document.counters.is_empty());
        assert_eq!(document.timers["render"].count, 1);
        assert_eq!(document.namespace, "");
    }

    #[test]
    fn test_collection_name() {
        let document = FlushDocument::new("app", UnixTimestamp::from_secs(0));
        assert_eq!(document.collection_name("mouth_"), "mouth_app");
        assert_eq!(document.collection_name(""), "app");
        assert!(document.is_empty());
    }
}
