use std::fmt;
use std::str::FromStr;

/// Namespace assigned to keys that consist of a single segment.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The normalized name of a metric, split into a namespace and a subkey.
///
/// The namespace is the first dot-separated segment of a raw key and routes the metric to a
/// storage collection. The subkey is everything after it and identifies the metric within the
/// namespace. Both parts only contain ASCII alphanumerics and underscores, the subkey may
/// additionally contain dots.
///
/// The canonical form, returned by `Display`, joins both parts with a dot and parses back into the
/// same key:
///
/// ```
/// use mouth_metrics::MetricKey;
///
/// let key = MetricKey::parse("app.requests.200").unwrap();
/// assert_eq!(key.namespace(), "app");
/// assert_eq!(key.subkey(), "requests.200");
/// assert_eq!(key.to_string().parse::<MetricKey>().unwrap(), key);
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MetricKey {
    namespace: String,
    subkey: String,
}

impl MetricKey {
    /// Normalizes a raw metric key as submitted by clients.
    ///
    /// Characters other than ASCII alphanumerics, underscores and dots are replaced with
    /// underscores, and empty segments are removed. A key with a single segment is placed in the
    /// [default namespace](DEFAULT_NAMESPACE).
    ///
    /// Returns `None` if no segments remain.
    pub fn parse(raw: &str) -> Option<Self> {
        let sanitized: String = raw
            .chars()
            .map(|c| if is_key_char(c) { c } else { '_' })
            .collect();

        let mut segments = sanitized.split('.').filter(|segment| !segment.is_empty());
        let first = segments.next()?;
        let rest: Vec<&str> = segments.collect();

        Some(if rest.is_empty() {
            Self {
                namespace: DEFAULT_NAMESPACE.to_owned(),
                subkey: first.to_owned(),
            }
        } else {
            Self {
                namespace: first.to_owned(),
                subkey: rest.join("."),
            }
        })
    }

    /// Returns the namespace of this key.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the subkey identifying the metric within its namespace.
    pub fn subkey(&self) -> &str {
        &self.subkey
    }

    /// Splits the key into namespace and subkey.
    pub fn into_parts(self) -> (String, String) {
        (self.namespace, self.subkey)
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.subkey)
    }
}

/// An error returned when parsing a [`MetricKey`] from its canonical form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParseMetricKeyError(());

impl fmt::Display for ParseMetricKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid canonical metric key")
    }
}

impl std::error::Error for ParseMetricKeyError {}

impl FromStr for MetricKey {
    type Err = ParseMetricKeyError;

    /// Parses the canonical `namespace.subkey` form.
    ///
    /// Unlike [`MetricKey::parse`], this does not normalize and rejects anything that is not
    /// already canonical.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = Self::parse(s).ok_or(ParseMetricKeyError(()))?;
        if key.to_string() != s {
            return Err(ParseMetricKeyError(()));
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(raw: &str) -> Option<(String, String)> {
        MetricKey::parse(raw).map(MetricKey::into_parts)
    }

    #[test]
    fn test_parse_two_segments() {
        assert_eq!(parts("app.signups"), Some(("app".into(), "signups".into())));
    }

    #[test]
    fn test_parse_nested_subkey() {
        assert_eq!(
            parts("app.http.status.200"),
            Some(("app".into(), "http.status.200".into()))
        );
    }

    #[test]
    fn test_parse_single_segment() {
        assert_eq!(parts("gorets"), Some(("default".into(), "gorets".into())));
    }

    #[test]
    fn test_parse_sanitizes() {
        assert_eq!(
            parts("my-app.page views/total"),
            Some(("my_app".into(), "page_views_total".into()))
        );
        assert_eq!(parts("app.ünï"), Some(("app".into(), "___".into())));
    }

    #[test]
    fn test_parse_drops_empty_segments() {
        assert_eq!(parts(".app..signups."), Some(("app".into(), "signups".into())));
    }

    #[test]
    fn test_parse_nothing_left() {
        assert_eq!(parts(""), None);
        assert_eq!(parts("..."), None);
    }

    #[test]
    fn test_canonical_roundtrip() {
        for raw in ["app.signups", "gorets", "a.b.c.d", "x-y.z z", ".lead.trail."] {
            let key = MetricKey::parse(raw).unwrap();
            let canonical = key.to_string();
            assert_eq!(canonical.parse::<MetricKey>().unwrap(), key, "{raw}");
            // normalizing a canonical key is a noop
            assert_eq!(MetricKey::parse(&canonical).unwrap(), key, "{raw}");
        }
    }

    #[test]
    fn test_from_str_rejects_non_canonical() {
        assert!("gorets".parse::<MetricKey>().is_err());
        assert!("app..signups".parse::<MetricKey>().is_err());
        assert!("app.sign ups".parse::<MetricKey>().is_err());
        assert!("".parse::<MetricKey>().is_err());
    }
}
