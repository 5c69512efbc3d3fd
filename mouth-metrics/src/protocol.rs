use std::fmt;
use std::iter::FusedIterator;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MetricKey;

/// Type of a [`MetricSample`], determining how samples are aggregated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Counts instances of an event.
    ///
    /// Counter values are summed up within a bucket. If the client sampled the counter, the value
    /// is scaled up by the inverse of the sampling rate.
    Counter,
    /// Measures the duration of an operation in milliseconds.
    ///
    /// All values of a bucket are kept and summarized into a [`TimerSummary`](crate::TimerSummary)
    /// when flushing.
    Timer,
    /// Stores an absolute snapshot of a value.
    ///
    /// The last value written to a bucket wins.
    Gauge,
}

impl MetricType {
    /// Return the shortcode for this metric type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Timer => "ms",
            MetricType::Gauge => "g",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "c" => Self::Counter,
            "ms" => Self::Timer,
            "g" => Self::Gauge,
            _ => return Err(ParseMetricError(())),
        })
    }
}

/// An error returned when a line of the metric protocol cannot be parsed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseMetricError(());

impl fmt::Display for ParseMetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse metric")
    }
}

impl std::error::Error for ParseMetricError {}

/// A single metric value submitted by a client.
///
/// Samples are submitted in a statsd-compatible plain text format, one sample per line:
///
/// ```text
/// <key>:<value>|<type>[|@<sampling_rate>]
/// ```
///
///  - **Key:** The raw metric key. It is normalized into a [`MetricKey`] while parsing.
///  - **Value:** A floating point number. Values that are not finite numbers are read as `0`. The
///    whole token must be numeric, so a value like `12abc` is read as `0` as well.
///  - **Type:** One of `c`, `ms` or `g`, see [`MetricType`].
///  - **Sampling rate:** Optional fraction of events the client actually sent. Only applied to
///    counters, see [`sample_factor`](Self::sample_factor).
///
/// Any further `:`- or `|`-separated components are ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    /// The type of the metric.
    pub ty: MetricType,
    /// The normalized key of the metric.
    pub key: MetricKey,
    /// The submitted value.
    pub value: f64,
    /// The sampling rate as submitted by the client, if any.
    pub sampling_rate: Option<f64>,
}

impl MetricSample {
    /// Returns the factor to scale a counter value with.
    ///
    /// This is the inverse of the sampling rate. A rate of zero, a rate above `1` and a missing
    /// rate disable the correction and return `1.0`. Negative rates are inverted as well.
    pub fn sample_factor(&self) -> f64 {
        match self.sampling_rate {
            Some(rate) if rate != 0.0 && rate <= 1.0 => 1.0 / rate,
            _ => 1.0,
        }
    }

    /// Returns the value to add to a bucket.
    ///
    /// For counters, this applies the [sampling correction](Self::sample_factor). All other
    /// types return the raw value.
    pub fn effective_value(&self) -> f64 {
        match self.ty {
            MetricType::Counter => self.value * self.sample_factor(),
            MetricType::Timer | MetricType::Gauge => self.value,
        }
    }

    fn parse_str(string: &str) -> Option<Self> {
        let (key_value, rest) = string.split_once('|')?;

        let mut key_value = key_value.split(':');
        let raw_key = key_value.next().filter(|s| !s.is_empty())?;
        let raw_value = key_value.next().filter(|s| !s.is_empty())?;

        let mut components = rest.split('|');
        let ty = components.next().filter(|s| !s.is_empty())?.parse().ok()?;
        let sampling_rate = components.next().and_then(parse_sampling_rate);

        Some(Self {
            ty,
            key: MetricKey::parse(raw_key)?,
            value: parse_value(raw_value),
            sampling_rate,
        })
    }

    /// Parses a single metric sample from the raw protocol.
    ///
    /// # Example
    ///
    /// ```
    /// use mouth_metrics::{MetricSample, MetricType};
    ///
    /// let sample = MetricSample::parse(b"app.signups:1|c|@0.5").unwrap();
    /// assert_eq!(sample.ty, MetricType::Counter);
    /// assert_eq!(sample.effective_value(), 2.0);
    /// ```
    pub fn parse(slice: &[u8]) -> Result<Self, ParseMetricError> {
        let string = std::str::from_utf8(slice).or(Err(ParseMetricError(())))?;
        Self::parse_str(string).ok_or(ParseMetricError(()))
    }

    /// Parses all metric samples in a datagram.
    ///
    /// Returns a result for each line in `slice`, ignoring empty lines. Both UNIX newlines (`\n`)
    /// and Windows newlines (`\r\n`) are supported. It is possible to continue consuming the
    /// iterator after `Err` is yielded.
    pub fn parse_all(slice: &[u8]) -> ParseSamples<'_> {
        ParseSamples { slice }
    }
}

/// Parses the value of a sample, falling back to `0` for anything that is not a finite number.
fn parse_value(string: &str) -> f64 {
    string
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Parses a sampling rate token, with or without its leading `@`.
fn parse_sampling_rate(string: &str) -> Option<f64> {
    let rate = string.strip_prefix('@').unwrap_or(string);
    rate.trim().parse().ok().filter(|rate: &f64| rate.is_finite())
}

/// Iterator over parsed samples returned from [`MetricSample::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseSamples<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseSamples<'_> {
    type Item = Result<MetricSample, ParseMetricError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string),
                Err(_) => return Some(Err(ParseMetricError(()))),
            };

            if !string.is_empty() {
                return Some(MetricSample::parse_str(string).ok_or(ParseMetricError(())));
            }
        }
    }
}

impl FusedIterator for ParseSamples<'_> {}
