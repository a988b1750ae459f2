use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Number of decimal places kept for non-integral sample values.
pub const FRACTIONAL_PRECISION: u32 = 4;

/// One normalized output value, ready for downstream delivery.
///
/// `value` is always finite; anything that could not be coerced to a number
/// is dropped before a sample is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    pub path: String,
    pub value: f64,
    /// Collection time for derived values. `None` lets the sink stamp the
    /// sample on receipt.
    pub timestamp: Option<DateTime<Utc>>,
    pub precision: u32,
}

impl NormalizedSample {
    /// Builds a sample, picking precision from the value itself.
    ///
    /// Returns `None` for NaN or infinite values.
    ///
    /// # Examples
    ///
    /// ```
    /// use statpoll_common::types::NormalizedSample;
    ///
    /// let s = NormalizedSample::new("servers.web01.load".into(), 3.0, None).unwrap();
    /// assert_eq!(s.precision, 0);
    /// let s = NormalizedSample::new("servers.web01.load".into(), 0.25, None).unwrap();
    /// assert_eq!(s.precision, 4);
    /// assert!(NormalizedSample::new("x".into(), f64::NAN, None).is_none());
    /// ```
    pub fn new(path: String, value: f64, timestamp: Option<DateTime<Utc>>) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let precision = if value.fract() == 0.0 {
            0
        } else {
            FRACTIONAL_PRECISION
        };
        Some(Self {
            path,
            value,
            timestamp,
            precision,
        })
    }

    /// Formats the sample as a Graphite plaintext line (`path value ts`).
    pub fn to_plaintext(&self, received_at: DateTime<Utc>) -> String {
        let ts = self.timestamp.unwrap_or(received_at).timestamp();
        format!(
            "{} {:.prec$} {}",
            self.path,
            self.value,
            ts,
            prec = self.precision as usize
        )
    }
}

/// Destination for normalized samples.
///
/// Publishing is fire-and-forget: implementations must not block for long
/// and never report back to the collector.
pub trait MetricSink: Send + Sync {
    fn publish(&self, sample: NormalizedSample);
}

/// Sink that keeps every published sample in memory.
///
/// Used by the one-shot probe and by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    samples: Mutex<Vec<NormalizedSample>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything published so far.
    pub fn take(&self) -> Vec<NormalizedSample> {
        match self.samples.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl MetricSink for MemorySink {
    fn publish(&self, sample: NormalizedSample) {
        match self.samples.lock() {
            Ok(mut guard) => guard.push(sample),
            Err(poisoned) => poisoned.into_inner().push(sample),
        }
    }
}
