//! Counter-to-delta conversion.

use crate::snapshot::Reading;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// What to emit the first time a counter key is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstObservation {
    /// Treat missing history as a delta from zero.
    #[default]
    EmitRaw,
    EmitZero,
}

/// Last reading seen for one counter key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivativeState {
    pub last_raw: Reading,
    pub last_seen: DateTime<Utc>,
}

/// Per-key counter history for one collector instance.
///
/// Keys are full output paths, so two unit views of the same raw counter
/// keep separate histories. Entries live as long as the tracker.
#[derive(Debug, Default)]
pub struct DerivativeTracker {
    states: HashMap<String, DerivativeState>,
    first: FirstObservation,
}

impl DerivativeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_first_observation(first: FirstObservation) -> Self {
        Self {
            states: HashMap::new(),
            first,
        }
    }

    /// Records `raw` for `key` and returns the value to emit.
    ///
    /// A negative delta is corrected by `modulus` when one is given. If it is
    /// still negative the counter was reset and `0` is emitted. The stored
    /// reading always advances to `raw`, so a reset is never replayed.
    pub fn derive(
        &mut self,
        key: &str,
        raw: Reading,
        modulus: Option<i128>,
        now: DateTime<Utc>,
    ) -> f64 {
        let next = DerivativeState {
            last_raw: raw,
            last_seen: now,
        };

        match self.states.insert(key.to_string(), next) {
            None => match self.first {
                FirstObservation::EmitRaw => raw.as_f64().max(0.0),
                FirstObservation::EmitZero => 0.0,
            },
            Some(prev) => {
                let value = delta(prev.last_raw, raw, modulus);
                if value < 0.0 {
                    tracing::trace!(key, "counter went backwards, clamping to zero");
                    0.0
                } else {
                    value
                }
            }
        }
    }

    pub fn state(&self, key: &str) -> Option<&DerivativeState> {
        self.states.get(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

fn delta(prev: Reading, cur: Reading, modulus: Option<i128>) -> f64 {
    if let (Reading::Integer(p), Reading::Integer(c)) = (prev, cur) {
        if let Some(mut d) = c.checked_sub(p) {
            if d < 0 {
                if let Some(m) = modulus {
                    d = d.saturating_add(m);
                }
            }
            return d as f64;
        }
    }

    let mut d = cur.as_f64() - prev.as_f64();
    if d < 0.0 {
        if let Some(m) = modulus {
            d += m as f64;
        }
    }
    d
}
