//! Helpers for asserting on metrics captured with
//! `metrics_util::debugging::DebuggingRecorder`.
//!
//! Taking a snapshot drains the recorder's counters, so take one
//! [`MetricsSnapshot`] after the code under test has run and query it as
//! often as needed.

use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};

/// Creates a debugging recorder and its snapshotter.
#[must_use]
pub fn debugging_recorder() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// Every metric recorded up to one point in time.
#[derive(Debug)]
pub struct MetricsSnapshot {
    entries: Vec<(CompositeKey, DebugValue)>,
}

impl MetricsSnapshot {
    /// Drain `snapshotter` into a queryable snapshot.
    #[must_use]
    pub fn take(snapshotter: &Snapshotter) -> Self {
        let entries = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| (key, value))
            .collect();
        Self { entries }
    }

    /// Sum of every counter called `name` whose labels include all of `labels`.
    #[must_use]
    pub fn counter_total(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.matching(name, labels)
            .map(|value| match value {
                DebugValue::Counter(count) => *count,
                _ => 0,
            })
            .sum()
    }

    /// Value of the first gauge called `name`.
    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.matching(name, &[]).find_map(|value| match value {
            DebugValue::Gauge(g) => Some(g.into_inner()),
            _ => None,
        })
    }

    fn matching<'a>(&'a self, name: &'a str, labels: &'a [(&'a str, &'a str)]) -> impl Iterator<Item = &'a DebugValue> {
        self.entries
            .iter()
            .filter(move |(key, _)| {
                key.key().name() == name
                    && labels.iter().all(|(k, v)| {
                        key.key()
                            .labels()
                            .any(|label| label.key() == *k && label.value() == *v)
                    })
            })
            .map(|(_, value)| value)
    }
}
