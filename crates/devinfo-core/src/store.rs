//! Append-only time series shared between the sampler and its readers.
//!
//! The sampler thread is the only writer. Readers (exporters, the live
//! API) take [`Snapshot`]s: an independent copy of the sample handles at
//! the moment of the call, so a reader never sees a half-written append and
//! never holds the lock while it works.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::sample::Sample;

/// Shared handle to the series. Cloning shares the same storage.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    samples: Arc<RwLock<Vec<Arc<Sample>>>>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes one sample. Visible to every snapshot taken afterwards.
    pub fn append(&self, sample: Sample) {
        let sample = Arc::new(sample);
        self.write().push(sample);
    }

    /// All samples appended so far, in insertion order.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            samples: self.read().clone(),
        }
    }

    /// Field names present across all samples, in first-seen order.
    pub fn columns(&self) -> Vec<&'static str> {
        columns_of(&self.read())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a torn sample behind:
    // the only mutation is a single `push` of a fully built value.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Sample>>> {
        self.samples.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Sample>>> {
        self.samples.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Immutable copy of a [`TimeSeries`] at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    samples: Vec<Arc<Sample>>,
}

impl Snapshot {
    pub fn from_samples(samples: Vec<Arc<Sample>>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Arc<Sample>] {
        &self.samples
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().map(|s| s.as_ref())
    }

    /// The last `n` samples as a new snapshot.
    pub fn window(&self, n: usize) -> Snapshot {
        let start = self.samples.len().saturating_sub(n);
        Snapshot {
            samples: self.samples[start..].to_vec(),
        }
    }

    pub fn columns(&self) -> Vec<&'static str> {
        columns_of(&self.samples)
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first().map(|s| s.as_ref())
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn columns_of(samples: &[Arc<Sample>]) -> Vec<&'static str> {
    let mut columns: Vec<&'static str> = Vec::new();
    for sample in samples {
        for name in sample.metrics.names() {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
    }
    columns
}
