//! Atomic operation counters shared across workers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters updated by every worker through atomic fetch-add.
///
/// `report` reads under relaxed ordering; exact consistency between the
/// counters is not required.
#[derive(Debug, Default)]
pub struct Stat {
    put_count: AtomicU64,
    uploaded_part_count: AtomicU64,
    get_count: AtomicU64,
    get_for_valid_count: AtomicU64,
    list_count: AtomicU64,
    delete_count: AtomicU64,
}

impl Stat {
    /// Creates a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one completed PUT operation.
    pub fn add_put_count(&self) {
        self.put_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts the parts uploaded by one PUT (1 for single-shot).
    pub fn add_uploaded_part_count(&self, part_count: u64) {
        self.uploaded_part_count
            .fetch_add(part_count, Ordering::Relaxed);
    }

    /// Counts one completed GET operation.
    pub fn add_get_count(&self) {
        self.get_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one GET issued purely to validate a mutation.
    pub fn add_get_for_valid_count(&self) {
        self.get_for_valid_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one completed LIST operation.
    pub fn add_list_count(&self) {
        self.list_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one completed DELETE operation.
    pub fn add_delete_count(&self) {
        self.delete_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed PUT operations so far.
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.put_count.load(Ordering::Relaxed)
    }

    /// Uploaded parts so far.
    #[must_use]
    pub fn uploaded_part_count(&self) -> u64 {
        self.uploaded_part_count.load(Ordering::Relaxed)
    }

    /// Completed GET operations so far.
    #[must_use]
    pub fn get_count(&self) -> u64 {
        self.get_count.load(Ordering::Relaxed)
    }

    /// Validation GETs so far.
    #[must_use]
    pub fn get_for_valid_count(&self) -> u64 {
        self.get_for_valid_count.load(Ordering::Relaxed)
    }

    /// Completed LIST operations so far.
    #[must_use]
    pub fn list_count(&self) -> u64 {
        self.list_count.load(Ordering::Relaxed)
    }

    /// Completed DELETE operations so far.
    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.delete_count.load(Ordering::Relaxed)
    }

    /// Emits the counter totals through the structured log.
    pub fn report(&self) {
        tracing::info!(
            put_count = self.put_count(),
            uploaded_part_count = self.uploaded_part_count(),
            get_count = self.get_count(),
            get_for_valid_count = self.get_for_valid_count(),
            list_count = self.list_count(),
            delete_count = self.delete_count(),
            "statistics report"
        );
    }
}
