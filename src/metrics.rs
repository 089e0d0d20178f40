//! Lightweight global metrics for tessera.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Journal (append / fsync / ротация / retire)
//! - Flush в data-файл
//! - Recovery
//! - Allocator

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ----- Journal -----
static JOURNAL_TX_APPENDED: AtomicU64 = AtomicU64::new(0);
static JOURNAL_PAGES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static JOURNAL_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static JOURNAL_FSYNC_CALLS: AtomicU64 = AtomicU64::new(0);
static LOG_FILES_CREATED: AtomicU64 = AtomicU64::new(0);
static LOG_FILES_RETIRED: AtomicU64 = AtomicU64::new(0);

// ----- Flush -----
static FLUSH_RUNS: AtomicU64 = AtomicU64::new(0);
static FLUSH_PAGES_APPLIED: AtomicU64 = AtomicU64::new(0);

// ----- Recovery -----
static RECOVERY_TX_REPLAYED: AtomicU64 = AtomicU64::new(0);
static RECOVERY_BYTES_DISCARDED: AtomicU64 = AtomicU64::new(0);

// ----- Allocator -----
static PAGES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static PAGES_RELEASED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    // Journal
    pub journal_tx_appended: u64,
    pub journal_pages_written: u64,
    pub journal_bytes_written: u64,
    pub journal_fsync_calls: u64,
    pub log_files_created: u64,
    pub log_files_retired: u64,

    // Flush
    pub flush_runs: u64,
    pub flush_pages_applied: u64,

    // Recovery
    pub recovery_tx_replayed: u64,
    pub recovery_bytes_discarded: u64,

    // Allocator
    pub pages_allocated: u64,
    pub pages_released: u64,
}

impl MetricsSnapshot {
    pub fn avg_pages_per_tx(&self) -> f64 {
        if self.journal_tx_appended == 0 {
            0.0
        } else {
            self.journal_pages_written as f64 / self.journal_tx_appended as f64
        }
    }
}

// ----- Recorders (Journal) -----
pub fn record_journal_append(pages: u64, bytes: u64) {
    JOURNAL_TX_APPENDED.fetch_add(1, Ordering::Relaxed);
    JOURNAL_PAGES_WRITTEN.fetch_add(pages, Ordering::Relaxed);
    JOURNAL_BYTES_WRITTEN.fetch_add(bytes, Ordering::Relaxed);
}

pub fn record_journal_fsync() {
    JOURNAL_FSYNC_CALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_log_file_created() {
    LOG_FILES_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_log_file_retired() {
    LOG_FILES_RETIRED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Flush) -----
pub fn record_flush(pages_applied: u64) {
    FLUSH_RUNS.fetch_add(1, Ordering::Relaxed);
    FLUSH_PAGES_APPLIED.fetch_add(pages_applied, Ordering::Relaxed);
}

// ----- Recorders (Recovery) -----
pub fn record_recovery(tx_replayed: u64, bytes_discarded: u64) {
    RECOVERY_TX_REPLAYED.fetch_add(tx_replayed, Ordering::Relaxed);
    RECOVERY_BYTES_DISCARDED.fetch_add(bytes_discarded, Ordering::Relaxed);
}

// ----- Recorders (Allocator) -----
pub fn record_page_allocated() {
    PAGES_ALLOCATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_page_released() {
    PAGES_RELEASED.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        journal_tx_appended: JOURNAL_TX_APPENDED.load(Ordering::Relaxed),
        journal_pages_written: JOURNAL_PAGES_WRITTEN.load(Ordering::Relaxed),
        journal_bytes_written: JOURNAL_BYTES_WRITTEN.load(Ordering::Relaxed),
        journal_fsync_calls: JOURNAL_FSYNC_CALLS.load(Ordering::Relaxed),
        log_files_created: LOG_FILES_CREATED.load(Ordering::Relaxed),
        log_files_retired: LOG_FILES_RETIRED.load(Ordering::Relaxed),

        flush_runs: FLUSH_RUNS.load(Ordering::Relaxed),
        flush_pages_applied: FLUSH_PAGES_APPLIED.load(Ordering::Relaxed),

        recovery_tx_replayed: RECOVERY_TX_REPLAYED.load(Ordering::Relaxed),
        recovery_bytes_discarded: RECOVERY_BYTES_DISCARDED.load(Ordering::Relaxed),

        pages_allocated: PAGES_ALLOCATED.load(Ordering::Relaxed),
        pages_released: PAGES_RELEASED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    JOURNAL_TX_APPENDED.store(0, Ordering::Relaxed);
    JOURNAL_PAGES_WRITTEN.store(0, Ordering::Relaxed);
    JOURNAL_BYTES_WRITTEN.store(0, Ordering::Relaxed);
    JOURNAL_FSYNC_CALLS.store(0, Ordering::Relaxed);
    LOG_FILES_CREATED.store(0, Ordering::Relaxed);
    LOG_FILES_RETIRED.store(0, Ordering::Relaxed);

    FLUSH_RUNS.store(0, Ordering::Relaxed);
    FLUSH_PAGES_APPLIED.store(0, Ordering::Relaxed);

    RECOVERY_TX_REPLAYED.store(0, Ordering::Relaxed);
    RECOVERY_BYTES_DISCARDED.store(0, Ordering::Relaxed);

    PAGES_ALLOCATED.store(0, Ordering::Relaxed);
    PAGES_RELEASED.store(0, Ordering::Relaxed);
}
