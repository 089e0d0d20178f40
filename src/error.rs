//! Typed failures of the storage core.
//!
//! Public functions return `anyhow::Result` like the rest of the crate; the
//! variants below are attached to those errors so callers can tell contract
//! violations from corruption with `err.downcast_ref::<StorageError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Bitmap position outside `[0, size)`.
    #[error("position {pos} out of range (size {size})")]
    Range { pos: u64, size: u64 },

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("corruption detected in {} at page {position}: {reason}", file.display())]
    CorruptionDetected {
        file: PathBuf,
        position: u64,
        reason: String,
    },

    /// Активный лог-файл не вмещает следующую страницу. Внутренний сигнал ротации.
    #[error("log file capacity exceeded: need {needed} page(s), {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    #[error("transaction is read-only")]
    ReadOnly,

    #[error("key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },
}

/// Is `err` (or anything in its context chain) the given storage error kind?
pub fn is_storage_error(err: &anyhow::Error, pred: impl Fn(&StorageError) -> bool) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<StorageError>())
        .any(pred)
}
