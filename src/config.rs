//! Centralized configuration and builder for tessera.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - `StorageOptions::from_env()` reads the TSR_* variables.
//! - `OptionsBuilder` for programmatic setups (tests, embedding).
//!
//! The core treats these as opaque inputs: page size, log-file capacity in
//! pages and the data-file growth step.

use std::fmt;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::consts::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Top-level configuration for a storage environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageOptions {
    /// Page size in bytes (power of two).
    /// Env: TSR_PAGE_SIZE (default 4096)
    pub page_size: u32,

    /// Capacity of one log file, in page slots (header slots included).
    /// Env: TSR_LOG_FILE_PAGES (default 1024)
    pub log_file_pages: u64,

    /// How many pages the logical page space / data file grows by at once.
    /// Env: TSR_DATA_GROWTH_PAGES (default 256)
    pub data_growth_pages: u64,

    /// fsync log files on commit.
    /// Env: TSR_JOURNAL_FSYNC (default true)
    pub journal_fsync: bool,

    /// msync the data file at the end of a flush.
    /// Env: TSR_DATA_FSYNC (default true)
    pub data_fsync: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            log_file_pages: 1024,
            data_growth_pages: 256,
            journal_fsync: true,
            data_fsync: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let s = v.trim().to_ascii_lowercase();
        s == "1" || s == "true" || s == "on" || s == "yes"
    })
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

impl StorageOptions {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(n) = env_u64("TSR_PAGE_SIZE") {
            cfg.page_size = n.min(u32::MAX as u64) as u32;
        }
        if let Some(n) = env_u64("TSR_LOG_FILE_PAGES") {
            cfg.log_file_pages = n;
        }
        if let Some(n) = env_u64("TSR_DATA_GROWTH_PAGES") {
            cfg.data_growth_pages = n;
        }
        if let Some(on) = env_flag("TSR_JOURNAL_FSYNC") {
            cfg.journal_fsync = on;
        }
        if let Some(on) = env_flag("TSR_DATA_FSYNC") {
            cfg.data_fsync = on;
        }

        cfg
    }

    /// Проверка согласованности параметров (вызывается при открытии Db).
    pub fn validate(&self) -> Result<()> {
        let ps = self.page_size;
        if ps < MIN_PAGE_SIZE || ps > MAX_PAGE_SIZE || (ps & (ps - 1)) != 0 {
            return Err(anyhow!(
                "page_size must be a power of two in [{} .. {}], got {}",
                MIN_PAGE_SIZE,
                MAX_PAGE_SIZE,
                ps
            ));
        }
        // header slot + at least one page image
        if self.log_file_pages < 2 {
            return Err(anyhow!(
                "log_file_pages must be >= 2, got {}",
                self.log_file_pages
            ));
        }
        if self.data_growth_pages == 0 {
            return Err(anyhow!("data_growth_pages must be > 0"));
        }
        Ok(())
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_log_file_pages(mut self, pages: u64) -> Self {
        self.log_file_pages = pages;
        self
    }

    pub fn with_data_growth_pages(mut self, pages: u64) -> Self {
        self.data_growth_pages = pages;
        self
    }

    pub fn with_journal_fsync(mut self, on: bool) -> Self {
        self.journal_fsync = on;
        self
    }

    pub fn with_data_fsync(mut self, on: bool) -> Self {
        self.data_fsync = on;
        self
    }

    /// Log-file capacity in bytes.
    pub fn log_file_bytes(&self) -> u64 {
        self.log_file_pages * self.page_size as u64
    }
}

impl fmt::Display for StorageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StorageOptions {{ \
             page_size: {}, \
             log_file_pages: {}, \
             data_growth_pages: {}, \
             journal_fsync: {}, \
             data_fsync: {} \
             }}",
            self.page_size,
            self.log_file_pages,
            self.data_growth_pages,
            self.journal_fsync,
            self.data_fsync,
        )
    }
}

/// Lightweight builder that produces `StorageOptions`.
#[derive(Clone, Debug)]
pub struct OptionsBuilder {
    cfg: StorageOptions,
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: StorageOptions::from_env(),
        }
    }
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: StorageOptions::default(),
        }
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.cfg.page_size = page_size;
        self
    }

    pub fn log_file_pages(mut self, pages: u64) -> Self {
        self.cfg.log_file_pages = pages;
        self
    }

    pub fn data_growth_pages(mut self, pages: u64) -> Self {
        self.cfg.data_growth_pages = pages;
        self
    }

    pub fn journal_fsync(mut self, on: bool) -> Self {
        self.cfg.journal_fsync = on;
        self
    }

    pub fn data_fsync(mut self, on: bool) -> Self {
        self.cfg.data_fsync = on;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> StorageOptions {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = StorageOptions::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.log_file_bytes(), 1024 * 4096);
    }

    #[test]
    fn rejects_bad_page_size_and_tiny_log() {
        assert!(StorageOptions::default().with_page_size(3000).validate().is_err());
        assert!(StorageOptions::default().with_page_size(256).validate().is_err());
        assert!(StorageOptions::default().with_log_file_pages(1).validate().is_err());
        assert!(StorageOptions::default().with_data_growth_pages(0).validate().is_err());
    }

    #[test]
    fn builder_overrides() {
        let cfg = OptionsBuilder::from_default()
            .page_size(8192)
            .log_file_pages(10)
            .journal_fsync(false)
            .build();
        assert_eq!(cfg.page_size, 8192);
        assert_eq!(cfg.log_file_pages, 10);
        assert!(!cfg.journal_fsync);
        assert!(cfg.data_fsync);
        assert!(cfg.to_string().contains("log_file_pages: 10"));
    }
}
