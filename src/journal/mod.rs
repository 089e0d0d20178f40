//! journal — журнал транзакций из ограниченных лог-файлов.
//!
//! Подмодули:
//! - header.rs   — TransactionHeader / TreeRootHeader / TxMarker (упакованные LE).
//! - log_file.rs — LogFile: преаллоцированный файл, позиционное I/O, удаление при ретировании.
//! - writer.rs   — append транзакции (сегменты, SPLIT, ротация).
//! - recovery.rs — скан журнала при открытии, восстановление таблицы страниц.
//!
//! Журнал — упорядоченный список живых лог-файлов; последний активный.
//! Все методы вызываются под `Mutex<Journal>` (commit и flush исключают друг друга).

pub mod header;
pub mod log_file;
pub mod recovery;
pub mod writer;

use anyhow::Result;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::StorageOptions;
use crate::metrics::record_log_file_retired;

pub use header::{segment_crc, TransactionHeader, TreeRootHeader, TxMarker, TX_HEADER_SIZE};
pub use log_file::LogFile;
pub use recovery::{Recovered, RecoveryReport};

/// Где лежит новейший закоммиченный образ страницы внутри журнала.
#[derive(Debug, Clone)]
pub struct PageRef {
    pub file: Arc<LogFile>,
    pub slot: u64,
    pub tx_id: u64,
}

impl PageRef {
    pub fn read(&self) -> Result<Vec<u8>> {
        self.file.read_page(self.slot)
    }
}

/// Состояние дерева после транзакции (для flush до произвольного tx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxState {
    pub root: TreeRootHeader,
    pub next_page_number: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JournalStats {
    pub files_in_use: usize,
    pub current_file_number: u64,
    pub write_page_position: u64,
    pub last_tx_id: u64,
    pub last_flushed_tx_id: u64,
    /// (номер файла, слот) заголовка последней записанной транзакции.
    pub last_append: Option<(u64, u64)>,
}

#[derive(Debug)]
pub(crate) struct JournalFile {
    pub(crate) log: Arc<LogFile>,
    /// Максимальный TxId с сегментом в этом файле (0 = нет).
    pub(crate) max_tx_id: u64,
}

#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    page_size: usize,
    capacity: u64,
    fsync: bool,
    files: Vec<JournalFile>,
    write_pos: u64,
    last_tx_id: u64,
    last_flushed_tx_id: u64,
    tx_states: BTreeMap<u64, TxState>,
    last_append: Option<(u64, u64)>,
}

impl Journal {
    pub(crate) fn from_parts(
        dir: &Path,
        opts: &StorageOptions,
        files: Vec<JournalFile>,
        write_pos: u64,
        last_tx_id: u64,
        last_flushed_tx_id: u64,
        tx_states: BTreeMap<u64, TxState>,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            page_size: opts.page_size as usize,
            capacity: opts.log_file_pages,
            fsync: opts.journal_fsync,
            files,
            write_pos,
            last_tx_id,
            last_flushed_tx_id,
            tx_states,
            last_append: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Число живых (не ретированных) лог-файлов.
    pub fn files_in_use(&self) -> usize {
        self.files.len()
    }

    pub fn current_file_number(&self) -> u64 {
        self.files.last().map(|f| f.log.number()).unwrap_or(0)
    }

    /// Следующий свободный слот активного файла.
    pub fn write_page_position(&self) -> u64 {
        self.write_pos
    }

    pub fn last_tx_id(&self) -> u64 {
        self.last_tx_id
    }

    pub fn last_flushed_tx_id(&self) -> u64 {
        self.last_flushed_tx_id
    }

    pub fn stats(&self) -> JournalStats {
        JournalStats {
            files_in_use: self.files_in_use(),
            current_file_number: self.current_file_number(),
            write_page_position: self.write_pos,
            last_tx_id: self.last_tx_id,
            last_flushed_tx_id: self.last_flushed_tx_id,
            last_append: self.last_append,
        }
    }

    /// Состояние дерева на момент новейшей транзакции с id <= `target`.
    pub fn state_at(&self, target: u64) -> Option<(u64, TxState)> {
        self.tx_states
            .range(..=target)
            .next_back()
            .map(|(id, st)| (*id, *st))
    }

    /// После успешного flush до `target`: забыть применённые транзакции и
    /// ретировать неактивные файлы, все транзакции которых уже в data-файле.
    /// Возвращает число ретированных файлов.
    pub fn retire_flushed(&mut self, target: u64) -> usize {
        if target > self.last_flushed_tx_id {
            self.last_flushed_tx_id = target;
        }
        self.tx_states.retain(|id, _| *id > target);

        let mut retired = 0usize;
        while self.files.len() > 1 && self.files[0].max_tx_id <= target {
            let f = self.files.remove(0);
            f.log.retire();
            record_log_file_retired();
            retired += 1;
        }
        if retired > 0 {
            info!(
                "journal: retired {} log file(s), {} in use",
                retired,
                self.files.len()
            );
        }
        retired
    }

    fn active(&self) -> Arc<LogFile> {
        // files is never empty: open/recovery always leaves an active file
        Arc::clone(&self.files[self.files.len() - 1].log)
    }
}
