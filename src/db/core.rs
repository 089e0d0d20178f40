//! db/core — ядро окружения: структура Db, общие поля, снапшоты, реестр читателей.
//!
//! Блокировки (порядок захвата сверху вниз, обратного порядка нет):
//! - `writer`   — writer-токен (держится ReadWrite транзакцией всё время жизни);
//! - `journal`  — commit и flush исключают друг друга;
//! - `readers`  — реестр закреплённых снапшотов (TxId -> число транзакций);
//! - `snapshot` — публикация нового снапшота (swap Arc);
//! - `pager`    — запись страниц только из flush, чтение — копированием.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::StorageOptions;
use crate::free::PageAllocator;
use crate::journal::{Journal, JournalStats, PageRef, RecoveryReport, TreeRootHeader};
use crate::lock::LockGuard;
use crate::pager::Pager;
use crate::transaction::{Transaction, TxKind};
use crate::tree::Tree;

/// Неизменяемое состояние после очередного commit/flush.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Последняя закоммиченная транзакция (0 = пустая база).
    pub tx_id: u64,
    pub root: TreeRootHeader,
    pub next_page_number: u64,
    /// Страницы, новейший образ которых ещё в журнале.
    pub pages: BTreeMap<u64, PageRef>,
}

impl Snapshot {
    /// Образ страницы на момент снапшота: журнал, иначе data-файл.
    pub(crate) fn read_page(&self, pager: &RwLock<Pager>, pgno: u64) -> Result<Vec<u8>> {
        if let Some(r) = self.pages.get(&pgno) {
            return r.read();
        }
        let p = pager
            .read()
            .map_err(|_| anyhow!("pager lock poisoned"))?;
        p.read_page(pgno)
    }
}

/// Состояние, принадлежащее единственному писателю.
#[derive(Debug)]
pub(crate) struct WriterState {
    pub(crate) allocator: PageAllocator,
}

pub(crate) struct Shared {
    pub(crate) root: PathBuf,
    pub(crate) opts: StorageOptions,
    pub(crate) pager: RwLock<Pager>,
    pub(crate) journal: Mutex<Journal>,
    pub(crate) writer: Mutex<WriterState>,
    pub(crate) snapshot: RwLock<Arc<Snapshot>>,
    pub(crate) readers: Mutex<BTreeMap<u64, usize>>,
    pub(crate) recovery: RecoveryReport,
    pub(crate) _lock: LockGuard, // держим LOCK до закрытия
}

/// Окружение хранилища. Клонируется дёшево (Arc); закрывается с последним клоном.
#[derive(Clone)]
pub struct Db {
    pub(crate) inner: Arc<Shared>,
}

impl Db {
    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    pub fn options(&self) -> &StorageOptions {
        &self.inner.opts
    }

    pub fn page_size(&self) -> usize {
        self.inner.opts.page_size as usize
    }

    /// Начать транзакцию. ReadWrite ждёт, пока завершится текущий писатель.
    pub fn new_transaction(&self, kind: TxKind) -> Result<Transaction<'_>> {
        Transaction::begin(self, kind)
    }

    /// Хэндл корневого дерева.
    pub fn root(&self) -> Tree {
        Tree::new(self.page_size())
    }

    pub fn files_in_use(&self) -> Result<usize> {
        Ok(self.lock_journal()?.files_in_use())
    }

    /// Номер активного лог-файла.
    pub fn current_log_file(&self) -> Result<u64> {
        Ok(self.lock_journal()?.current_file_number())
    }

    /// Следующий свободный слот активного лог-файла.
    pub fn write_page_position(&self) -> Result<u64> {
        Ok(self.lock_journal()?.write_page_position())
    }

    pub fn journal_stats(&self) -> Result<JournalStats> {
        Ok(self.lock_journal()?.stats())
    }

    /// Что нашла recovery при открытии.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.inner.recovery
    }

    /// Текущий опубликованный снапшот.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.inner.current_snapshot()
    }

    pub(crate) fn lock_journal(&self) -> Result<std::sync::MutexGuard<'_, Journal>> {
        self.inner
            .journal
            .lock()
            .map_err(|_| anyhow!("journal lock poisoned"))
    }
}

impl Shared {
    pub(crate) fn current_snapshot(&self) -> Result<Arc<Snapshot>> {
        let s = self
            .snapshot
            .read()
            .map_err(|_| anyhow!("snapshot lock poisoned"))?;
        Ok(Arc::clone(&s))
    }

    pub(crate) fn publish(&self, snap: Snapshot) -> Result<()> {
        let mut s = self
            .snapshot
            .write()
            .map_err(|_| anyhow!("snapshot lock poisoned"))?;
        *s = Arc::new(snap);
        Ok(())
    }

    /// Закрепить текущий снапшот за транзакцией (под реестром, чтобы flush
    /// не мог проскочить между чтением снапшота и регистрацией).
    pub(crate) fn pin_current(&self) -> Result<Arc<Snapshot>> {
        let mut readers = self
            .readers
            .lock()
            .map_err(|_| anyhow!("readers lock poisoned"))?;
        let snap = self.current_snapshot()?;
        *readers.entry(snap.tx_id).or_insert(0) += 1;
        Ok(snap)
    }

    pub(crate) fn unpin(&self, tx_id: u64) {
        let Ok(mut readers) = self.readers.lock() else {
            return;
        };
        if let Some(n) = readers.get_mut(&tx_id) {
            *n -= 1;
            if *n == 0 {
                readers.remove(&tx_id);
            }
        }
    }

    /// (самый старый закреплённый TxId, текущий снапшот), согласованно.
    pub(crate) fn oldest_pinned(&self) -> Result<(Option<u64>, Arc<Snapshot>)> {
        let readers = self
            .readers
            .lock()
            .map_err(|_| anyhow!("readers lock poisoned"))?;
        let snap = self.current_snapshot()?;
        Ok((readers.keys().next().copied(), snap))
    }
}
