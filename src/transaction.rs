//! transaction — единица работы поверх опубликованного снапшота.
//!
//! - Read: видит только снапшот на момент начала, ничего не меняет.
//! - ReadWrite: держит writer-токен (MutexGuard) всё время жизни; копит
//!   изменённые страницы в `dirty`; commit пишет их в журнал и публикует
//!   новый снапшот. Drop без commit = abort: выданные номера страниц
//!   возвращаются в битмап, журнал не тронут.
//!
//! Чтение страницы: dirty (писатель) -> таблица снапшота -> data-файл.
//! Завершённость обеспечивается владением: commit потребляет транзакцию.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, MutexGuard};

use crate::db::core::{Snapshot, WriterState};
use crate::db::Db;
use crate::error::StorageError;
use crate::journal::writer::TxWrite;
use crate::journal::TreeRootHeader;
use crate::page::page_number_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Read,
    ReadWrite,
}

struct WriteSet<'db> {
    token: MutexGuard<'db, WriterState>,
    dirty: BTreeMap<u64, Vec<u8>>,
    /// Выданы этой транзакцией (откатываются при abort).
    allocated: Vec<u64>,
    /// Освобождаются после успешного commit.
    freed: Vec<u64>,
    root: TreeRootHeader,
    base_high_water: u64,
}

pub struct Transaction<'db> {
    db: &'db Db,
    kind: TxKind,
    snapshot: Arc<Snapshot>,
    write: Option<WriteSet<'db>>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn begin(db: &'db Db, kind: TxKind) -> Result<Self> {
        let write = match kind {
            TxKind::Read => None,
            TxKind::ReadWrite => {
                let token = db
                    .inner
                    .writer
                    .lock()
                    .map_err(|_| anyhow!("writer lock poisoned"))?;
                let base_high_water = token.allocator.high_water();
                Some((token, base_high_water))
            }
        };
        // снапшот закрепляем уже под токеном: писатель видит последний commit
        let snapshot = db.inner.pin_current()?;
        let write = write.map(|(token, base_high_water)| WriteSet {
            token,
            dirty: BTreeMap::new(),
            allocated: Vec::new(),
            freed: Vec::new(),
            root: snapshot.root,
            base_high_water,
        });
        Ok(Self {
            db,
            kind,
            snapshot,
            write,
        })
    }

    #[inline]
    pub fn kind(&self) -> TxKind {
        self.kind
    }

    /// TxId снапшота, на котором стоит транзакция.
    #[inline]
    pub fn snapshot_tx_id(&self) -> u64 {
        self.snapshot.tx_id
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.db.page_size()
    }

    pub fn root_header(&self) -> TreeRootHeader {
        match &self.write {
            Some(w) => w.root,
            None => self.snapshot.root,
        }
    }

    pub fn set_root_header(&mut self, root: TreeRootHeader) -> Result<()> {
        self.writer()?.root = root;
        Ok(())
    }

    /// Копия образа страницы, видимого этой транзакции.
    pub fn get_page(&self, pgno: u64) -> Result<Vec<u8>> {
        if let Some(w) = &self.write {
            if let Some(p) = w.dirty.get(&pgno) {
                return Ok(p.clone());
            }
        }
        self.snapshot.read_page(&self.db.inner.pager, pgno)
    }

    /// Записать новый образ страницы в рабочий набор.
    /// Первые 8 байт образа обязаны содержать `pgno` (LE).
    pub fn put_page(&mut self, pgno: u64, page: Vec<u8>) -> Result<()> {
        let ps = self.page_size();
        if page.len() != ps {
            return Err(anyhow!(
                "page {} image is {} B, expected {}",
                pgno,
                page.len(),
                ps
            ));
        }
        if pgno == 0 {
            return Err(anyhow!("page 0 holds the data header"));
        }
        let w = self.writer()?;
        // recovery восстанавливает таблицу страниц по номеру из заголовка образа
        let stamped = page_number_of(&page);
        if stamped != pgno {
            return Err(anyhow!(
                "page {} image carries page number {}",
                pgno,
                stamped
            ));
        }
        w.dirty.insert(pgno, page);
        Ok(())
    }

    pub fn allocate_page(&mut self) -> Result<u64> {
        let w = self.writer()?;
        let pgno = w.token.allocator.allocate()?;
        w.allocated.push(pgno);
        Ok(pgno)
    }

    /// Освободить страницу. Выданная этой же транзакцией возвращается сразу,
    /// остальные после commit (старые снапшоты ещё могут её читать).
    pub fn free_page(&mut self, pgno: u64) -> Result<()> {
        let w = self.writer()?;
        w.dirty.remove(&pgno);
        if let Some(i) = w.allocated.iter().position(|&p| p == pgno) {
            w.allocated.swap_remove(i);
            w.token.allocator.release(pgno)?;
        } else {
            w.freed.push(pgno);
        }
        Ok(())
    }

    /// Сколько страниц изменено (для диагностики).
    pub fn dirty_pages(&self) -> usize {
        self.write.as_ref().map_or(0, |w| w.dirty.len())
    }

    /// Зафиксировать. Для Read и для писателя без изменений это no-op.
    /// Транзакция из одних удалений пишется в журнал одним заголовком.
    pub fn commit(mut self) -> Result<()> {
        let Some(mut w) = self.write.take() else {
            return Ok(());
        };
        // удаление может изменить только корень и список освобождённых страниц
        if w.dirty.is_empty() && w.freed.is_empty() && w.root == self.snapshot.root {
            w.token
                .allocator
                .rollback(&w.allocated, w.base_high_water)?;
            return Ok(());
        }

        let inner = &self.db.inner;
        let mut journal = inner
            .journal
            .lock()
            .map_err(|_| anyhow!("journal lock poisoned"))?;
        let tx_id = journal.last_tx_id() + 1;
        let next_page_number = w.token.allocator.high_water();
        let refs = match journal.append(&TxWrite {
            tx_id,
            next_page_number,
            root: w.root,
            pages: &w.dirty,
        }) {
            Ok(r) => r,
            Err(e) => {
                drop(journal);
                if let Err(re) = w.token.allocator.rollback(&w.allocated, w.base_high_water) {
                    warn!("tx {}: allocator rollback failed: {:#}", tx_id, re);
                }
                return Err(e);
            }
        };

        // строим от опубликованного: flush мог ужать таблицу после нашего begin
        let current = inner.current_snapshot()?;
        let mut pages = current.pages.clone();
        pages.extend(refs);
        inner.publish(Snapshot {
            tx_id,
            root: w.root,
            next_page_number,
            pages,
        })?;
        drop(journal);

        for pgno in w.freed.drain(..) {
            w.token.allocator.release(pgno)?;
        }
        debug!(
            "tx {}: committed {} page(s), root={}",
            tx_id,
            w.dirty.len(),
            w.root.root_page_number
        );
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut WriteSet<'db>> {
        match &mut self.write {
            Some(w) => Ok(w),
            None => Err(StorageError::ReadOnly.into()),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(mut w) = self.write.take() {
            if let Err(e) = w.token.allocator.rollback(&w.allocated, w.base_high_water) {
                warn!("abort: allocator rollback failed: {:#}", e);
            } else if !w.dirty.is_empty() {
                debug!("abort: dropped {} staged page(s)", w.dirty.len());
            }
        }
        self.db.inner.unpin(self.snapshot.tx_id);
    }
}
