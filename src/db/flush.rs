//! db/flush — перенос журнала в data-файл и ретирование лог-файлов.
//!
//! Цель flush = min(последний commit, самый старый закреплённый снапшот).
//! Порядок записи:
//! 1) образы страниц (по TxId, затем по номеру страницы);
//! 2) sync data-файла;
//! 3) заголовок data-файла (root, next_page_number, last_flushed_tx_id);
//! 4) ещё один sync;
//! 5) ретирование лог-файлов, новый снапшот без перенесённых страниц.
//! Крах до конца 4 безопасен: журнал цел и будет применён повторно.

use anyhow::{anyhow, Result};
use log::{debug, info};
use serde::Serialize;

use crate::metrics::record_flush;

use super::core::{Db, Snapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// До какой транзакции перенесено (0 = ничего не делали).
    pub flushed_to_tx_id: u64,
    pub pages_written: u64,
    pub log_files_retired: usize,
    pub files_in_use: usize,
}

impl Db {
    /// Перенести закоммиченные страницы журнала в data-файл.
    pub fn flush_log_to_data_file(&self) -> Result<FlushReport> {
        let inner = &self.inner;
        let mut journal = self.lock_journal()?;
        let (oldest, snap) = inner.oldest_pinned()?;
        let target = oldest.map_or(snap.tx_id, |p| p.min(snap.tx_id));

        if target <= journal.last_flushed_tx_id() {
            debug!(
                "flush: nothing to do (target {}, flushed {})",
                target,
                journal.last_flushed_tx_id()
            );
            return Ok(FlushReport {
                files_in_use: journal.files_in_use(),
                ..Default::default()
            });
        }
        let Some((_, state)) = journal.state_at(target) else {
            return Err(anyhow!("flush: no tree state recorded for tx {}", target));
        };

        let mut batch: Vec<_> = snap
            .pages
            .iter()
            .filter(|(_, r)| r.tx_id <= target)
            .map(|(pgno, r)| (r.tx_id, *pgno, r.clone()))
            .collect();
        batch.sort_by_key(|(tx, pgno, _)| (*tx, *pgno));

        for (_, pgno, r) in &batch {
            let img = r.read()?;
            let mut pager = inner
                .pager
                .write()
                .map_err(|_| anyhow!("pager lock poisoned"))?;
            pager.write_page(*pgno, &img)?;
        }
        {
            let mut pager = inner
                .pager
                .write()
                .map_err(|_| anyhow!("pager lock poisoned"))?;
            let mut h = *pager.header();
            h.last_flushed_tx_id = target;
            h.root = state.root;
            h.next_page_number = state.next_page_number;
            // образы на диск раньше заголовка с новым last_flushed_tx_id
            pager.checkpoint_header(h)?;
        }

        let retired = journal.retire_flushed(target);
        let pages = snap
            .pages
            .iter()
            .filter(|(_, r)| r.tx_id > target)
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        inner.publish(Snapshot {
            tx_id: snap.tx_id,
            root: snap.root,
            next_page_number: snap.next_page_number,
            pages,
        })?;

        record_flush(batch.len() as u64);
        let report = FlushReport {
            flushed_to_tx_id: target,
            pages_written: batch.len() as u64,
            log_files_retired: retired,
            files_in_use: journal.files_in_use(),
        };
        info!(
            "flush: tx {} applied, {} page(s) written, {} log file(s) retired, {} in use",
            target, report.pages_written, retired, report.files_in_use
        );
        Ok(report)
    }
}
