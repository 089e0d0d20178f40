//! journal/recovery — скан журнала при открытии.
//!
//! Порядок:
//! - лог-файлы по возрастанию номера, заголовки со слота 0;
//! - заголовок валиден, если совпали marker, PageNumberInLogFile == слот,
//!   ожидаемый TxId, форма TxMarker и CRC32C образов сегмента;
//! - после SPLIT цепочка продолжается в слоте 0 файла Number+1 (пропуск
//!   номера обрывает цепочку);
//! - первый невалидный заголовок — конец журнала. Незавершённая цепочка и
//!   всё после неё отбрасываются (warn!), хвост файла зануляется, файлы за
//!   точкой обрыва удаляются;
//! - битый самый первый заголовок журнала — фатально (CorruptionDetected);
//! - транзакции с TxId <= last_flushed_tx_id уже в data-файле: только
//!   проходятся, в таблицу страниц не попадают.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::StorageOptions;
use crate::error::StorageError;
use crate::metrics::record_recovery;
use crate::page::page_number_of;

use super::header::{segment_crc, TransactionHeader, TxMarker};
use super::{Journal, JournalFile, LogFile, PageRef, TxState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub log_files_scanned: u64,
    pub log_files_removed: u64,
    /// Транзакции новее data-файла, восстановленные из журнала.
    pub transactions_recovered: u64,
    pub transactions_discarded: u64,
    pub discarded_bytes: u64,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.transactions_discarded == 0 && self.discarded_bytes == 0
    }
}

/// Результат recovery для сборки первого снапшота.
#[derive(Debug, Default)]
pub struct Recovered {
    pub pages: BTreeMap<u64, PageRef>,
    /// Новейшая восстановленная транзакция (TxId, состояние дерева).
    pub last_tx: Option<(u64, TxState)>,
    pub report: RecoveryReport,
}

struct Segment {
    file_idx: usize,
    slot: u64,
    hdr: TransactionHeader,
    page_numbers: Vec<u64>,
}

enum Slot {
    /// Нули: сюда ещё никто не писал.
    Empty,
    Valid(Segment),
    Invalid { reason: String, bytes: u64 },
}

impl Journal {
    /// Открыть журнал в `dir` (создаётся при отсутствии) и восстановить состояние.
    pub fn open(dir: &Path, opts: &StorageOptions, last_flushed_tx_id: u64) -> Result<(Journal, Recovered)> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create journal dir {}", dir.display()))?;

        let ps = opts.page_size as usize;
        let capacity = opts.log_file_pages;

        let mut numbers = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
            let entry = entry?;
            if let Some(n) = entry.file_name().to_str().and_then(LogFile::parse_number) {
                numbers.push(n);
            }
        }
        numbers.sort_unstable();

        if numbers.is_empty() {
            let log = LogFile::create(dir, 0, ps, capacity)?;
            let files = vec![JournalFile {
                log: Arc::new(log),
                max_tx_id: 0,
            }];
            let j = Journal::from_parts(dir, opts, files, 0, last_flushed_tx_id, last_flushed_tx_id, BTreeMap::new());
            return Ok((j, Recovered::default()));
        }

        let mut files = Vec::with_capacity(numbers.len());
        for n in &numbers {
            files.push(JournalFile {
                log: Arc::new(LogFile::open(dir, *n, ps, capacity)?),
                max_tx_id: 0,
            });
        }

        let mut report = RecoveryReport {
            log_files_scanned: files.len() as u64,
            ..Default::default()
        };
        let mut rec = Recovered::default();
        let mut tx_states = BTreeMap::new();
        let mut last_tx_id = last_flushed_tx_id;

        let mut fi = 0usize;
        let mut slot = 0u64;
        let mut expected: Option<u64> = None;
        let mut pending: Vec<Segment> = Vec::new();
        let mut seen_header = false;
        let mut dirty_tail = false;

        // (file_idx, slot): где кончаются валидные данные
        let end = loop {
            if fi >= files.len() {
                // SPLIT без продолжения
                break match pending.first() {
                    Some(s) => (s.file_idx, s.slot),
                    None => (files.len() - 1, slot),
                };
            }
            if capacity - slot < 2 {
                if fi + 1 < files.len() && pending.is_empty() {
                    fi += 1;
                    slot = 0;
                    continue;
                }
                break (fi, slot);
            }

            let pending_tx = pending.first().map(|s| s.hdr.tx_id as u64);
            match read_slot(&files[fi].log, slot, ps, capacity, expected, pending_tx, last_flushed_tx_id, fi)? {
                Slot::Valid(seg) => {
                    seen_header = true;
                    let marker = seg.hdr.tx_marker;
                    let next_slot = slot + 1 + seg.hdr.page_count as u64;
                    pending.push(seg);
                    if marker.contains(TxMarker::COMMIT) {
                        for s in &pending {
                            files[s.file_idx].max_tx_id = s.hdr.tx_id as u64;
                        }
                        let tx_id = apply_chain(&files, &mut pending, last_flushed_tx_id, &mut rec, &mut tx_states);
                        last_tx_id = last_tx_id.max(tx_id);
                        expected = Some(tx_id + 1);
                        slot = next_slot;
                    } else if fi + 1 < files.len()
                        && files[fi + 1].log.number() != files[fi].log.number() + 1
                    {
                        // продолжение цепочки было в пропавшем файле
                        warn!(
                            "journal: transaction {} continues in missing log file {}; discarded",
                            pending[0].hdr.tx_id,
                            files[fi].log.number() + 1
                        );
                        report.transactions_discarded += 1;
                        report.discarded_bytes += chain_bytes(&pending, ps);
                        dirty_tail = true;
                        let s = &pending[0];
                        break (s.file_idx, s.slot);
                    } else {
                        fi += 1;
                        slot = 0;
                    }
                }
                Slot::Empty => {
                    if !pending.is_empty() {
                        report.transactions_discarded += 1;
                        report.discarded_bytes += chain_bytes(&pending, ps);
                        dirty_tail = true;
                        let s = &pending[0];
                        break (s.file_idx, s.slot);
                    }
                    break (fi, slot);
                }
                Slot::Invalid { reason, bytes } => {
                    if !seen_header {
                        return Err(StorageError::CorruptionDetected {
                            file: files[fi].log.path().to_path_buf(),
                            position: slot,
                            reason,
                        }
                        .into());
                    }
                    warn!(
                        "journal: invalid transaction header in {} at slot {}: {}",
                        files[fi].log.path().display(),
                        slot,
                        reason
                    );
                    report.transactions_discarded += 1;
                    report.discarded_bytes += bytes;
                    dirty_tail = true;
                    if !pending.is_empty() {
                        report.discarded_bytes += chain_bytes(&pending, ps);
                        let s = &pending[0];
                        break (s.file_idx, s.slot);
                    }
                    break (fi, slot);
                }
            }
        };

        report.transactions_recovered = rec.report.transactions_recovered;

        if fi >= files.len() && !pending.is_empty() {
            warn!(
                "journal: transaction {} split across log files has no continuation; discarded",
                pending[0].hdr.tx_id
            );
            report.transactions_discarded += 1;
            report.discarded_bytes += chain_bytes(&pending, ps);
            dirty_tail = true;
        }

        // Файлы за точкой обрыва удаляем.
        let (end_fi, end_slot) = end;
        for f in files.drain(end_fi + 1..) {
            warn!(
                "journal: removing log file {} beyond end of valid data",
                f.log.path().display()
            );
            f.log.retire();
            report.log_files_removed += 1;
            dirty_tail = true;
        }
        if dirty_tail {
            let active = &files[end_fi].log;
            active.zero_from(end_slot)?;
            active.sync()?;
        }

        if !report.is_clean() {
            warn!(
                "journal: recovery discarded {} transaction(s), {} B of log data",
                report.transactions_discarded, report.discarded_bytes
            );
        }
        info!(
            "journal: recovered {} transaction(s) from {} log file(s), last tx {}, write position {}:{}",
            report.transactions_recovered,
            files.len(),
            last_tx_id,
            files[end_fi].log.number(),
            end_slot
        );
        record_recovery(report.transactions_recovered, report.discarded_bytes);

        rec.report = report;
        let j = Journal::from_parts(dir, opts, files, end_slot, last_tx_id, last_flushed_tx_id, tx_states);
        Ok((j, rec))
    }
}

#[allow(clippy::too_many_arguments)]
fn read_slot(
    log: &LogFile,
    slot: u64,
    ps: usize,
    capacity: u64,
    expected: Option<u64>,
    pending_tx: Option<u64>,
    last_flushed: u64,
    file_idx: usize,
) -> Result<Slot> {
    let raw = log.read_page(slot)?;
    if raw.iter().all(|b| *b == 0) {
        return Ok(Slot::Empty);
    }
    let hdr = TransactionHeader::decode(&raw)?;
    let invalid = |reason: String| Slot::Invalid { reason, bytes: ps as u64 };

    if !hdr.has_marker() {
        return Ok(invalid("bad header marker".into()));
    }
    if hdr.page_number_in_log_file != slot as i64 {
        return Ok(invalid(format!(
            "header position {} != slot {}",
            hdr.page_number_in_log_file, slot
        )));
    }
    if !hdr.tx_marker.is_well_formed() {
        return Ok(invalid(format!("malformed tx marker {:#x}", hdr.tx_marker.0)));
    }
    // PageCount 0 бывает только у одиночного заголовка (транзакция из одних удалений)
    let header_only = hdr.tx_marker.contains(TxMarker::START.with(TxMarker::COMMIT));
    let min_pages = if header_only { 0 } else { 1 };
    if hdr.page_count < min_pages || slot + 1 + hdr.page_count as u64 > capacity {
        return Ok(invalid(format!("page count {} out of range", hdr.page_count)));
    }
    if hdr.tx_id < 1 {
        return Ok(invalid(format!("bad tx id {}", hdr.tx_id)));
    }
    let tx_id = hdr.tx_id as u64;
    let is_start = hdr.tx_marker.contains(TxMarker::START);

    match (pending_tx, expected) {
        (Some(p), _) => {
            if tx_id != p || is_start {
                return Ok(invalid(format!("expected continuation of tx {}, got tx {}", p, tx_id)));
            }
        }
        (None, Some(e)) => {
            if tx_id != e || !is_start {
                return Ok(invalid(format!("expected start of tx {}, got tx {}", e, tx_id)));
            }
        }
        (None, None) => {
            // Самый первый заголовок: либо начало следующей транзакции после data-файла,
            // либо уже применённая (в т.ч. хвост цепочки из ретированного файла).
            if tx_id > last_flushed + 1 || (!is_start && tx_id > last_flushed) {
                return Ok(invalid(format!(
                    "tx {} does not follow flushed tx {}",
                    tx_id, last_flushed
                )));
            }
        }
    }

    let payload = log.read_slots(slot + 1, hdr.page_count as u64)?;
    let crc = segment_crc(payload.chunks(ps));
    if crc != hdr.crc {
        return Ok(Slot::Invalid {
            reason: format!("crc mismatch (stored {:#010x}, computed {:#010x})", hdr.crc, crc),
            bytes: (1 + hdr.page_count as u64) * ps as u64,
        });
    }

    let page_numbers = payload.chunks(ps).map(page_number_of).collect();
    Ok(Slot::Valid(Segment {
        file_idx,
        slot,
        hdr,
        page_numbers,
    }))
}

/// Завершённая цепочка → таблица страниц. Возвращает TxId.
fn apply_chain(
    files: &[JournalFile],
    pending: &mut Vec<Segment>,
    last_flushed: u64,
    rec: &mut Recovered,
    tx_states: &mut BTreeMap<u64, TxState>,
) -> u64 {
    let last = &pending[pending.len() - 1].hdr;
    let tx_id = last.tx_id as u64;
    if tx_id > last_flushed {
        for seg in pending.iter() {
            let file = &files[seg.file_idx].log;
            for (i, pgno) in seg.page_numbers.iter().enumerate() {
                rec.pages.insert(
                    *pgno,
                    PageRef {
                        file: Arc::clone(file),
                        slot: seg.slot + 1 + i as u64,
                        tx_id,
                    },
                );
            }
        }
        let st = TxState {
            root: last.root,
            next_page_number: last.next_page_number.max(0) as u64,
        };
        tx_states.insert(tx_id, st);
        rec.last_tx = Some((tx_id, st));
        rec.report.transactions_recovered += 1;
        debug!("journal: recovered tx {} ({} segment(s))", tx_id, pending.len());
    }
    pending.clear();
    tx_id
}

fn chain_bytes(pending: &[Segment], ps: usize) -> u64 {
    pending
        .iter()
        .map(|s| (1 + s.hdr.page_count as u64) * ps as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_storage_error;
    use crate::journal::test_support::temp_dir;
    use crate::journal::writer::TxWrite;
    use crate::journal::TreeRootHeader;
    use byteorder::{ByteOrder, LittleEndian};

    fn opts() -> StorageOptions {
        StorageOptions::default()
            .with_page_size(512)
            .with_log_file_pages(10)
            .with_journal_fsync(false)
    }

    fn pages(range: std::ops::Range<u64>, fill: u8) -> BTreeMap<u64, Vec<u8>> {
        range
            .map(|p| {
                let mut img = vec![fill; 512];
                LittleEndian::write_u64(&mut img[0..8], p);
                (p, img)
            })
            .collect()
    }

    fn commit(j: &mut Journal, pages: &BTreeMap<u64, Vec<u8>>) {
        let tx_id = j.last_tx_id() + 1;
        let root = TreeRootHeader {
            root_page_number: tx_id as i64,
            ..Default::default()
        };
        j.append(&TxWrite {
            tx_id,
            next_page_number: 50 + tx_id,
            root,
            pages,
        })
        .unwrap();
    }

    fn corrupt(dir: &Path, number: u64, byte: u64) {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .open(LogFile::path_for(dir, number))
            .unwrap();
        f.seek(SeekFrom::Start(byte)).unwrap();
        f.write_all(&[0xA5]).unwrap();
    }

    #[test]
    fn reopen_rebuilds_page_table() {
        let dir = temp_dir("reopen");
        {
            let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
            commit(&mut j, &pages(1..3, 1));
            commit(&mut j, &pages(2..4, 2));
        }
        let (j, rec) = Journal::open(&dir, &opts(), 0).unwrap();
        assert_eq!(j.last_tx_id(), 2);
        assert_eq!(j.write_page_position(), 6);
        assert!(rec.report.is_clean());
        assert_eq!(rec.report.transactions_recovered, 2);

        let (tx, st) = rec.last_tx.unwrap();
        assert_eq!(tx, 2);
        assert_eq!(st.root.root_page_number, 2);
        assert_eq!(st.next_page_number, 52);

        assert_eq!(rec.pages[&1].tx_id, 1);
        assert_eq!(rec.pages[&2].tx_id, 2);
        assert_eq!(rec.pages[&2].read().unwrap()[100], 2);
    }

    #[test]
    fn trailing_corruption_discards_last_tx_only() {
        let dir = temp_dir("tail");
        {
            let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
            commit(&mut j, &pages(1..3, 1));
            commit(&mut j, &pages(1..3, 2));
            // tx 2 payload starts at slot 4
            corrupt(&dir, 0, 4 * 512 + 100);
        }
        let (j, rec) = Journal::open(&dir, &opts(), 0).unwrap();
        assert_eq!(j.last_tx_id(), 1);
        assert_eq!(j.write_page_position(), 3);
        assert_eq!(rec.report.transactions_discarded, 1);
        assert_eq!(rec.report.discarded_bytes, 3 * 512);
        assert_eq!(rec.pages[&1].read().unwrap()[100], 1);
    }

    #[test]
    fn first_header_corruption_is_fatal() {
        let dir = temp_dir("first");
        {
            let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
            commit(&mut j, &pages(1..3, 1));
            corrupt(&dir, 0, 512 + 9);
        }
        let err = Journal::open(&dir, &opts(), 0).unwrap_err();
        assert!(is_storage_error(&err, |e| matches!(
            e,
            StorageError::CorruptionDetected { position: 0, .. }
        )));
    }

    #[test]
    fn split_without_continuation_is_discarded() {
        let dir = temp_dir("split");
        {
            let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
            commit(&mut j, &pages(1..3, 1));
            commit(&mut j, &pages(1..20, 2));
            assert!(j.files_in_use() >= 2);
        }
        std::fs::remove_file(LogFile::path_for(&dir, 2)).unwrap();
        let (j, rec) = Journal::open(&dir, &opts(), 0).unwrap();
        assert_eq!(j.last_tx_id(), 1);
        assert_eq!(j.files_in_use(), 1);
        assert_eq!(j.write_page_position(), 3);
        assert_eq!(rec.report.transactions_discarded, 1);
        assert_eq!(rec.report.log_files_removed, 1);
        assert!(!LogFile::path_for(&dir, 1).exists());
    }

    #[test]
    fn split_chain_does_not_jump_over_missing_file() {
        let dir = temp_dir("gap");
        {
            let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
            commit(&mut j, &pages(1..3, 1));
            // 19 страниц: файлы 0, 1, 2
            commit(&mut j, &pages(1..20, 2));
            assert_eq!(j.files_in_use(), 3);
        }
        std::fs::remove_file(LogFile::path_for(&dir, 1)).unwrap();
        let (j, rec) = Journal::open(&dir, &opts(), 0).unwrap();
        assert_eq!(j.last_tx_id(), 1);
        assert_eq!(j.files_in_use(), 1);
        assert_eq!(j.write_page_position(), 3);
        assert_eq!(rec.report.transactions_discarded, 1);
        assert_eq!(rec.report.log_files_removed, 1);
        assert!(!LogFile::path_for(&dir, 2).exists());
        assert_eq!(rec.pages[&1].read().unwrap()[100], 1);
        assert!(!rec.pages.contains_key(&10));
    }

    #[test]
    fn header_only_transaction_is_replayed() {
        let dir = temp_dir("hdr-only");
        {
            let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
            commit(&mut j, &pages(1..3, 1));
            commit(&mut j, &BTreeMap::new());
            commit(&mut j, &pages(3..4, 3));
        }
        let (j, rec) = Journal::open(&dir, &opts(), 0).unwrap();
        assert!(rec.report.is_clean());
        assert_eq!(rec.report.transactions_recovered, 3);
        assert_eq!(j.last_tx_id(), 3);
        assert_eq!(j.write_page_position(), 6);
        assert_eq!(j.state_at(2).unwrap().1.root.root_page_number, 2);
        assert_eq!(rec.pages[&3].tx_id, 3);
    }

    #[test]
    fn flushed_transactions_are_skipped() {
        let dir = temp_dir("flushed");
        {
            let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
            commit(&mut j, &pages(1..3, 1));
            commit(&mut j, &pages(3..4, 2));
        }
        let (j, rec) = Journal::open(&dir, &opts(), 1).unwrap();
        assert_eq!(j.last_tx_id(), 2);
        assert_eq!(rec.report.transactions_recovered, 1);
        assert!(!rec.pages.contains_key(&1));
        assert_eq!(rec.pages[&3].tx_id, 2);
    }
}
