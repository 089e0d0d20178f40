//! journal/writer — append транзакции в журнал.
//!
//! Протокол:
//! - страницы транзакции пишутся отсортированными по номеру;
//! - сегмент = слот заголовка + образы страниц; CRC32C по образам сегмента;
//! - если активный файл не вмещает заголовок + оставшиеся страницы, пишем
//!   сколько влезает (SPLIT), fsync, открываем файл Number+1 и продолжаем;
//! - транзакция без образов страниц (только удаления) пишется одним
//!   заголовком с PageCount = 0: новый корень и next_page_number;
//! - последний сегмент несёт COMMIT; транзакция видна только после fsync
//!   всей цепочки (публикацию снапшота делает вызывающий код).
//!
//! Abort ничего не пишет: позиция записи не двигается, следующий писатель
//! начинает с того же файла и слота.

use anyhow::{anyhow, bail, Result};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::consts::{OFF_PAGE_FLAGS, PAGE_FLAG_OVERFLOW, TX_HEADER_MARKER};
use crate::error::StorageError;
use crate::metrics::record_journal_append;

use super::header::{segment_crc, TransactionHeader, TreeRootHeader, TxMarker};
use super::{Journal, JournalFile, LogFile, PageRef, TxState};

/// Что фиксирует транзакция.
pub struct TxWrite<'a> {
    pub tx_id: u64,
    pub next_page_number: u64,
    pub root: TreeRootHeader,
    pub pages: &'a BTreeMap<u64, Vec<u8>>,
}

impl Journal {
    /// Записать транзакцию. Возвращает ссылки на записанные образы страниц.
    pub fn append(&mut self, tx: &TxWrite<'_>) -> Result<Vec<(u64, PageRef)>> {
        if tx.tx_id != self.last_tx_id + 1 {
            bail!(
                "journal append out of order: tx {} after {}",
                tx.tx_id,
                self.last_tx_id
            );
        }
        let files_before = self.files.len();
        let pos_before = self.write_pos;

        match self.append_segments(tx) {
            Ok((refs, touched, start)) => {
                for idx in touched {
                    self.files[idx].max_tx_id = tx.tx_id;
                }
                self.last_tx_id = tx.tx_id;
                self.tx_states.insert(
                    tx.tx_id,
                    TxState {
                        root: tx.root,
                        next_page_number: tx.next_page_number,
                    },
                );
                self.last_append = Some(start);
                Ok(refs)
            }
            Err(e) => {
                // Откат: новые файлы удаляем, позиция возвращается.
                for f in self.files.drain(files_before..) {
                    f.log.retire();
                }
                self.write_pos = pos_before;
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn append_segments(
        &mut self,
        tx: &TxWrite<'_>,
    ) -> Result<(Vec<(u64, PageRef)>, Vec<usize>, (u64, u64))> {
        let ps = self.page_size;
        let images: Vec<(u64, &Vec<u8>)> = tx.pages.iter().map(|(k, v)| (*k, v)).collect();
        for (pgno, img) in &images {
            if img.len() != ps {
                bail!("page {} image is {} B, expected {}", pgno, img.len(), ps);
            }
        }

        let mut refs = Vec::with_capacity(images.len());
        let mut touched = Vec::new();
        let mut start: Option<(u64, u64)> = None;
        let mut idx = 0usize;
        let mut first = true;
        let mut bytes = 0u64;

        loop {
            let avail = self.capacity - self.write_pos;
            if avail < 2 {
                self.rotate(&StorageError::CapacityExceeded {
                    needed: 2,
                    available: avail,
                })?;
                continue;
            }

            let remaining = images.len() - idx;
            let take = remaining.min((avail - 1) as usize);
            let last = take == remaining;
            let seg = &images[idx..idx + take];

            let head = if first { TxMarker::START } else { TxMarker::default() };
            let marker = head.with(if last { TxMarker::COMMIT } else { TxMarker::SPLIT });
            let overflow = seg
                .iter()
                .filter(|(_, p)| p[OFF_PAGE_FLAGS] == PAGE_FLAG_OVERFLOW)
                .count();
            let hdr = TransactionHeader {
                header_marker: TX_HEADER_MARKER,
                page_number_in_log_file: self.write_pos as i64,
                tx_id: tx.tx_id as i64,
                next_page_number: tx.next_page_number as i64,
                last_page_number: seg.last().map_or(0, |(pgno, _)| *pgno as i64),
                page_count: take as i32,
                overflow_page_count: overflow as i32,
                crc: segment_crc(seg.iter().map(|(_, p)| p.as_slice())),
                tx_marker: marker,
                root: tx.root,
            };

            let mut buf = vec![0u8; (1 + take) * ps];
            hdr.encode(&mut buf[..ps])?;
            for (i, (_, img)) in seg.iter().enumerate() {
                buf[(1 + i) * ps..(2 + i) * ps].copy_from_slice(img);
            }

            let active = self.active();
            active.write_slots(self.write_pos, &buf)?;
            if start.is_none() {
                start = Some((active.number(), self.write_pos));
            }
            for (i, (pgno, _)) in seg.iter().enumerate() {
                refs.push((
                    *pgno,
                    PageRef {
                        file: Arc::clone(&active),
                        slot: self.write_pos + 1 + i as u64,
                        tx_id: tx.tx_id,
                    },
                ));
            }
            touched.push(self.files.len() - 1);
            bytes += buf.len() as u64;

            debug!(
                "journal: tx {} segment @{}:{} pages={} marker={:#x}",
                tx.tx_id,
                active.number(),
                self.write_pos,
                take,
                marker.0
            );
            self.write_pos += 1 + take as u64;

            if self.fsync {
                active.sync()?;
            }
            if last {
                break;
            }
            self.rotate(&StorageError::CapacityExceeded {
                needed: (remaining - take) as u64 + 1,
                available: 0,
            })?;
            first = false;
            idx += take;
        }

        record_journal_append(images.len() as u64, bytes);
        let start = start.ok_or_else(|| anyhow!("journal append wrote no segment"))?;
        Ok((refs, touched, start))
    }

    /// Запечатать активный файл и открыть Number+1.
    fn rotate(&mut self, why: &StorageError) -> Result<()> {
        let next = self.current_file_number() + 1;
        let log = LogFile::create(&self.dir, next, self.page_size, self.capacity)?;
        debug!("journal: rotate to log file {} ({})", next, why);
        self.files.push(JournalFile {
            log: Arc::new(log),
            max_tx_id: 0,
        });
        self.write_pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageOptions;
    use crate::journal::test_support::temp_dir;
    use crate::journal::{TransactionHeader, TxMarker};
    use byteorder::{ByteOrder, LittleEndian};

    fn opts() -> StorageOptions {
        StorageOptions::default()
            .with_page_size(512)
            .with_log_file_pages(10)
            .with_journal_fsync(false)
    }

    fn pages(range: std::ops::Range<u64>) -> BTreeMap<u64, Vec<u8>> {
        range
            .map(|p| {
                let mut img = vec![0u8; 512];
                LittleEndian::write_u64(&mut img[0..8], p);
                img[8] = crate::consts::PAGE_FLAG_LEAF;
                (p, img)
            })
            .collect()
    }

    fn write(j: &mut Journal, pages: &BTreeMap<u64, Vec<u8>>) -> Vec<(u64, PageRef)> {
        let tx_id = j.last_tx_id() + 1;
        j.append(&TxWrite {
            tx_id,
            next_page_number: 100,
            root: TreeRootHeader::default(),
            pages,
        })
        .unwrap()
    }

    #[test]
    fn single_segment_layout() {
        let dir = temp_dir("single");
        let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
        let refs = write(&mut j, &pages(1..4));
        assert_eq!(j.write_page_position(), 4);
        assert_eq!(j.files_in_use(), 1);
        assert_eq!(refs.iter().map(|(_, r)| r.slot).collect::<Vec<_>>(), vec![1, 2, 3]);

        let hdr = TransactionHeader::decode(&refs[0].1.file.read_page(0).unwrap()).unwrap();
        assert_eq!(hdr.tx_id, 1);
        assert_eq!(hdr.page_count, 3);
        assert_eq!(hdr.last_page_number, 3);
        assert_eq!(hdr.tx_marker, TxMarker::START.with(TxMarker::COMMIT));
        assert_eq!(j.stats().last_append, Some((0, 0)));
    }

    #[test]
    fn large_transaction_splits_across_files() {
        let dir = temp_dir("split");
        let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
        // 16 pages, 10 slots per file: 1+9 in file 0, 1+7 in file 1
        let refs = write(&mut j, &pages(1..17));
        assert_eq!(j.files_in_use(), 2);
        assert_eq!(j.current_file_number(), 1);
        assert_eq!(j.write_page_position(), 8);
        assert_eq!(refs.len(), 16);

        let h0 = TransactionHeader::decode(&refs[0].1.file.read_page(0).unwrap()).unwrap();
        assert_eq!(h0.tx_marker, TxMarker::START.with(TxMarker::SPLIT));
        assert_eq!(h0.page_count, 9);
        let h1 = TransactionHeader::decode(&refs[15].1.file.read_page(0).unwrap()).unwrap();
        assert_eq!(h1.tx_marker, TxMarker::COMMIT);
        assert_eq!(h1.page_count, 7);
        assert_eq!(h1.tx_id, 1);
    }

    #[test]
    fn rotates_when_header_and_page_do_not_fit() {
        let dir = temp_dir("rotate");
        let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
        for _ in 0..3 {
            write(&mut j, &pages(1..3));
        }
        // 3 * 3 slots = 9, one slot left: not enough for header + page
        assert_eq!(j.write_page_position(), 9);
        write(&mut j, &pages(1..3));
        assert_eq!(j.files_in_use(), 2);
        assert_eq!(j.stats().last_append, Some((1, 0)));
    }

    #[test]
    fn header_only_transaction_takes_one_slot() {
        let dir = temp_dir("hdr-only");
        let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
        write(&mut j, &pages(1..3));
        let refs = write(&mut j, &BTreeMap::new());
        assert!(refs.is_empty());
        assert_eq!(j.write_page_position(), 4);
        assert_eq!(j.last_tx_id(), 2);
        assert_eq!(j.stats().last_append, Some((0, 3)));

        let hdr = TransactionHeader::decode(&j.active().read_page(3).unwrap()).unwrap();
        assert_eq!(hdr.page_count, 0);
        assert_eq!(hdr.tx_marker, TxMarker::START.with(TxMarker::COMMIT));
        assert!(j.state_at(2).is_some());
    }

    #[test]
    fn out_of_order_tx_rejected() {
        let dir = temp_dir("order");
        let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
        let p = pages(1..2);
        let err = j
            .append(&TxWrite {
                tx_id: 5,
                next_page_number: 2,
                root: TreeRootHeader::default(),
                pages: &p,
            })
            .unwrap_err();
        assert!(err.to_string().contains("out of order"));
        assert_eq!(j.write_page_position(), 0);
    }

    #[test]
    fn retire_keeps_active_file() {
        let dir = temp_dir("retire");
        let (mut j, _) = Journal::open(&dir, &opts(), 0).unwrap();
        for _ in 0..8 {
            write(&mut j, &pages(1..3));
        }
        let before = j.files_in_use();
        assert!(before > 1);
        assert_eq!(j.retire_flushed(4), 1);
        assert!(j.state_at(4).is_none());
        assert!(j.state_at(8).is_some());
        j.retire_flushed(8);
        assert_eq!(j.files_in_use(), 1);
        assert_eq!(j.last_flushed_tx_id(), 8);
    }
}
