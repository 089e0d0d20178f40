//! free — аллокатор страниц поверх битмапа занятости.
//!
//! Политика:
//! - Страница 0 (заголовок data-файла) всегда занята.
//! - Логическое пространство страниц растёт шагом `growth` (политика роста
//!   data-файла), когда свободных битов не осталось.
//! - `high_water` — NextPageNumber: максимальный выданный номер + 1. Пишется в
//!   заголовок транзакции и восстанавливается при recovery.
//! - Откат (abort): выданные номера возвращаются, high_water восстанавливается,
//!   подсказка поиска сдвигается назад — следующий писатель получит те же номера.
//!
//! Битмап живёт только в памяти и пересобирается при открытии обходом дерева.
//! Вызовы выполняются под writer‑токеном транзакции; своей синхронизации нет.

pub mod bitmap;

use anyhow::Result;

use crate::metrics::{record_page_allocated, record_page_released};

pub use bitmap::Bitmap;

#[derive(Debug, Clone)]
pub struct PageAllocator {
    bits: Bitmap,
    growth: u64,
    hint: u64,
    high_water: u64,
}

impl PageAllocator {
    /// Allocator for a page space of `pages` pages (at least one growth step).
    pub fn new(pages: u64, growth: u64) -> Self {
        let growth = growth.max(1);
        let size = pages.max(growth);
        let mut bits = Bitmap::with_outer(size);
        // page 0 is the data-file header; size >= growth >= 1
        let header = bits.set(0, true);
        debug_assert!(header.is_ok(), "page 0 outside a bitmap of {} pages", size);
        Self {
            bits,
            growth,
            hint: 1,
            high_water: 1,
        }
    }

    /// Выдать свободную страницу; при исчерпании растим пространство на `growth`.
    pub fn allocate(&mut self) -> Result<u64> {
        let pgno = match self.bits.find_free(self.hint) {
            Some(p) => p,
            None => {
                let old = self.bits.size();
                self.bits.resize(old + self.growth);
                old
            }
        };
        self.bits.set(pgno, true)?;
        self.hint = pgno + 1;
        if pgno + 1 > self.high_water {
            self.high_water = pgno + 1;
        }
        record_page_allocated();
        Ok(pgno)
    }

    pub fn release(&mut self, pgno: u64) -> Result<()> {
        self.bits.set(pgno, false)?;
        if pgno < self.hint {
            self.hint = pgno;
        }
        record_page_released();
        Ok(())
    }

    /// Пометить страницу занятой (rebuild при открытии). Растит пространство при необходимости.
    pub fn mark_used(&mut self, pgno: u64) -> Result<()> {
        if pgno >= self.bits.size() {
            let want = (pgno / self.growth + 1) * self.growth;
            self.bits.resize(want);
        }
        self.bits.set(pgno, true)?;
        if pgno + 1 > self.high_water {
            self.high_water = pgno + 1;
        }
        Ok(())
    }

    /// Undo an aborted writer: free its pages and restore the high-water mark.
    pub fn rollback(&mut self, allocated: &[u64], high_water: u64) -> Result<()> {
        for &pgno in allocated {
            self.release(pgno)?;
        }
        self.high_water = high_water;
        Ok(())
    }

    pub fn is_used(&self, pgno: u64) -> Result<bool> {
        self.bits.get(pgno)
    }

    /// NextPageNumber.
    #[inline]
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Raise the high-water mark (recovered from the journal / data header).
    pub fn bump_high_water(&mut self, next_page_number: u64) {
        if next_page_number > self.high_water {
            self.high_water = next_page_number;
        }
        if next_page_number > self.bits.size() {
            self.bits.resize(next_page_number);
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.bits.size()
    }

    pub fn used_pages(&self) -> u64 {
        self.bits.count_used()
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_zero_is_reserved() {
        let mut a = PageAllocator::new(8, 8);
        assert!(a.is_used(0).unwrap());
        assert_eq!(a.allocate().unwrap(), 1);
        assert_eq!(a.allocate().unwrap(), 2);
        assert_eq!(a.high_water(), 3);
    }

    #[test]
    fn degenerate_sizes_still_reserve_page_zero() {
        let mut a = PageAllocator::new(0, 0);
        assert!(a.is_used(0).unwrap());
        assert_eq!(a.capacity(), 1);
        assert_eq!(a.allocate().unwrap(), 1);
    }

    #[test]
    fn grows_by_step_when_full() {
        let mut a = PageAllocator::new(4, 4);
        for expect in 1..4 {
            assert_eq!(a.allocate().unwrap(), expect);
        }
        assert_eq!(a.capacity(), 4);
        assert_eq!(a.allocate().unwrap(), 4);
        assert_eq!(a.capacity(), 8);
        assert_eq!(a.high_water(), 5);
    }

    #[test]
    fn rollback_returns_same_numbers() {
        let mut a = PageAllocator::new(64, 64);
        let base = a.allocate().unwrap();
        let hw = a.high_water();

        let got: Vec<u64> = (0..3).map(|_| a.allocate().unwrap()).collect();
        a.rollback(&got, hw).unwrap();
        assert_eq!(a.high_water(), hw);

        let again: Vec<u64> = (0..3).map(|_| a.allocate().unwrap()).collect();
        assert_eq!(got, again);
        assert!(base < again[0]);
    }

    #[test]
    fn released_pages_are_reused_first() {
        let mut a = PageAllocator::new(64, 64);
        let p: Vec<u64> = (0..5).map(|_| a.allocate().unwrap()).collect();
        a.release(p[1]).unwrap();
        assert_eq!(a.allocate().unwrap(), p[1]);
        assert_eq!(a.allocate().unwrap(), p[4] + 1);
    }

    #[test]
    fn mark_used_extends_space() {
        let mut a = PageAllocator::new(8, 8);
        a.mark_used(20).unwrap();
        assert!(a.capacity() > 20);
        assert_eq!(a.high_water(), 21);
        assert!(a.is_used(20).unwrap());
        assert_eq!(a.used_pages(), 2);
    }
}
