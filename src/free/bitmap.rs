//! free/bitmap — плоский битовый массив занятости страниц.
//!
//! Раскладка:
//! - слово u32 на 32 страницы: `pos >> 5` — индекс слова, `pos & 31` — бит в слове;
//! - опциональный outer-битмап: один бит на регион из 4096 страниц (`pos >> 12`).
//!   Бит региона выставляется при ЛЮБОЙ записи внутрь региона и никогда не
//!   сбрасывается ("возможно, грязный"). Сброшенный бит означает, что регион
//!   ни разу не трогали и он целиком свободен.
//!
//! Поиск свободной страницы (`find_free`) пропускает нетронутые регионы сразу,
//! а внутри грязных — полностью занятые слова.

use anyhow::Result;

use crate::consts::OUTER_REGION_SHIFT;
use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u32>,
    size: u64,
    outer: Option<Box<Bitmap>>,
}

impl Bitmap {
    /// Битмап без outer-слоя.
    pub fn new(size: u64) -> Self {
        Self {
            words: vec![0u32; Self::words_to_allocate(size) as usize],
            size,
            outer: None,
        }
    }

    /// Битмап с outer-слоем (1 бит на 4096 позиций).
    pub fn with_outer(size: u64) -> Self {
        let mut b = Self::new(size);
        b.outer = Some(Box::new(Self::new(Self::outer_size(size))));
        b
    }

    /// Minimum number of 32-bit words needed to hold `bits` bits.
    #[inline]
    pub fn words_to_allocate(bits: u64) -> u64 {
        if bits == 0 {
            return 0;
        }
        (bits - 1) / 32 + 1
    }

    #[inline]
    fn outer_size(size: u64) -> u64 {
        if size == 0 {
            0
        } else {
            ((size - 1) >> OUTER_REGION_SHIFT) + 1
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn outer(&self) -> Option<&Bitmap> {
        self.outer.as_deref()
    }

    pub fn get(&self, pos: u64) -> Result<bool> {
        self.check(pos)?;
        Ok(self.bit(pos))
    }

    pub fn set(&mut self, pos: u64, value: bool) -> Result<()> {
        self.check(pos)?;

        if let Some(outer) = self.outer.as_mut() {
            outer.set(pos >> OUTER_REGION_SHIFT, true)?;
        }

        let w = &mut self.words[(pos >> 5) as usize];
        if value {
            *w |= 1u32 << (pos & 31);
        } else {
            *w &= !(1u32 << (pos & 31));
        }
        Ok(())
    }

    /// Grow to `new_size` bits, preserving existing bits. Shrinking is not supported.
    pub fn resize(&mut self, new_size: u64) {
        if new_size <= self.size {
            return;
        }
        self.words
            .resize(Self::words_to_allocate(new_size) as usize, 0);
        self.size = new_size;
        if let Some(outer) = self.outer.as_mut() {
            outer.resize(Self::outer_size(new_size));
        }
    }

    pub fn count_used(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// First free position at or after `hint`, wrapping around to 0.
    pub fn find_free(&self, hint: u64) -> Option<u64> {
        if self.size == 0 {
            return None;
        }
        let start = if hint < self.size { hint } else { 0 };
        self.find_free_in(start, self.size)
            .or_else(|| self.find_free_in(0, start))
    }

    fn find_free_in(&self, from: u64, to: u64) -> Option<u64> {
        let outer = match self.outer.as_ref() {
            Some(o) => o,
            None => return self.scan_words(from, to),
        };

        let mut pos = from;
        while pos < to {
            let region = pos >> OUTER_REGION_SHIFT;
            if !outer.bit(region) {
                // регион ни разу не трогали
                return Some(pos);
            }
            let region_end = ((region + 1) << OUTER_REGION_SHIFT).min(to);
            if let Some(p) = self.scan_words(pos, region_end) {
                return Some(p);
            }
            pos = region_end;
        }
        None
    }

    fn scan_words(&self, from: u64, to: u64) -> Option<u64> {
        let mut pos = from;
        while pos < to {
            let word = self.words[(pos >> 5) as usize];
            if pos & 31 == 0 && word == u32::MAX {
                pos += 32;
                continue;
            }
            if word & (1u32 << (pos & 31)) == 0 {
                return Some(pos);
            }
            pos += 1;
        }
        None
    }

    #[inline]
    fn bit(&self, pos: u64) -> bool {
        (self.words[(pos >> 5) as usize] & (1u32 << (pos & 31))) != 0
    }

    #[inline]
    fn check(&self, pos: u64) -> Result<()> {
        if pos >= self.size {
            return Err(StorageError::Range {
                pos,
                size: self.size,
            }
            .into());
        }
        Ok(())
    }
}
