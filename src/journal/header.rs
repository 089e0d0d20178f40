//! journal/header — упакованные заголовки журнала (LE, фиксированные offset’ы).
//!
//! TransactionHeader занимает один слот лог-файла и предшествует PageCount
//! образам страниц сегмента:
//!
//! | off | field               | type |
//! |-----|---------------------|------|
//! | 0   | HeaderMarker        | u64  |
//! | 8   | PageNumberInLogFile | i64  |
//! | 16  | TxId                | i64  |
//! | 24  | NextPageNumber      | i64  |
//! | 32  | LastPageNumber      | i64  |
//! | 40  | PageCount           | i32  |
//! | 44  | OverflowPageCount   | i32  |
//! | 48  | Crc (CRC32C payload)| u32  |
//! | 52  | TxMarker            | u8   |
//! | 56  | Root                | TreeRootHeader (53 B) |

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::TX_HEADER_MARKER;

// ---- TransactionHeader offsets ----
const TX_OFF_MARKER: usize = 0;
const TX_OFF_POSITION: usize = 8;
const TX_OFF_TX_ID: usize = 16;
const TX_OFF_NEXT_PAGE: usize = 24;
const TX_OFF_LAST_PAGE: usize = 32;
const TX_OFF_PAGE_COUNT: usize = 40;
const TX_OFF_OVF_COUNT: usize = 44;
const TX_OFF_CRC: usize = 48;
const TX_OFF_TX_MARKER: usize = 52;
const TX_OFF_ROOT: usize = 56;

pub const TX_HEADER_SIZE: usize = TX_OFF_ROOT + TREE_ROOT_HEADER_SIZE;

// ---- TreeRootHeader offsets ----
const ROOT_OFF_PAGE: usize = 0;
const ROOT_OFF_BRANCH: usize = 8;
const ROOT_OFF_LEAF: usize = 16;
const ROOT_OFF_OVERFLOW: usize = 24;
const ROOT_OFF_PAGE_COUNT: usize = 32;
const ROOT_OFF_ENTRIES: usize = 40;
const ROOT_OFF_DEPTH: usize = 48;
const ROOT_OFF_FLAGS: usize = 52;

pub const TREE_ROOT_HEADER_SIZE: usize = 53;

/// Состояние корня дерева: где корень и сколько у дерева страниц/записей.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRootHeader {
    /// -1: у дерева нет ни одной страницы.
    pub root_page_number: i64,
    pub branch_pages: i64,
    pub leaf_pages: i64,
    pub overflow_pages: i64,
    pub page_count: i64,
    pub entries_count: i64,
    pub depth: i32,
    pub flags: u8,
}

impl Default for TreeRootHeader {
    fn default() -> Self {
        Self {
            root_page_number: -1,
            branch_pages: 0,
            leaf_pages: 0,
            overflow_pages: 0,
            page_count: 0,
            entries_count: 0,
            depth: 0,
            flags: 0,
        }
    }
}

impl TreeRootHeader {
    pub fn root_page(&self) -> Option<u64> {
        if self.root_page_number < 0 {
            None
        } else {
            Some(self.root_page_number as u64)
        }
    }

    pub fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(&mut buf[ROOT_OFF_PAGE..ROOT_OFF_PAGE + 8], self.root_page_number);
        LittleEndian::write_i64(&mut buf[ROOT_OFF_BRANCH..ROOT_OFF_BRANCH + 8], self.branch_pages);
        LittleEndian::write_i64(&mut buf[ROOT_OFF_LEAF..ROOT_OFF_LEAF + 8], self.leaf_pages);
        LittleEndian::write_i64(&mut buf[ROOT_OFF_OVERFLOW..ROOT_OFF_OVERFLOW + 8], self.overflow_pages);
        LittleEndian::write_i64(&mut buf[ROOT_OFF_PAGE_COUNT..ROOT_OFF_PAGE_COUNT + 8], self.page_count);
        LittleEndian::write_i64(&mut buf[ROOT_OFF_ENTRIES..ROOT_OFF_ENTRIES + 8], self.entries_count);
        LittleEndian::write_i32(&mut buf[ROOT_OFF_DEPTH..ROOT_OFF_DEPTH + 4], self.depth);
        buf[ROOT_OFF_FLAGS] = self.flags;
    }

    pub fn decode_from(buf: &[u8]) -> Self {
        Self {
            root_page_number: LittleEndian::read_i64(&buf[ROOT_OFF_PAGE..ROOT_OFF_PAGE + 8]),
            branch_pages: LittleEndian::read_i64(&buf[ROOT_OFF_BRANCH..ROOT_OFF_BRANCH + 8]),
            leaf_pages: LittleEndian::read_i64(&buf[ROOT_OFF_LEAF..ROOT_OFF_LEAF + 8]),
            overflow_pages: LittleEndian::read_i64(&buf[ROOT_OFF_OVERFLOW..ROOT_OFF_OVERFLOW + 8]),
            page_count: LittleEndian::read_i64(&buf[ROOT_OFF_PAGE_COUNT..ROOT_OFF_PAGE_COUNT + 8]),
            entries_count: LittleEndian::read_i64(&buf[ROOT_OFF_ENTRIES..ROOT_OFF_ENTRIES + 8]),
            depth: LittleEndian::read_i32(&buf[ROOT_OFF_DEPTH..ROOT_OFF_DEPTH + 4]),
            flags: buf[ROOT_OFF_FLAGS],
        }
    }
}

/// Флаги сегмента транзакции.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxMarker(pub u8);

impl TxMarker {
    pub const START: TxMarker = TxMarker(1);
    pub const SPLIT: TxMarker = TxMarker(2);
    pub const COMMIT: TxMarker = TxMarker(4);

    #[inline]
    pub fn contains(self, other: TxMarker) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn with(self, other: TxMarker) -> TxMarker {
        TxMarker(self.0 | other.0)
    }

    /// Ровно одно из SPLIT/COMMIT, без неизвестных бит.
    pub fn is_well_formed(self) -> bool {
        let known = Self::START.0 | Self::SPLIT.0 | Self::COMMIT.0;
        self.0 & !known == 0 && (self.contains(Self::SPLIT) != self.contains(Self::COMMIT))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHeader {
    pub header_marker: u64,
    pub page_number_in_log_file: i64,
    pub tx_id: i64,
    pub next_page_number: i64,
    pub last_page_number: i64,
    pub page_count: i32,
    pub overflow_page_count: i32,
    pub crc: u32,
    pub tx_marker: TxMarker,
    pub root: TreeRootHeader,
}

impl TransactionHeader {
    pub fn encode(&self, slot: &mut [u8]) -> Result<()> {
        if slot.len() < TX_HEADER_SIZE {
            return Err(anyhow!("log slot too small for transaction header ({} B)", slot.len()));
        }
        for b in &mut slot[..TX_HEADER_SIZE] {
            *b = 0;
        }
        LittleEndian::write_u64(&mut slot[TX_OFF_MARKER..TX_OFF_MARKER + 8], self.header_marker);
        LittleEndian::write_i64(&mut slot[TX_OFF_POSITION..TX_OFF_POSITION + 8], self.page_number_in_log_file);
        LittleEndian::write_i64(&mut slot[TX_OFF_TX_ID..TX_OFF_TX_ID + 8], self.tx_id);
        LittleEndian::write_i64(&mut slot[TX_OFF_NEXT_PAGE..TX_OFF_NEXT_PAGE + 8], self.next_page_number);
        LittleEndian::write_i64(&mut slot[TX_OFF_LAST_PAGE..TX_OFF_LAST_PAGE + 8], self.last_page_number);
        LittleEndian::write_i32(&mut slot[TX_OFF_PAGE_COUNT..TX_OFF_PAGE_COUNT + 4], self.page_count);
        LittleEndian::write_i32(&mut slot[TX_OFF_OVF_COUNT..TX_OFF_OVF_COUNT + 4], self.overflow_page_count);
        LittleEndian::write_u32(&mut slot[TX_OFF_CRC..TX_OFF_CRC + 4], self.crc);
        slot[TX_OFF_TX_MARKER] = self.tx_marker.0;
        self.root.encode_into(&mut slot[TX_OFF_ROOT..TX_OFF_ROOT + TREE_ROOT_HEADER_SIZE]);
        Ok(())
    }

    /// Разбор без проверки; валидность решает recovery.
    pub fn decode(slot: &[u8]) -> Result<Self> {
        if slot.len() < TX_HEADER_SIZE {
            return Err(anyhow!("log slot too small for transaction header ({} B)", slot.len()));
        }
        Ok(Self {
            header_marker: LittleEndian::read_u64(&slot[TX_OFF_MARKER..TX_OFF_MARKER + 8]),
            page_number_in_log_file: LittleEndian::read_i64(&slot[TX_OFF_POSITION..TX_OFF_POSITION + 8]),
            tx_id: LittleEndian::read_i64(&slot[TX_OFF_TX_ID..TX_OFF_TX_ID + 8]),
            next_page_number: LittleEndian::read_i64(&slot[TX_OFF_NEXT_PAGE..TX_OFF_NEXT_PAGE + 8]),
            last_page_number: LittleEndian::read_i64(&slot[TX_OFF_LAST_PAGE..TX_OFF_LAST_PAGE + 8]),
            page_count: LittleEndian::read_i32(&slot[TX_OFF_PAGE_COUNT..TX_OFF_PAGE_COUNT + 4]),
            overflow_page_count: LittleEndian::read_i32(&slot[TX_OFF_OVF_COUNT..TX_OFF_OVF_COUNT + 4]),
            crc: LittleEndian::read_u32(&slot[TX_OFF_CRC..TX_OFF_CRC + 4]),
            tx_marker: TxMarker(slot[TX_OFF_TX_MARKER]),
            root: TreeRootHeader::decode_from(&slot[TX_OFF_ROOT..TX_OFF_ROOT + TREE_ROOT_HEADER_SIZE]),
        })
    }

    #[inline]
    pub fn has_marker(&self) -> bool {
        self.header_marker == TX_HEADER_MARKER
    }
}

/// CRC32C по образам страниц сегмента (в порядке записи).
pub fn segment_crc<'a>(pages: impl IntoIterator<Item = &'a [u8]>) -> u32 {
    pages
        .into_iter()
        .fold(0u32, |c, p| crc32c::crc32c_append(c, p))
}
