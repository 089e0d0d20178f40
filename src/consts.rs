//! Общие константы форматов (data-файл, страницы, журнал).

// -------- Data file --------
pub const DATA_FILE: &str = "data.tsr";
pub const DATA_MAGIC: &[u8; 8] = b"TSRDATA1";
pub const DATA_VERSION: u32 = 1;

// -------- Journal --------
pub const JOURNAL_DIR: &str = "journal";
pub const LOG_FILE_EXT: &str = "log";

/// HeaderMarker заголовка транзакции ("TSTXHDR1" как LE u64).
pub const TX_HEADER_MARKER: u64 = 0x3152_4448_5854_5354;

// -------- Pages --------
/// Общий заголовок страницы дерева/overflow:
/// [page_number u64][flags u8][reserved u8][count u16][used u32]
pub const PAGE_HEADER_SIZE: usize = 16;

pub const PAGE_FLAG_BRANCH: u8 = 1;
pub const PAGE_FLAG_LEAF: u8 = 2;
pub const PAGE_FLAG_OVERFLOW: u8 = 4;

pub const OFF_PAGE_NUMBER: usize = 0;
pub const OFF_PAGE_FLAGS: usize = 8;
pub const OFF_PAGE_COUNT: usize = 10;
pub const OFF_PAGE_USED: usize = 12;

/// Overflow-страница: после общего заголовка лежит next_page u64.
pub const OVF_OFF_NEXT: usize = PAGE_HEADER_SIZE;
pub const OVF_HEADER_SIZE: usize = PAGE_HEADER_SIZE + 8;

/// Признак "нет страницы" (конец overflow-цепочки, пустое дерево).
pub const NO_PAGE: u64 = u64::MAX;

// -------- Bitmap --------
/// Одна outer-ячейка покрывает 1 << 12 = 4096 страниц.
pub const OUTER_REGION_SHIFT: u32 = 12;

// -------- Limits --------
pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 64 * 1024;
