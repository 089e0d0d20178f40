//! pager — data-файл, отображённый в память (memmap2), постранично.
//!
//! Подмодули:
//! - header.rs — заголовок data-файла в странице 0 (crc32fast).
//! - core.rs   — структура Pager, open/create, маппинг.
//! - io.rs     — чтение/запись страниц, рост файла шагом `data_growth_pages`, sync.
//!
//! Pager пишет только flush (под `RwLock::write`); читатели копируют страницы
//! под `RwLock::read`, поэтому чередование идёт с гранулярностью страницы.

pub mod core;
pub mod header;
pub mod io;

pub use core::Pager;
pub use header::{DataHeader, DATA_HEADER_SIZE};
