//! page — on-disk page formats of the tree.
//!
//! Разделение по подмодулям:
//! - header.rs   — общий 16-байтовый заголовок (page_number, flags, count, used).
//! - node.rs     — Leaf/Branch: декодирование в вектор записей и обратная упаковка.
//! - overflow.rs — Overflow: заголовок + next_page + кусок значения.
//!
//! Страницы всегда копируются в/из `Vec<u8>`; mmap держит только Pager.

pub mod header;
pub mod node;
pub mod overflow;

pub use header::{page_header_read, page_header_write, page_number_of, PageHeader, PageKind};
pub use node::{BranchEntry, LeafEntry, LeafValue, Node};
pub use overflow::{ovf_capacity, ovf_page_build, ovf_page_read, ovf_pages_needed};

/// Максимальная длина ключа для данного размера страницы.
#[inline]
pub fn max_key_len(page_size: usize) -> usize {
    page_size / 8
}

/// Inline-лимит записи листа: key + value + overhead <= (page_size - header) / 4.
#[inline]
pub fn max_inline_entry(page_size: usize) -> usize {
    (page_size - crate::consts::PAGE_HEADER_SIZE) / 4
}
