//! page/header — общий заголовок страницы дерева/overflow.
//!
//! [page_number u64][flags u8][reserved u8][count u16][used u32]

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    OFF_PAGE_COUNT, OFF_PAGE_FLAGS, OFF_PAGE_NUMBER, OFF_PAGE_USED, PAGE_FLAG_BRANCH,
    PAGE_FLAG_LEAF, PAGE_FLAG_OVERFLOW, PAGE_HEADER_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Branch,
    Leaf,
    Overflow,
}

impl PageKind {
    pub fn flag(self) -> u8 {
        match self {
            PageKind::Branch => PAGE_FLAG_BRANCH,
            PageKind::Leaf => PAGE_FLAG_LEAF,
            PageKind::Overflow => PAGE_FLAG_OVERFLOW,
        }
    }

    pub fn from_flags(flags: u8) -> Result<Self> {
        match flags {
            PAGE_FLAG_BRANCH => Ok(PageKind::Branch),
            PAGE_FLAG_LEAF => Ok(PageKind::Leaf),
            PAGE_FLAG_OVERFLOW => Ok(PageKind::Overflow),
            other => Err(anyhow!("unknown page flags 0x{:02x}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_number: u64,
    pub kind: PageKind,
    /// Число записей (branch/leaf), 0 для overflow.
    pub count: u16,
    /// Байт полезных данных после заголовка.
    pub used: u32,
}

pub fn page_header_read(page: &[u8]) -> Result<PageHeader> {
    if page.len() < PAGE_HEADER_SIZE {
        return Err(anyhow!("page buffer too small for header ({} B)", page.len()));
    }
    let kind = PageKind::from_flags(page[OFF_PAGE_FLAGS])?;
    let h = PageHeader {
        page_number: LittleEndian::read_u64(&page[OFF_PAGE_NUMBER..OFF_PAGE_NUMBER + 8]),
        kind,
        count: LittleEndian::read_u16(&page[OFF_PAGE_COUNT..OFF_PAGE_COUNT + 2]),
        used: LittleEndian::read_u32(&page[OFF_PAGE_USED..OFF_PAGE_USED + 4]),
    };
    if PAGE_HEADER_SIZE + h.used as usize > page.len() {
        return Err(anyhow!(
            "page {} claims {} used bytes, page size {}",
            h.page_number,
            h.used,
            page.len()
        ));
    }
    Ok(h)
}

pub fn page_header_write(page: &mut [u8], h: &PageHeader) -> Result<()> {
    if page.len() < PAGE_HEADER_SIZE {
        return Err(anyhow!("page buffer too small for header ({} B)", page.len()));
    }
    LittleEndian::write_u64(&mut page[OFF_PAGE_NUMBER..OFF_PAGE_NUMBER + 8], h.page_number);
    page[OFF_PAGE_FLAGS] = h.kind.flag();
    page[OFF_PAGE_FLAGS + 1] = 0;
    LittleEndian::write_u16(&mut page[OFF_PAGE_COUNT..OFF_PAGE_COUNT + 2], h.count);
    LittleEndian::write_u32(&mut page[OFF_PAGE_USED..OFF_PAGE_USED + 4], h.used);
    Ok(())
}

/// Номер страницы из первых 8 байт образа (журнал и flush опираются на него).
#[inline]
pub fn page_number_of(page: &[u8]) -> u64 {
    LittleEndian::read_u64(&page[OFF_PAGE_NUMBER..OFF_PAGE_NUMBER + 8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_and_guards() {
        let mut page = vec![0u8; 512];
        let h = PageHeader {
            page_number: 42,
            kind: PageKind::Leaf,
            count: 3,
            used: 100,
        };
        page_header_write(&mut page, &h).unwrap();
        assert_eq!(page_header_read(&page).unwrap(), h);
        assert_eq!(page_number_of(&page), 42);

        page[OFF_PAGE_FLAGS] = 0x80;
        assert!(page_header_read(&page).is_err());

        page[OFF_PAGE_FLAGS] = PAGE_FLAG_LEAF;
        LittleEndian::write_u32(&mut page[OFF_PAGE_USED..OFF_PAGE_USED + 4], 600);
        assert!(page_header_read(&page).is_err());
    }
}
