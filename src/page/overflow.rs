//! page/overflow — страницы цепочек больших значений.
//!
//! [page header (kind=Overflow, count=0, used=chunk_len)][next_page u64][chunk]
//! Последняя страница цепочки: next_page = NO_PAGE.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{OVF_HEADER_SIZE, OVF_OFF_NEXT};

use super::header::{page_header_read, page_header_write, PageHeader, PageKind};

/// Байт значения на одну overflow-страницу.
#[inline]
pub fn ovf_capacity(page_size: usize) -> usize {
    page_size - OVF_HEADER_SIZE
}

pub fn ovf_pages_needed(len: u64, page_size: usize) -> u64 {
    let cap = ovf_capacity(page_size) as u64;
    if len == 0 {
        return 1;
    }
    (len - 1) / cap + 1
}

pub fn ovf_page_build(page_size: usize, page_number: u64, next: u64, chunk: &[u8]) -> Result<Vec<u8>> {
    if chunk.len() > ovf_capacity(page_size) {
        return Err(anyhow!(
            "overflow chunk {} B exceeds page capacity {} B",
            chunk.len(),
            ovf_capacity(page_size)
        ));
    }
    let mut page = vec![0u8; page_size];
    page_header_write(
        &mut page,
        &PageHeader {
            page_number,
            kind: PageKind::Overflow,
            count: 0,
            used: chunk.len() as u32,
        },
    )?;
    LittleEndian::write_u64(&mut page[OVF_OFF_NEXT..OVF_OFF_NEXT + 8], next);
    page[OVF_HEADER_SIZE..OVF_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
    Ok(page)
}

/// (next_page, chunk) страницы цепочки.
pub fn ovf_page_read(page: &[u8]) -> Result<(u64, &[u8])> {
    let h = page_header_read(page)?;
    if h.kind != PageKind::Overflow {
        return Err(anyhow!(
            "page {} is {:?}, expected overflow",
            h.page_number,
            h.kind
        ));
    }
    let take = h.used as usize;
    if OVF_HEADER_SIZE + take > page.len() {
        return Err(anyhow!("overflow chunk too large for page (pid={})", h.page_number));
    }
    let next = LittleEndian::read_u64(&page[OVF_OFF_NEXT..OVF_OFF_NEXT + 8]);
    Ok((next, &page[OVF_HEADER_SIZE..OVF_HEADER_SIZE + take]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::NO_PAGE;

    #[test]
    fn pages_needed() {
        let cap = ovf_capacity(4096) as u64;
        assert_eq!(ovf_pages_needed(1024, 4096), 1);
        assert_eq!(ovf_pages_needed(cap, 4096), 1);
        assert_eq!(ovf_pages_needed(cap + 1, 4096), 2);
    }

    #[test]
    fn build_and_read() {
        let p = ovf_page_build(512, 12, NO_PAGE, b"chunk").unwrap();
        let (next, chunk) = ovf_page_read(&p).unwrap();
        assert_eq!(next, NO_PAGE);
        assert_eq!(chunk, b"chunk");
        assert!(ovf_page_build(512, 12, NO_PAGE, &[0u8; 600]).is_err());
    }
}
