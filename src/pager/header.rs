//! pager/header — заголовок data-файла (страница 0).
//!
//! Формат (LE):
//! MAGIC8 = "TSRDATA1"
//! u32 version            = 1
//! u32 page_size
//! u64 last_flushed_tx_id
//! u64 next_page_number
//! TreeRootHeader (53 B)
//! u32 crc32 (crc32fast) по всем предыдущим байтам

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;

use crate::consts::{DATA_MAGIC, DATA_VERSION};
use crate::journal::{TreeRootHeader, header::TREE_ROOT_HEADER_SIZE};

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 8;
const OFF_PAGE_SIZE: usize = 12;
const OFF_LAST_FLUSHED: usize = 16;
const OFF_NEXT_PAGE: usize = 24;
const OFF_ROOT: usize = 32;
const OFF_CRC: usize = OFF_ROOT + TREE_ROOT_HEADER_SIZE;

pub const DATA_HEADER_SIZE: usize = OFF_CRC + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub version: u32,
    pub page_size: u32,
    /// Последняя транзакция, чьи страницы целиком в data-файле.
    pub last_flushed_tx_id: u64,
    pub next_page_number: u64,
    pub root: TreeRootHeader,
}

impl DataHeader {
    pub fn new(page_size: u32) -> Self {
        Self {
            version: DATA_VERSION,
            page_size,
            last_flushed_tx_id: 0,
            // страница 0 занята самим заголовком
            next_page_number: 1,
            root: TreeRootHeader::default(),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < DATA_HEADER_SIZE {
            return Err(anyhow!("buffer too small for data header"));
        }
        buf[OFF_MAGIC..OFF_MAGIC + 8].copy_from_slice(DATA_MAGIC);
        LittleEndian::write_u32(&mut buf[OFF_VERSION..OFF_VERSION + 4], self.version);
        LittleEndian::write_u32(&mut buf[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4], self.page_size);
        LittleEndian::write_u64(&mut buf[OFF_LAST_FLUSHED..OFF_LAST_FLUSHED + 8], self.last_flushed_tx_id);
        LittleEndian::write_u64(&mut buf[OFF_NEXT_PAGE..OFF_NEXT_PAGE + 8], self.next_page_number);
        self.root.encode_into(&mut buf[OFF_ROOT..OFF_ROOT + TREE_ROOT_HEADER_SIZE]);

        let mut h = Crc32::new();
        h.update(&buf[..OFF_CRC]);
        LittleEndian::write_u32(&mut buf[OFF_CRC..OFF_CRC + 4], h.finalize());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < DATA_HEADER_SIZE {
            return Err(anyhow!("data header truncated ({} B)", buf.len()));
        }
        if &buf[OFF_MAGIC..OFF_MAGIC + 8] != DATA_MAGIC {
            return Err(anyhow!("bad data file magic"));
        }
        let version = LittleEndian::read_u32(&buf[OFF_VERSION..OFF_VERSION + 4]);
        if version != DATA_VERSION {
            return Err(anyhow!("unsupported data file version {}", version));
        }

        let stored = LittleEndian::read_u32(&buf[OFF_CRC..OFF_CRC + 4]);
        let mut h = Crc32::new();
        h.update(&buf[..OFF_CRC]);
        let calc = h.finalize();
        if stored != calc {
            return Err(anyhow!(
                "data header crc mismatch (stored={:#010x}, calc={:#010x})",
                stored,
                calc
            ));
        }

        Ok(Self {
            version,
            page_size: LittleEndian::read_u32(&buf[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4]),
            last_flushed_tx_id: LittleEndian::read_u64(&buf[OFF_LAST_FLUSHED..OFF_LAST_FLUSHED + 8]),
            next_page_number: LittleEndian::read_u64(&buf[OFF_NEXT_PAGE..OFF_NEXT_PAGE + 8]),
            root: TreeRootHeader::decode_from(&buf[OFF_ROOT..OFF_ROOT + TREE_ROOT_HEADER_SIZE]),
        })
    }
}
