//! pager/core — ядро Pager: структура, open/create, маппинг файла.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::StorageOptions;
use crate::consts::DATA_FILE;

use super::header::{DataHeader, DATA_HEADER_SIZE};

/// Менеджер страниц data-файла.
pub struct Pager {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
    pub(crate) map: MmapMut,
    pub(crate) page_size: usize,
    /// Сколько страниц сейчас отображено (длина файла / page_size).
    pub(crate) pages: u64,
    pub(crate) growth: u64,
    pub(crate) data_fsync: bool,
    pub(crate) header: DataHeader,
    /// Выполненные msync+fsync (диагностика).
    pub(crate) syncs: AtomicU64,
}

impl Pager {
    /// Открыть `<root>/data.tsr`, создав его при отсутствии.
    pub fn open(root: &Path, opts: &StorageOptions) -> Result<Self> {
        let path = root.join(DATA_FILE);
        if path.exists() {
            Self::open_existing(path, opts)
        } else {
            Self::create(path, opts)
        }
    }

    fn create(path: PathBuf, opts: &StorageOptions) -> Result<Self> {
        let ps = opts.page_size as usize;
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("create data file {}", path.display()))?;
        let pages = opts.data_growth_pages.max(1);
        file.set_len(pages * ps as u64)
            .with_context(|| format!("preallocate data file {}", path.display()))?;
        let map = map_file(&file, &path)?;

        let mut pager = Self {
            path,
            file,
            map,
            page_size: ps,
            pages,
            growth: opts.data_growth_pages.max(1),
            data_fsync: opts.data_fsync,
            header: DataHeader::new(opts.page_size),
            syncs: AtomicU64::new(0),
        };
        let h = pager.header;
        pager.set_header(h)?;
        pager.sync()?;
        info!(
            "pager: created data file {} (page_size={}, {} pages)",
            pager.path.display(),
            ps,
            pages
        );
        Ok(pager)
    }

    fn open_existing(path: PathBuf, opts: &StorageOptions) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open data file {}", path.display()))?;

        let mut head = [0u8; DATA_HEADER_SIZE];
        file.read_exact(&mut head)
            .with_context(|| format!("read data header {}", path.display()))?;
        let header = DataHeader::decode(&head)
            .with_context(|| format!("data header of {}", path.display()))?;
        if header.page_size != opts.page_size {
            return Err(anyhow!(
                "page_size mismatch: data file {} uses {}, options request {}",
                path.display(),
                header.page_size,
                opts.page_size
            ));
        }

        let ps = opts.page_size as usize;
        let len = file.metadata()?.len();
        let pages = len / ps as u64;
        if pages == 0 || len % ps as u64 != 0 {
            return Err(anyhow!(
                "data file {} length {} is not a positive multiple of page size {}",
                path.display(),
                len,
                ps
            ));
        }
        let map = map_file(&file, &path)?;
        debug!(
            "pager: opened {} ({} pages, last flushed tx {})",
            path.display(),
            pages,
            header.last_flushed_tx_id
        );

        Ok(Self {
            path,
            file,
            map,
            page_size: ps,
            pages,
            growth: opts.data_growth_pages.max(1),
            data_fsync: opts.data_fsync,
            header,
            syncs: AtomicU64::new(0),
        })
    }

    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Число страниц в data-файле (включая заголовок).
    #[inline]
    pub fn page_count(&self) -> u64 {
        self.pages
    }

    pub fn header(&self) -> &DataHeader {
        &self.header
    }
}

pub(crate) fn map_file(file: &File, path: &Path) -> Result<MmapMut> {
    // Файл открыт только этим процессом (LOCK), длину меняет только Pager.
    let map = unsafe { MmapOptions::new().map_mut(file) }
        .with_context(|| format!("mmap {}", path.display()))?;
    Ok(map)
}
