//! pager/io — чтение/запись страниц, рост файла, sync.

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::sync::atomic::Ordering;

use super::core::{map_file, Pager};
use super::header::DataHeader;

impl Pager {
    /// Копия страницы `pgno`.
    pub fn read_page(&self, pgno: u64) -> Result<Vec<u8>> {
        if pgno >= self.pages {
            return Err(anyhow!(
                "page {} beyond end of data file ({} pages)",
                pgno,
                self.pages
            ));
        }
        let off = pgno as usize * self.page_size;
        Ok(self.map[off..off + self.page_size].to_vec())
    }

    /// Записать образ страницы; файл растёт при необходимости.
    pub fn write_page(&mut self, pgno: u64, data: &[u8]) -> Result<()> {
        if pgno == 0 {
            return Err(anyhow!("page 0 holds the data header"));
        }
        if data.len() != self.page_size {
            return Err(anyhow!(
                "page {} image is {} B, expected {}",
                pgno,
                data.len(),
                self.page_size
            ));
        }
        self.ensure_capacity(pgno + 1)?;
        let off = pgno as usize * self.page_size;
        self.map[off..off + self.page_size].copy_from_slice(data);
        Ok(())
    }

    /// Гарантировать, что файл вмещает `pages` страниц (шаг роста: growth).
    pub fn ensure_capacity(&mut self, pages: u64) -> Result<()> {
        if pages <= self.pages {
            return Ok(());
        }
        let want = pages.div_ceil(self.growth) * self.growth;
        self.map
            .flush()
            .with_context(|| format!("msync before grow {}", self.path.display()))?;
        self.file
            .set_len(want * self.page_size as u64)
            .with_context(|| format!("grow data file {} to {} pages", self.path.display(), want))?;
        self.map = map_file(&self.file, &self.path)?;
        debug!(
            "pager: grew {} from {} to {} pages",
            self.path.display(),
            self.pages,
            want
        );
        self.pages = want;
        Ok(())
    }

    /// Записать заголовок в страницу 0 (без sync).
    pub fn set_header(&mut self, h: DataHeader) -> Result<()> {
        h.encode(&mut self.map[..self.page_size])?;
        self.header = h;
        Ok(())
    }

    /// msync + fsync, если включён data_fsync.
    pub fn sync(&self) -> Result<()> {
        if !self.data_fsync {
            return Ok(());
        }
        self.map
            .flush()
            .with_context(|| format!("msync {}", self.path.display()))?;
        self.file
            .sync_all()
            .with_context(|| format!("fsync {}", self.path.display()))?;
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Зафиксировать результат flush: сначала на диск уходят уже записанные
    /// страницы, затем заголовок. msync не упорядочивает страницы внутри
    /// отображения, поэтому sync два.
    pub fn checkpoint_header(&mut self, h: DataHeader) -> Result<()> {
        self.sync()?;
        self.set_header(h)?;
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StorageOptions;
    use crate::pager::Pager;

    fn temp_root(tag: &str) -> std::path::PathBuf {
        let d = std::env::temp_dir().join(format!(
            "tsr-pager-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&d).unwrap();
        d
    }

    fn opts() -> StorageOptions {
        StorageOptions::default()
            .with_page_size(512)
            .with_data_growth_pages(4)
    }

    #[test]
    fn create_write_grow_reopen() {
        let root = temp_root("grow");
        {
            let mut p = Pager::open(&root, &opts()).unwrap();
            assert_eq!(p.page_count(), 4);
            assert_eq!(p.header().next_page_number, 1);

            p.write_page(9, &[3u8; 512]).unwrap();
            assert_eq!(p.page_count(), 12);
            assert_eq!(p.read_page(9).unwrap(), vec![3u8; 512]);

            let mut h = *p.header();
            h.last_flushed_tx_id = 5;
            h.next_page_number = 10;
            p.set_header(h).unwrap();
            p.sync().unwrap();
        }
        let p = Pager::open(&root, &opts()).unwrap();
        assert_eq!(p.page_count(), 12);
        assert_eq!(p.header().last_flushed_tx_id, 5);
        assert_eq!(p.read_page(9).unwrap(), vec![3u8; 512]);
        assert!(p.read_page(12).is_err());
    }

    #[test]
    fn checkpoint_syncs_pages_before_header() {
        let root = temp_root("ckpt");
        {
            let mut p = Pager::open(&root, &opts()).unwrap();
            let base = p.sync_count();
            p.write_page(2, &[9u8; 512]).unwrap();
            let mut h = *p.header();
            h.last_flushed_tx_id = 3;
            p.checkpoint_header(h).unwrap();
            assert_eq!(p.sync_count(), base + 2);
        }
        let p = Pager::open(&root, &opts()).unwrap();
        assert_eq!(p.header().last_flushed_tx_id, 3);
        assert_eq!(p.read_page(2).unwrap(), vec![9u8; 512]);

        // без data_fsync sync ничего не делает
        let mut q = Pager::open(&temp_root("ckpt-nofsync"), &opts().with_data_fsync(false)).unwrap();
        let h = *q.header();
        q.checkpoint_header(h).unwrap();
        assert_eq!(q.sync_count(), 0);
    }

    #[test]
    fn header_page_is_not_writable() {
        let root = temp_root("hdr");
        let mut p = Pager::open(&root, &opts()).unwrap();
        assert!(p.write_page(0, &[0u8; 512]).is_err());
        assert!(p.write_page(1, &[0u8; 100]).is_err());
    }

    #[test]
    fn page_size_mismatch_rejected() {
        let root = temp_root("ps");
        drop(Pager::open(&root, &opts()).unwrap());
        let err = Pager::open(&root, &opts().with_page_size(1024)).err().unwrap();
        assert!(err.to_string().contains("page_size mismatch"));
    }
}
