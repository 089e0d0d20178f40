//! journal/log_file — один лог-файл журнала фиксированной ёмкости.
//!
//! Файл `<root>/journal/<number:016>.log` преаллоцируется до
//! `capacity * page_size` байт и адресуется слотами размером со страницу.
//! Позицию записи держит Journal; здесь только позиционное I/O.
//!
//! Ретирование: после flush Journal помечает файл `retire()`. Снапшоты, которые
//! ещё ссылаются на его страницы, держат `Arc<LogFile>`; файл удаляется с диска
//! в Drop последней ссылки.

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::consts::LOG_FILE_EXT;
use crate::metrics::{record_journal_fsync, record_log_file_created};
use crate::util::{read_at, write_at};

pub struct LogFile {
    number: u64,
    path: PathBuf,
    page_size: usize,
    capacity: u64,
    file: Mutex<File>,
    retired: AtomicBool,
}

impl LogFile {
    pub fn path_for(dir: &Path, number: u64) -> PathBuf {
        dir.join(format!("{:016}.{}", number, LOG_FILE_EXT))
    }

    /// Номер лог-файла из имени `<number:016>.log`.
    pub fn parse_number(name: &str) -> Option<u64> {
        let stem = name.strip_suffix(LOG_FILE_EXT)?.strip_suffix('.')?;
        if stem.len() != 16 || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok()
    }

    /// Создать новый преаллоцированный файл.
    pub fn create(dir: &Path, number: u64, page_size: usize, capacity: u64) -> Result<Self> {
        let path = Self::path_for(dir, number);
        let f = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("create log file {}", path.display()))?;
        f.set_len(capacity * page_size as u64)
            .with_context(|| format!("preallocate log file {}", path.display()))?;
        record_log_file_created();
        debug!("journal: created log file {} ({} slots)", path.display(), capacity);
        Ok(Self {
            number,
            path,
            page_size,
            capacity,
            file: Mutex::new(f),
            retired: AtomicBool::new(false),
        })
    }

    /// Открыть существующий файл (recovery). Короткий файл дополняется нулями.
    pub fn open(dir: &Path, number: u64, page_size: usize, capacity: u64) -> Result<Self> {
        let path = Self::path_for(dir, number);
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open log file {}", path.display()))?;
        let want = capacity * page_size as u64;
        let len = f.metadata()?.len();
        if len < want {
            f.set_len(want)
                .with_context(|| format!("extend log file {}", path.display()))?;
        } else if len > want {
            warn!(
                "journal: log file {} is {} B, larger than capacity {} B; tail ignored",
                path.display(),
                len,
                want
            );
        }
        Ok(Self {
            number,
            path,
            page_size,
            capacity,
            file: Mutex::new(f),
            retired: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn number(&self) -> u64 {
        self.number
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ёмкость в слотах.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn read_slots(&self, slot: u64, count: u64) -> Result<Vec<u8>> {
        self.check_range(slot, count)?;
        let mut buf = vec![0u8; count as usize * self.page_size];
        let mut f = self
            .file
            .lock()
            .map_err(|_| anyhow!("log file handle poisoned"))?;
        read_at(&mut *f, slot * self.page_size as u64, &mut buf)
            .with_context(|| format!("read slot {} of {}", slot, self.path.display()))?;
        Ok(buf)
    }

    pub fn read_page(&self, slot: u64) -> Result<Vec<u8>> {
        self.read_slots(slot, 1)
    }

    /// Записать подряд идущие слоты начиная с `slot`.
    pub fn write_slots(&self, slot: u64, buf: &[u8]) -> Result<()> {
        if buf.len() % self.page_size != 0 {
            return Err(anyhow!(
                "log write of {} B is not a multiple of page size {}",
                buf.len(),
                self.page_size
            ));
        }
        self.check_range(slot, (buf.len() / self.page_size) as u64)?;
        let mut f = self
            .file
            .lock()
            .map_err(|_| anyhow!("log file handle poisoned"))?;
        write_at(&mut *f, slot * self.page_size as u64, buf)
            .with_context(|| format!("write slot {} of {}", slot, self.path.display()))
    }

    /// Обнулить хвост начиная с `slot` (после усечения recovery).
    pub fn zero_from(&self, slot: u64) -> Result<()> {
        if slot >= self.capacity {
            return Ok(());
        }
        let zeros = vec![0u8; (self.capacity - slot) as usize * self.page_size];
        self.write_slots(slot, &zeros)
    }

    pub fn sync(&self) -> Result<()> {
        let f = self
            .file
            .lock()
            .map_err(|_| anyhow!("log file handle poisoned"))?;
        f.sync_data()
            .with_context(|| format!("fsync {}", self.path.display()))?;
        record_journal_fsync();
        Ok(())
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn check_range(&self, slot: u64, count: u64) -> Result<()> {
        if slot + count > self.capacity {
            return Err(anyhow!(
                "slots {}..{} out of log file {} capacity {}",
                slot,
                slot + count,
                self.number,
                self.capacity
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("number", &self.number)
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("retired", &self.is_retired())
            .finish()
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        if self.is_retired() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!("journal: removed retired log file {}", self.path.display()),
                Err(e) => warn!(
                    "journal: failed to remove retired log file {}: {}",
                    self.path.display(),
                    e
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!(
            "tsr-logfile-{}-{}-{}",
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

    #[test]
    fn name_roundtrip() {
        let p = LogFile::path_for(Path::new("/j"), 12);
        let name = p.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "0000000000000012.log");
        assert_eq!(LogFile::parse_number(name), Some(12));
        assert_eq!(LogFile::parse_number("12.log"), None);
        assert_eq!(LogFile::parse_number("0000000000000012.tmp"), None);
    }

    #[test]
    fn preallocated_and_bounded() {
        let dir = temp_dir("bounds");
        let lf = LogFile::create(&dir, 0, 512, 4).unwrap();
        assert_eq!(std::fs::metadata(lf.path()).unwrap().len(), 4 * 512);
        lf.write_slots(2, &[7u8; 1024]).unwrap();
        assert_eq!(lf.read_page(3).unwrap(), vec![7u8; 512]);
        assert!(lf.write_slots(3, &[0u8; 1024]).is_err());
        assert!(lf.read_slots(4, 1).is_err());
        lf.zero_from(3).unwrap();
        assert_eq!(lf.read_page(3).unwrap(), vec![0u8; 512]);
        assert_eq!(lf.read_page(2).unwrap(), vec![7u8; 512]);
    }

    #[test]
    fn retired_file_removed_with_last_reference() {
        let dir = temp_dir("retire");
        let lf = Arc::new(LogFile::create(&dir, 3, 512, 2).unwrap());
        let path = lf.path().to_path_buf();
        let reader = Arc::clone(&lf);
        lf.retire();
        drop(lf);
        assert!(path.exists(), "still referenced");
        assert_eq!(reader.read_page(0).unwrap().len(), 512);
        drop(reader);
        assert!(!path.exists());
    }
}
