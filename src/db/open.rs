//! db/open — открытие окружения: LOCK, data-файл, recovery журнала, битмап.

use anyhow::{Context, Result};
use log::info;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::StorageOptions;
use crate::consts::JOURNAL_DIR;
use crate::free::PageAllocator;
use crate::journal::Journal;
use crate::lock::acquire_exclusive_lock;
use crate::pager::Pager;
use crate::tree::for_each_tree_page;

use super::core::{Db, Shared, Snapshot, WriterState};

impl Db {
    /// Открыть с опциями из окружения (TSR_*).
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_options(root, StorageOptions::from_env())
    }

    pub fn open_with_options(root: &Path, opts: StorageOptions) -> Result<Self> {
        opts.validate()?;
        std::fs::create_dir_all(root)
            .with_context(|| format!("create storage dir {}", root.display()))?;
        let lock = acquire_exclusive_lock(root)?;

        let pager = Pager::open(root, &opts)?;
        let header = *pager.header();
        let (journal, recovered) =
            Journal::open(&root.join(JOURNAL_DIR), &opts, header.last_flushed_tx_id)?;

        let snapshot = match recovered.last_tx {
            Some((tx_id, st)) if tx_id > header.last_flushed_tx_id => Snapshot {
                tx_id,
                root: st.root,
                next_page_number: st.next_page_number.max(header.next_page_number),
                pages: recovered.pages,
            },
            _ => Snapshot {
                tx_id: header.last_flushed_tx_id,
                root: header.root,
                next_page_number: header.next_page_number,
                pages: recovered.pages,
            },
        };

        let allocator = rebuild_allocator(&pager, &snapshot, &opts)?;
        info!(
            "db: opened {} (tx {}, {} journal page(s) pending, {} log file(s), {} used page(s))",
            root.display(),
            snapshot.tx_id,
            snapshot.pages.len(),
            journal.files_in_use(),
            allocator.used_pages()
        );

        Ok(Self {
            inner: Arc::new(Shared {
                root: root.to_path_buf(),
                opts,
                pager: RwLock::new(pager),
                journal: Mutex::new(journal),
                writer: Mutex::new(WriterState { allocator }),
                snapshot: RwLock::new(Arc::new(snapshot)),
                readers: Mutex::new(Default::default()),
                recovery: recovered.report,
                _lock: lock,
            }),
        })
    }
}

/// Битмап в памяти: всё, что достижимо из корня (включая overflow-цепочки), занято.
fn rebuild_allocator(pager: &Pager, snap: &Snapshot, opts: &StorageOptions) -> Result<PageAllocator> {
    let mut alloc = PageAllocator::new(
        pager.page_count().max(snap.next_page_number),
        opts.data_growth_pages,
    );
    let read = |pgno: u64| -> Result<Vec<u8>> {
        match snap.pages.get(&pgno) {
            Some(r) => r.read(),
            None => pager.read_page(pgno),
        }
    };
    if let Some(root) = snap.root.root_page() {
        for_each_tree_page(root, read, |pgno| alloc.mark_used(pgno))
            .context("rebuild page bitmap from tree")?;
    }
    alloc.bump_high_water(snap.next_page_number);
    Ok(alloc)
}
