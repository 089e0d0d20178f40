use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use tessera::metrics::{self, MetricsSnapshot};
use tessera::{Db, JournalStats, RecoveryReport, StorageOptions, TxKind};

#[derive(Serialize)]
struct TreeStatus {
    root_page: i64,
    depth: i32,
    entries: i64,
    branch_pages: i64,
    leaf_pages: i64,
    overflow_pages: i64,
    page_count: i64,
}

#[derive(Serialize)]
struct Status {
    path: String,
    options: StorageOptions,
    snapshot_tx_id: u64,
    pending_journal_pages: usize,
    journal: JournalStats,
    recovery: RecoveryReport,
    tree: TreeStatus,
    metrics: MetricsSnapshot,
}

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let db = Db::open(&path)?;
    let snap = db.snapshot()?;
    let tx = db.new_transaction(TxKind::Read)?;
    let root = tx.root_header();

    let st = Status {
        path: path.display().to_string(),
        options: db.options().clone(),
        snapshot_tx_id: snap.tx_id,
        pending_journal_pages: snap.pages.len(),
        journal: db.journal_stats()?,
        recovery: db.recovery_report().clone(),
        tree: TreeStatus {
            root_page: root.root_page_number,
            depth: root.depth,
            entries: root.entries_count,
            branch_pages: root.branch_pages,
            leaf_pages: root.leaf_pages,
            overflow_pages: root.overflow_pages,
            page_count: root.page_count,
        },
        metrics: metrics::snapshot(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&st)?);
        return Ok(());
    }

    println!("DB at {}", st.path);
    println!("  options: {}", st.options);
    println!("  snapshot tx: {}", st.snapshot_tx_id);
    println!(
        "  journal: {} file(s) in use, active #{} at slot {}, last tx {}, flushed to {}",
        st.journal.files_in_use,
        st.journal.current_file_number,
        st.journal.write_page_position,
        st.journal.last_tx_id,
        st.journal.last_flushed_tx_id
    );
    println!("  pending journal pages: {}", st.pending_journal_pages);
    println!(
        "  recovery: {} tx recovered, {} discarded ({} B)",
        st.recovery.transactions_recovered,
        st.recovery.transactions_discarded,
        st.recovery.discarded_bytes
    );
    println!(
        "  tree: root={} depth={} entries={} pages={} (branch={}, leaf={}, overflow={})",
        st.tree.root_page,
        st.tree.depth,
        st.tree.entries,
        st.tree.page_count,
        st.tree.branch_pages,
        st.tree.leaf_pages,
        st.tree.overflow_pages
    );
    Ok(())
}
