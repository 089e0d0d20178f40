use anyhow::Result;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tessera::{is_storage_error, Db, StorageError, StorageOptions, TxKind};

const PS: u32 = 512;

fn opts() -> StorageOptions {
    StorageOptions::default()
        .with_page_size(PS)
        .with_log_file_pages(32)
        .with_journal_fsync(true)
        .with_data_fsync(true)
}

fn log_path(root: &Path, number: u64) -> PathBuf {
    root.join("journal").join(format!("{:016}.log", number))
}

/// Испортить байт первой страницы данных сегмента, чей заголовок в `slot`.
fn corrupt_payload(root: &Path, file: u64, slot: u64) -> Result<()> {
    let p = log_path(root, file);
    let mut f = OpenOptions::new().read(true).write(true).open(&p)?;
    let off = (slot + 1) * PS as u64 + 40;
    let mut b = [0u8; 1];
    f.seek(SeekFrom::Start(off))?;
    f.read_exact(&mut b)?;
    b[0] ^= 0xFF;
    f.seek(SeekFrom::Start(off))?;
    f.write_all(&b)?;
    f.sync_all()?;
    Ok(())
}

fn put_each(db: &Db, keys: &[&str]) -> Result<()> {
    let tree = db.root();
    for k in keys {
        let mut tx = db.new_transaction(TxKind::ReadWrite)?;
        tree.put(&mut tx, k.as_bytes(), format!("v:{}", k).as_bytes())?;
        tx.commit()?;
    }
    Ok(())
}

#[test]
fn reopen_without_flush_recovers_from_journal() -> Result<()> {
    let root = unique_root("rec-reopen");
    {
        let db = Db::open_with_options(&root, opts())?;
        put_each(&db, &["a", "b", "c"])?;
        let tree = db.root();
        let mut tx = db.new_transaction(TxKind::ReadWrite)?;
        tree.put(&mut tx, b"big", &vec![0x42u8; 3000])?;
        assert!(tree.delete(&mut tx, b"b")?);
        tx.commit()?;
    }

    let db = Db::open_with_options(&root, opts())?;
    let rep = db.recovery_report();
    assert_eq!(rep.transactions_recovered, 4);
    assert!(rep.is_clean());

    let tree = db.root();
    let tx = db.new_transaction(TxKind::Read)?;
    assert_eq!(tree.get(&tx, b"a")?, Some(b"v:a".to_vec()));
    assert_eq!(tree.get(&tx, b"b")?, None);
    assert_eq!(tree.get(&tx, b"c")?, Some(b"v:c".to_vec()));
    assert_eq!(tree.get(&tx, b"big")?, Some(vec![0x42u8; 3000]));
    assert_eq!(tx.root_header().entries_count, 3);
    Ok(())
}

#[test]
fn corrupted_last_transaction_is_discarded() -> Result<()> {
    let root = unique_root("rec-tail");
    let (file, slot) = {
        let db = Db::open_with_options(&root, opts())?;
        put_each(&db, &["one", "two", "three"])?;
        db.journal_stats()?.last_append.expect("appended")
    };
    corrupt_payload(&root, file, slot)?;

    {
        let db = Db::open_with_options(&root, opts())?;
        let rep = db.recovery_report().clone();
        assert_eq!(rep.transactions_recovered, 2);
        assert_eq!(rep.transactions_discarded, 1);
        assert!(rep.discarded_bytes > 0);

        let tree = db.root();
        let tx = db.new_transaction(TxKind::Read)?;
        assert_eq!(tree.get(&tx, b"one")?, Some(b"v:one".to_vec()));
        assert_eq!(tree.get(&tx, b"two")?, Some(b"v:two".to_vec()));
        assert_eq!(tree.get(&tx, b"three")?, None);
        drop(tx);

        // хвост занулён: новая транзакция пишется на место отброшенной
        assert_eq!(db.write_page_position()?, slot);
        put_each(&db, &["four"])?;
    }

    let db = Db::open_with_options(&root, opts())?;
    assert!(db.recovery_report().is_clean());
    let tx = db.new_transaction(TxKind::Read)?;
    assert_eq!(db.root().get(&tx, b"four")?, Some(b"v:four".to_vec()));
    assert_eq!(db.journal_stats()?.last_tx_id, 3);
    Ok(())
}

#[test]
fn corrupted_first_header_fails_open() -> Result<()> {
    let root = unique_root("rec-first");
    {
        let db = Db::open_with_options(&root, opts())?;
        put_each(&db, &["x", "y"])?;
    }
    corrupt_payload(&root, 0, 0)?;

    let err = Db::open_with_options(&root, opts()).err().expect("open must fail");
    assert!(
        is_storage_error(&err, |e| matches!(e, StorageError::CorruptionDetected { position: 0, .. })),
        "unexpected error: {:#}",
        err
    );
    Ok(())
}

#[test]
fn reopen_after_partial_flush_replays_only_newer_transactions() -> Result<()> {
    let root = unique_root("rec-partial");
    {
        let db = Db::open_with_options(&root, opts())?;
        put_each(&db, &["k1", "k2"])?;
        db.flush_log_to_data_file()?;
        put_each(&db, &["k3"])?;
        let tree = db.root();
        let mut tx = db.new_transaction(TxKind::ReadWrite)?;
        tree.put(&mut tx, b"k1", b"rewritten")?;
        tx.commit()?;
    }

    let db = Db::open_with_options(&root, opts())?;
    assert_eq!(db.recovery_report().transactions_recovered, 2);
    let tree = db.root();
    let tx = db.new_transaction(TxKind::Read)?;
    assert_eq!(tree.get(&tx, b"k1")?, Some(b"rewritten".to_vec()));
    assert_eq!(tree.get(&tx, b"k2")?, Some(b"v:k2".to_vec()));
    assert_eq!(tree.get(&tx, b"k3")?, Some(b"v:k3".to_vec()));
    Ok(())
}

#[test]
fn data_file_from_other_page_size_is_rejected() -> Result<()> {
    let root = unique_root("rec-ps");
    drop(Db::open_with_options(&root, opts())?);
    let err = Db::open_with_options(&root, opts().with_page_size(1024))
        .err()
        .expect("page size mismatch must fail");
    assert!(format!("{:#}", err).contains("page_size mismatch"));
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("tsr-{}-{}-{}", prefix, pid, t))
}
