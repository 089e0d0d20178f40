use anyhow::Result;
use std::path::PathBuf;

use tessera::{Db, StorageOptions, TxKind};

fn opts(page_size: u32, log_file_pages: u64) -> StorageOptions {
    StorageOptions::default()
        .with_page_size(page_size)
        .with_log_file_pages(log_file_pages)
        .with_journal_fsync(false)
        .with_data_fsync(false)
}

#[test]
fn many_small_transactions_spill_into_several_log_files() -> Result<()> {
    let root = unique_root("spill");
    let db = Db::open_with_options(&root, opts(4096, 10))?;
    let tree = db.root();
    let value = build_pattern(1024, 0x5A);

    // каждая транзакция: заголовок + лист + overflow-страница = 3 слота
    for i in 0..15 {
        let mut tx = db.new_transaction(TxKind::ReadWrite)?;
        tree.put(&mut tx, format!("key/{:02}", i).as_bytes(), &value)?;
        tx.commit()?;
    }
    assert!(db.files_in_use()? > 1, "15 txs x 3 slots must not fit one 10-slot file");

    let tx = db.new_transaction(TxKind::Read)?;
    for i in 0..15 {
        let got = tree.get(&tx, format!("key/{:02}", i).as_bytes())?;
        assert_eq!(got.as_deref(), Some(value.as_slice()), "key/{:02}", i);
    }
    Ok(())
}

#[test]
fn one_large_transaction_splits_across_exactly_two_files() -> Result<()> {
    let root = unique_root("split");
    let db = Db::open_with_options(&root, opts(4096, 10))?;
    let tree = db.root();

    // 15 overflow-страниц + 1 лист = 16 страниц: 1+9 слотов в файле 0, 1+7 в файле 1
    let mut tx = db.new_transaction(TxKind::ReadWrite)?;
    for i in 0..15u8 {
        tree.put(&mut tx, format!("k{:02}", i).as_bytes(), &build_pattern(1024, i))?;
    }
    assert_eq!(tx.dirty_pages(), 16);
    tx.commit()?;

    assert_eq!(db.files_in_use()?, 2);
    assert_eq!(db.current_log_file()?, 1);
    assert_eq!(db.write_page_position()?, 8);

    let tx = db.new_transaction(TxKind::Read)?;
    for i in 0..15u8 {
        let got = tree.get(&tx, format!("k{:02}", i).as_bytes())?.expect("key must exist");
        assert_eq!(got, build_pattern(1024, i));
    }
    Ok(())
}

#[test]
fn uncommitted_writes_are_invisible_and_their_slots_are_reused() -> Result<()> {
    let root = unique_root("abort");
    let db = Db::open_with_options(&root, opts(512, 64))?;
    let tree = db.root();

    let mut tx = db.new_transaction(TxKind::ReadWrite)?;
    tree.put(&mut tx, b"base", b"1")?;
    tx.commit()?;
    let file = db.current_log_file()?;
    let pos = db.write_page_position()?;

    {
        let mut tx = db.new_transaction(TxKind::ReadWrite)?;
        tree.put(&mut tx, b"ghost", &build_pattern(2000, 0xEE))?;
        // dropped without commit
    }
    assert_eq!(db.current_log_file()?, file);
    assert_eq!(db.write_page_position()?, pos);

    let tx = db.new_transaction(TxKind::Read)?;
    assert!(tree.get(&tx, b"ghost")?.is_none());
    assert_eq!(tree.get(&tx, b"base")?.as_deref(), Some(&b"1"[..]));
    drop(tx);

    // следующий писатель начинает с той же позиции
    let mut tx = db.new_transaction(TxKind::ReadWrite)?;
    tree.put(&mut tx, b"next", b"2")?;
    tx.commit()?;
    assert_eq!(db.journal_stats()?.last_append, Some((file, pos)));
    Ok(())
}

#[test]
fn flush_retires_log_files_and_survives_reopen() -> Result<()> {
    let root = unique_root("flush");
    {
        let db = Db::open_with_options(&root, opts(512, 10))?;
        let tree = db.root();
        for i in 0..100 {
            let mut tx = db.new_transaction(TxKind::ReadWrite)?;
            tree.put(&mut tx, format!("item:{:03}", i).as_bytes(), format!("value-{}", i).as_bytes())?;
            tx.commit()?;
        }
        let before = db.files_in_use()?;
        assert!(before > 1);

        let rep = db.flush_log_to_data_file()?;
        assert_eq!(rep.flushed_to_tx_id, 100);
        let after = db.files_in_use()?;
        assert!(after < before);
        assert!(after <= 1);
        assert!(db.snapshot()?.pages.is_empty());

        // повторный flush ничего не делает
        let again = db.flush_log_to_data_file()?;
        assert_eq!(again.pages_written, 0);

        let tx = db.new_transaction(TxKind::Read)?;
        for i in 0..100 {
            let got = tree.get(&tx, format!("item:{:03}", i).as_bytes())?;
            assert_eq!(got, Some(format!("value-{}", i).into_bytes()));
        }
    }

    let db = Db::open_with_options(&root, opts(512, 10))?;
    assert!(db.recovery_report().is_clean());
    let tree = db.root();
    let tx = db.new_transaction(TxKind::Read)?;
    assert_eq!(tx.root_header().entries_count, 100);
    for i in 0..100 {
        let got = tree.get(&tx, format!("item:{:03}", i).as_bytes())?;
        assert_eq!(got, Some(format!("value-{}", i).into_bytes()));
    }
    drop(tx);

    // запись после reopen продолжает нумерацию транзакций
    let mut tx = db.new_transaction(TxKind::ReadWrite)?;
    tree.put(&mut tx, b"item:100", b"value-100")?;
    tx.commit()?;
    assert_eq!(db.journal_stats()?.last_tx_id, 101);
    Ok(())
}

#[test]
fn second_process_handle_is_locked_out() -> Result<()> {
    let root = unique_root("lock");
    let _db = Db::open_with_options(&root, opts(512, 16))?;
    assert!(tessera::lock::try_acquire_exclusive_lock(&root).is_err());
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

fn build_pattern(len: usize, byte: u8) -> Vec<u8> {
    let mut v = vec![byte; len];
    if len >= 8 {
        v[len / 2] = byte ^ 0x11;
        v[len - 1] = byte ^ 0x22;
    }
    v
}
