use anyhow::Result;
use oorandom::Rand64;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tessera::{Db, StorageOptions, Transaction, TxKind};

fn opts() -> StorageOptions {
    StorageOptions::default()
        .with_page_size(1024)
        .with_log_file_pages(48)
        .with_data_growth_pages(16)
        .with_journal_fsync(false)
        .with_data_fsync(false)
}

fn random_value(rng: &mut Rand64) -> Vec<u8> {
    // в основном короткие, иногда overflow на несколько страниц
    let len = if rng.rand_range(0..10) == 0 {
        rng.rand_range(300..5000)
    } else {
        rng.rand_range(0..120)
    } as usize;
    (0..len).map(|_| rng.rand_u64() as u8).collect()
}

fn check(db: &Db, tx: &Transaction<'_>, model: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<()> {
    let tree = db.root();
    let mut cur = tree.iterate(tx)?;
    let mut got = BTreeMap::new();
    let mut ok = cur.seek_first()?;
    while ok {
        let k = cur.current_key()?.into_vec();
        let v = cur.create_reader_for_current()?.read_to_vec()?;
        assert_eq!(cur.current_data_size()?, v.len() as u64);
        got.insert(k, v);
        ok = cur.move_next()?;
    }
    assert_eq!(got.len(), model.len());
    assert!(got == *model, "tree content diverged from model");
    assert_eq!(tx.root_header().entries_count as usize, model.len());
    Ok(())
}

fn reopen(root: &Path) -> Result<Db> {
    Db::open_with_options(root, opts())
}

#[test]
fn random_operations_match_btreemap_model() -> Result<()> {
    let root = unique_root("model");
    let mut rng = Rand64::new(0x7E55_E4A0_u128);
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut db = reopen(&root)?;

    for round in 0..30 {
        let tree = db.root();
        let mut tx = db.new_transaction(TxKind::ReadWrite)?;
        let mut staged = model.clone();
        for _ in 0..40 {
            let k = format!("k{:04}", rng.rand_range(0..600)).into_bytes();
            if rng.rand_range(0..4) == 0 {
                let existed = tree.delete(&mut tx, &k)?;
                assert_eq!(existed, staged.remove(&k).is_some());
            } else {
                let v = random_value(&mut rng);
                tree.put(&mut tx, &k, &v)?;
                staged.insert(k, v);
            }
        }

        // каждая пятая транзакция откатывается
        if round % 5 == 4 {
            drop(tx);
        } else {
            tx.commit()?;
            model = staged;
        }

        if round % 7 == 6 {
            db.flush_log_to_data_file()?;
        }
        if round % 10 == 9 {
            drop(db);
            db = reopen(&root)?;
            assert!(db.recovery_report().is_clean());
        }

        let tx = db.new_transaction(TxKind::Read)?;
        check(&db, &tx, &model)?;
    }

    // на диске после полного flush и reopen то же самое
    db.flush_log_to_data_file()?;
    assert_eq!(db.files_in_use()?, 1);
    drop(db);
    let db = reopen(&root)?;
    let tx = db.new_transaction(TxKind::Read)?;
    check(&db, &tx, &model)?;
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
