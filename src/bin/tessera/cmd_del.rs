use anyhow::Result;
use std::path::PathBuf;

use tessera::{Db, TxKind};

pub fn exec(path: PathBuf, key: String) -> Result<()> {
    let db = Db::open(&path)?;
    let mut tx = db.new_transaction(TxKind::ReadWrite)?;
    let existed = db.root().delete(&mut tx, key.as_bytes())?;
    tx.commit()?;
    if existed {
        println!("OK del: key='{}'", key);
    } else {
        println!("NOT FOUND '{}'", key);
    }
    Ok(())
}
