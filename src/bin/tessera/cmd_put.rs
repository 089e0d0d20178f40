use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::PathBuf;

use tessera::{Db, TxKind};

use super::util::decode_value_arg;

pub fn exec(path: PathBuf, key: String, value: Option<String>, value_file: Option<PathBuf>) -> Result<()> {
    let db = Db::open(&path)?;
    let tree = db.root();
    let mut tx = db.new_transaction(TxKind::ReadWrite)?;

    let len = match (value, value_file) {
        (_, Some(p)) => {
            let f = File::open(&p).with_context(|| format!("open value file {}", p.display()))?;
            let len = f.metadata()?.len();
            tree.add(&mut tx, key.as_bytes(), f)?;
            len
        }
        (Some(s), None) => {
            let v = decode_value_arg(&s)?.0;
            tree.put(&mut tx, key.as_bytes(), &v)?;
            v.len() as u64
        }
        (None, None) => return Err(anyhow!("either --value or --value-file must be provided")),
    };
    tx.commit()?;

    println!(
        "OK put: key='{}' ({} B), value={} B",
        key,
        key.len(),
        len
    );
    Ok(())
}
