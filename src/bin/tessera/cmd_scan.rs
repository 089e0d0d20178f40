use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use tessera::util::display_text;
use tessera::{Db, Slice, TxKind};

use super::util::to_hex;

#[derive(Serialize)]
struct Row {
    key: String,
    size: u64,
    value_hex: String,
}

pub fn exec(
    path: PathBuf,
    prefix: Option<String>,
    max_key: Option<String>,
    from: Option<String>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let db = Db::open(&path)?;
    let tx = db.new_transaction(TxKind::Read)?;
    let mut cur = db.root().iterate(&tx)?;
    cur.set_required_prefix(prefix.as_deref().map(Slice::from));
    cur.set_max_key(max_key.as_deref().map(Slice::from));

    let start = from.unwrap_or_default();
    let mut ok = cur.seek(start.as_bytes())?;
    let limit = limit.unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    while ok && rows.len() < limit {
        let key = cur.current_key()?;
        let v = cur.create_reader_for_current()?.read_to_vec()?;
        rows.push(Row {
            key: display_text(&key),
            size: v.len() as u64,
            value_hex: to_hex(&v[..v.len().min(32)]),
        });
        ok = cur.move_next()?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for r in &rows {
            println!("{}\t{} B\t{}", r.key, r.size, r.value_hex);
        }
        println!("({} key(s))", rows.len());
    }
    Ok(())
}
