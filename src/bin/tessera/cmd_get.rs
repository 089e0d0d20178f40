use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tessera::util::{display_text, hex_dump};
use tessera::{Db, TxKind};

pub fn exec(path: PathBuf, key: String, out: Option<PathBuf>) -> Result<()> {
    let db = Db::open(&path)?;
    let tx = db.new_transaction(TxKind::Read)?;
    match db.root().read(&tx, key.as_bytes())? {
        Some(mut r) => {
            let len = r.len();
            if let Some(out_path) = out {
                if let Some(parent) = out_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let mut f = OpenOptions::new()
                    .create(true)
                    .truncate(true)
                    .write(true)
                    .open(&out_path)?;
                std::io::copy(&mut r, &mut f)?;
                f.flush()?;
                f.sync_all()?;
                println!(
                    "FOUND '{}': {} B -> wrote to {}",
                    key,
                    len,
                    out_path.display()
                );
            } else {
                let v = r.read_to_vec()?;
                println!("FOUND '{}': {} B", key, v.len());
                println!("text: {}", display_text(&v));
                println!("hex:  {}", hex_dump(&v[..v.len().min(64)]));
            }
        }
        None => println!("NOT FOUND '{}'", key),
    }
    Ok(())
}
