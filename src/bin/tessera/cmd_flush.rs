use anyhow::Result;
use std::path::PathBuf;

use tessera::Db;

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let db = Db::open(&path)?;
    let rep = db.flush_log_to_data_file()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rep)?);
    } else {
        println!(
            "OK flush: tx {} applied, {} page(s) written, {} log file(s) retired, {} in use",
            rep.flushed_to_tx_id, rep.pages_written, rep.log_files_retired, rep.files_in_use
        );
    }
    Ok(())
}
