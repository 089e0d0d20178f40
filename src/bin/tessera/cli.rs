use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI для tessera: журнал, data-файл и B+Tree одного каталога.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about = "tessera storage core CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Put key/value in its own transaction
    Put {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        key: String,
        /// Literal (UTF‑8), "hex:..", "@file" or "-" for stdin. Ignored if --value-file is set.
        #[arg(long)]
        value: Option<String>,
        /// Read value bytes from a file (streamed into the tree)
        #[arg(long)]
        value_file: Option<PathBuf>,
    },
    /// Get key
    Get {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        key: String,
        /// Optional file to write raw value into
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete key
    Del {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        key: String,
    },
    /// Ordered scan. --prefix and --max-key bound the walk.
    Scan {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        prefix: Option<String>,
        /// Inclusive upper bound
        #[arg(long)]
        max_key: Option<String>,
        /// Start key (first key >= from)
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Flush journal into the data file and retire flushed log files
    Flush {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Journal/tree/metrics summary
    Status {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
