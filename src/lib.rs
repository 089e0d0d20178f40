// Базовые модули
pub mod config;
pub mod consts;
pub mod error;
pub mod lock;
pub mod metrics;

// Хранилище (папки с mod.rs)
pub mod free;    // src/free/{mod,bitmap}.rs
pub mod page;    // src/page/{mod,header,node,overflow}.rs
pub mod pager;   // src/pager/{mod,core,header,io}.rs
pub mod journal; // src/journal/{mod,header,log_file,writer,recovery}.rs
pub mod db;      // src/db/{mod,core,open,flush}.rs
pub mod tree;    // src/tree/{mod,modify,cursor,reader,slice}.rs

pub mod transaction;

// Утилиты (позиционное I/O, отображение ключей)
pub mod util;

// Удобные реэкспорты
pub use config::{OptionsBuilder, StorageOptions};
pub use db::{Db, FlushReport, Snapshot};
pub use error::{is_storage_error, StorageError};
pub use free::{Bitmap, PageAllocator};
pub use journal::{JournalStats, RecoveryReport, TreeRootHeader, TxMarker};
pub use transaction::{Transaction, TxKind};
pub use tree::{Cursor, Slice, Tree, ValueReader};
