//! db — окружение хранилища поверх журнала, pager и битмапа.
//!
//! Разделение по подмодулям:
//! - core.rs  — Db/Shared, снапшоты, реестр закреплённых читателей, интроспекция
//! - open.rs  — открытие: LOCK, data-файл, recovery журнала, пересборка битмапа
//! - flush.rs — перенос журнала в data-файл, ретирование лог-файлов

pub mod core;
pub mod flush;
pub mod open;

pub use core::{Db, Snapshot};
pub use flush::FlushReport;
