//! tree — B+Tree по байтовым ключам поверх страниц транзакции.
//!
//! Разделение по подмодулям:
//! - modify.rs — add/delete: split по половине байт, удаление пустых страниц,
//!               схлопывание корня, overflow-цепочки
//! - cursor.rs — Cursor {Empty, Positioned}: seek/move/skip/границы/dump
//! - reader.rs — ValueReader (io::Read) для inline и overflow значений
//! - slice.rs  — Slice (ключ)
//!
//! Состояние дерева — `TreeRootHeader` транзакции; сам `Tree` только хэндл.

pub mod cursor;
pub mod modify;
pub mod reader;
pub mod slice;

use anyhow::{anyhow, Result};
use std::io::Read;

use crate::consts::NO_PAGE;
use crate::error::StorageError;
use crate::page::{max_key_len, ovf_page_read, BranchEntry, LeafEntry, LeafValue, Node};
use crate::transaction::Transaction;

pub use cursor::{Bounds, Cursor, DumpValues};
pub use reader::ValueReader;
pub use slice::Slice;

/// Защита от циклов на повреждённых страницах.
pub(crate) const MAX_TREE_DEPTH: usize = 64;

/// Хэндл корневого дерева (`Db::root()`).
#[derive(Debug, Clone, Copy)]
pub struct Tree {
    page_size: usize,
}

impl Tree {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    #[inline]
    pub fn max_key_len(&self) -> usize {
        max_key_len(self.page_size)
    }

    /// Вставить или перезаписать значение.
    pub fn add<R: Read>(&self, tx: &mut Transaction<'_>, key: &[u8], value: R) -> Result<()> {
        modify::add(self.page_size, tx, key, value)
    }

    /// Удобная обёртка над `add` для значения в памяти.
    pub fn put(&self, tx: &mut Transaction<'_>, key: &[u8], value: &[u8]) -> Result<()> {
        self.add(tx, key, value)
    }

    pub fn delete(&self, tx: &mut Transaction<'_>, key: &[u8]) -> Result<bool> {
        modify::delete(self.page_size, tx, key)
    }

    /// Поток значения по ключу.
    pub fn read<'t>(&self, tx: &'t Transaction<'t>, key: &[u8]) -> Result<Option<ValueReader<'t>>> {
        let Some(root) = tx.root_header().root_page() else {
            return Ok(None);
        };
        let (_, _, mut leaf) = descend(tx, root, key)?;
        match leaf.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(i) => Ok(Some(ValueReader::new(tx, leaf.swap_remove(i).value))),
            Err(_) => Ok(None),
        }
    }

    pub fn get(&self, tx: &Transaction<'_>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.read(tx, key)? {
            Some(r) => Ok(Some(r.read_to_vec()?)),
            None => Ok(None),
        }
    }

    /// Курсор по дереву; для пустого дерева `Cursor::Empty`.
    pub fn iterate<'t>(&self, tx: &'t Transaction<'t>) -> Result<Cursor<'t>> {
        Ok(Cursor::new(tx, tx.root_header().root_page()))
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> Result<()> {
        let max = self.max_key_len();
        if key.len() > max {
            return Err(StorageError::KeyTooLarge { len: key.len(), max }.into());
        }
        Ok(())
    }
}

/// Индекс потомка branch-страницы для ключа: последняя запись с key <= `key`.
/// Запись 0 (пустой ключ) указывает на левый потомок.
pub(crate) fn child_index(entries: &[BranchEntry], key: &[u8]) -> usize {
    if entries.len() <= 1 {
        return 0;
    }
    match entries[1..].binary_search_by(|e| e.key.as_slice().cmp(key)) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

/// Кадр пути спуска: branch-страница и выбранный потомок.
pub(crate) struct Frame {
    pub(crate) pgno: u64,
    pub(crate) entries: Vec<BranchEntry>,
    pub(crate) idx: usize,
}

/// Спуск к листу, который должен содержать `key`.
pub(crate) fn descend(
    tx: &Transaction<'_>,
    root: u64,
    key: &[u8],
) -> Result<(Vec<Frame>, u64, Vec<LeafEntry>)> {
    let mut path = Vec::new();
    let mut pgno = root;
    loop {
        if path.len() > MAX_TREE_DEPTH {
            return Err(anyhow!("tree deeper than {} levels at page {}", MAX_TREE_DEPTH, pgno));
        }
        match Node::decode(&tx.get_page(pgno)?)? {
            Node::Branch(entries) => {
                if entries.is_empty() {
                    return Err(anyhow!("empty branch page {}", pgno));
                }
                let idx = child_index(&entries, key);
                let child = entries[idx].child;
                path.push(Frame { pgno, entries, idx });
                pgno = child;
            }
            Node::Leaf(entries) => return Ok((path, pgno, entries)),
        }
    }
}

/// Обойти все страницы дерева (branch, leaf, overflow) от корня.
pub(crate) fn for_each_tree_page<R, V>(root: u64, read: R, mut visit: V) -> Result<()>
where
    R: Fn(u64) -> Result<Vec<u8>>,
    V: FnMut(u64) -> Result<()>,
{
    let mut stack = vec![(root, 0usize)];
    while let Some((pgno, depth)) = stack.pop() {
        if depth > MAX_TREE_DEPTH {
            return Err(anyhow!("tree deeper than {} levels at page {}", MAX_TREE_DEPTH, pgno));
        }
        visit(pgno)?;
        match Node::decode(&read(pgno)?)? {
            Node::Branch(entries) => {
                stack.extend(entries.iter().map(|e| (e.child, depth + 1)));
            }
            Node::Leaf(entries) => {
                for e in entries {
                    if let LeafValue::Overflow { head, .. } = e.value {
                        let mut p = head;
                        while p != NO_PAGE {
                            visit(p)?;
                            let page = read(p)?;
                            p = ovf_page_read(&page)?.0;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
