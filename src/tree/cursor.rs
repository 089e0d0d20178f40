//! tree/cursor — обход дерева по порядку ключей.
//!
//! `Cursor::Empty` — дерево без страниц: перемещения возвращают false,
//! обращения к текущей записи — `StorageError::InvalidState`.
//! `Cursor::Positioned` — стек branch-страниц от корня до текущего листа.
//!
//! Границы: `max_key` (включительно) и `required_prefix`. Запись вне границ
//! считается концом обхода: курсор снимается с позиции, метод возвращает false.

use anyhow::{anyhow, Result};

use crate::error::StorageError;
use crate::page::{BranchEntry, LeafEntry, Node};
use crate::transaction::Transaction;
use crate::util::display_text;

use super::reader::ValueReader;
use super::slice::Slice;
use super::{child_index, MAX_TREE_DEPTH};

#[derive(Debug, Clone, Default)]
pub struct Bounds {
    pub max_key: Option<Slice>,
    pub required_prefix: Option<Slice>,
}

impl Bounds {
    fn admits(&self, key: &[u8]) -> bool {
        if let Some(p) = &self.required_prefix {
            if !key.starts_with(p) {
                return false;
            }
        }
        match &self.max_key {
            Some(m) => key <= m.as_bytes(),
            None => true,
        }
    }

    /// Ключ правее допустимого диапазона.
    fn above(&self, key: &[u8]) -> bool {
        if let Some(m) = &self.max_key {
            if key > m.as_bytes() {
                return true;
            }
        }
        match &self.required_prefix {
            Some(p) => key > p.as_bytes() && !key.starts_with(p),
            None => false,
        }
    }
}

pub struct TreeCursor<'t> {
    tx: &'t Transaction<'t>,
    root: u64,
    /// (записи branch, индекс выбранного потомка) от корня вниз.
    stack: Vec<(Vec<BranchEntry>, usize)>,
    leaf: Vec<LeafEntry>,
    idx: usize,
    positioned: bool,
    bounds: Bounds,
}

pub enum Cursor<'t> {
    Empty(Bounds),
    Positioned(TreeCursor<'t>),
}

const EMPTY: StorageError = StorageError::InvalidState("cursor over an empty tree");
const UNPOSITIONED: StorageError = StorageError::InvalidState("cursor is not positioned");

impl<'t> Cursor<'t> {
    pub(crate) fn new(tx: &'t Transaction<'t>, root: Option<u64>) -> Self {
        match root {
            None => Cursor::Empty(Bounds::default()),
            Some(root) => Cursor::Positioned(TreeCursor {
                tx,
                root,
                stack: Vec::new(),
                leaf: Vec::new(),
                idx: 0,
                positioned: false,
                bounds: Bounds::default(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cursor::Empty(_))
    }

    fn bounds_mut(&mut self) -> &mut Bounds {
        match self {
            Cursor::Empty(b) => b,
            Cursor::Positioned(c) => &mut c.bounds,
        }
    }

    pub fn bounds(&self) -> &Bounds {
        match self {
            Cursor::Empty(b) => b,
            Cursor::Positioned(c) => &c.bounds,
        }
    }

    /// Верхняя граница обхода (включительно). None: без границы.
    pub fn set_max_key(&mut self, key: Option<Slice>) {
        self.bounds_mut().max_key = key;
    }

    pub fn set_required_prefix(&mut self, prefix: Option<Slice>) {
        self.bounds_mut().required_prefix = prefix;
    }

    /// Встать на первую запись с ключом >= `key` в пределах границ.
    pub fn seek(&mut self, key: &[u8]) -> Result<bool> {
        match self {
            Cursor::Empty(_) => Ok(false),
            Cursor::Positioned(c) => c.seek(key),
        }
    }

    /// Встать на первую запись в пределах границ.
    pub fn seek_first(&mut self) -> Result<bool> {
        self.seek(&[])
    }

    /// Встать на последнюю запись в пределах границ.
    pub fn seek_last(&mut self) -> Result<bool> {
        match self {
            Cursor::Empty(_) => Ok(false),
            Cursor::Positioned(c) => c.seek_last(),
        }
    }

    pub fn move_next(&mut self) -> Result<bool> {
        match self {
            Cursor::Empty(_) => Ok(false),
            Cursor::Positioned(c) => c.step(true),
        }
    }

    pub fn move_prev(&mut self) -> Result<bool> {
        match self {
            Cursor::Empty(_) => Ok(false),
            Cursor::Positioned(c) => c.step(false),
        }
    }

    pub fn is_positioned(&self) -> bool {
        match self {
            Cursor::Empty(_) => false,
            Cursor::Positioned(c) => c.positioned,
        }
    }

    pub fn current_key(&self) -> Result<Slice> {
        Ok(Slice::from(self.current()?.key.as_slice()))
    }

    pub fn current_data_size(&self) -> Result<u64> {
        Ok(self.current()?.value.len())
    }

    pub fn create_reader_for_current(&self) -> Result<ValueReader<'t>> {
        let e = self.current()?;
        match self {
            Cursor::Positioned(c) => Ok(ValueReader::new(c.tx, e.value.clone())),
            Cursor::Empty(_) => Err(EMPTY.into()),
        }
    }

    /// Сдвинуться на `count` записей (отрицательное значение: назад).
    /// false: вышли за данные или границы; курсор тогда снят с позиции.
    pub fn skip(&mut self, count: i64) -> Result<bool> {
        let c = match self {
            Cursor::Empty(_) => return Err(EMPTY.into()),
            Cursor::Positioned(c) => c,
        };
        if !c.positioned {
            return Err(UNPOSITIONED.into());
        }
        let forward = count >= 0;
        for _ in 0..count.unsigned_abs() {
            if !c.step(forward)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Ленивый список ключей от текущей позиции вперёд (диагностика).
    pub fn dump_values(&mut self) -> DumpValues<'_, 't> {
        DumpValues {
            cursor: self,
            started: false,
        }
    }

    fn current(&self) -> Result<&LeafEntry> {
        match self {
            Cursor::Empty(_) => Err(EMPTY.into()),
            Cursor::Positioned(c) if c.positioned => Ok(&c.leaf[c.idx]),
            Cursor::Positioned(_) => Err(UNPOSITIONED.into()),
        }
    }
}

pub struct DumpValues<'c, 't> {
    cursor: &'c mut Cursor<'t>,
    started: bool,
}

impl Iterator for DumpValues<'_, '_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.started {
            match self.cursor.move_next() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
        self.started = true;
        if !self.cursor.is_positioned() {
            return None;
        }
        Some(self.cursor.current_key().map(|k| display_text(&k)))
    }
}

impl<'t> TreeCursor<'t> {
    fn seek(&mut self, key: &[u8]) -> Result<bool> {
        // ключи с префиксом не меньше самого префикса
        let start = match &self.bounds.required_prefix {
            Some(p) if key < p.as_bytes() => p.clone(),
            _ => Slice::from(key),
        };
        self.descend(&start)?;
        if self.idx >= self.leaf.len() && !self.next_leaf()? {
            self.positioned = false;
            return Ok(false);
        }
        self.settle()
    }

    fn seek_last(&mut self) -> Result<bool> {
        self.stack.clear();
        let mut pgno = self.root;
        loop {
            match self.load(pgno)? {
                Node::Branch(entries) => {
                    let i = entries.len() - 1;
                    pgno = entries[i].child;
                    self.stack.push((entries, i));
                }
                Node::Leaf(entries) => {
                    self.idx = entries.len().saturating_sub(1);
                    self.leaf = entries;
                    break;
                }
            }
        }
        if self.leaf.is_empty() {
            self.positioned = false;
            return Ok(false);
        }
        // назад до последнего ключа в границах
        loop {
            let key = &self.leaf[self.idx].key;
            if self.bounds.admits(key) {
                self.positioned = true;
                return Ok(true);
            }
            if !self.bounds.above(key) || !self.retreat()? {
                break;
            }
        }
        self.positioned = false;
        Ok(false)
    }

    fn step(&mut self, forward: bool) -> Result<bool> {
        if !self.positioned {
            return Ok(false);
        }
        let moved = if forward { self.advance()? } else { self.retreat()? };
        if !moved {
            self.positioned = false;
            return Ok(false);
        }
        self.settle()
    }

    /// Проверить границы в текущей точке.
    fn settle(&mut self) -> Result<bool> {
        self.positioned = self.bounds.admits(&self.leaf[self.idx].key);
        Ok(self.positioned)
    }

    fn advance(&mut self) -> Result<bool> {
        if self.idx + 1 < self.leaf.len() {
            self.idx += 1;
            return Ok(true);
        }
        self.next_leaf()
    }

    fn retreat(&mut self) -> Result<bool> {
        if self.idx > 0 {
            self.idx -= 1;
            return Ok(true);
        }
        self.prev_leaf()
    }

    fn load(&self, pgno: u64) -> Result<Node> {
        if self.stack.len() > MAX_TREE_DEPTH {
            return Err(anyhow!("tree deeper than {} levels at page {}", MAX_TREE_DEPTH, pgno));
        }
        let node = Node::decode(&self.tx.get_page(pgno)?)?;
        if let Node::Branch(e) = &node {
            if e.is_empty() {
                return Err(anyhow!("empty branch page {}", pgno));
            }
        }
        Ok(node)
    }

    fn descend(&mut self, key: &[u8]) -> Result<()> {
        self.stack.clear();
        let mut pgno = self.root;
        loop {
            match self.load(pgno)? {
                Node::Branch(entries) => {
                    let i = child_index(&entries, key);
                    pgno = entries[i].child;
                    self.stack.push((entries, i));
                }
                Node::Leaf(entries) => {
                    self.idx = entries.partition_point(|e| e.key.as_slice() < key);
                    self.leaf = entries;
                    return Ok(());
                }
            }
        }
    }

    /// Перейти к началу следующего листа.
    fn next_leaf(&mut self) -> Result<bool> {
        while let Some((entries, i)) = self.stack.pop() {
            if i + 1 < entries.len() {
                let child = entries[i + 1].child;
                self.stack.push((entries, i + 1));
                self.descend_edge(child, true)?;
                if !self.leaf.is_empty() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn prev_leaf(&mut self) -> Result<bool> {
        while let Some((entries, i)) = self.stack.pop() {
            if i > 0 {
                let child = entries[i - 1].child;
                self.stack.push((entries, i - 1));
                self.descend_edge(child, false)?;
                if !self.leaf.is_empty() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Спуск по крайнему левому (first) или правому пути.
    fn descend_edge(&mut self, mut pgno: u64, first: bool) -> Result<()> {
        loop {
            match self.load(pgno)? {
                Node::Branch(entries) => {
                    let i = if first { 0 } else { entries.len() - 1 };
                    pgno = entries[i].child;
                    self.stack.push((entries, i));
                }
                Node::Leaf(entries) => {
                    self.idx = if first { 0 } else { entries.len().saturating_sub(1) };
                    self.leaf = entries;
                    return Ok(());
                }
            }
        }
    }
}
