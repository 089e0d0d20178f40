//! tree/modify — вставка и удаление.
//!
//! Вставка:
//! - значение inline, если запись листа <= (page_size - 16) / 4, иначе цепочка
//!   overflow-страниц, в листе остаётся ссылка [len][head];
//! - переполненная страница делится по половине закодированных байт;
//!   разделитель = первый ключ правой половины (у branch он переезжает в
//!   родителя, а запись 0 правой половины получает пустой ключ);
//! - деление корня добавляет уровень.
//!
//! Удаление:
//! - опустевшая некорневая страница убирается из родителя (рекурсивно вверх);
//! - корневой branch с единственным потомком схлопывается.
//!
//! Счётчики TreeRootHeader правятся на каждой выданной/освобождённой странице.

use anyhow::{bail, Context, Result};
use std::io::Read;

use crate::consts::NO_PAGE;
use crate::error::StorageError;
use crate::journal::TreeRootHeader;
use crate::page::node::{split_index, LEAF_ENTRY_OVERHEAD};
use crate::page::{
    max_inline_entry, ovf_capacity, ovf_page_build, ovf_page_read, ovf_pages_needed, BranchEntry,
    LeafEntry, LeafValue, Node, PageKind,
};
use crate::transaction::{Transaction, TxKind};

use super::{descend, Frame, Tree};

pub(crate) fn add<R: Read>(ps: usize, tx: &mut Transaction<'_>, key: &[u8], mut value: R) -> Result<()> {
    if tx.kind() == TxKind::Read {
        return Err(StorageError::ReadOnly.into());
    }
    Tree::new(ps).check_key(key)?;

    let mut data = Vec::new();
    value
        .read_to_end(&mut data)
        .context("read value stream")?;

    let mut root = tx.root_header();
    let stored = if LEAF_ENTRY_OVERHEAD + key.len() + data.len() <= max_inline_entry(ps) {
        LeafValue::Inline(data)
    } else {
        let len = data.len() as u64;
        let head = write_overflow(ps, tx, &mut root, &data)?;
        LeafValue::Overflow { len, head }
    };
    let entry = LeafEntry {
        key: key.to_vec(),
        value: stored,
    };

    let Some(root_pgno) = root.root_page() else {
        let pgno = tx.allocate_page()?;
        tx.put_page(pgno, Node::Leaf(vec![entry]).encode(pgno, ps)?)?;
        count_page(&mut root, PageKind::Leaf, 1);
        root.root_page_number = pgno as i64;
        root.depth = 1;
        root.entries_count += 1;
        return tx.set_root_header(root);
    };

    let (mut path, leaf_pgno, mut leaf) = descend(tx, root_pgno, key)?;
    match leaf.binary_search_by(|e| e.key.as_slice().cmp(key)) {
        Ok(i) => {
            let old = std::mem::replace(&mut leaf[i], entry);
            if let LeafValue::Overflow { head, .. } = old.value {
                free_overflow(tx, &mut root, head)?;
            }
        }
        Err(i) => {
            leaf.insert(i, entry);
            root.entries_count += 1;
        }
    }
    store(ps, tx, &mut root, &mut path, leaf_pgno, Node::Leaf(leaf))?;
    tx.set_root_header(root)
}

pub(crate) fn delete(ps: usize, tx: &mut Transaction<'_>, key: &[u8]) -> Result<bool> {
    if tx.kind() == TxKind::Read {
        return Err(StorageError::ReadOnly.into());
    }
    let mut root = tx.root_header();
    let Some(root_pgno) = root.root_page() else {
        return Ok(false);
    };
    let (mut path, leaf_pgno, mut leaf) = descend(tx, root_pgno, key)?;
    let Ok(i) = leaf.binary_search_by(|e| e.key.as_slice().cmp(key)) else {
        return Ok(false);
    };
    let old = leaf.remove(i);
    if let LeafValue::Overflow { head, .. } = old.value {
        free_overflow(tx, &mut root, head)?;
    }
    root.entries_count -= 1;

    if leaf.is_empty() {
        remove_page(ps, tx, &mut root, &mut path, leaf_pgno, PageKind::Leaf)?;
    } else {
        tx.put_page(leaf_pgno, Node::Leaf(leaf).encode(leaf_pgno, ps)?)?;
    }
    collapse_root(tx, &mut root)?;
    tx.set_root_header(root)?;
    Ok(true)
}

/// Записать страницу, деля её (и родителей) при переполнении.
fn store(
    ps: usize,
    tx: &mut Transaction<'_>,
    root: &mut TreeRootHeader,
    path: &mut Vec<Frame>,
    mut pgno: u64,
    mut node: Node,
) -> Result<()> {
    loop {
        if node.fits(ps) {
            tx.put_page(pgno, node.encode(pgno, ps)?)?;
            return Ok(());
        }
        let (left, right, sep) = split(node)?;
        let kind = if right.is_leaf() { PageKind::Leaf } else { PageKind::Branch };
        let right_pgno = tx.allocate_page()?;
        count_page(root, kind, 1);
        tx.put_page(pgno, left.encode(pgno, ps)?)?;
        tx.put_page(right_pgno, right.encode(right_pgno, ps)?)?;

        match path.pop() {
            Some(mut f) => {
                f.entries.insert(
                    f.idx + 1,
                    BranchEntry {
                        key: sep,
                        child: right_pgno,
                    },
                );
                pgno = f.pgno;
                node = Node::Branch(f.entries);
            }
            None => {
                let new_root = tx.allocate_page()?;
                let top = Node::Branch(vec![
                    BranchEntry {
                        key: Vec::new(),
                        child: pgno,
                    },
                    BranchEntry {
                        key: sep,
                        child: right_pgno,
                    },
                ]);
                tx.put_page(new_root, top.encode(new_root, ps)?)?;
                count_page(root, PageKind::Branch, 1);
                root.root_page_number = new_root as i64;
                root.depth += 1;
                return Ok(());
            }
        }
    }
}

/// (левая, правая, разделитель).
fn split(node: Node) -> Result<(Node, Node, Vec<u8>)> {
    if node.len() < 2 {
        bail!("cannot split a page with {} entr(ies)", node.len());
    }
    Ok(match node {
        Node::Leaf(mut v) => {
            let sizes: Vec<usize> = v.iter().map(LeafEntry::encoded_len).collect();
            let right = v.split_off(split_index(&sizes));
            let sep = right[0].key.clone();
            (Node::Leaf(v), Node::Leaf(right), sep)
        }
        Node::Branch(mut v) => {
            let sizes: Vec<usize> = v.iter().map(BranchEntry::encoded_len).collect();
            let mut right = v.split_off(split_index(&sizes));
            let sep = std::mem::take(&mut right[0].key);
            (Node::Branch(v), Node::Branch(right), sep)
        }
    })
}

/// Освободить опустевшую страницу и убрать её из родителя (рекурсивно).
fn remove_page(
    ps: usize,
    tx: &mut Transaction<'_>,
    root: &mut TreeRootHeader,
    path: &mut Vec<Frame>,
    mut pgno: u64,
    mut kind: PageKind,
) -> Result<()> {
    loop {
        tx.free_page(pgno)?;
        count_page(root, kind, -1);
        let Some(mut f) = path.pop() else {
            // это был корень
            root.root_page_number = -1;
            root.depth = 0;
            return Ok(());
        };
        f.entries.remove(f.idx);
        if f.idx == 0 {
            if let Some(first) = f.entries.first_mut() {
                first.key.clear();
            }
        }
        if f.entries.is_empty() {
            pgno = f.pgno;
            kind = PageKind::Branch;
            continue;
        }
        tx.put_page(f.pgno, Node::Branch(f.entries).encode(f.pgno, ps)?)?;
        return Ok(());
    }
}

fn collapse_root(tx: &mut Transaction<'_>, root: &mut TreeRootHeader) -> Result<()> {
    while let Some(r) = root.root_page() {
        let child = match Node::decode(&tx.get_page(r)?)? {
            Node::Branch(e) if e.len() == 1 => e[0].child,
            _ => break,
        };
        tx.free_page(r)?;
        count_page(root, PageKind::Branch, -1);
        root.root_page_number = child as i64;
        root.depth -= 1;
    }
    Ok(())
}

/// Записать значение цепочкой overflow-страниц; вернуть номер первой.
fn write_overflow(
    ps: usize,
    tx: &mut Transaction<'_>,
    root: &mut TreeRootHeader,
    data: &[u8],
) -> Result<u64> {
    let n = ovf_pages_needed(data.len() as u64, ps);
    let mut pages = Vec::with_capacity(n as usize);
    for _ in 0..n {
        pages.push(tx.allocate_page()?);
    }
    let cap = ovf_capacity(ps);
    for (i, &pgno) in pages.iter().enumerate() {
        let from = (i * cap).min(data.len());
        let to = (from + cap).min(data.len());
        let next = pages.get(i + 1).copied().unwrap_or(NO_PAGE);
        tx.put_page(pgno, ovf_page_build(ps, pgno, next, &data[from..to])?)?;
    }
    count_page(root, PageKind::Overflow, n as i64);
    Ok(pages[0])
}

fn free_overflow(tx: &mut Transaction<'_>, root: &mut TreeRootHeader, head: u64) -> Result<()> {
    let mut p = head;
    let mut freed = 0i64;
    while p != NO_PAGE {
        let page = tx.get_page(p)?;
        let next = ovf_page_read(&page)?.0;
        tx.free_page(p)?;
        freed += 1;
        p = next;
    }
    count_page(root, PageKind::Overflow, -freed);
    Ok(())
}

fn count_page(root: &mut TreeRootHeader, kind: PageKind, delta: i64) {
    match kind {
        PageKind::Branch => root.branch_pages += delta,
        PageKind::Leaf => root.leaf_pages += delta,
        PageKind::Overflow => root.overflow_pages += delta,
    }
    root.page_count += delta;
}
