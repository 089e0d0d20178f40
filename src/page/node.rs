//! page/node — Leaf/Branch страницы B+Tree.
//!
//! Записи лежат подряд сразу за заголовком, отсортированы по ключу:
//! - Leaf:   [key_len u16][flags u8][value_len u32][key][value]
//!           flags & ENTRY_FLAG_OVERFLOW => value = [total_len u64][head_page u64]
//! - Branch: [key_len u16][child u64][key]; у записи 0 ключ пустой (левый потомок).
//!
//! Страница целиком декодируется в `Node`, меняется как вектор и упаковывается обратно.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::PAGE_HEADER_SIZE;

use super::header::{page_header_read, page_header_write, PageHeader, PageKind};

pub const LEAF_ENTRY_OVERHEAD: usize = 7;
pub const BRANCH_ENTRY_OVERHEAD: usize = 10;
pub const ENTRY_FLAG_OVERFLOW: u8 = 1;
const OVERFLOW_REF_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafValue {
    Inline(Vec<u8>),
    Overflow { len: u64, head: u64 },
}

impl LeafValue {
    /// Длина значения (для overflow: полная длина цепочки).
    pub fn len(&self) -> u64 {
        match self {
            LeafValue::Inline(v) => v.len() as u64,
            LeafValue::Overflow { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stored_len(&self) -> usize {
        match self {
            LeafValue::Inline(v) => v.len(),
            LeafValue::Overflow { .. } => OVERFLOW_REF_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub value: LeafValue,
}

impl LeafEntry {
    pub fn encoded_len(&self) -> usize {
        LEAF_ENTRY_OVERHEAD + self.key.len() + self.value.stored_len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEntry {
    pub key: Vec<u8>,
    pub child: u64,
}

impl BranchEntry {
    pub fn encoded_len(&self) -> usize {
        BRANCH_ENTRY_OVERHEAD + self.key.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(Vec<LeafEntry>),
    Branch(Vec<BranchEntry>),
}

impl Node {
    pub fn decode(page: &[u8]) -> Result<Node> {
        let h = page_header_read(page)?;
        let mut off = PAGE_HEADER_SIZE;
        let end = PAGE_HEADER_SIZE + h.used as usize;

        match h.kind {
            PageKind::Leaf => {
                let mut out = Vec::with_capacity(h.count as usize);
                for _ in 0..h.count {
                    let (e, next) = decode_leaf_entry(page, off, end)
                        .ok_or_else(|| anyhow!("corrupt leaf entry in page {} at {}", h.page_number, off))?;
                    out.push(e);
                    off = next;
                }
                Ok(Node::Leaf(out))
            }
            PageKind::Branch => {
                let mut out = Vec::with_capacity(h.count as usize);
                for _ in 0..h.count {
                    if off + BRANCH_ENTRY_OVERHEAD > end {
                        return Err(anyhow!("corrupt branch entry in page {} at {}", h.page_number, off));
                    }
                    let klen = LittleEndian::read_u16(&page[off..off + 2]) as usize;
                    let child = LittleEndian::read_u64(&page[off + 2..off + 10]);
                    let kb = off + BRANCH_ENTRY_OVERHEAD;
                    if kb + klen > end {
                        return Err(anyhow!("branch key out of bounds in page {}", h.page_number));
                    }
                    out.push(BranchEntry {
                        key: page[kb..kb + klen].to_vec(),
                        child,
                    });
                    off = kb + klen;
                }
                Ok(Node::Branch(out))
            }
            PageKind::Overflow => Err(anyhow!(
                "page {} is an overflow page, expected branch/leaf",
                h.page_number
            )),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(v) => v.len(),
            Node::Branch(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Размер в байтах вместе с заголовком страницы.
    pub fn encoded_len(&self) -> usize {
        PAGE_HEADER_SIZE
            + match self {
                Node::Leaf(v) => v.iter().map(LeafEntry::encoded_len).sum::<usize>(),
                Node::Branch(v) => v.iter().map(BranchEntry::encoded_len).sum::<usize>(),
            }
    }

    pub fn fits(&self, page_size: usize) -> bool {
        self.encoded_len() <= page_size && self.len() <= u16::MAX as usize
    }

    pub fn encode(&self, page_number: u64, page_size: usize) -> Result<Vec<u8>> {
        if !self.fits(page_size) {
            return Err(anyhow!(
                "node of {} B / {} entries does not fit page {} ({} B)",
                self.encoded_len(),
                self.len(),
                page_number,
                page_size
            ));
        }
        let mut page = vec![0u8; page_size];
        let mut off = PAGE_HEADER_SIZE;
        let kind = match self {
            Node::Leaf(entries) => {
                for e in entries {
                    LittleEndian::write_u16(&mut page[off..off + 2], e.key.len() as u16);
                    match &e.value {
                        LeafValue::Inline(v) => {
                            page[off + 2] = 0;
                            LittleEndian::write_u32(&mut page[off + 3..off + 7], v.len() as u32);
                            off += LEAF_ENTRY_OVERHEAD;
                            page[off..off + e.key.len()].copy_from_slice(&e.key);
                            off += e.key.len();
                            page[off..off + v.len()].copy_from_slice(v);
                            off += v.len();
                        }
                        LeafValue::Overflow { len, head } => {
                            page[off + 2] = ENTRY_FLAG_OVERFLOW;
                            LittleEndian::write_u32(
                                &mut page[off + 3..off + 7],
                                OVERFLOW_REF_SIZE as u32,
                            );
                            off += LEAF_ENTRY_OVERHEAD;
                            page[off..off + e.key.len()].copy_from_slice(&e.key);
                            off += e.key.len();
                            LittleEndian::write_u64(&mut page[off..off + 8], *len);
                            LittleEndian::write_u64(&mut page[off + 8..off + 16], *head);
                            off += OVERFLOW_REF_SIZE;
                        }
                    }
                }
                PageKind::Leaf
            }
            Node::Branch(entries) => {
                for e in entries {
                    LittleEndian::write_u16(&mut page[off..off + 2], e.key.len() as u16);
                    LittleEndian::write_u64(&mut page[off + 2..off + 10], e.child);
                    off += BRANCH_ENTRY_OVERHEAD;
                    page[off..off + e.key.len()].copy_from_slice(&e.key);
                    off += e.key.len();
                }
                PageKind::Branch
            }
        };
        page_header_write(
            &mut page,
            &PageHeader {
                page_number,
                kind,
                count: self.len() as u16,
                used: (off - PAGE_HEADER_SIZE) as u32,
            },
        )?;
        Ok(page)
    }
}

fn decode_leaf_entry(page: &[u8], off: usize, end: usize) -> Option<(LeafEntry, usize)> {
    if off + LEAF_ENTRY_OVERHEAD > end {
        return None;
    }
    let klen = LittleEndian::read_u16(&page[off..off + 2]) as usize;
    let flags = page[off + 2];
    let vlen = LittleEndian::read_u32(&page[off + 3..off + 7]) as usize;
    let kb = off + LEAF_ENTRY_OVERHEAD;
    let vb = kb + klen;
    if vb + vlen > end {
        return None;
    }
    let key = page[kb..vb].to_vec();
    let value = if flags & ENTRY_FLAG_OVERFLOW != 0 {
        if vlen != OVERFLOW_REF_SIZE {
            return None;
        }
        LeafValue::Overflow {
            len: LittleEndian::read_u64(&page[vb..vb + 8]),
            head: LittleEndian::read_u64(&page[vb + 8..vb + 16]),
        }
    } else {
        LeafValue::Inline(page[vb..vb + vlen].to_vec())
    };
    Some((LeafEntry { key, value }, vb + vlen))
}

/// Точка деления по половине закодированных байт: левая часть `[..i]`, правая `[i..]`.
/// Обе части непусты при `sizes.len() >= 2`.
pub fn split_index(sizes: &[usize]) -> usize {
    let total: usize = sizes.iter().sum();
    let mut acc = 0usize;
    for (i, s) in sizes.iter().enumerate() {
        if acc + s > total / 2 && i > 0 {
            return i;
        }
        acc += s;
    }
    sizes.len().saturating_sub(1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[&str]) -> Node {
        Node::Leaf(
            keys.iter()
                .map(|k| LeafEntry {
                    key: k.as_bytes().to_vec(),
                    value: LeafValue::Inline(format!("v-{}", k).into_bytes()),
                })
                .collect(),
        )
    }

    #[test]
    fn leaf_encode_decode_with_overflow_ref() {
        let mut n = leaf(&["a", "bb"]);
        if let Node::Leaf(v) = &mut n {
            v.push(LeafEntry {
                key: b"big".to_vec(),
                value: LeafValue::Overflow { len: 9000, head: 77 },
            });
        }
        let page = n.encode(5, 512).unwrap();
        let h = page_header_read(&page).unwrap();
        assert_eq!(h.kind, PageKind::Leaf);
        assert_eq!(h.count, 3);
        assert_eq!(h.used as usize + PAGE_HEADER_SIZE, n.encoded_len());
        assert_eq!(Node::decode(&page).unwrap(), n);
    }

    #[test]
    fn branch_first_key_empty() {
        let n = Node::Branch(vec![
            BranchEntry { key: vec![], child: 3 },
            BranchEntry { key: b"m".to_vec(), child: 4 },
        ]);
        let page = n.encode(9, 512).unwrap();
        let back = Node::decode(&page).unwrap();
        match back {
            Node::Branch(v) => {
                assert!(v[0].key.is_empty());
                assert_eq!(v[1].child, 4);
            }
            _ => panic!("expected branch"),
        }
    }

    #[test]
    fn oversized_node_rejected() {
        let keys: Vec<String> = (0..100).map(|i| format!("key-{:04}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        let n = leaf(&refs);
        assert!(!n.fits(512));
        assert!(n.encode(1, 512).is_err());
    }

    #[test]
    fn split_index_balances_bytes() {
        assert_eq!(split_index(&[10, 10, 10, 10]), 2);
        assert_eq!(split_index(&[100, 1, 1, 1]), 1);
        assert_eq!(split_index(&[1, 1, 1, 100]), 3);
        assert_eq!(split_index(&[5, 5]), 1);
    }

    #[test]
    fn truncated_page_is_error() {
        let page = leaf(&["a", "b"]).encode(1, 512).unwrap();
        let mut bad = page.clone();
        // used claims less than the entries need
        LittleEndian::write_u32(&mut bad[12..16], 4);
        assert!(Node::decode(&bad).is_err());
    }
}
