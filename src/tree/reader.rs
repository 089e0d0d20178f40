//! tree/reader — потоковое чтение значения (inline или overflow-цепочка).
//!
//! Overflow-страницы читаются лениво, по одной, по мере `read()`.

use anyhow::{anyhow, Result};
use std::io::{self, Read};

use crate::consts::NO_PAGE;
use crate::page::{ovf_page_read, LeafValue};
use crate::transaction::Transaction;

enum Source {
    Inline(Vec<u8>),
    Overflow {
        next: u64,
        chunk: Vec<u8>,
        off: usize,
    },
}

pub struct ValueReader<'t> {
    tx: &'t Transaction<'t>,
    len: u64,
    pos: u64,
    src: Source,
}

impl<'t> ValueReader<'t> {
    pub(crate) fn new(tx: &'t Transaction<'t>, value: LeafValue) -> Self {
        match value {
            LeafValue::Inline(v) => Self {
                tx,
                len: v.len() as u64,
                pos: 0,
                src: Source::Inline(v),
            },
            LeafValue::Overflow { len, head } => Self {
                tx,
                len,
                pos: 0,
                src: Source::Overflow {
                    next: head,
                    chunk: Vec::new(),
                    off: 0,
                },
            },
        }
    }

    /// Полная длина значения.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Сколько байт уже прочитано.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn read_to_vec(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len as usize);
        self.read_to_end(&mut out)
            .map_err(|e| anyhow!("read value: {}", e))?;
        Ok(out)
    }

    fn fill(&mut self) -> Result<()> {
        if let Source::Overflow { next, chunk, off } = &mut self.src {
            if *off < chunk.len() || *next == NO_PAGE {
                return Ok(());
            }
            let page = self.tx.get_page(*next)?;
            let (n, c) = ovf_page_read(&page)?;
            *chunk = c.to_vec();
            *off = 0;
            *next = n;
        }
        Ok(())
    }
}

impl Read for ValueReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }
        self.fill().map_err(|e| io::Error::other(format!("{:#}", e)))?;
        let left = (self.len - self.pos) as usize;
        let n = match &mut self.src {
            Source::Inline(v) => {
                let from = self.pos as usize;
                let n = buf.len().min(v.len() - from);
                buf[..n].copy_from_slice(&v[from..from + n]);
                n
            }
            Source::Overflow { chunk, off, .. } => {
                let n = buf.len().min(chunk.len() - *off).min(left);
                buf[..n].copy_from_slice(&chunk[*off..*off + n]);
                *off += n;
                n
            }
        };
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("value truncated at {} of {} B", self.pos, self.len),
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}
