//! util — общие утилиты (позиционное I/O, отображение ключей/значений в CLI).

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

pub fn read_at(f: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    f.seek(SeekFrom::Start(offset))
        .with_context(|| format!("seek to {}", offset))?;
    f.read_exact(buf)
        .with_context(|| format!("read {} B at {}", buf.len(), offset))?;
    Ok(())
}

pub fn write_at(f: &mut File, offset: u64, buf: &[u8]) -> Result<()> {
    f.seek(SeekFrom::Start(offset))
        .with_context(|| format!("seek to {}", offset))?;
    f.write_all(buf)
        .with_context(|| format!("write {} B at {}", buf.len(), offset))?;
    Ok(())
}

pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            if i % 16 == 0 {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// UTF‑8 как есть, иначе короткая пометка о бинарных данных.
pub fn display_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => format!("(binary {} B)", bytes.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_wraps_every_16_bytes() {
        let bytes: Vec<u8> = (0u8..18).collect();
        let s = hex_dump(&bytes);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00 01 02"));
        assert_eq!(lines[1], "10 11");
    }

    #[test]
    fn display_text_marks_binary() {
        assert_eq!(display_text(b"values/1"), "values/1");
        assert_eq!(display_text(&[0xff, 0xfe]), "(binary 2 B)");
    }

    #[test]
    fn positional_io_roundtrip() {
        let path = std::env::temp_dir().join(format!("tsr-util-{}", std::process::id()));
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        write_at(&mut f, 100, b"abc").unwrap();
        let mut buf = [0u8; 3];
        read_at(&mut f, 100, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        let mut head = [1u8; 4];
        read_at(&mut f, 0, &mut head).unwrap();
        assert_eq!(head, [0u8; 4]);
        let _ = std::fs::remove_file(&path);
    }
}
