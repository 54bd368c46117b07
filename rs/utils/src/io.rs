use std::io::Write;

use anyhow::{Context, Result};
use xxhash_rust::xxh3::Xxh3;

/// Writes `buf` fully and returns the number of bytes written.
pub fn wrap_write<W: Write>(writer: &mut W, buf: &[u8]) -> Result<usize> {
    writer
        .write_all(buf)
        .with_context(|| format!("Failed to write {} bytes", buf.len()))?;
    Ok(buf.len())
}

/// Pads with zero bytes so that `written + padding` is a multiple of `alignment`.
pub fn write_pad<W: Write>(writer: &mut W, written: usize, alignment: usize) -> Result<usize> {
    let padding = crate::mem::align_to_next_boundary(written, alignment) - written;
    if padding == 0 {
        return Ok(0);
    }
    wrap_write(writer, &vec![0u8; padding])
}

/// Writer adaptor that hashes (xxh3-64) everything that passes through it and counts bytes.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Xxh3,
    bytes_written: usize,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Xxh3::new(),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn checksum(&self) -> u64 {
        self.hasher.digest()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let len = self.inner.write(buf)?;
        self.hasher.update(&buf[..len]);
        self.bytes_written += len;
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use xxhash_rust::xxh3::xxh3_64;

    use super::*;

    #[test]
    fn test_hashing_writer() {
        let mut writer = HashingWriter::new(Vec::new());
        let mut written = wrap_write(&mut writer, b"rabitq").expect("Failed to write");
        written += write_pad(&mut writer, written, 8).expect("Failed to pad");
        assert_eq!(written, 8);
        assert_eq!(writer.bytes_written(), 8);

        let checksum = writer.checksum();
        let buffer = writer.into_inner();
        assert_eq!(buffer, b"rabitq\0\0");
        assert_eq!(checksum, xxh3_64(&buffer));
    }
}
