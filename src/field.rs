//! Fixed-width little-endian fields used by the gzip header and trailer.

use std::io::{self, Read, Write};

use crate::{Error, Result};

/// Writes the lowest 16 bits of `value`.
pub fn write16<W: Write + ?Sized>(out: &mut W, value: u64) -> Result<()> {
    out.write_all(&((value & 0xFFFF) as u16).to_le_bytes())?;
    Ok(())
}

/// Writes the lowest 32 bits of `value`.
pub fn write32<W: Write + ?Sized>(out: &mut W, value: u64) -> Result<()> {
    out.write_all(&((value & 0xFFFF_FFFF) as u32).to_le_bytes())?;
    Ok(())
}

pub fn read16(buf: &[u8], at: usize) -> Result<u16> {
    let bytes = field_bytes(buf, at, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read32(buf: &[u8], at: usize) -> Result<u32> {
    let bytes = field_bytes(buf, at, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads until `buf` is full or the source is exhausted.
pub fn read_full<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

fn field_bytes(buf: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    buf.get(at..at + len).ok_or(Error::Truncated {
        needed: (at + len) as u64,
        available: buf.len() as u64,
    })
}
