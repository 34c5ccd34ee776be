//! Byte layout of an idzip member.
//!
//! A member is a regular RFC 1952 gzip member whose header carries the
//! dictzip "Random Access" extra subfield:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+
//! |x1f|x8b|x08|FLG|     MTIME     |XFL|OS |
//! +---+---+---+---+---+---+---+---+---+---+
//! | XLEN  |'R'|'A'|  LEN  | VER=1 | CHLEN | CHCNT | CHCNT x u16 zlen ... |
//! +---+---+---+---+---+---+---+---+---+---+
//! [basename\0]  deflate payload  CRC32  ISIZE
//! ```
//!
//! The payload is one raw deflate stream in which every chunk of
//! `CHLEN` uncompressed bytes ends on a full-flush boundary, so each chunk
//! inflates on its own from a fresh decompressor.

use std::io::{self, Read};

use crate::field::{read16, read32, write16, write32};
use crate::{Error, Result};

/// Uncompressed bytes per chunk. Small enough that a deflated chunk always
/// fits the 16-bit length slot, even for incompressible input.
pub const CHUNK_LENGTH: usize = 58315;

/// Chunk lengths that fit in the 16-bit XLEN alongside the subfield headers.
pub const MAX_NUM_CHUNKS: usize = (0xFFFF - 10) / 2;
pub const MAX_MEMBER_SIZE: usize = MAX_NUM_CHUNKS * CHUNK_LENGTH;

pub const GZIP_DEFLATE_ID: [u8; 3] = [0x1F, 0x8B, 0x08];
pub const FTEXT: u8 = 0x01;
pub const FHCRC: u8 = 0x02;
pub const FEXTRA: u8 = 0x04;
pub const FNAME: u8 = 0x08;
pub const FCOMMENT: u8 = 0x10;
pub const FRESERVED: u8 = 0xFF - (FTEXT | FHCRC | FEXTRA | FNAME | FCOMMENT);

/// XFL value announcing the slowest, best compression.
pub const XFL_BEST: u8 = 0x02;
pub const OS_CODE_UNIX: u8 = 3;

pub const RA_SUBFIELD_ID: [u8; 2] = *b"RA";
pub const RA_VERSION: u16 = 1;

pub const GZIP_HEADER_LEN: usize = 10;
pub const TRAILER_LEN: usize = 8;

/// Number of chunks needed for `size` uncompressed bytes.
pub fn chunk_count(size: usize) -> usize {
    size.div_ceil(CHUNK_LENGTH)
}

/// A header ready to be written, with the index slots zero-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedHeader {
    pub bytes: Vec<u8>,
    /// Offset inside `bytes` of the first compressed-length slot.
    pub zlengths_at: usize,
    pub chunk_count: usize,
}

/// Builds the member header for `uncompressed_size` bytes. The chunk
/// count is known up front, so the header length never changes when the
/// real lengths are patched in after compression.
pub fn encode_header(
    uncompressed_size: usize,
    basename: Option<&[u8]>,
    mtime: u32,
    xfl: u8,
) -> Result<EncodedHeader> {
    let chunks = chunk_count(uncompressed_size);
    let field_length = 3 * 2 + 2 * chunks;
    let extra_length = 2 * 2 + field_length;
    if extra_length > 0xFFFF {
        return Err(Error::Unsupported("member exceeds random access index capacity"));
    }
    let basename = basename.filter(|name| !name.is_empty());
    if basename.is_some_and(|name| name.contains(&0)) {
        return Err(Error::Unsupported("basename contains a NUL byte"));
    }

    let mut bytes = Vec::with_capacity(GZIP_HEADER_LEN + 2 + extra_length + 64);
    bytes.extend_from_slice(&GZIP_DEFLATE_ID);
    let mut flags = FEXTRA;
    if basename.is_some() {
        flags |= FNAME;
    }
    bytes.push(flags);
    write32(&mut bytes, u64::from(mtime))?;
    bytes.push(xfl);
    bytes.push(OS_CODE_UNIX);

    write16(&mut bytes, extra_length as u64)?;
    bytes.extend_from_slice(&RA_SUBFIELD_ID);
    write16(&mut bytes, field_length as u64)?;
    write16(&mut bytes, u64::from(RA_VERSION))?;
    write16(&mut bytes, CHUNK_LENGTH as u64)?;
    write16(&mut bytes, chunks as u64)?;
    let zlengths_at = bytes.len();
    bytes.resize(zlengths_at + 2 * chunks, 0);

    if let Some(name) = basename {
        bytes.extend_from_slice(name);
        bytes.push(0);
    }

    Ok(EncodedHeader {
        bytes,
        zlengths_at,
        chunk_count: chunks,
    })
}

/// Serializes compressed chunk lengths for the index slots.
pub fn encode_zlengths(zlengths: &[u16]) -> Vec<u8> {
    zlengths.iter().flat_map(|zlen| zlen.to_le_bytes()).collect()
}

/// Trailer for a member: CRC32 then the size modulo 2^32.
pub fn encode_trailer(crc: u32, size: u64) -> [u8; TRAILER_LEN] {
    let mut buf = [0u8; TRAILER_LEN];
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
    buf[4..8].copy_from_slice(&((size & 0xFFFF_FFFF) as u32).to_le_bytes());
    buf
}

pub fn decode_trailer(buf: &[u8]) -> Result<(u32, u32)> {
    Ok((read32(buf, 0)?, read32(buf, 4)?))
}

/// A parsed member header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHeader {
    pub flags: u8,
    pub mtime: u32,
    pub xfl: u8,
    pub os: u8,
    pub chunk_length: u16,
    pub zlengths: Vec<u16>,
    pub basename: Option<Vec<u8>>,
    /// Bytes from the member start to the first deflate byte.
    pub header_len: u64,
}

impl MemberHeader {
    pub fn compressed_payload_len(&self) -> u64 {
        self.zlengths.iter().map(|&zlen| u64::from(zlen)).sum()
    }
}

/// Reads a member header from `src`, positioned at the member start.
///
/// A stream that is not gzip, or gzip without a version 1 "RA" subfield,
/// yields a format error.
pub fn read_member_header<R: Read + ?Sized>(src: &mut R) -> Result<MemberHeader> {
    let mut fixed = [0u8; GZIP_HEADER_LEN];
    read_header_bytes(src, &mut fixed)?;
    if fixed[0..3] != GZIP_DEFLATE_ID {
        return Err(Error::Format("gzip magic mismatch"));
    }
    let flags = fixed[3];
    if flags & FRESERVED != 0 {
        return Err(Error::Format("reserved gzip flags set"));
    }
    if flags & FEXTRA == 0 {
        return Err(Error::Format("gzip header has no extra field"));
    }
    let mtime = read32(&fixed, 4)?;
    let xfl = fixed[8];
    let os = fixed[9];

    let mut xlen_buf = [0u8; 2];
    read_header_bytes(src, &mut xlen_buf)?;
    let xlen = read16(&xlen_buf, 0)? as usize;
    let mut extra = vec![0u8; xlen];
    read_header_bytes(src, &mut extra)?;
    let (chunk_length, zlengths) = parse_random_access(&extra)?;

    let mut header_len = (GZIP_HEADER_LEN + 2 + xlen) as u64;
    let mut basename = None;
    if flags & FNAME != 0 {
        let name = read_zero_terminated(src)?;
        header_len += name.len() as u64 + 1;
        basename = Some(name);
    }
    if flags & FCOMMENT != 0 {
        let comment = read_zero_terminated(src)?;
        header_len += comment.len() as u64 + 1;
    }
    if flags & FHCRC != 0 {
        let mut hcrc = [0u8; 2];
        read_header_bytes(src, &mut hcrc)?;
        header_len += 2;
    }

    Ok(MemberHeader {
        flags,
        mtime,
        xfl,
        os,
        chunk_length,
        zlengths,
        basename,
        header_len,
    })
}

fn parse_random_access(extra: &[u8]) -> Result<(u16, Vec<u16>)> {
    let mut pos = 0usize;
    while pos + 4 <= extra.len() {
        let id = [extra[pos], extra[pos + 1]];
        let len = read16(extra, pos + 2)? as usize;
        let data_start = pos + 4;
        let data_end = data_start + len;
        if data_end > extra.len() {
            return Err(Error::Format("extra subfield overruns extra field"));
        }
        if id == RA_SUBFIELD_ID {
            return parse_random_access_data(&extra[data_start..data_end]);
        }
        pos = data_end;
    }
    Err(Error::Format("no random access subfield"))
}

fn parse_random_access_data(data: &[u8]) -> Result<(u16, Vec<u16>)> {
    if data.len() < 6 {
        return Err(Error::Format("random access subfield too short"));
    }
    let version = read16(data, 0)?;
    if version != RA_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let chunk_length = read16(data, 2)?;
    let count = read16(data, 4)? as usize;
    if chunk_length == 0 {
        return Err(Error::Corrupt("random access chunk length is zero"));
    }
    if data.len() < 6 + 2 * count {
        return Err(Error::Corrupt("random access chunk count exceeds subfield"));
    }
    let zlengths = (0..count)
        .map(|i| read16(data, 6 + 2 * i))
        .collect::<Result<Vec<_>>>()?;
    Ok((chunk_length, zlengths))
}

fn read_header_bytes<R: Read + ?Sized>(src: &mut R, buf: &mut [u8]) -> Result<()> {
    src.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::Format("stream too short for a gzip header"),
        _ => Error::Io(err),
    })
}

fn read_zero_terminated<R: Read + ?Sized>(src: &mut R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        read_header_bytes(src, &mut byte)?;
        if byte[0] == 0 {
            return Ok(out);
        }
        out.push(byte[0]);
    }
}
