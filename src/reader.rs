use std::io::{self, Read, Seek, SeekFrom};

use flate2::{Decompress, FlushDecompress, Status};
use log::{debug, trace};

use crate::cache::{CachePolicy, ChunkCache, ChunkKey};
use crate::field::read_full;
use crate::format::{decode_trailer, read_member_header, TRAILER_LEN};
use crate::seek_index::{ChunkEntry, ChunkIndex, MemberInfo};
use crate::{Error, Result};

/// Bytes read past the last indexed chunk to find the end of the deflate
/// stream and the trailer. The final block written by deflaters is a few
/// bytes long.
const TAIL_PROBE_LEN: usize = 4096;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderConfig {
    pub cache: CachePolicy,
}

/// Counters for the work a reader has done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub members_indexed: u64,
    pub chunks_inflated: u64,
    pub cache_hits: u64,
}

/// Random-access decoder over an idzip container.
///
/// Opening parses the first member's header. Later members are indexed
/// when a read or seek first needs them, and seeking relative to the end
/// indexes the whole file once.
pub struct IdzipReader<R> {
    inner: R,
    index: ChunkIndex,
    cache: Box<dyn ChunkCache>,
    source_len: u64,
    pos: u64,
    basename: Option<Vec<u8>>,
    mtime: u32,
    stats: ReaderStats,
    scratch: Vec<u8>,
}

impl<R: Read + Seek> IdzipReader<R> {
    pub fn new(inner: R) -> Result<Self> {
        Self::with_config(inner, ReaderConfig::default())
    }

    pub fn with_config(inner: R, config: ReaderConfig) -> Result<Self> {
        Self::with_cache(inner, config.cache.build())
    }

    /// Opens the container at the current position of `inner`, using a
    /// caller-supplied cache.
    ///
    /// Returns a format error when the stream is not an idzip container;
    /// callers may fall back to sequential gzip decoding.
    pub fn with_cache(mut inner: R, cache: Box<dyn ChunkCache>) -> Result<Self> {
        let start = inner.stream_position()?;
        let source_len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(start))?;

        let header = read_member_header(&mut inner)?;
        let mut reader = Self {
            inner,
            index: ChunkIndex::new(start),
            cache,
            source_len,
            pos: 0,
            basename: header.basename.clone(),
            mtime: header.mtime,
            stats: ReaderStats::default(),
            scratch: Vec::new(),
        };
        reader.push_member(header)?;
        Ok(reader)
    }

    /// Original file name recorded in the first member, if any.
    pub fn basename(&self) -> Option<&[u8]> {
        self.basename.as_deref()
    }

    pub fn mtime(&self) -> u32 {
        self.mtime
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Total uncompressed size. Indexes every remaining member.
    pub fn uncompressed_len(&mut self) -> Result<u64> {
        while self.index_next_member()? {}
        Ok(self.index.indexed_size())
    }

    /// Members indexed so far.
    pub fn members(&self) -> &[MemberInfo] {
        self.index.members()
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Releases the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Fills `buf` from uncompressed `offset`, returning the number of bytes
    /// copied; fewer than requested only at end of file.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let at = offset + filled as u64;
            let Some(entry) = self.locate(at)? else {
                break;
            };
            let start = (at - entry.uncompressed_offset) as usize;
            let out = &mut buf[filled..];
            filled += self.with_chunk(&entry, |data| {
                let n = out.len().min(data.len() - start);
                out[..n].copy_from_slice(&data[start..start + n]);
                n
            })?;
        }
        Ok(filled)
    }

    /// Returns up to `len` bytes starting at `offset`.
    pub fn read_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while out.len() < len {
            let at = offset + out.len() as u64;
            let Some(entry) = self.locate(at)? else {
                break;
            };
            let start = (at - entry.uncompressed_offset) as usize;
            let want = len - out.len();
            self.with_chunk(&entry, |data| {
                let n = want.min(data.len() - start);
                out.extend_from_slice(&data[start..start + n]);
                n
            })?;
        }
        Ok(out)
    }

    /// Inflates the whole container and checks every member trailer.
    pub fn verify(&mut self) -> Result<()> {
        while self.index_next_member()? {}
        for member in 0..self.index.members().len() {
            let mut crc = crc32fast::Hasher::new();
            let mut size = 0u64;
            for entry in self.index.member_entries(member).to_vec() {
                let data = inflate_chunk(&mut self.inner, &entry, &mut self.scratch)?;
                self.stats.chunks_inflated += 1;
                crc.update(&data);
                size += data.len() as u64;
            }
            let info = &self.index.members()[member];
            if size != info.uncompressed_size {
                return Err(Error::Corrupt("member size mismatch"));
            }
            if crc.finalize() != info.crc {
                return Err(Error::Corrupt("member crc mismatch"));
            }
        }
        Ok(())
    }

    /// Finds the chunk holding `offset`, indexing further members as needed.
    fn locate(&mut self, offset: u64) -> Result<Option<ChunkEntry>> {
        loop {
            if let Some(entry) = self.index.entry_for_offset(offset) {
                return Ok(Some(*entry));
            }
            if !self.index_next_member()? {
                return Ok(None);
            }
        }
    }

    /// Hands the chunk's bytes to `f`, from the cache when possible.
    fn with_chunk<F>(&mut self, entry: &ChunkEntry, f: F) -> Result<usize>
    where
        F: FnOnce(&[u8]) -> usize,
    {
        let key = ChunkKey::new(entry.member, entry.chunk);
        if let Some(data) = self.cache.get(key) {
            if data.len() != entry.uncompressed_size as usize {
                return Err(Error::Corrupt("cached chunk has unexpected size"));
            }
            self.stats.cache_hits += 1;
            trace!("chunk {}/{} cache hit", entry.member, entry.chunk);
            return Ok(f(data));
        }

        let data = inflate_chunk(&mut self.inner, entry, &mut self.scratch)?;
        self.stats.chunks_inflated += 1;
        trace!(
            "chunk {}/{} inflated: {} -> {} bytes",
            entry.member,
            entry.chunk,
            entry.compressed_size,
            data.len()
        );
        let n = f(&data);
        self.cache.put(key, data);
        Ok(n)
    }

    /// Indexes the member after the last indexed one. Returns false once
    /// the container is exhausted.
    fn index_next_member(&mut self) -> Result<bool> {
        if self.index.is_complete() {
            return Ok(false);
        }
        let start = self.index.next_member_offset();
        if start >= self.source_len {
            self.index.mark_complete();
            return Ok(false);
        }
        self.inner.seek(SeekFrom::Start(start))?;
        let header = read_member_header(&mut self.inner).map_err(|err| {
            if err.is_format() {
                Error::Corrupt("data after the last member is not an idzip member")
            } else {
                err
            }
        })?;
        self.push_member(header)?;
        Ok(true)
    }

    fn push_member(&mut self, header: crate::format::MemberHeader) -> Result<()> {
        let data_offset = self.index.next_member_offset() + header.header_len;
        let tail = data_offset + header.compressed_payload_len();
        let (payload_end, crc, size) = self.read_tail(tail)?;
        let info = self
            .index
            .push_member(&header, payload_end, crc, u64::from(size))?;
        debug!(
            "indexed member {} at {}: {} chunks, {} bytes",
            self.stats.members_indexed, info.start, info.chunk_count, info.uncompressed_size
        );
        self.stats.members_indexed += 1;
        Ok(())
    }

    /// Inflates the empty final block that follows the indexed chunks and
    /// decodes the trailer behind it.
    fn read_tail(&mut self, tail: u64) -> Result<(u64, u32, u32)> {
        self.inner.seek(SeekFrom::Start(tail))?;
        let probe_len = (self.source_len.saturating_sub(tail) as usize).min(TAIL_PROBE_LEN);
        let mut probe = vec![0u8; probe_len];
        let got = read_full(&mut self.inner, &mut probe)?;
        probe.truncate(got);

        let mut inflater = Decompress::new(false);
        let mut out = Vec::with_capacity(64);
        let status = inflater.decompress_vec(&probe, &mut out, FlushDecompress::Finish)?;
        if !out.is_empty() {
            return Err(Error::Corrupt("deflate data after the last indexed chunk"));
        }
        if status != Status::StreamEnd {
            return Err(Error::Truncated {
                needed: inflater.total_in() + 1,
                available: got as u64,
            });
        }
        let used = inflater.total_in() as usize;
        if probe.len() < used + TRAILER_LEN {
            return Err(Error::Truncated {
                needed: (used + TRAILER_LEN) as u64,
                available: probe.len() as u64,
            });
        }
        let (crc, size) = decode_trailer(&probe[used..used + TRAILER_LEN])?;
        Ok((tail + used as u64, crc, size))
    }
}

/// Checks whether `src` starts with an idzip member header. The position of
/// `src` is left unchanged.
pub fn is_idzip<R: Read + Seek + ?Sized>(src: &mut R) -> Result<bool> {
    let start = src.stream_position()?;
    let probe = read_member_header(src);
    src.seek(SeekFrom::Start(start))?;
    match probe {
        Ok(_) => Ok(true),
        Err(err) if err.is_format() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Inflates one chunk from its compressed bytes alone. Chunks start on a
/// full-flush boundary, so a fresh decompressor is valid at that offset.
fn inflate_chunk<R: Read + Seek>(
    inner: &mut R,
    entry: &ChunkEntry,
    scratch: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    inner.seek(SeekFrom::Start(entry.compressed_offset))?;
    scratch.resize(entry.compressed_size as usize, 0);
    let got = read_full(inner, scratch)?;
    if got != scratch.len() {
        return Err(Error::Truncated {
            needed: scratch.len() as u64,
            available: got as u64,
        });
    }

    let expected = entry.uncompressed_size as usize;
    let mut out = Vec::with_capacity(expected + 1);
    let mut inflater = Decompress::new(false);
    loop {
        if out.len() == out.capacity() {
            out.reserve(1024);
        }
        let in_before = inflater.total_in();
        let out_before = inflater.total_out();
        let consumed = in_before as usize;
        let status =
            inflater.decompress_vec(&scratch[consumed..], &mut out, FlushDecompress::Sync)?;
        let progressed = inflater.total_in() != in_before || inflater.total_out() != out_before;
        let drained = inflater.total_in() as usize == scratch.len() && out.len() < out.capacity();
        if status == Status::StreamEnd || drained || !progressed {
            break;
        }
    }
    if out.len() != expected {
        return Err(Error::Corrupt("chunk inflated to unexpected size"));
    }
    Ok(out)
}

impl<R: Read + Seek> Read for IdzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for IdzipReader<R> {
    /// Positions past the end clamp to the end, as a sequential gzip
    /// reader does when it runs out of data while skipping forward.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.uncompressed_len()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        while target > self.index.indexed_size() && self.index_next_member()? {}
        self.pos = target.min(self.index.indexed_size());
        Ok(self.pos)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}
