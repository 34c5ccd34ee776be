use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::{Compress, Compression, FlushCompress, Status};
use log::{debug, warn};

use crate::field::read_full;
use crate::format::{
    encode_header, encode_trailer, encode_zlengths, CHUNK_LENGTH, MAX_MEMBER_SIZE, XFL_BEST,
};
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct WriterConfig {
    /// Buffered bytes that trigger sealing, and the largest member written.
    pub sync_size: usize,
    /// Original file name, stored in the first member only.
    pub basename: Option<String>,
    /// Modification time in seconds, stored in the first member only.
    pub mtime: u32,
    pub level: Compression,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            sync_size: MAX_MEMBER_SIZE,
            basename: None,
            mtime: 0,
            level: Compression::best(),
        }
    }
}

impl WriterConfig {
    /// Sets the mtime, leaving it undefined (0) when it does not fit 32 bits.
    pub fn mtime_from_secs(mut self, secs: u64) -> Self {
        self.mtime = u32::try_from(secs).unwrap_or(0);
        self
    }

    pub fn basename(mut self, name: impl Into<String>) -> Self {
        self.basename = Some(name.into());
        self
    }

    fn member_size(&self) -> usize {
        self.sync_size.clamp(1, MAX_MEMBER_SIZE)
    }
}

/// Fields of a member header that vary between members.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemberOptions<'a> {
    pub basename: Option<&'a [u8]>,
    pub mtime: u32,
    pub level: Option<Compression>,
}

/// Summary of one written member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedMember {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub crc: u32,
    pub zlengths: Vec<u16>,
}

struct Deflater {
    compress: Compress,
    buf: Vec<u8>,
}

impl Deflater {
    fn new(level: Compression) -> Self {
        Self {
            // raw deflate: gzip framing is written by hand
            compress: Compress::new(level, false),
            buf: Vec::with_capacity(CHUNK_LENGTH + 1024),
        }
    }

    /// Deflates all of `input` and applies `flush`, returning every byte
    /// produced by the call.
    fn run(&mut self, input: &[u8], flush: FlushCompress) -> Result<&[u8]> {
        self.buf.clear();
        let mut consumed = 0usize;
        let finishing = matches!(flush, FlushCompress::Finish);
        loop {
            if self.buf.capacity() - self.buf.len() < 1024 {
                self.buf.reserve(CHUNK_LENGTH);
            }
            let before = self.compress.total_in();
            let status = self
                .compress
                .compress_vec(&input[consumed..], &mut self.buf, flush)?;
            consumed += (self.compress.total_in() - before) as usize;
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    let drained = self.buf.len() < self.buf.capacity();
                    if consumed == input.len() && drained && !finishing {
                        break;
                    }
                }
            }
        }
        Ok(&self.buf)
    }
}

/// Writes one member holding the next `in_size` bytes of `input`.
///
/// The header goes out first with a zeroed chunk index. Each chunk is
/// deflated and full-flushed on its own, then the stream is finished, the
/// trailer written, and the index patched in place. `output` is left
/// positioned after the trailer.
pub fn compress_member<R, W>(
    input: &mut R,
    in_size: usize,
    output: &mut W,
    options: MemberOptions<'_>,
) -> Result<SealedMember>
where
    R: Read + ?Sized,
    W: Write + Seek + ?Sized,
{
    let level = options.level.unwrap_or_else(Compression::best);
    let xfl = if level == Compression::best() { XFL_BEST } else { 0 };
    let header = encode_header(in_size, options.basename, options.mtime, xfl)?;

    let header_start = output.stream_position()?;
    output.write_all(&header.bytes)?;
    let zlengths_pos = header_start + header.zlengths_at as u64;

    let mut deflater = Deflater::new(level);
    let mut crc = crc32fast::Hasher::new();
    let mut zlengths = Vec::with_capacity(header.chunk_count);
    let mut chunk = vec![0u8; CHUNK_LENGTH.min(in_size)];
    let mut need = in_size;
    while need > 0 {
        let read_size = need.min(CHUNK_LENGTH);
        let got = read_full(input, &mut chunk[..read_size])?;
        if got != read_size {
            return Err(Error::Truncated {
                needed: read_size as u64,
                available: got as u64,
            });
        }
        need -= read_size;
        crc.update(&chunk[..read_size]);

        let compressed = deflater.run(&chunk[..read_size], FlushCompress::Full)?;
        let zlen = u16::try_from(compressed.len())
            .map_err(|_| Error::Corrupt("compressed chunk exceeds 16-bit length"))?;
        output.write_all(compressed)?;
        zlengths.push(zlen);
    }

    // An empty final block ends the deflate stream.
    let tail = deflater.run(&[], FlushCompress::Finish)?;
    output.write_all(tail)?;
    let crc = crc.finalize();
    output.write_all(&encode_trailer(crc, in_size as u64))?;

    let end_pos = output.stream_position()?;
    output.seek(SeekFrom::Start(zlengths_pos))?;
    output.write_all(&encode_zlengths(&zlengths))?;
    output.seek(SeekFrom::Start(end_pos))?;

    Ok(SealedMember {
        uncompressed_size: in_size as u64,
        compressed_size: end_pos - header_start,
        crc,
        zlengths,
    })
}

/// Compresses `in_size` bytes of `input` into as many members as needed.
/// Returns the number of members written; empty input still yields one.
pub fn compress_stream<R, W>(
    input: &mut R,
    mut in_size: u64,
    output: &mut W,
    config: &WriterConfig,
) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + Seek + ?Sized,
{
    let member_size = config.member_size() as u64;
    let mut options = MemberOptions {
        basename: config.basename.as_deref().map(str::as_bytes),
        mtime: config.mtime,
        level: Some(config.level),
    };
    let mut members = 0u64;
    loop {
        let size = in_size.min(member_size) as usize;
        let sealed = compress_member(input, size, output, options)?;
        log_sealed(members, &sealed);
        members += 1;
        // Only the first member carries the basename and mtime.
        options.basename = None;
        options.mtime = 0;
        in_size -= size as u64;
        if in_size == 0 {
            return Ok(members);
        }
    }
}

fn log_sealed(member: u64, sealed: &SealedMember) {
    debug!(
        "sealed member {}: {} bytes in {} chunks -> {} bytes",
        member,
        sealed.uncompressed_size,
        sealed.zlengths.len(),
        sealed.compressed_size
    );
}

/// Buffering encoder producing an idzip container on a seekable sink.
///
/// Bytes are buffered until `sync_size` is exceeded, at which point full
/// members are sealed. `sync`/`flush` seal whatever is buffered, and
/// `finish` seals the rest and hands the sink back.
///
/// If writing a member fails, the sink is rewound to where that member
/// started and every later call returns [`Error::Aborted`] carrying that
/// offset. Bytes before it form a complete container.
pub struct IdzipWriter<W: Write + Seek> {
    inner: Option<W>,
    config: WriterConfig,
    buffer: Vec<u8>,
    pos: u64,
    members: u64,
    /// Sink offset of the member that failed to seal.
    failed: Option<u64>,
}

impl<W: Write + Seek> IdzipWriter<W> {
    pub fn new(inner: W) -> Result<Self> {
        Self::with_config(inner, WriterConfig::default())
    }

    pub fn with_config(mut inner: W, config: WriterConfig) -> Result<Self> {
        // Members are patched after the payload is written; refuse sinks
        // that cannot seek before accepting any data.
        inner
            .stream_position()
            .map_err(|_| Error::Unsupported("output sink is not seekable"))?;
        Ok(Self {
            inner: Some(inner),
            config,
            buffer: Vec::new(),
            pos: 0,
            members: 0,
            failed: None,
        })
    }

    /// Buffers `buf`, returning its logical start offset and length.
    pub fn append(&mut self, buf: &[u8]) -> Result<(u64, usize)> {
        self.sink()?;
        let start = self.pos;
        self.buffer.extend_from_slice(buf);
        self.pos += buf.len() as u64;
        if self.buffer.len() > self.config.sync_size {
            self.seal_full_members()?;
        }
        Ok((start, buf.len()))
    }

    /// Seals all buffered bytes and returns the sink position.
    pub fn sync(&mut self) -> Result<u64> {
        if !self.buffer.is_empty() {
            let buffer = std::mem::take(&mut self.buffer);
            let result = self.seal(&buffer);
            self.buffer = buffer;
            self.buffer.clear();
            result?;
        }
        Ok(self.sink()?.stream_position()?)
    }

    /// Logical number of bytes accepted so far.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn members_written(&self) -> u64 {
        self.members
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.inner.as_ref()
    }

    /// Seals remaining data and returns the sink. The sink is released even
    /// when sealing fails.
    pub fn finish(mut self) -> Result<W> {
        let result = self.try_finish();
        let inner = self.inner.take().ok_or(Error::Closed)?;
        result.map(|()| inner)
    }

    fn try_finish(&mut self) -> Result<()> {
        self.sync()?;
        if self.members == 0 {
            self.seal(&[])?;
        }
        self.sink()?.flush()?;
        Ok(())
    }

    fn seal_full_members(&mut self) -> Result<()> {
        let member_size = self.config.member_size();
        let buffer = std::mem::take(&mut self.buffer);
        let mut consumed = 0usize;
        let mut result = Ok(());
        while buffer.len() - consumed > member_size {
            result = self.seal(&buffer[consumed..consumed + member_size]);
            if result.is_err() {
                break;
            }
            consumed += member_size;
        }
        self.buffer = buffer;
        self.buffer.drain(..consumed);
        result
    }

    /// Seals `data` as one or more members, at most `member_size` each.
    fn seal(&mut self, data: &[u8]) -> Result<()> {
        self.sink()?;
        let member_size = self.config.member_size();
        let level = self.config.level;
        let mut rest = data;
        loop {
            let take = rest.len().min(member_size);
            let (piece, tail) = rest.split_at(take);
            let first = self.members == 0;
            let options = MemberOptions {
                basename: if first {
                    self.config.basename.as_deref().map(str::as_bytes)
                } else {
                    None
                },
                mtime: if first { self.config.mtime } else { 0 },
                level: Some(level),
            };
            let mut reader = piece;
            let inner = self.inner.as_mut().ok_or(Error::Closed)?;
            let member_start = inner.stream_position()?;
            let sealed = match compress_member(&mut reader, take, inner, options) {
                Ok(sealed) => sealed,
                Err(err) => {
                    self.abort(member_start);
                    return Err(err);
                }
            };
            log_sealed(self.members, &sealed);
            self.members += 1;
            rest = tail;
            if rest.is_empty() {
                return Ok(());
            }
        }
    }

    /// Rewinds over a partially written member and refuses further work.
    fn abort(&mut self, member_start: u64) {
        self.failed = Some(member_start);
        if let Some(inner) = self.inner.as_mut() {
            if let Err(err) = inner.seek(SeekFrom::Start(member_start)) {
                warn!("cannot rewind sink to failed member at {member_start}: {err}");
            }
        }
        warn!(
            "member {} failed to seal, writer aborted at offset {}",
            self.members, member_start
        );
    }

    fn sink(&mut self) -> Result<&mut W> {
        if let Some(valid_len) = self.failed {
            return Err(Error::Aborted { valid_len });
        }
        self.inner.as_mut().ok_or(Error::Closed)
    }
}

impl<W: Write + Seek> Write for IdzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (_, len) = self.append(buf)?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync()?;
        self.sink()?.flush()?;
        Ok(())
    }
}

impl<W: Write + Seek> Drop for IdzipWriter<W> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            let _ = self.try_finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{chunk_count, read_member_header, TRAILER_LEN};
    use std::io::Cursor;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn index_sums_to_payload_length() {
        let data = sample(CHUNK_LENGTH * 2 + 17);
        let mut out = Cursor::new(Vec::new());
        let sealed =
            compress_member(&mut &data[..], data.len(), &mut out, MemberOptions::default())
                .unwrap();
        let bytes = out.into_inner();
        assert_eq!(sealed.compressed_size, bytes.len() as u64);
        assert_eq!(sealed.zlengths.len(), chunk_count(data.len()));

        let header = read_member_header(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.zlengths, sealed.zlengths);
        let payload = bytes.len() as u64 - header.header_len - TRAILER_LEN as u64;
        // Indexed chunks, then the empty final block.
        assert_eq!(header.compressed_payload_len() + 2, payload);
        let finish_at = (header.header_len + header.compressed_payload_len()) as usize;
        assert_eq!(&bytes[finish_at..finish_at + 2], &[0x03, 0x00]);
    }

    #[test]
    fn short_input_is_truncation() {
        let data = sample(100);
        let mut out = Cursor::new(Vec::new());
        let err = compress_member(&mut &data[..], 200, &mut out, MemberOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Truncated {
                needed: 200,
                available: 100
            }
        ));
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[test]
    fn incompressible_chunks_fit_length_slots() {
        let noise = noise(CHUNK_LENGTH * 2);
        let mut out = Cursor::new(Vec::new());
        let sealed =
            compress_member(&mut &noise[..], noise.len(), &mut out, MemberOptions::default())
                .unwrap();
        assert_eq!(sealed.zlengths.len(), 2);
        assert!(sealed.zlengths.iter().all(|&z| z as usize > CHUNK_LENGTH / 2));
    }

    #[test]
    fn append_tracks_logical_offsets() {
        let mut writer = IdzipWriter::new(Cursor::new(Vec::new())).unwrap();
        assert_eq!(writer.append(b"hello").unwrap(), (0, 5));
        assert_eq!(writer.append(b", world").unwrap(), (5, 7));
        assert_eq!(writer.tell(), 12);
        assert_eq!(writer.members_written(), 0);
        writer.sync().unwrap();
        assert_eq!(writer.members_written(), 1);
    }

    #[test]
    fn sync_threshold_seals_full_members() {
        let config = WriterConfig {
            sync_size: CHUNK_LENGTH,
            ..WriterConfig::default()
        };
        let mut writer = IdzipWriter::with_config(Cursor::new(Vec::new()), config).unwrap();
        writer.append(&sample(CHUNK_LENGTH * 3 + 5)).unwrap();
        assert_eq!(writer.members_written(), 3);
        let out = writer.finish().unwrap().into_inner();
        assert!(!out.is_empty());
    }

    #[test]
    fn empty_writer_emits_one_member() {
        let writer = IdzipWriter::new(Cursor::new(Vec::new())).unwrap();
        let out = writer.finish().unwrap().into_inner();
        let header = read_member_header(&mut Cursor::new(&out)).unwrap();
        assert!(header.zlengths.is_empty());
    }

    #[test]
    fn drop_finishes_the_stream() {
        let mut sink = Vec::new();
        {
            let mut writer = IdzipWriter::new(Cursor::new(&mut sink)).unwrap();
            writer.write_all(b"dropped but sealed").unwrap();
        }
        let mut decoded = Vec::new();
        flate2::read::MultiGzDecoder::new(&sink[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"dropped but sealed");
    }

    #[test]
    fn mtime_out_of_range_is_zeroed() {
        assert_eq!(WriterConfig::default().mtime_from_secs(1 << 40).mtime, 0);
        assert_eq!(WriterConfig::default().mtime_from_secs(1234).mtime, 1234);
    }

    struct Unseekable(Vec<u8>);

    impl Write for Unseekable {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Unseekable {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "pipe"))
        }
    }

    /// Rejects the first write that would cross `fail_at`, then works again.
    struct FailOnce {
        inner: Cursor<Vec<u8>>,
        fail_at: u64,
        tripped: bool,
    }

    impl Write for FailOnce {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.tripped && self.inner.position() + buf.len() as u64 > self.fail_at {
                self.tripped = true;
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FailOnce {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn failed_member_aborts_the_writer() {
        let data = noise(CHUNK_LENGTH * 3);
        let config = WriterConfig {
            sync_size: CHUNK_LENGTH,
            ..WriterConfig::default()
        };
        let sink = FailOnce {
            inner: Cursor::new(Vec::new()),
            fail_at: 70_000,
            tripped: false,
        };
        let mut writer = IdzipWriter::with_config(sink, config).unwrap();

        let err = writer.append(&data).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(writer.members_written(), 1);

        // Rewound to the start of the member that failed.
        let valid_len = writer.get_ref().unwrap().inner.position();
        assert!(valid_len > 0 && valid_len < 70_000);
        assert!(matches!(
            writer.append(b"more"),
            Err(Error::Aborted { valid_len: at }) if at == valid_len
        ));
        assert!(matches!(writer.sync(), Err(Error::Aborted { .. })));

        let written = writer.get_ref().unwrap().inner.get_ref()[..valid_len as usize].to_vec();
        assert!(matches!(writer.finish(), Err(Error::Aborted { .. })));

        let mut decoded = Vec::new();
        flate2::read::MultiGzDecoder::new(&written[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, &data[..CHUNK_LENGTH]);
    }

    #[test]
    fn unseekable_sink_fails_at_construction() {
        let err = IdzipWriter::new(Unseekable(Vec::new())).err().unwrap();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
