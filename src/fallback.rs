use std::io::{self, Read, Seek, SeekFrom};

use flate2::read::MultiGzDecoder;

use crate::Result;

/// Sequential decoder for gzip files without a random access index.
///
/// Seeking forward decodes and discards, seeking backward restarts from the
/// beginning of the stream. The size becomes known once the end has been
/// reached.
pub struct GzipFallback<R: Read> {
    decoder: Option<MultiGzDecoder<R>>,
    start: u64,
    pos: u64,
    size: Option<u64>,
}

impl<R: Read + Seek> GzipFallback<R> {
    /// Decodes from the current position of `inner`.
    pub fn new(mut inner: R) -> Result<Self> {
        let start = inner.stream_position()?;
        Ok(Self {
            decoder: Some(MultiGzDecoder::new(inner)),
            start,
            pos: 0,
            size: None,
        })
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Total uncompressed size. Decodes to the end on first use.
    pub fn uncompressed_len(&mut self) -> io::Result<u64> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        let here = self.pos;
        self.skip_to(u64::MAX)?;
        let size = self.pos;
        self.seek(SeekFrom::Start(here))?;
        Ok(size)
    }

    pub fn into_inner(self) -> Option<R> {
        self.decoder.map(MultiGzDecoder::into_inner)
    }

    fn decoder(&mut self) -> io::Result<&mut MultiGzDecoder<R>> {
        self.decoder.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "gzip decoder lost after failed rewind")
        })
    }

    fn rewind_stream(&mut self) -> io::Result<()> {
        let mut inner = match self.decoder.take() {
            Some(decoder) => decoder.into_inner(),
            None => return Err(io::Error::new(io::ErrorKind::Other, "gzip decoder lost")),
        };
        inner.seek(SeekFrom::Start(self.start))?;
        self.decoder = Some(MultiGzDecoder::new(inner));
        self.pos = 0;
        Ok(())
    }

    fn skip_to(&mut self, target: u64) -> io::Result<()> {
        if target < self.pos {
            self.rewind_stream()?;
        }
        let want = target - self.pos;
        let skipped = io::copy(&mut self.decoder()?.take(want), &mut io::sink())?;
        self.pos += skipped;
        if skipped < want {
            self.size = Some(self.pos);
        }
        Ok(())
    }
}

impl<R: Read + Seek> Read for GzipFallback<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.decoder()?.read(buf)?;
        self.pos += n as u64;
        if n == 0 && !buf.is_empty() {
            self.size = Some(self.pos);
        }
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for GzipFallback<R> {
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
        let target = match self.size {
            Some(size) => target.min(size),
            None => target,
        };
        if target != self.pos {
            self.skip_to(target)?;
        }
        Ok(self.pos)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}
