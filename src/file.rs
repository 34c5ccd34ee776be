//! File-like entry points that pick the right decoder on open.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::fallback::GzipFallback;
use crate::reader::{is_idzip, IdzipReader, ReaderConfig};
use crate::writer::{IdzipWriter, WriterConfig};
use crate::{Error, Result};

pub const FILE_EXTENSION: &str = "dz";

/// A decoder chosen once when the stream is opened: random access when the
/// stream carries an idzip index, sequential gzip otherwise. Both variants
/// serve the same `Read + Seek` surface.
pub enum IdzipStream<R: Read> {
    Indexed(IdzipReader<R>),
    Gzip(GzipFallback<R>),
}

impl<R: Read + Seek> IdzipStream<R> {
    pub fn open(inner: R) -> Result<Self> {
        Self::open_with_config(inner, ReaderConfig::default())
    }

    pub fn open_with_config(mut inner: R, config: ReaderConfig) -> Result<Self> {
        if is_idzip(&mut inner)? {
            return Ok(IdzipStream::Indexed(IdzipReader::with_config(inner, config)?));
        }
        debug!("no random access index, decoding as plain gzip");
        Ok(IdzipStream::Gzip(GzipFallback::new(inner)?))
    }

    pub fn is_random_access(&self) -> bool {
        matches!(self, IdzipStream::Indexed(_))
    }

    pub fn tell(&self) -> u64 {
        match self {
            IdzipStream::Indexed(reader) => reader.tell(),
            IdzipStream::Gzip(reader) => reader.tell(),
        }
    }
}

impl<R: Read + Seek> Read for IdzipStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            IdzipStream::Indexed(reader) => reader.read(buf),
            IdzipStream::Gzip(reader) => reader.read(buf),
        }
    }
}

impl<R: Read + Seek> Seek for IdzipStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            IdzipStream::Indexed(reader) => reader.seek(pos),
            IdzipStream::Gzip(reader) => reader.seek(pos),
        }
    }
}

enum FileState {
    Reading(IdzipStream<File>),
    Writing(IdzipWriter<File>),
    Closed,
}

/// An idzip file opened for either reading or writing.
///
/// Reading works on any gzip file; only idzip files get random access.
/// Operations that do not match the mode fail with `Unsupported`, and any
/// operation after `close` fails with `Closed`.
pub struct IdzipFile {
    state: FileState,
}

impl IdzipFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, ReaderConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            state: FileState::Reading(IdzipStream::open_with_config(file, config)?),
        })
    }

    /// Creates `path`, recording its name without the `.dz` extension as
    /// the original basename.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = WriterConfig::default();
        config.basename = original_name(path);
        Self::create_with_config(path, config)
    }

    pub fn create_with_config(path: impl AsRef<Path>, config: WriterConfig) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            state: FileState::Writing(IdzipWriter::with_config(file, config)?),
        })
    }

    pub fn is_random_access(&self) -> bool {
        match &self.state {
            FileState::Reading(stream) => stream.is_random_access(),
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, FileState::Closed)
    }

    pub fn tell(&self) -> Result<u64> {
        match &self.state {
            FileState::Reading(stream) => Ok(stream.tell()),
            FileState::Writing(writer) => Ok(writer.tell()),
            FileState::Closed => Err(Error::Closed),
        }
    }

    /// Seals pending data when writing and releases the file. Closing twice
    /// is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, FileState::Closed) {
            FileState::Writing(writer) => {
                writer.finish()?;
                Ok(())
            }
            FileState::Reading(_) | FileState::Closed => Ok(()),
        }
    }

    fn reading(&mut self) -> Result<&mut IdzipStream<File>> {
        match &mut self.state {
            FileState::Reading(stream) => Ok(stream),
            FileState::Writing(_) => Err(Error::Unsupported("cannot read from a write-only file")),
            FileState::Closed => Err(Error::Closed),
        }
    }

    fn writing(&mut self) -> Result<&mut IdzipWriter<File>> {
        match &mut self.state {
            FileState::Writing(writer) => Ok(writer),
            FileState::Reading(_) => Err(Error::Unsupported("cannot write to a read-only file")),
            FileState::Closed => Err(Error::Closed),
        }
    }
}

impl Read for IdzipFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reading()?.read(buf)
    }
}

impl Write for IdzipFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writing()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            FileState::Writing(writer) => writer.flush(),
            FileState::Reading(_) => Ok(()),
            FileState::Closed => Err(Error::Closed.into()),
        }
    }
}

impl Seek for IdzipFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.state {
            FileState::Reading(stream) => stream.seek(pos),
            FileState::Writing(_) => {
                Err(Error::Unsupported("cannot seek on a write-only stream").into())
            }
            FileState::Closed => Err(Error::Closed.into()),
        }
    }
}

/// File name with a trailing `.dz` removed.
pub(crate) fn original_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stripped = name
        .strip_suffix(FILE_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(name);
    Some(stripped.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn original_name_strips_extension() {
        assert_eq!(original_name(Path::new("/tmp/a.txt.dz")).as_deref(), Some("a.txt"));
        assert_eq!(original_name(Path::new("plain")).as_deref(), Some("plain"));
        assert_eq!(original_name(Path::new("odz")).as_deref(), Some("odz"));
    }

    #[test]
    fn write_then_read_through_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words.txt.dz");

        let mut file = IdzipFile::create(&path).unwrap();
        file.write_all(b"one two three").unwrap();
        assert_eq!(file.tell().unwrap(), 13);
        file.close().unwrap();
        assert!(file.is_closed());

        let mut file = IdzipFile::open(&path).unwrap();
        assert!(file.is_random_access());
        file.seek(SeekFrom::Start(4)).unwrap();
        let mut word = [0u8; 3];
        file.read_exact(&mut word).unwrap();
        assert_eq!(&word, b"two");
    }

    #[test]
    fn mode_mismatches_are_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mode.dz");

        let mut writer = IdzipFile::create(&path).unwrap();
        let err = writer.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        let err = writer.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        writer.close().unwrap();

        let mut reader = IdzipFile::open(&path).unwrap();
        let err = reader.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn closed_file_rejects_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("closed.dz");
        let mut file = IdzipFile::create(&path).unwrap();
        file.close().unwrap();
        file.close().unwrap();
        assert!(matches!(file.tell(), Err(Error::Closed)));
        assert!(file.write(b"late").is_err());
    }
}
