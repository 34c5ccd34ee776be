//! One-shot helpers over the writer and reader.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::file::{original_name, IdzipStream, FILE_EXTENSION};
use crate::writer::{compress_stream, IdzipWriter, WriterConfig};
use crate::{Error, Result};

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    compress_with(data, WriterConfig::default())
}

pub fn compress_with(data: &[u8], config: WriterConfig) -> Result<Vec<u8>> {
    let mut writer = IdzipWriter::with_config(Cursor::new(Vec::new()), config)?;
    writer.append(data)?;
    Ok(writer.finish()?.into_inner())
}

/// Decodes an idzip or plain gzip buffer.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut stream = IdzipStream::open(Cursor::new(data))?;
    let mut out = Vec::new();
    stream.read_to_end(&mut out)?;
    Ok(out)
}

/// `input` with `.dz` appended.
pub fn dz_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(FILE_EXTENSION);
    PathBuf::from(name)
}

/// Compresses the file at `input` into `output`, streaming chunk by chunk.
/// The first member records the input's name and modification time.
pub fn compress_file(input: &Path, output: &Path) -> Result<u64> {
    compress_file_with(input, output, WriterConfig::default())
}

/// Like [`compress_file`], with explicit writer settings. A basename or
/// mtime already set in `config` wins over the input file's own.
pub fn compress_file_with(input: &Path, output: &Path, mut config: WriterConfig) -> Result<u64> {
    let source = File::open(input)?;
    let meta = source.metadata()?;
    if config.mtime == 0 {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        config = config.mtime_from_secs(mtime);
    }
    if config.basename.is_none() {
        config.basename = original_name(input);
    }

    let mut reader = BufReader::new(source);
    let mut sink = BufWriter::new(File::create(output)?);
    let members = compress_stream(&mut reader, meta.len(), &mut sink, &config)?;
    sink.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
    Ok(members)
}

/// Decompresses `input` into `output`, which defaults to `input` without
/// its `.dz` extension.
pub fn decompress_file(input: &Path, output: Option<&Path>) -> Result<PathBuf> {
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => strip_dz(input).ok_or(Error::Unsupported("file name has no .dz extension"))?,
    };
    let mut stream = IdzipStream::open(File::open(input)?)?;
    let mut sink = BufWriter::new(File::create(&output)?);
    io::copy(&mut stream, &mut sink)?;
    sink.flush()?;
    Ok(output)
}

fn strip_dz(path: &Path) -> Option<PathBuf> {
    let ext = path.extension()?;
    if ext != FILE_EXTENSION {
        return None;
    }
    Some(path.with_extension(""))
}

/// Removes a file once its converted copy is safely written.
pub fn remove_source(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn buffer_round_trip() {
        let data = b"the quick brown fox".repeat(5000);
        let packed = compress(&data).unwrap();
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn empty_buffer_round_trip() {
        let packed = compress(&[]).unwrap();
        assert!(!packed.is_empty());
        assert!(decompress(&packed).unwrap().is_empty());
    }

    #[test]
    fn file_round_trip_keeps_name() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("log.txt");
        let data = b"line\n".repeat(30_000);
        fs::write(&input, &data).unwrap();

        let packed = dz_path(&input);
        assert_eq!(packed.file_name().unwrap(), "log.txt.dz");
        assert_eq!(compress_file(&input, &packed).unwrap(), 1);

        let reader = crate::IdzipReader::new(File::open(&packed).unwrap()).unwrap();
        assert_eq!(reader.basename(), Some(&b"log.txt"[..]));

        fs::remove_file(&input).unwrap();
        let restored = decompress_file(&packed, None).unwrap();
        assert_eq!(restored, input);
        assert_eq!(fs::read(&restored).unwrap(), data);
    }

    #[test]
    fn decompress_file_needs_suffix() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("noext");
        fs::write(&input, compress(b"x").unwrap()).unwrap();
        assert!(matches!(
            decompress_file(&input, None),
            Err(Error::Unsupported(_))
        ));
    }
}
