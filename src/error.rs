use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("not an idzip stream: {0}")]
    Format(&'static str),
    #[error("unsupported random access version: {0}")]
    UnsupportedVersion(u16),
    #[error("truncated input: needed {needed} bytes, got {available}")]
    Truncated { needed: u64, available: u64 },
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("operation on a closed file")]
    Closed,
    #[error("writer stopped after a failed member; output is valid up to byte {valid_len}")]
    Aborted { valid_len: u64 },
    #[error("deflate error: {0}")]
    Deflate(#[from] flate2::CompressError),
    #[error("inflate error: {0}")]
    Inflate(#[from] flate2::DecompressError),
}

impl Error {
    /// True when the stream is well-formed I/O but lacks a usable random
    /// access header, so a plain sequential gzip decoder should be tried.
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format(_) | Error::UnsupportedVersion(_))
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(err) => err,
            Error::Truncated { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, value),
            Error::Unsupported(_) | Error::Closed => {
                io::Error::new(io::ErrorKind::Unsupported, value)
            }
            Error::Aborted { .. } => io::Error::new(io::ErrorKind::Other, value),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
