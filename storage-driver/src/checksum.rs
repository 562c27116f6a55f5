use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{ready, Context, Poll};

use base64::Engine as _;
use md5::Digest as _;
use serde::{Deserialize, Serialize};
use tokio::io::{self, AsyncRead, ReadBuf};

/// Checksum algorithms which a driver can use to validate uploaded content.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// CRC32C (Castagnoli), the default.
    #[default]
    Crc32c,

    /// MD5 digest.
    Md5,
}

impl ChecksumAlgorithm {
    /// Lowercase name of the algorithm, as it appears in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc32c => "crc32c",
            ChecksumAlgorithm::Md5 => "md5",
        }
    }

    /// Start a new streaming hasher for this algorithm.
    pub fn hasher(self) -> Hasher {
        match self {
            ChecksumAlgorithm::Crc32c => Hasher(HasherState::Crc32c(0)),
            ChecksumAlgorithm::Md5 => Hasher(HasherState::Md5(md5::Md5::new())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown checksum algorithm name.
#[derive(Debug, thiserror::Error)]
#[error("unknown checksum algorithm: {0}")]
pub struct UnknownAlgorithm(String);

impl FromStr for ChecksumAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crc32c" => Ok(ChecksumAlgorithm::Crc32c),
            "md5" => Ok(ChecksumAlgorithm::Md5),
            _ => Err(UnknownAlgorithm(s.to_owned())),
        }
    }
}

/// A computed checksum, stored as the base64 encoding of the big-endian digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    value: String,
}

impl Checksum {
    /// Compute the checksum of an in-memory buffer.
    pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// The algorithm which produced this checksum.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// The base64 encoded digest.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

enum HasherState {
    Crc32c(u32),
    Md5(md5::Md5),
}

/// Incremental checksum state.
pub struct Hasher(HasherState);

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithm = match self.0 {
            HasherState::Crc32c(_) => ChecksumAlgorithm::Crc32c,
            HasherState::Md5(_) => ChecksumAlgorithm::Md5,
        };
        f.debug_tuple("Hasher").field(&algorithm).finish()
    }
}

impl Hasher {
    /// Feed more bytes into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.0 {
            HasherState::Crc32c(crc) => *crc = crc32c::crc32c_append(*crc, data),
            HasherState::Md5(digest) => digest.update(data),
        }
    }

    /// Finish hashing and produce the checksum.
    pub fn finalize(self) -> Checksum {
        let engine = base64::engine::general_purpose::STANDARD;
        match self.0 {
            HasherState::Crc32c(crc) => Checksum {
                algorithm: ChecksumAlgorithm::Crc32c,
                value: engine.encode(crc.to_be_bytes()),
            },
            HasherState::Md5(digest) => Checksum {
                algorithm: ChecksumAlgorithm::Md5,
                value: engine.encode(digest.finalize()),
            },
        }
    }
}

/// Wraps a reader and hashes every byte that passes through it.
///
/// When no algorithm is configured the reader only counts bytes.
#[derive(Debug)]
pub struct ChecksumReader<R> {
    inner: R,
    hasher: Option<Hasher>,
    length: u64,
}

impl<R> ChecksumReader<R> {
    /// Wrap `inner`, hashing with `algorithm` if one is given.
    pub fn new(inner: R, algorithm: Option<ChecksumAlgorithm>) -> Self {
        Self {
            inner,
            hasher: algorithm.map(ChecksumAlgorithm::hasher),
            length: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Consume the reader, returning the checksum of everything read.
    pub fn finish(self) -> Option<Checksum> {
        self.hasher.map(Hasher::finalize)
    }
}

impl<R> AsyncRead for ChecksumReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let fresh = &buf.filled()[before..];
        this.length += fresh.len() as u64;
        if let Some(hasher) = this.hasher.as_mut() {
            hasher.update(fresh);
        }
        Poll::Ready(Ok(()))
    }
}
