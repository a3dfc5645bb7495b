use std::fmt;
use std::str::FromStr;

/// Length in bytes of every digest handled by the manifest (SHA-256).
pub const DIGEST_LEN: usize = 32;

/// Errors raised when a hex digest cannot be decoded.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashParseError {
    #[error("expected {expected} hex characters, found {found}")]
    Length { expected: usize, found: usize },
    #[error("invalid hex digest '{0}'")]
    Encoding(String),
}

fn decode_digest(raw: &str) -> Result<[u8; DIGEST_LEN], HashParseError> {
    let trimmed = raw.trim();
    if trimmed.len() != DIGEST_LEN * 2 {
        return Err(HashParseError::Length {
            expected: DIGEST_LEN * 2,
            found: trimmed.len(),
        });
    }
    let mut out = [0u8; DIGEST_LEN];
    hex::decode_to_slice(trimmed, &mut out)
        .map_err(|_| HashParseError::Encoding(trimmed.to_string()))?;
    Ok(out)
}

/// Tree hash identifying the contents of an artifact directory.
///
/// This is the only key into the content store. Two directories with the
/// same files, modes and symlinks hash identically regardless of where they
/// were downloaded from.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; DIGEST_LEN]);

impl ContentHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Canonical lowercase hex encoding, also used as the store directory name.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_digest(s).map(Self)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

/// SHA-256 of the raw bytes served by a download source.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownloadHash([u8; DIGEST_LEN]);

impl DownloadHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for DownloadHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_digest(s).map(Self)
    }
}

impl fmt::Display for DownloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DownloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DownloadHash({})", self.to_hex())
    }
}
