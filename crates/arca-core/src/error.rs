use std::fmt;

use arca_domain::{ContentHash, DownloadHash};

/// Why one download source was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceFailureKind {
    Fetch(String),
    DownloadHashMismatch {
        expected: DownloadHash,
        actual: DownloadHash,
    },
    Extract(String),
    TreeHashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
    Cancelled,
}

/// One rejected download source, kept for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFailure {
    pub url: String,
    pub kind: SourceFailureKind,
}

impl SourceFailure {
    pub(crate) fn new(url: &str, kind: SourceFailureKind) -> Self {
        Self {
            url: url.to_string(),
            kind,
        }
    }

    /// The bytes arrived but did not verify against the expected hashes.
    #[must_use]
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self.kind,
            SourceFailureKind::DownloadHashMismatch { .. } | SourceFailureKind::TreeHashMismatch { .. }
        )
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SourceFailureKind::Fetch(reason) => write!(f, "{}: fetch failed: {reason}", self.url),
            SourceFailureKind::DownloadHashMismatch { expected, actual } => write!(
                f,
                "{}: download hash mismatch (expected {expected}, found {actual})",
                self.url
            ),
            SourceFailureKind::Extract(reason) => {
                write!(f, "{}: extraction failed: {reason}", self.url)
            }
            SourceFailureKind::TreeHashMismatch { expected, actual } => write!(
                f,
                "{}: unpacked tree hash mismatch (expected {expected}, found {actual})",
                self.url
            ),
            SourceFailureKind::Cancelled => write!(f, "{}: cancelled", self.url),
        }
    }
}

fn summarize(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by the store, installer and resolver.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("[AR200] artifact {hash} is not installed and has no download sources")]
    NotInstallable { hash: ContentHash },
    #[error("[AR210] every download source for {hash} failed: {}", summarize(.failures))]
    AllSourcesFailed {
        hash: ContentHash,
        failures: Vec<SourceFailure>,
    },
    #[error("[AR220] installation of {hash} was cancelled")]
    Cancelled {
        hash: ContentHash,
        failures: Vec<SourceFailure>,
    },
    #[error("[AR230] artifact {hash} is not installed")]
    MissingArtifact { hash: ContentHash },
    #[error("[AR240] artifact store write failed: {0}")]
    StoreWriteFailure(String),
    #[error("[AR250] artifact '{name}' is not bound in the manifest")]
    Unbound { name: String },
    #[error("[AR260] artifact '{name}' has no entry matching host {host}")]
    PlatformUnresolved { name: String, host: String },
}

impl ArtifactError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInstallable { .. } => "AR200",
            Self::AllSourcesFailed { .. } => "AR210",
            Self::Cancelled { .. } => "AR220",
            Self::MissingArtifact { .. } => "AR230",
            Self::StoreWriteFailure(_) => "AR240",
            Self::Unbound { .. } => "AR250",
            Self::PlatformUnresolved { .. } => "AR260",
        }
    }

    /// Per-source diagnostics, empty for errors that never reached a source.
    #[must_use]
    pub fn source_failures(&self) -> &[SourceFailure] {
        match self {
            Self::AllSourcesFailed { failures, .. } | Self::Cancelled { failures, .. } => failures,
            _ => &[],
        }
    }
}

pub(crate) fn store_write_error(err: anyhow::Error) -> anyhow::Error {
    if err.is::<ArtifactError>() {
        err
    } else {
        ArtifactError::StoreWriteFailure(format!("{err:#}")).into()
    }
}
