//! Unified error types for foxel-ebook
//!
//! Provides a top-level `EpubError` covering the load pipeline, plus the
//! `CorruptionKind` detail for ZIP failures and `From` impls so `?` works
//! across module boundaries.

use std::fmt;

use crate::cursor::OutOfBounds;

/// Top-level error type for foxel-ebook operations
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EpubError {
    /// Bad or missing ZIP structures, truncated buffer
    CorruptArchive {
        /// Archive member being read when the failure happened, if any.
        entry: Option<String>,
        /// What exactly was wrong.
        kind: CorruptionKind,
    },
    /// Missing or invalid `container.xml` / OPF, missing required references
    MalformedPackage(String),
    /// Unknown compression method, ZIP64, or a capability compiled out
    UnsupportedFeature(String),
    /// A referenced stylesheet, image or spine document is absent from the archive
    ResourceNotFound {
        /// Archive path that was looked up.
        path: String,
    },
    /// Markup could not be parsed
    Markup(String),
    /// Reading the input file failed
    Io(String),
}

impl EpubError {
    /// Build a `CorruptArchive` error not tied to a specific member.
    pub fn corrupt(kind: CorruptionKind) -> Self {
        EpubError::CorruptArchive { entry: None, kind }
    }

    /// Attach the member name to a `CorruptArchive` error.
    ///
    /// Other variants are returned unchanged.
    pub fn in_entry(self, name: &str) -> Self {
        match self {
            EpubError::CorruptArchive { entry: None, kind } => EpubError::CorruptArchive {
                entry: Some(name.to_string()),
                kind,
            },
            other => other,
        }
    }

    /// Whether the pipeline may skip the failing reference and continue.
    pub fn is_soft(&self) -> bool {
        matches!(self, EpubError::ResourceNotFound { .. })
    }
}

impl fmt::Display for EpubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpubError::CorruptArchive {
                entry: Some(entry),
                kind,
            } => write!(f, "Corrupt archive ({}): {}", entry, kind),
            EpubError::CorruptArchive { entry: None, kind } => {
                write!(f, "Corrupt archive: {}", kind)
            }
            EpubError::MalformedPackage(msg) => write!(f, "Malformed package: {}", msg),
            EpubError::UnsupportedFeature(msg) => write!(f, "Unsupported feature: {}", msg),
            EpubError::ResourceNotFound { path } => {
                write!(f, "Resource not found in archive: {}", path)
            }
            EpubError::Markup(msg) => write!(f, "Markup error: {}", msg),
            EpubError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for EpubError {}

impl From<std::io::Error> for EpubError {
    fn from(err: std::io::Error) -> Self {
        EpubError::Io(err.to_string())
    }
}

/// ZIP-level corruption details
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CorruptionKind {
    /// No end-of-central-directory record in the scanned tail
    MissingEndOfCentralDirectory,
    /// Central directory range lies outside the buffer
    CentralDirectoryOutOfRange,
    /// A central directory record did not start with `0x02014b50`
    BadCentralDirectorySignature {
        /// Byte offset of the bad record.
        offset: usize,
    },
    /// The local file header did not start with `0x04034b50`
    BadLocalHeaderSignature {
        /// Byte offset the central directory pointed at.
        offset: usize,
    },
    /// A read ran past the end of the buffer
    Truncated {
        /// Offset of the attempted read.
        offset: usize,
        /// Number of bytes requested.
        needed: usize,
    },
    /// DEFLATE stream was invalid
    DecompressFailed,
    /// Inflated length disagrees with the central directory
    SizeMismatch {
        /// Size declared in the central directory.
        expected: u32,
        /// Size actually produced.
        actual: usize,
    },
    /// CRC32 of the extracted data does not match
    CrcMismatch,
    /// Entry exceeds the configured size limit
    EntryTooLarge {
        /// Declared size.
        size: u32,
        /// Configured cap.
        limit: usize,
    },
}

impl fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptionKind::MissingEndOfCentralDirectory => {
                write!(f, "end of central directory not found")
            }
            CorruptionKind::CentralDirectoryOutOfRange => {
                write!(f, "central directory lies outside the archive")
            }
            CorruptionKind::BadCentralDirectorySignature { offset } => {
                write!(f, "bad central directory signature at offset {}", offset)
            }
            CorruptionKind::BadLocalHeaderSignature { offset } => {
                write!(f, "bad local file header signature at offset {}", offset)
            }
            CorruptionKind::Truncated { offset, needed } => write!(
                f,
                "truncated data: needed {} bytes at offset {}",
                needed, offset
            ),
            CorruptionKind::DecompressFailed => write!(f, "decompression failed"),
            CorruptionKind::SizeMismatch { expected, actual } => write!(
                f,
                "size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            CorruptionKind::CrcMismatch => write!(f, "CRC32 checksum mismatch"),
            CorruptionKind::EntryTooLarge { size, limit } => {
                write!(f, "entry of {} bytes exceeds limit of {}", size, limit)
            }
        }
    }
}

impl From<OutOfBounds> for EpubError {
    fn from(err: OutOfBounds) -> Self {
        EpubError::corrupt(CorruptionKind::Truncated {
            offset: err.offset,
            needed: err.needed,
        })
    }
}

impl From<quick_xml::Error> for EpubError {
    fn from(err: quick_xml::Error) -> Self {
        EpubError::Markup(err.to_string())
    }
}
