//! In-memory ZIP reader for EPUB archives
//!
//! Builds a name-keyed index from the End-Of-Central-Directory record and the
//! central directory, then extracts single members on demand (stored or raw
//! DEFLATE via miniz_oxide). Extraction never caches; callers that need a
//! member twice keep the bytes themselves.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::cursor::ByteCursor;
use crate::error::{CorruptionKind, EpubError};

/// Local file header signature (little-endian)
pub(crate) const SIG_LOCAL_FILE_HEADER: u32 = 0x04034b50;

/// Central directory entry signature (little-endian)
pub(crate) const SIG_CD_ENTRY: u32 = 0x02014b50;

/// End of central directory signature (little-endian)
pub(crate) const SIG_EOCD: u32 = 0x06054b50;
/// ZIP64 end of central directory locator signature (little-endian)
const SIG_ZIP64_EOCD_LOCATOR: u32 = 0x07064b50;
/// Minimum EOCD record size in bytes
const EOCD_MIN_SIZE: usize = 22;
/// Maximum EOCD search window (EOCD + max comment length)
const MAX_EOCD_SCAN: usize = EOCD_MIN_SIZE + u16::MAX as usize;
/// Fixed part of a local file header
const LOCAL_HEADER_SIZE: usize = 30;

/// Compression methods
pub(crate) const METHOD_STORED: u16 = 0;
pub(crate) const METHOD_DEFLATED: u16 = 8;

/// Output chunk used while inflating
#[cfg(feature = "deflate")]
const INFLATE_CHUNK: usize = 32 * 1024;

/// Default cap for a single member (compressed or uncompressed)
const DEFAULT_MAX_ENTRY_SIZE: usize = 256 * 1024 * 1024;

/// Runtime-configurable ZIP safety limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZipLimits {
    /// Maximum compressed or uncompressed size allowed for one member.
    pub max_entry_size: usize,
    /// Maximum bytes scanned from the buffer tail while searching for EOCD.
    pub max_eocd_scan: usize,
    /// Whether extracted data is checked against the central directory CRC32.
    pub verify_crc: bool,
}

impl Default for ZipLimits {
    fn default() -> Self {
        Self {
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_eocd_scan: MAX_EOCD_SCAN,
            verify_crc: true,
        }
    }
}

impl ZipLimits {
    /// Create explicit ZIP limits.
    pub fn new(max_entry_size: usize) -> Self {
        Self {
            max_entry_size,
            ..Self::default()
        }
    }

    /// Set a cap for EOCD tail scan bytes.
    pub fn with_max_eocd_scan(mut self, max_eocd_scan: usize) -> Self {
        self.max_eocd_scan = max_eocd_scan.clamp(EOCD_MIN_SIZE, MAX_EOCD_SCAN);
        self
    }

    /// Enable or disable CRC32 verification of extracted members.
    pub fn with_crc_check(mut self, verify_crc: bool) -> Self {
        self.verify_crc = verify_crc;
        self
    }
}

/// Central directory entry metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntryMeta {
    /// Member name as stored in the central directory
    pub file_name: String,
    /// Compressed size in bytes
    pub compressed_size: u32,
    /// Uncompressed size in bytes
    pub uncompressed_size: u32,
    /// Compression method (0=stored, 8=deflated)
    pub compression_method: u16,
    /// Offset to local file header
    pub local_header_offset: u32,
    /// CRC32 checksum (0 when the writer did not record one)
    pub crc32: u32,
    /// General purpose bit flags
    pub flags: u16,
}

#[derive(Clone, Copy, Debug)]
struct EocdInfo {
    position: usize,
    cd_offset: usize,
    cd_size: usize,
    num_entries: u16,
}

/// Name-keyed view of an archive's central directory.
///
/// Iteration follows central-directory order; names are unique.
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    entries: Vec<ZipEntryMeta>,
    by_name: HashMap<String, usize>,
    /// Lowercased names without a leading `/`, first member wins.
    by_lower: HashMap<String, usize>,
    declared_entries: usize,
}

impl ArchiveIndex {
    /// Number of indexed members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no members.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Member count stated by the EOCD record.
    pub fn declared_entries(&self) -> usize {
        self.declared_entries
    }

    /// Look up a member by name.
    ///
    /// Exact match first, then tolerant fallbacks for sloppy writers: a
    /// leading `/`, ASCII case differences and percent-encoded names.
    pub fn get(&self, name: &str) -> Option<&ZipEntryMeta> {
        if let Some(&idx) = self.by_name.get(name) {
            return self.entries.get(idx);
        }
        let trimmed = name.trim_start_matches('/');
        if let Some(&idx) = self.by_name.get(trimmed) {
            return self.entries.get(idx);
        }
        if let Some(&idx) = self.by_lower.get(&trimmed.to_ascii_lowercase()) {
            return self.entries.get(idx);
        }
        let decoded = percent_encoding::percent_decode_str(trimmed).decode_utf8().ok()?;
        match decoded {
            Cow::Owned(decoded) => self.get(&decoded),
            Cow::Borrowed(_) => None,
        }
    }

    /// Whether a member with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over all entries in central-directory order.
    pub fn entries(&self) -> impl Iterator<Item = &ZipEntryMeta> {
        self.entries.iter()
    }

    /// Iterate over member names in central-directory order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.file_name.as_str())
    }

    fn insert(&mut self, entry: ZipEntryMeta) {
        match self.by_name.get(&entry.file_name) {
            Some(&idx) => {
                log::warn!(
                    "[ZIP] Duplicate member '{}'; keeping the later record",
                    entry.file_name
                );
                self.entries[idx] = entry;
            }
            None => {
                let idx = self.entries.len();
                self.by_name.insert(entry.file_name.clone(), idx);
                self.by_lower
                    .entry(lowercase_key(&entry.file_name))
                    .or_insert(idx);
                self.entries.push(entry);
            }
        }
    }
}

fn lowercase_key(name: &str) -> String {
    name.trim_start_matches('/').to_ascii_lowercase()
}

/// Parse the EOCD record and central directory of `data`.
pub fn build_index(data: &[u8]) -> Result<ArchiveIndex, EpubError> {
    build_index_with_limits(data, &ZipLimits::default())
}

/// Parse the EOCD record and central directory of `data` with explicit limits.
pub fn build_index_with_limits(data: &[u8], limits: &ZipLimits) -> Result<ArchiveIndex, EpubError> {
    let eocd = find_eocd(data, limits.max_eocd_scan.min(MAX_EOCD_SCAN))?;

    let mut index = ArchiveIndex {
        entries: Vec::with_capacity(eocd.num_entries as usize),
        by_name: HashMap::with_capacity(eocd.num_entries as usize),
        by_lower: HashMap::with_capacity(eocd.num_entries as usize),
        declared_entries: eocd.num_entries as usize,
    };

    let mut cursor = ByteCursor::at(data, eocd.cd_offset);
    for _ in 0..eocd.num_entries {
        let entry = read_cd_entry(&mut cursor)?;
        index.insert(entry);
    }

    log::debug!(
        "[ZIP] Parsed {} central directory entries (offset {}, size {}, eocd at {})",
        index.len(),
        eocd.cd_offset,
        eocd.cd_size,
        eocd.position
    );

    Ok(index)
}

/// Find EOCD and extract central directory info
fn find_eocd(data: &[u8], max_eocd_scan: usize) -> Result<EocdInfo, EpubError> {
    if data.len() < EOCD_MIN_SIZE {
        return Err(EpubError::corrupt(
            CorruptionKind::MissingEndOfCentralDirectory,
        ));
    }

    // The record is followed by a comment of unknown length, so scan backwards
    // through at most (EOCD + max comment) bytes.
    let last = data.len() - EOCD_MIN_SIZE;
    let first = data.len().saturating_sub(max_eocd_scan.max(EOCD_MIN_SIZE));

    for pos in (first..=last).rev() {
        let mut cursor = ByteCursor::at(data, pos);
        if cursor.read_u32_le()? != SIG_EOCD {
            continue;
        }
        cursor.skip(6)?; // disk numbers + entries on this disk
        let num_entries = cursor.read_u16_le()?;
        let cd_size = cursor.read_u32_le()?;
        let cd_offset = cursor.read_u32_le()?;
        let comment_len = cursor.read_u16_le()? as usize;
        if pos + EOCD_MIN_SIZE + comment_len > data.len() {
            // signature bytes inside some other payload
            continue;
        }

        let uses_zip64_locator = pos >= 20
            && ByteCursor::at(data, pos - 20).peek_u32_le()? == SIG_ZIP64_EOCD_LOCATOR;
        if num_entries == u16::MAX || cd_offset == u32::MAX || uses_zip64_locator {
            return Err(EpubError::UnsupportedFeature("ZIP64 archives".into()));
        }

        let cd_end = (cd_offset as usize)
            .checked_add(cd_size as usize)
            .ok_or_else(|| EpubError::corrupt(CorruptionKind::CentralDirectoryOutOfRange))?;
        if cd_end > pos {
            return Err(EpubError::corrupt(
                CorruptionKind::CentralDirectoryOutOfRange,
            ));
        }

        return Ok(EocdInfo {
            position: pos,
            cd_offset: cd_offset as usize,
            cd_size: cd_size as usize,
            num_entries,
        });
    }

    Err(EpubError::corrupt(
        CorruptionKind::MissingEndOfCentralDirectory,
    ))
}

/// Read one central directory record at the cursor.
fn read_cd_entry(cursor: &mut ByteCursor<'_>) -> Result<ZipEntryMeta, EpubError> {
    let offset = cursor.position();
    if cursor.read_u32_le()? != SIG_CD_ENTRY {
        return Err(EpubError::corrupt(
            CorruptionKind::BadCentralDirectorySignature { offset },
        ));
    }

    cursor.skip(4)?; // version made by + version needed
    let flags = cursor.read_u16_le()?;
    let compression_method = cursor.read_u16_le()?;
    cursor.skip(4)?; // mod time + mod date
    let crc32 = cursor.read_u32_le()?;
    let compressed_size = cursor.read_u32_le()?;
    let uncompressed_size = cursor.read_u32_le()?;
    let name_len = cursor.read_u16_le()? as usize;
    let extra_len = cursor.read_u16_le()? as usize;
    let comment_len = cursor.read_u16_le()? as usize;
    cursor.skip(8)?; // disk start + internal attrs + external attrs
    let local_header_offset = cursor.read_u32_le()?;

    let file_name = String::from_utf8_lossy(cursor.take(name_len)?).into_owned();
    cursor.skip(extra_len + comment_len)?;

    Ok(ZipEntryMeta {
        file_name,
        compressed_size,
        uncompressed_size,
        compression_method,
        local_header_offset,
        crc32,
        flags,
    })
}

/// Locate and decompress one member.
pub fn extract(data: &[u8], meta: &ZipEntryMeta) -> Result<Vec<u8>, EpubError> {
    extract_with_limits(data, meta, &ZipLimits::default())
}

/// Locate and decompress one member with explicit limits.
pub fn extract_with_limits(
    data: &[u8],
    meta: &ZipEntryMeta,
    limits: &ZipLimits,
) -> Result<Vec<u8>, EpubError> {
    extract_inner(data, meta, limits).map_err(|e| e.in_entry(&meta.file_name))
}

fn extract_inner(data: &[u8], meta: &ZipEntryMeta, limits: &ZipLimits) -> Result<Vec<u8>, EpubError> {
    for size in [meta.compressed_size, meta.uncompressed_size] {
        if size as usize > limits.max_entry_size {
            return Err(EpubError::corrupt(CorruptionKind::EntryTooLarge {
                size,
                limit: limits.max_entry_size,
            }));
        }
    }

    let compressed = entry_payload(data, meta)?;

    let bytes = match meta.compression_method {
        METHOD_STORED => compressed.to_vec(),
        METHOD_DEFLATED => inflate_raw(compressed, meta.uncompressed_size as usize)?,
        other => {
            return Err(EpubError::UnsupportedFeature(format!(
                "compression method {} in '{}'",
                other, meta.file_name
            )))
        }
    };

    if bytes.len() != meta.uncompressed_size as usize {
        return Err(EpubError::corrupt(CorruptionKind::SizeMismatch {
            expected: meta.uncompressed_size,
            actual: bytes.len(),
        }));
    }
    if limits.verify_crc && meta.crc32 != 0 && crc32fast::hash(&bytes) != meta.crc32 {
        return Err(EpubError::corrupt(CorruptionKind::CrcMismatch));
    }
    Ok(bytes)
}

/// Borrow the compressed bytes of a member (past its local header).
fn entry_payload<'a>(data: &'a [u8], meta: &ZipEntryMeta) -> Result<&'a [u8], EpubError> {
    let offset = meta.local_header_offset as usize;
    let mut cursor = ByteCursor::at(data, offset);

    if cursor.read_u32_le()? != SIG_LOCAL_FILE_HEADER {
        return Err(EpubError::corrupt(
            CorruptionKind::BadLocalHeaderSignature { offset },
        ));
    }
    cursor.skip(22)?; // version .. uncompressed size
    let name_len = cursor.read_u16_le()? as usize;
    let extra_len = cursor.read_u16_le()? as usize;

    // Data starts after local header + filename + extra field
    cursor.seek(offset + LOCAL_HEADER_SIZE + name_len + extra_len);
    Ok(cursor.take(meta.compressed_size as usize)?)
}

#[cfg(feature = "deflate")]
fn inflate_raw(compressed: &[u8], expected_len: usize) -> Result<Vec<u8>, EpubError> {
    use miniz_oxide::inflate::stream::{inflate, InflateState};
    use miniz_oxide::{DataFormat, MZFlush, MZStatus};

    let mut state = Box::new(InflateState::new(DataFormat::Raw));
    let mut output = Vec::with_capacity(expected_len);
    let mut chunk = vec![0u8; INFLATE_CHUNK];
    let mut pending = compressed;

    loop {
        let result = inflate(&mut state, pending, &mut chunk, MZFlush::None);
        let consumed = result.bytes_consumed;
        let produced = result.bytes_written;
        pending = &pending[consumed..];
        output.extend_from_slice(&chunk[..produced]);

        if output.len() > expected_len {
            return Err(EpubError::corrupt(CorruptionKind::SizeMismatch {
                expected: expected_len as u32,
                actual: output.len(),
            }));
        }

        match result.status {
            Ok(MZStatus::StreamEnd) => break,
            Ok(MZStatus::Ok) => {
                if consumed == 0 && produced == 0 {
                    return Err(EpubError::corrupt(CorruptionKind::DecompressFailed));
                }
            }
            Ok(MZStatus::NeedDict) | Err(_) => {
                return Err(EpubError::corrupt(CorruptionKind::DecompressFailed))
            }
        }
    }

    Ok(output)
}

#[cfg(not(feature = "deflate"))]
fn inflate_raw(_compressed: &[u8], _expected_len: usize) -> Result<Vec<u8>, EpubError> {
    Err(EpubError::UnsupportedFeature(
        "DEFLATE decompression is not available in this build".into(),
    ))
}

/// An archive buffer together with its index.
///
/// The index is complete before any member can be extracted.
#[derive(Debug, Clone)]
pub struct Archive<'a> {
    data: &'a [u8],
    index: ArchiveIndex,
    limits: ZipLimits,
}

impl<'a> Archive<'a> {
    /// Index `data` with default limits.
    pub fn open(data: &'a [u8]) -> Result<Self, EpubError> {
        Self::open_with_limits(data, ZipLimits::default())
    }

    /// Index `data` with explicit limits.
    pub fn open_with_limits(data: &'a [u8], limits: ZipLimits) -> Result<Self, EpubError> {
        let index = build_index_with_limits(data, &limits)?;
        Ok(Self {
            data,
            index,
            limits,
        })
    }

    /// Raw archive bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// The central directory index.
    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Active limits.
    pub fn limits(&self) -> &ZipLimits {
        &self.limits
    }

    /// Extract a member by name; an absent name is `ResourceNotFound`.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, EpubError> {
        let meta = self
            .index
            .get(name)
            .ok_or_else(|| EpubError::ResourceNotFound {
                path: name.to_string(),
            })?;
        extract_with_limits(self.data, meta, &self.limits)
    }
}
