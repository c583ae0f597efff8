//! Heuristic recovery of files from damaged or hostile ZIP archives.
//!
//! The central directory of the input is never consulted: it may be missing
//! entirely or actively lying. Instead the raw byte stream is scanned for local
//! file header magics, names are decoded across historical code pages, and
//! payload boundaries are found by bracket inflation where the stored sizes
//! cannot be trusted. Recovery is tolerant by design: a broken entry is
//! logged and skipped, never fatal. Only I/O failures on the staging
//! directory abort.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::debug;
use memchr::memmem;

use crate::assemble::{FLAG_DATA_DESCRIPTOR, LOCAL_HEADER_LEN, SIG_DATA_DESCRIPTOR};
use crate::codec;
use crate::config::{BuildConfig, Compression, Encoding, Strategy};
use crate::entry::{METHOD_DEFLATE, METHOD_STORE};
use crate::error::ArchiveError;
use crate::hooks::Hooks;
use crate::workers;

/// Local file header magic, as it appears on the wire.
const LOCAL_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// Upper bound on bracket-inflation attempts per entry, so a pathological
/// archive with millions of fake magics cannot pin the scanner.
const MAX_BRACKETS: usize = 20_000;

/// A local file header candidate parsed straight off the byte stream.
#[derive(Debug)]
struct LocalHeader {
    gp_flags: u16,
    method: u16,
    csize: u32,
    name: String,
    data_offset: usize,
}

fn le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn parse_local_header(buf: &[u8], off: usize) -> Option<LocalHeader> {
    if off + LOCAL_HEADER_LEN > buf.len() {
        return None;
    }
    let gp_flags = le16(buf, off + 6);
    let method = le16(buf, off + 8);
    let csize = le32(buf, off + 18);
    let name_len = le16(buf, off + 26) as usize;
    let extra_len = le16(buf, off + 28) as usize;

    let name_start = off + LOCAL_HEADER_LEN;
    let name_end = name_start.checked_add(name_len)?;
    let data_offset = name_end.checked_add(extra_len)?;
    if name_end > buf.len() || data_offset > buf.len() {
        return None;
    }

    let name = codec::decode_name(&buf[name_start..name_end], gp_flags)?;
    Some(LocalHeader { gp_flags, method, csize, name, data_offset })
}

/// Reduces a decoded name to a safe relative path: separators unified,
/// empty/`.`/`..` segments dropped. `None` when nothing usable remains.
fn safe_rel_path(name: &str) -> Option<PathBuf> {
    let unified = name.replace('\\', "/");
    let mut out = PathBuf::new();
    for segment in unified.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        out.push(segment);
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// True for our own synthetic noise entries, which are never worth
/// materialising.
fn is_junk_path(rel: &Path) -> bool {
    let mut components = rel.components();
    matches!(
        components.next().and_then(|c| c.as_os_str().to_str()),
        Some(".junk")
    )
}

fn inflate_raw(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::DeflateDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Finds the end of a DEFLATE stream whose stored length is untrusted, by
/// trying successively larger windows ending at later header candidates.
/// The decoder tolerates trailing bytes, so the first window containing the
/// whole stream succeeds; shorter windows fail with a truncation error.
fn inflate_incremental(
    buf: &[u8],
    start: usize,
    positions: &[usize],
    index: usize,
) -> Option<Vec<u8>> {
    let mut tries = 0;
    for &end in &positions[index + 1..] {
        if end > start {
            if let Ok(out) = inflate_raw(&buf[start..end]) {
                return Some(out);
            }
        }
        tries += 1;
        if tries > MAX_BRACKETS {
            break;
        }
    }
    if start < buf.len() {
        return inflate_raw(&buf[start..]).ok();
    }
    None
}

/// Delimits a stored payload whose sizes were zeroed out of the local
/// header. The writer always places a 16-byte data descriptor right behind
/// the payload, so the first descriptor signature whose sizes and CRC agree
/// with the bytes before it marks the end.
fn delimit_stored_by_descriptor(buf: &[u8], start: usize) -> Option<Vec<u8>> {
    let magic = SIG_DATA_DESCRIPTOR.to_le_bytes();
    let mut tries = 0;
    for pos in memmem::find_iter(&buf[start..], &magic) {
        let at = start + pos;
        if at + 16 > buf.len() {
            break;
        }
        let crc = le32(buf, at + 4);
        let csize = le32(buf, at + 8) as usize;
        let usize_field = le32(buf, at + 12) as usize;
        if at - start == csize && csize == usize_field && crc32fast::hash(&buf[start..at]) == crc
        {
            return Some(buf[start..at].to_vec());
        }
        tries += 1;
        if tries > MAX_BRACKETS {
            break;
        }
    }
    None
}

/// Scans `in_zip` for recoverable entries and writes them under `out_dir`.
/// Returns the number of files materialised.
pub fn recover_files(in_zip: &Path, out_dir: &Path, hooks: &Hooks) -> Result<usize, ArchiveError> {
    let buf = fs::read(in_zip).map_err(|e| ArchiveError::io(e, in_zip))?;

    let positions: Vec<usize> = memmem::find_iter(&buf, &LOCAL_MAGIC).collect();
    hooks.log(&format!("Found local headers: {}", positions.len()));

    let total = positions.len();
    let mut recovered = 0usize;
    for (index, &offset) in positions.iter().enumerate() {
        let header = parse_local_header(&buf, offset);
        let shown = header.as_ref().map(|h| h.name.as_str()).unwrap_or("");
        hooks.progress(index + 1, total, shown);
        let Some(header) = header else {
            debug!("offset {}: unreadable local header", offset);
            continue;
        };

        let Some(rel) = safe_rel_path(&header.name) else {
            debug!("offset {}: name {:?} sanitises to nothing", offset, header.name);
            continue;
        };
        if is_junk_path(&rel) {
            debug!("offset {}: skipping noise entry {:?}", offset, rel);
            continue;
        }

        let content = if header.method == METHOD_DEFLATE {
            // Stored sizes are unreliable; bracket the stream instead.
            inflate_incremental(&buf, header.data_offset, &positions, index)
        } else if header.method == METHOD_STORE {
            if header.gp_flags & FLAG_DATA_DESCRIPTOR != 0 {
                delimit_stored_by_descriptor(&buf, header.data_offset)
            } else {
                let end = header.data_offset + header.csize as usize;
                (end <= buf.len()).then(|| buf[header.data_offset..end].to_vec())
            }
        } else {
            debug!("offset {}: unsupported method {}", offset, header.method);
            None
        };
        let Some(content) = content else {
            debug!("offset {}: payload for {:?} could not be delimited", offset, rel);
            continue;
        };

        let target = out_dir.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(e, parent))?;
        }
        fs::write(&target, &content).map_err(|e| ArchiveError::io(e, &target))?;
        recovered += 1;
    }

    Ok(recovered)
}

/// Knobs for the clean rebuild that follows recovery.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub compression: Compression,
    pub encoding: Encoding,
    pub level: u32,
    pub strategy: Strategy,
    pub workers: usize,
    pub seed: Option<i64>,
    pub include_hidden: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        RebuildOptions {
            compression: Compression::Deflate,
            encoding: Encoding::Utf8,
            level: 6,
            strategy: Strategy::Default,
            workers: num_cpus::get(),
            seed: None,
            include_hidden: false,
        }
    }
}

/// Recovers `in_zip` into a temp staging tree, then feeds that tree back
/// through the build path with all noise disabled to emit a clean ZIP.
/// Returns `(recovered, rebuilt)` entry counts.
pub fn recover_to_zip(
    in_zip: &Path,
    out_zip: &Path,
    opts: &RebuildOptions,
    hooks: &Hooks,
) -> Result<(usize, usize), ArchiveError> {
    let staging = tempfile::tempdir()?;
    let recovered = recover_files(in_zip, staging.path(), hooks)?;

    let cfg = BuildConfig {
        src_dir: staging.path().to_path_buf(),
        out_zip: out_zip.to_path_buf(),
        compression: opts.compression,
        encoding: opts.encoding,
        overwrite_central_dir: false,
        comment_size: 0,
        fixed_time: false,
        noise_files: 0,
        noise_size: 0,
        level: opts.level,
        strategy: opts.strategy,
        workers: opts.workers,
        seed: opts.seed,
        include_hidden: opts.include_hidden,
    };
    let rebuilt = workers::build_archive(&cfg, &Hooks::none())?;
    Ok((recovered, rebuilt))
}
