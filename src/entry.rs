//! Building sealed archive entries with staged payloads.
//!
//! Each entry stages its (possibly compressed) payload into a temp file that
//! the entry owns until the assembler has copied it into the archive. The
//! temp file is removed when the entry is dropped, so every error path gets
//! cleanup for free.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, Local, Timelike};
use tempfile::{NamedTempFile, TempPath};

use crate::codec;
use crate::compress::{StageSink, CHUNK_SIZE};
use crate::config::{BuildConfig, Compression, Encoding, Strategy};
use crate::error::ArchiveError;
use crate::noise::NoiseRng;

pub const METHOD_STORE: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

/// DOS-packed 1980-01-01 00:00:00, the floor every earlier (or fixed)
/// timestamp collapses to.
pub const DOS_EPOCH_TIME: u16 = 0;
pub const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;

/// One sealed archive member, ready for assembly.
///
/// `crc32` and both sizes are final; `local_offset` is filled in by the
/// assembler when the local header is written.
pub struct Entry {
    pub name_bytes: Vec<u8>,
    pub gp_flags: u16,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub local_offset: u32,
    payload: TempPath,
}

impl Entry {
    /// Path of the staged payload bytes. Owned by the entry; the file is
    /// unlinked when the entry is dropped.
    pub fn payload_path(&self) -> &Path {
        &self.payload
    }
}

/// Per-entry knobs shared by every builder invocation of one build.
#[derive(Debug, Copy, Clone)]
pub struct EntryOptions {
    pub encoding: Encoding,
    pub method: u16,
    pub level: u32,
    pub huffman_only: bool,
    pub fixed_time: bool,
}

impl EntryOptions {
    pub fn from_config(cfg: &BuildConfig) -> Self {
        EntryOptions {
            encoding: cfg.encoding,
            method: match cfg.compression {
                Compression::Deflate => METHOD_DEFLATE,
                Compression::Store => METHOD_STORE,
            },
            level: cfg.level,
            huffman_only: cfg.strategy == Strategy::Huffman,
            fixed_time: cfg.fixed_time,
        }
    }
}

/// Packs a timestamp into the MS-DOS 16+16 bit format. Times before 1980
/// (or any time when `fixed` is set) collapse to the DOS epoch.
pub fn dos_time_date(mtime: SystemTime, fixed: bool) -> (u16, u16) {
    let local: DateTime<Local> = DateTime::from(mtime);
    if fixed || local.year() < 1980 {
        return (DOS_EPOCH_TIME, DOS_EPOCH_DATE);
    }
    let time = ((local.hour() as u16) << 11)
        | ((local.minute() as u16) << 5)
        | (local.second() as u16 / 2);
    let date = (((local.year() - 1980) as u16) << 9)
        | ((local.month() as u16) << 5)
        | (local.day() as u16);
    (time, date)
}

/// Builds a sealed entry from a real source file, streaming its bytes
/// through CRC/size accounting and (optionally) DEFLATE into a temp file.
pub fn build_file_entry(
    opts: &EntryOptions,
    path: &Path,
    rel: &str,
    mtime: SystemTime,
) -> Result<Entry, ArchiveError> {
    let (name_bytes, gp_flags) = codec::encode_name(rel, opts.encoding)?;
    let (dos_time, dos_date) = dos_time_date(mtime, opts.fixed_time);

    let (tmp_file, payload) = NamedTempFile::new()?.into_parts();
    let mut sink =
        StageSink::new(tmp_file, opts.method == METHOD_DEFLATE, opts.level, opts.huffman_only);

    let mut src = File::open(path).map_err(|e| ArchiveError::io(e, path))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf).map_err(|e| ArchiveError::io(e, path))?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).map_err(|e| ArchiveError::io(e, &*payload))?;
    }
    let (stats, _file) = sink.finish().map_err(|e| ArchiveError::io(e, &*payload))?;

    Ok(Entry {
        name_bytes,
        gp_flags,
        method: opts.method,
        dos_time,
        dos_date,
        crc32: stats.crc32,
        compressed_size: stats.compressed_size,
        uncompressed_size: stats.uncompressed_size,
        local_offset: 0,
        payload,
    })
}

/// Builds a synthetic noise entry whose payload is `size` RNG bytes.
/// The caller draws the name (and its hex suffix) first so the RNG stream
/// order stays `name, payload` per entry.
pub fn build_noise_entry(
    opts: &EntryOptions,
    rng: &mut NoiseRng,
    name: &str,
    size: u32,
) -> Result<Entry, ArchiveError> {
    let (name_bytes, gp_flags) = codec::encode_name(name, opts.encoding)?;
    // Noise pretends to be from the Unix epoch, which predates 1980 and so
    // always collapses to the DOS floor.
    let (dos_time, dos_date) = dos_time_date(UNIX_EPOCH, opts.fixed_time);

    let (tmp_file, payload) = NamedTempFile::new()?.into_parts();
    let mut sink =
        StageSink::new(tmp_file, opts.method == METHOD_DEFLATE, opts.level, opts.huffman_only);

    let mut buf = vec![0u8; CHUNK_SIZE.min(size.max(1) as usize)];
    let mut remaining = size as usize;
    while remaining > 0 {
        let n = remaining.min(buf.len());
        rng.fill(&mut buf[..n]);
        sink.write_all(&buf[..n]).map_err(|e| ArchiveError::io(e, &*payload))?;
        remaining -= n;
    }
    let (stats, _file) = sink.finish().map_err(|e| ArchiveError::io(e, &*payload))?;

    Ok(Entry {
        name_bytes,
        gp_flags,
        method: opts.method,
        dos_time,
        dos_date,
        crc32: stats.crc32,
        compressed_size: stats.compressed_size,
        uncompressed_size: stats.uncompressed_size,
        local_offset: 0,
        payload,
    })
}
