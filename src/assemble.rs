//! ZIP container assembly.
//!
//! Writes local headers, payloads, the central directory, the EOCD, and the
//! deliberately hostile extras: zeroed local sizes with data descriptors,
//! comment junk, and a poison tail carrying a fake EOCD. The central
//! directory always tells the truth; in overwrite mode the local headers do
//! not.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::compress::CHUNK_SIZE;
use crate::entry::Entry;
use crate::error::ArchiveError;
use crate::noise::NoiseRng;

pub(crate) const SIG_LOCAL: u32 = 0x0403_4B50;
pub(crate) const SIG_CENTRAL: u32 = 0x0201_4B50;
pub(crate) const SIG_EOCD: u32 = 0x0605_4B50;
pub(crate) const SIG_DATA_DESCRIPTOR: u32 = 0x0807_4B50;

/// General-purpose flag bit 3: sizes live in a trailing data descriptor.
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

const VERSION_NEEDED: u16 = 20;
const VERSION_MADE_BY: u16 = 20;

pub(crate) const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const DATA_DESCRIPTOR_LEN: usize = 16;

/// Offset of the CRC field inside a local header, for the post-payload patch.
const LOCAL_CRC_OFFSET: u64 = 14;

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Assembles the archive at `out_zip` from sealed entries, in entry order.
///
/// With `overwrite_central_dir` set, each local header is written with
/// zeroed CRC/sizes, the CRC alone is patched back in after the payload, and
/// a 16-byte data descriptor follows; the poison tail goes after the real
/// EOCD. The RNG supplies comment junk and tail bytes, in that order.
pub fn write_archive(
    out_zip: &Path,
    entries: &mut [Entry],
    overwrite_central_dir: bool,
    comment_size: u16,
    rng: &mut NoiseRng,
) -> Result<(), ArchiveError> {
    if let Some(parent) = out_zip.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(e, parent))?;
        }
    }
    let mut out = File::create(out_zip).map_err(|e| ArchiveError::io(e, out_zip))?;
    let err = |e: std::io::Error| ArchiveError::io(e, out_zip);

    for entry in entries.iter_mut() {
        if overwrite_central_dir {
            entry.gp_flags |= FLAG_DATA_DESCRIPTOR;
        }
        entry.local_offset = out.stream_position().map_err(err)? as u32;

        if overwrite_central_dir {
            write_local_header(&mut out, entry, 0, 0, 0).map_err(err)?;
        } else {
            write_local_header(
                &mut out,
                entry,
                entry.crc32,
                entry.compressed_size,
                entry.uncompressed_size,
            )
            .map_err(err)?;
        }
        out.write_all(&entry.name_bytes).map_err(err)?;
        copy_payload(&mut out, entry.payload_path())?;

        if overwrite_central_dir {
            patch_local_crc(&mut out, entry.local_offset as u64, entry.crc32).map_err(err)?;
            write_data_descriptor(&mut out, entry).map_err(err)?;
        }
    }

    let cd_start = out.stream_position().map_err(err)?;
    for entry in entries.iter() {
        write_central_header(&mut out, entry).map_err(err)?;
        out.write_all(&entry.name_bytes).map_err(err)?;
    }
    let cd_end = out.stream_position().map_err(err)?;

    write_eocd(
        &mut out,
        entries.len() as u16,
        (cd_end - cd_start) as u32,
        cd_start as u32,
        comment_size,
    )
    .map_err(err)?;

    if comment_size > 0 {
        write_rand(&mut out, rng, comment_size as usize).map_err(err)?;
    }
    if overwrite_central_dir {
        write_poison_tail(&mut out, rng).map_err(err)?;
    }

    out.flush().map_err(err)?;
    Ok(())
}

fn write_local_header(
    w: &mut impl Write,
    entry: &Entry,
    crc32: u32,
    csize: u32,
    usize: u32,
) -> std::io::Result<()> {
    let mut buf = [0u8; LOCAL_HEADER_LEN];
    put_u32(&mut buf, 0, SIG_LOCAL);
    put_u16(&mut buf, 4, VERSION_NEEDED);
    put_u16(&mut buf, 6, entry.gp_flags);
    put_u16(&mut buf, 8, entry.method);
    put_u16(&mut buf, 10, entry.dos_time);
    put_u16(&mut buf, 12, entry.dos_date);
    put_u32(&mut buf, 14, crc32);
    put_u32(&mut buf, 18, csize);
    put_u32(&mut buf, 22, usize);
    put_u16(&mut buf, 26, entry.name_bytes.len() as u16);
    put_u16(&mut buf, 28, 0); // extra length
    w.write_all(&buf)
}

fn write_central_header(w: &mut impl Write, entry: &Entry) -> std::io::Result<()> {
    let mut buf = [0u8; CENTRAL_HEADER_LEN];
    put_u32(&mut buf, 0, SIG_CENTRAL);
    put_u16(&mut buf, 4, VERSION_MADE_BY);
    put_u16(&mut buf, 6, VERSION_NEEDED);
    put_u16(&mut buf, 8, entry.gp_flags);
    put_u16(&mut buf, 10, entry.method);
    put_u16(&mut buf, 12, entry.dos_time);
    put_u16(&mut buf, 14, entry.dos_date);
    put_u32(&mut buf, 16, entry.crc32);
    put_u32(&mut buf, 20, entry.compressed_size);
    put_u32(&mut buf, 24, entry.uncompressed_size);
    put_u16(&mut buf, 28, entry.name_bytes.len() as u16);
    // extra, comment, disk start, internal attrs: all zero
    put_u32(&mut buf, 38, 0); // external attrs
    put_u32(&mut buf, 42, entry.local_offset);
    w.write_all(&buf)
}

fn write_eocd(
    w: &mut impl Write,
    count: u16,
    cd_size: u32,
    cd_offset: u32,
    comment_len: u16,
) -> std::io::Result<()> {
    let mut buf = [0u8; EOCD_LEN];
    put_u32(&mut buf, 0, SIG_EOCD);
    put_u16(&mut buf, 4, 0); // disk number
    put_u16(&mut buf, 6, 0); // disk with central directory
    put_u16(&mut buf, 8, count);
    put_u16(&mut buf, 10, count);
    put_u32(&mut buf, 12, cd_size);
    put_u32(&mut buf, 16, cd_offset);
    put_u16(&mut buf, 20, comment_len);
    w.write_all(&buf)
}

fn write_data_descriptor(w: &mut impl Write, entry: &Entry) -> std::io::Result<()> {
    let mut buf = [0u8; DATA_DESCRIPTOR_LEN];
    put_u32(&mut buf, 0, SIG_DATA_DESCRIPTOR);
    put_u32(&mut buf, 4, entry.crc32);
    put_u32(&mut buf, 8, entry.compressed_size);
    put_u32(&mut buf, 12, entry.uncompressed_size);
    w.write_all(&buf)
}

/// Rewrites the CRC field of an already-written local header, leaving the
/// zeroed size fields alone.
fn patch_local_crc(out: &mut File, header_offset: u64, crc32: u32) -> std::io::Result<()> {
    let cur = out.stream_position()?;
    out.seek(SeekFrom::Start(header_offset + LOCAL_CRC_OFFSET))?;
    out.write_all(&crc32.to_le_bytes())?;
    out.seek(SeekFrom::Start(cur))?;
    Ok(())
}

/// A tail designed to mislead parsers that scan backwards for the EOCD
/// magic: random bytes, then a fake EOCD pointing at an impossible central
/// directory, then more random bytes so the fake is not the trailing record
/// either.
fn write_poison_tail(w: &mut impl Write, rng: &mut NoiseRng) -> std::io::Result<()> {
    write_rand(w, rng, 32)?;
    let mut buf = [0u8; EOCD_LEN];
    put_u32(&mut buf, 0, SIG_EOCD);
    put_u32(&mut buf, 12, 0x8000_0000); // cd_size
    put_u32(&mut buf, 16, 0xFFFF_FFFF); // cd_offset
    w.write_all(&buf)?;
    write_rand(w, rng, 96)
}

fn write_rand(w: &mut impl Write, rng: &mut NoiseRng, size: usize) -> std::io::Result<()> {
    let mut buf = vec![0u8; size];
    rng.fill(&mut buf);
    w.write_all(&buf)
}

fn copy_payload(out: &mut File, payload: &Path) -> Result<(), ArchiveError> {
    let mut src = File::open(payload).map_err(|e| ArchiveError::io(e, payload))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf).map_err(|e| ArchiveError::io(e, payload))?;
        if n == 0 {
            return Ok(());
        }
        out.write_all(&buf[..n])?;
    }
}
