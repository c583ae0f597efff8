//! Streaming payload transforms.
//!
//! Payloads are staged through a stack of small write-through adaptors:
//! a CRC-32 + size accountant above the compressor, a plain byte counter
//! below it. Compression is raw DEFLATE (no zlib framing) produced by
//! `miniz_oxide`'s streaming compressor, which, unlike the `flate2`
//! convenience wrappers, exposes the Huffman-only strategy.

use std::io::{self, Write};

use miniz_oxide::deflate::core::{
    create_comp_flags_from_zip_params, CompressionStrategy, CompressorOxide,
};
use miniz_oxide::deflate::stream::deflate;
use miniz_oxide::{MZFlush, MZStatus};

/// Chunk size for all streaming copies.
pub const CHUNK_SIZE: usize = 1 << 20; // 1 MiB

/// Raw DEFLATE window: 32 KiB, negative selects no zlib header.
const RAW_WINDOW_BITS: i32 = -15;

/// Counts bytes written through it. The counter wraps at 32 bits; archives
/// past 4 GiB are out of scope and the on-disk size fields are u32 anyway.
pub struct CountingWriter<W: Write> {
    inner: W,
    count: u32,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        CountingWriter { inner, count: 0 }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn into_inner(self) -> (u32, W) {
        (self.count, self.inner)
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count = self.count.wrapping_add(n as u32);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write-through adaptor computing the IEEE CRC-32 and uncompressed byte
/// count of everything passing through, then forwarding to an inner sink.
pub struct CrcSizeWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
    count: u32,
}

impl<W: Write> CrcSizeWriter<W> {
    pub fn new(inner: W) -> Self {
        CrcSizeWriter { inner, hasher: crc32fast::Hasher::new(), count: 0 }
    }

    /// Finishes accounting and returns `(crc32, byte_count, inner)`.
    pub fn finish(self) -> (u32, u32, W) {
        (self.hasher.finalize(), self.count, self.inner)
    }
}

impl<W: Write> Write for CrcSizeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.count = self.count.wrapping_add(n as u32);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming raw-DEFLATE encoder over any `Write` sink.
pub struct DeflateWriter<W: Write> {
    inner: W,
    state: Box<CompressorOxide>,
    buf: Vec<u8>,
}

impl<W: Write> DeflateWriter<W> {
    /// `level` is the usual 0..=9; `huffman_only` disables the match finder
    /// entirely (literals + Huffman coding only).
    pub fn new(inner: W, level: u32, huffman_only: bool) -> Self {
        let strategy = if huffman_only {
            CompressionStrategy::HuffmanOnly
        } else {
            CompressionStrategy::Default
        };
        let flags =
            create_comp_flags_from_zip_params(level as i32, RAW_WINDOW_BITS, strategy as i32);
        DeflateWriter {
            inner,
            state: Box::new(CompressorOxide::new(flags)),
            buf: vec![0u8; 64 * 1024],
        }
    }

    /// Flushes the final DEFLATE block and returns the inner sink.
    pub fn finish(mut self) -> io::Result<W> {
        loop {
            let res = deflate(&mut self.state, &[], &mut self.buf, MZFlush::Finish);
            if res.bytes_written > 0 {
                self.inner.write_all(&self.buf[..res.bytes_written])?;
            }
            match res.status {
                Ok(MZStatus::StreamEnd) => break,
                Ok(_) if res.bytes_written > 0 => {}
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "deflate finish made no progress",
                    ))
                }
                Err(_) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "deflate stream error"))
                }
            }
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for DeflateWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut consumed = 0;
        while consumed < data.len() {
            let res = deflate(&mut self.state, &data[consumed..], &mut self.buf, MZFlush::None);
            if res.bytes_written > 0 {
                self.inner.write_all(&self.buf[..res.bytes_written])?;
            }
            if res.status.is_err() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "deflate stream error"));
            }
            if res.bytes_consumed == 0 && res.bytes_written == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "deflate made no progress"));
            }
            consumed += res.bytes_consumed;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Final accounting of one staged payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PayloadStats {
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

/// The staging sink for one entry: either a straight copy or a DEFLATE
/// pipeline, with CRC/size accounting above the compressor and the
/// compressed-size counter below it.
pub enum StageSink<W: Write> {
    Store(CrcSizeWriter<W>),
    Deflate(CrcSizeWriter<DeflateWriter<CountingWriter<W>>>),
}

impl<W: Write> StageSink<W> {
    pub fn new(inner: W, deflate: bool, level: u32, huffman_only: bool) -> Self {
        if deflate {
            let counter = CountingWriter::new(inner);
            let encoder = DeflateWriter::new(counter, level, huffman_only);
            StageSink::Deflate(CrcSizeWriter::new(encoder))
        } else {
            StageSink::Store(CrcSizeWriter::new(inner))
        }
    }

    /// Seals the payload: flushes compression state and returns the final
    /// accounting plus the underlying sink.
    pub fn finish(self) -> io::Result<(PayloadStats, W)> {
        match self {
            StageSink::Store(crc) => {
                let (crc32, size, inner) = crc.finish();
                Ok((
                    PayloadStats { crc32, compressed_size: size, uncompressed_size: size },
                    inner,
                ))
            }
            StageSink::Deflate(crc) => {
                let (crc32, uncompressed_size, encoder) = crc.finish();
                let counter = encoder.finish()?;
                let (compressed_size, inner) = counter.into_inner();
                Ok((PayloadStats { crc32, compressed_size, uncompressed_size }, inner))
            }
        }
    }
}

impl<W: Write> Write for StageSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StageSink::Store(w) => w.write(buf),
            StageSink::Deflate(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StageSink::Store(w) => w.flush(),
            StageSink::Deflate(w) => w.flush(),
        }
    }
}
