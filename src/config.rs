//! Build configuration and validation.
//!
//! `BuildConfig` is the immutable input to a single build: one source tree in,
//! one (deliberately noisy) ZIP out. The CLI and any embedding front-end
//! construct it, `validate()` rejects out-of-range knobs before any I/O
//! happens.

use std::path::PathBuf;

use clap::ValueEnum;
use serde::Deserialize;

use crate::error::ArchiveError;

/// Payload compression method for archive members.
#[derive(ValueEnum, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Raw DEFLATE streams (ZIP method 8).
    Deflate,
    /// No compression (ZIP method 0).
    Store,
}

/// Filename encoding for archive members.
#[derive(ValueEnum, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 names, general-purpose flag bit 11 set.
    #[value(name = "utf-8", alias = "utf8")]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// Windows-1251 names, flag bit 11 clear. Historically common for
    /// Cyrillic archives and the reason the recovery side carries a
    /// code-page heuristic.
    #[value(name = "cp1251")]
    #[serde(rename = "cp1251")]
    Cp1251,
}

/// DEFLATE strategy knob. Only `Default` and `Huffman` change the output;
/// the remaining values are accepted for compatibility and ignored with a
/// warning.
#[derive(ValueEnum, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Default,
    Filtered,
    Huffman,
    Rle,
    Fixed,
}

impl Strategy {
    /// True for strategies that are accepted but have no effect.
    pub fn is_ignored(self) -> bool {
        !matches!(self, Strategy::Default | Strategy::Huffman)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Default => "default",
            Strategy::Filtered => "filtered",
            Strategy::Huffman => "huffman",
            Strategy::Rle => "rle",
            Strategy::Fixed => "fixed",
        }
    }
}

/// All options for one archive build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// The directory tree to pack.
    pub src_dir: PathBuf,
    /// The output ZIP path. If it lies inside `src_dir` it is excluded from
    /// the walk.
    pub out_zip: PathBuf,
    pub compression: Compression,
    pub encoding: Encoding,
    /// When set, local headers carry zeroed sizes (CRC patched afterwards),
    /// data descriptors follow every payload, and a poison tail with a fake
    /// EOCD is appended after the real one.
    pub overwrite_central_dir: bool,
    /// Bytes of RNG junk advertised as the archive comment (0..=65535).
    pub comment_size: u32,
    /// Collapse all member timestamps to 1980-01-01 00:00:00 local.
    pub fixed_time: bool,
    /// Number of synthetic `.junk/` entries appended after the real tree.
    pub noise_files: u32,
    /// Uncompressed size of each noise entry's payload.
    pub noise_size: u32,
    /// DEFLATE level, 0..=9.
    pub level: u32,
    pub strategy: Strategy,
    /// Worker threads for per-file compression, at least 1.
    pub workers: usize,
    /// Seed for the noise RNG. `None` draws from the OS RNG; `Some` makes
    /// the whole build bit-reproducible.
    pub seed: Option<i64>,
    pub include_hidden: bool,
}

impl BuildConfig {
    /// A quiet configuration that produces a plain, honest ZIP. Used by the
    /// recovery path to rebuild the recovered tree.
    pub fn clean(src_dir: PathBuf, out_zip: PathBuf) -> Self {
        BuildConfig {
            src_dir,
            out_zip,
            compression: Compression::Deflate,
            encoding: Encoding::Utf8,
            overwrite_central_dir: false,
            comment_size: 0,
            fixed_time: false,
            noise_files: 0,
            noise_size: 0,
            level: 6,
            strategy: Strategy::Default,
            workers: num_cpus::get(),
            seed: None,
            include_hidden: false,
        }
    }

    /// Rejects out-of-range options up front so a build never fails halfway
    /// through on a bad knob.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.comment_size > 0xffff {
            return Err(ArchiveError::Config(format!(
                "comment-size must be in range 0..65535, got {}",
                self.comment_size
            )));
        }
        if self.level > 9 {
            return Err(ArchiveError::Config(format!(
                "level must be in range 0..9, got {}",
                self.level
            )));
        }
        if self.workers < 1 {
            return Err(ArchiveError::Config("workers must be >= 1".to_string()));
        }
        Ok(())
    }
}
