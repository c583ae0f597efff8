//! Command-line surface and JSON config-file merging.
//!
//! Flags that the user left unset fall back to values from an optional JSON
//! config file, then to built-in defaults, so `--config` supplies defaults
//! without ever overriding an explicit flag.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Deserializer};

use crate::config::{BuildConfig, Compression, Encoding, Strategy};
use crate::error::ArchiveError;
use crate::recover::RebuildOptions;

#[derive(Parser, Debug)]
#[command(author, version, about = "Noisy ZIP writer and heuristic recovery", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create a deliberately noisy ZIP archive from a directory tree.
    #[command(alias = "c")]
    Create(CreateArgs),

    /// Recover files from a damaged or hostile ZIP and rebuild a clean one.
    #[command(alias = "r")]
    Recover(RecoverArgs),
}

#[derive(clap::Args, Clone, Debug)]
pub struct CreateArgs {
    /// Input directory.
    #[arg(long)]
    pub src: Option<PathBuf>,

    /// Output ZIP path.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Compression method. [default: deflate]
    #[arg(long, value_enum, alias = "method")]
    pub compression: Option<Compression>,

    /// Filename encoding. [default: utf-8]
    #[arg(long, value_enum)]
    pub encoding: Option<Encoding>,

    /// Keep truthful sizes in local headers; no data descriptors or poison tail.
    #[arg(long = "no-overwrite-cdir")]
    pub no_overwrite_cdir: bool,

    /// ZIP comment junk size in bytes (0..=65535).
    #[arg(long)]
    pub comment_size: Option<u32>,

    /// Collapse all timestamps to 1980-01-01.
    #[arg(long)]
    pub fixed_time: bool,

    /// Number of synthetic noise entries.
    #[arg(long)]
    pub noise_files: Option<u32>,

    /// Uncompressed size of each noise entry in bytes.
    #[arg(long)]
    pub noise_size: Option<u32>,

    /// Deflate level (0-9). [default: 6]
    #[arg(long)]
    pub level: Option<u32>,

    /// Deflate strategy; only default and huffman have effect. [default: default]
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Worker threads. [default: CPU count]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Deterministic noise seed.
    #[arg(long, allow_negative_numbers = true)]
    pub seed: Option<i64>,

    /// Include hidden files and directories.
    #[arg(long)]
    pub include_hidden: bool,

    /// JSON config file supplying defaults for unset flags.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Clone, Debug)]
pub struct RecoverArgs {
    /// Input ZIP path.
    #[arg(long = "in")]
    pub input: Option<PathBuf>,

    /// Output ZIP path for the rebuilt archive.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Compression method for the rebuilt archive. [default: deflate]
    #[arg(long, value_enum, alias = "method")]
    pub compression: Option<Compression>,

    /// Filename encoding for the rebuilt archive. [default: utf-8]
    #[arg(long, value_enum)]
    pub encoding: Option<Encoding>,

    /// Deflate level (0-9). [default: 6]
    #[arg(long)]
    pub level: Option<u32>,

    /// Deflate strategy. [default: default]
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Worker threads. [default: CPU count]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Noise seed for the rebuild (unused while noise is disabled).
    #[arg(long, allow_negative_numbers = true)]
    pub seed: Option<i64>,

    /// Include hidden files when re-packing the recovered tree.
    #[arg(long)]
    pub include_hidden: bool,

    /// JSON config file supplying defaults for unset flags.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// On-disk JSON configuration. Every field is optional; the CLI only reads
/// the ones its flags left unset.
#[derive(Deserialize, Default, Debug)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub src: Option<PathBuf>,
    pub out: Option<PathBuf>,
    #[serde(rename = "in")]
    pub input: Option<PathBuf>,
    #[serde(alias = "method")]
    pub compression: Option<Compression>,
    pub encoding: Option<Encoding>,
    pub no_overwrite_cdir: Option<bool>,
    pub comment_size: Option<u32>,
    pub fixed_time: Option<bool>,
    pub noise_files: Option<u32>,
    pub noise_size: Option<u32>,
    pub level: Option<u32>,
    pub strategy: Option<Strategy>,
    pub workers: Option<usize>,
    #[serde(deserialize_with = "deserialize_seed")]
    pub seed: Option<i64>,
    pub include_hidden: Option<bool>,
}

/// Seeds appear in the wild both as JSON numbers and as strings; accept
/// either, and treat empty strings as unset.
fn deserialize_seed<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(v)) => Ok(Some(v)),
        Some(Raw::Str(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                trimmed
                    .parse()
                    .map(Some)
                    .map_err(|_| serde::de::Error::custom("seed must be an integer"))
            }
        }
    }
}

pub fn load_file_config(path: &std::path::Path) -> Result<FileConfig, ArchiveError> {
    let data = std::fs::read(path).map_err(|e| ArchiveError::io(e, path))?;
    serde_json::from_slice(&data)
        .map_err(|e| ArchiveError::Config(format!("parse {}: {}", path.display(), e)))
}

impl CreateArgs {
    pub fn into_config(self) -> Result<BuildConfig, ArchiveError> {
        let file = match &self.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };
        let src_dir = self
            .src
            .or(file.src)
            .ok_or_else(|| ArchiveError::Config("--src is required".to_string()))?;
        let out_zip = self
            .out
            .or(file.out)
            .ok_or_else(|| ArchiveError::Config("--out is required".to_string()))?;
        let overwrite_central_dir =
            !(self.no_overwrite_cdir || file.no_overwrite_cdir.unwrap_or(false));
        Ok(BuildConfig {
            src_dir,
            out_zip,
            compression: self.compression.or(file.compression).unwrap_or(Compression::Deflate),
            encoding: self.encoding.or(file.encoding).unwrap_or(Encoding::Utf8),
            overwrite_central_dir,
            comment_size: self.comment_size.or(file.comment_size).unwrap_or(0),
            fixed_time: self.fixed_time || file.fixed_time.unwrap_or(false),
            noise_files: self.noise_files.or(file.noise_files).unwrap_or(0),
            noise_size: self.noise_size.or(file.noise_size).unwrap_or(0),
            level: self.level.or(file.level).unwrap_or(6),
            strategy: self.strategy.or(file.strategy).unwrap_or(Strategy::Default),
            workers: self.workers.or(file.workers).unwrap_or_else(num_cpus::get).max(1),
            seed: self.seed.or(file.seed),
            include_hidden: self.include_hidden || file.include_hidden.unwrap_or(false),
        })
    }
}

impl RecoverArgs {
    pub fn into_plan(self) -> Result<(PathBuf, PathBuf, RebuildOptions), ArchiveError> {
        let file = match &self.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };
        let in_zip = self
            .input
            .or(file.input)
            .ok_or_else(|| ArchiveError::Config("--in is required".to_string()))?;
        let out_zip = self
            .out
            .or(file.out)
            .ok_or_else(|| ArchiveError::Config("--out is required".to_string()))?;
        let opts = RebuildOptions {
            compression: self.compression.or(file.compression).unwrap_or(Compression::Deflate),
            encoding: self.encoding.or(file.encoding).unwrap_or(Encoding::Utf8),
            level: self.level.or(file.level).unwrap_or(6),
            strategy: self.strategy.or(file.strategy).unwrap_or(Strategy::Default),
            workers: self.workers.or(file.workers).unwrap_or_else(num_cpus::get).max(1),
            seed: self.seed.or(file.seed),
            include_hidden: self.include_hidden || file.include_hidden.unwrap_or(false),
        };
        Ok((in_zip, out_zip, opts))
    }
}
