use std::path::PathBuf;

/// The primary error type for all operations in the `noisyzip` crate.
#[derive(Debug)]
pub enum ArchiveError {
    /// A configuration value was out of range or otherwise unusable.
    Config(String),

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened when one is known.
    Io { source: std::io::Error, path: PathBuf },

    /// A filename character is not representable in the selected encoding.
    Encoding { ch: char, encoding: &'static str },

    /// The source directory yielded no files. Writing an empty ZIP is
    /// rejected rather than silently producing a useless archive.
    EmptyInput,
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            ArchiveError::Io { source, path } => {
                if path.as_os_str().is_empty() {
                    write!(f, "I/O error: {}", source)
                } else {
                    write!(f, "I/O error on path '{}': {}", path.display(), source)
                }
            }
            ArchiveError::Encoding { ch, encoding } => {
                write!(f, "Character U+{:04X} is not representable in {}", *ch as u32, encoding)
            }
            ArchiveError::EmptyInput => write!(f, "No files found in source directory"),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io { source: err, path: PathBuf::new() } // Generic path
    }
}

impl ArchiveError {
    /// Attaches a path to a raw I/O error.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ArchiveError::Io { source, path: path.into() }
    }
}
