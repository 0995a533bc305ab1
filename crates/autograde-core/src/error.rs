//! Error taxonomy for the grading pipeline.

use std::path::PathBuf;

/// Errors produced by the autograde core.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("submission bundle not found: {}", .0.display())]
    BundleNotFound(PathBuf),

    #[error("archive error in {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive {} contains an unsafe entry path: {entry}", archive.display())]
    UnsafeArchivePath { archive: PathBuf, entry: String },

    #[error("archive {} exceeds the uncompressed size limit of {limit} bytes", archive.display())]
    ArchiveTooLarge { archive: PathBuf, limit: u64 },

    #[error("archives nested deeper than {max_depth} levels under {}", root.display())]
    NestingTooDeep { root: PathBuf, max_depth: usize },

    #[error("invalid file pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for autograde core operations.
pub type Result<T> = std::result::Result<T, GradeError>;
