use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Library error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Unknown dataset variant or preprocessing policy.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing class order, checkpoint or dataset archive.
    #[error("Not found: {what} ({})", path.display())]
    NotFound { what: String, path: PathBuf },

    /// Session or sample index outside the valid range.
    #[error("Index out of range: {index} (len {len}) in {context}")]
    Index {
        index: usize,
        len: usize,
        context: &'static str,
    },

    /// Archive bytes that do not follow the expected record layout.
    #[error("Malformed data: {0}")]
    Format(String),

    /// Parameter shapes that do not fit the backbone.
    #[error("Shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    Shape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Convenience alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_found(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::NotFound {
            what: what.into(),
            path: path.into(),
        }
    }
}
