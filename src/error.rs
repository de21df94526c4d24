use thiserror::Error;

/// Failures that abort (or, for unsupported metadata, skip) filtering.
#[derive(Debug, Error)]
pub(crate) enum FilterError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("malformed class {entry} at byte offset {offset}: {reason}")]
    MalformedClass {
        entry: String,
        offset: usize,
        reason: String,
    },
    #[error("corrupt Kotlin metadata in {class}: {reason}")]
    CorruptMetadata { class: String, reason: String },
    #[error("unsupported Kotlin metadata kind {kind} in {class}")]
    UnsupportedMetadataShape { class: String, kind: i32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Low-level class-file decoding failure, positioned at a byte offset.
#[derive(Debug, Error)]
#[error("{reason} (offset {offset})")]
pub(crate) struct ClassFormatError {
    pub(crate) offset: usize,
    pub(crate) reason: String,
}

impl ClassFormatError {
    pub(crate) fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }

    /// Attach the archive entry name, producing the fatal per-run error.
    pub(crate) fn in_entry(self, entry: &str) -> FilterError {
        FilterError::MalformedClass {
            entry: entry.to_string(),
            offset: self.offset,
            reason: self.reason,
        }
    }
}

/// Low-level metadata decoding failure before the owning class is known.
#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct MetadataFormatError(pub(crate) String);

impl MetadataFormatError {
    pub(crate) fn in_class(self, class: &str) -> FilterError {
        FilterError::CorruptMetadata {
            class: class.to_string(),
            reason: self.0,
        }
    }
}

pub(crate) type ClassResult<T> = std::result::Result<T, ClassFormatError>;
pub(crate) type MetadataResult<T> = std::result::Result<T, MetadataFormatError>;
