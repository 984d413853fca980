use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Provider failure for {expr:?}: {message}")]
    Provider { expr: String, message: String },

    #[error("Multiple providers failed: {}", .0.join("; "))]
    ProviderList(Vec<String>),

    #[error(
        "Inconsistency in block {block}: number of entries does not match \
         (block: {block_entries}, files: {file_entries})"
    )]
    EntryMismatch {
        block: String,
        block_entries: i64,
        file_entries: i64,
    },

    #[error("Multiple occurrences of URL {0:?}")]
    DuplicateUrl(String),

    #[error("Multiple occurrences of block {0:?}")]
    DuplicateBlock(String),

    #[error("Partition {index} out of range for available dataset ({count} partitions)")]
    PartitionOutOfRange { index: usize, count: usize },

    #[error("Unable to change {url:?} from {old} to {new} entries")]
    EntrySignFlip { url: String, old: i64, new: i64 },

    #[error("Found broken resync state for datasource {0:?}")]
    BrokenResyncState(String),

    #[error("Malformed {what} file {path}: {detail}")]
    Malformed {
        what: &'static str,
        path: PathBuf,
        detail: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] gridsweep_core::CoreError),
}

impl DatasetError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
