use std::path::PathBuf;

use gridsweep_datasets::DatasetError;

#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Ambiguous parameter merge: content hash {hash} covers {old_count} old and \
         {new_count} new records, cannot decide which job numbers to reuse"
    )]
    AmbiguousMerge {
        hash: String,
        old_count: usize,
        new_count: usize,
    },

    #[error("Found broken resync state for the parameter mapping in {0}")]
    BrokenMappingState(PathBuf),

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
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Core(#[from] gridsweep_core::CoreError),
}

impl ParameterError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
