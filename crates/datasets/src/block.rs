//! The dataset block model and its snapshot persistence.
//!
//! A block is the unit of bookkeeping a dataset catalog hands out: a named
//! group of files with entry counts, storage locations, and optional
//! metadata columns. Block identity is `(dataset, block_name)`; everything
//! else is content that may change between catalog queries.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// One input file inside a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub url: String,
    /// Number of entries/events in the file; negative means unknown.
    pub entries: i64,
    /// Metadata values aligned with the block's `metadata_keys`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<serde_json::Value>,
}

impl FileEntry {
    pub fn new(url: impl Into<String>, entries: i64) -> Self {
        Self {
            url: url.into(),
            entries,
            metadata: Vec::new(),
        }
    }
}

/// A named group of files from one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlock {
    pub dataset: String,
    #[serde(default)]
    pub block_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Storage locations; `None` means "everywhere", an empty list means
    /// "nowhere".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    /// Total entry count of the block; negative means unknown.
    pub entries: i64,
    pub files: Vec<FileEntry>,
    /// Names of the per-file metadata columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_keys: Vec<String>,
}

impl DataBlock {
    pub fn new(dataset: impl Into<String>, block_name: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            block_name: block_name.into(),
            nickname: None,
            locations: None,
            entries: 0,
            files: Vec::new(),
            metadata_keys: Vec::new(),
        }
    }

    /// Identity key used for diffing block lists.
    pub fn id(&self) -> (&str, &str) {
        (&self.dataset, &self.block_name)
    }

    /// Display name: `dataset#block`, or just the dataset when the block
    /// name is empty.
    pub fn display_name(&self) -> String {
        if self.block_name.is_empty() || self.block_name == "0" {
            self.dataset.clone()
        } else {
            format!("{}#{}", self.dataset, self.block_name)
        }
    }

    /// Sum of the file entry counts, ignoring unknown (negative) counts.
    pub fn file_entry_sum(&self) -> i64 {
        self.files.iter().map(|f| f.entries.max(0)).sum()
    }
}

/// Write a block-list snapshot to `path` as JSON.
pub fn save_block_list(path: &Path, blocks: &[DataBlock]) -> Result<(), DatasetError> {
    let json = serde_json::to_vec_pretty(blocks).map_err(|e| DatasetError::Malformed {
        what: "block list",
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    fs::write(path, json).map_err(|e| DatasetError::io(path, e))
}

/// Read a block-list snapshot written by [`save_block_list`].
pub fn load_block_list(path: &Path) -> Result<Vec<DataBlock>, DatasetError> {
    let data = fs::read(path).map_err(|e| DatasetError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| DatasetError::Malformed {
        what: "block list",
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}
