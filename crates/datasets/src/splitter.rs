//! Partition model and the splitting-strategy contract.
//!
//! A partition is the unit of dataset content assigned to one job. A
//! splitting strategy turns a block list into partitions and, on resync,
//! patches an existing partition list against a block-list diff without
//! ever renumbering surviving partitions.

use std::fs;
use std::path::Path;

use gridsweep_core::ResyncResult;
use serde::{Deserialize, Serialize};

use crate::block::DataBlock;
use crate::diff::BlockListDiff;
use crate::error::DatasetError;

/// One job's slice of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub dataset: String,
    #[serde(default)]
    pub block_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    /// Ordered input URLs.
    pub files: Vec<String>,
    /// Number of entries covered by this partition.
    pub entries: i64,
    /// Entries to skip at the start of the first file.
    #[serde(default)]
    pub skipped: i64,
    /// Set when the partition's content vanished; the partition keeps its
    /// slot so job numbers stay stable.
    #[serde(default)]
    pub invalid: bool,
    /// Free-form audit trail of resync decisions.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

impl Partition {
    /// Build a partition covering the given files of `block` completely.
    pub fn from_block_files(block: &DataBlock, files: &[crate::block::FileEntry]) -> Self {
        Self {
            dataset: block.dataset.clone(),
            block_name: block.block_name.clone(),
            nickname: block.nickname.clone(),
            locations: block.locations.clone(),
            files: files.iter().map(|f| f.url.clone()).collect(),
            entries: files.iter().map(|f| f.entries.max(0)).sum(),
            skipped: 0,
            invalid: false,
            comment: String::new(),
        }
    }

    pub fn block_id(&self) -> (&str, &str) {
        (&self.dataset, &self.block_name)
    }

    pub fn note(&mut self, tag: &str) {
        if !self.comment.is_empty() {
            self.comment.push(' ');
        }
        self.comment.push_str(tag);
    }
}

/// How strongly a partition-level change forces intervention.
///
/// Ordered by severity; when several changes hit one partition the
/// strongest reaction wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResyncMode {
    /// Leave the partition's job alone.
    Ignore,
    /// Redo only if the partition's coverage actually changed.
    Changed,
    /// Redo the partition's job.
    Complete,
    /// Invalidate the partition and disable its job.
    Disable,
}

/// Per-strategy reaction policy for the different kinds of dataset change.
#[derive(Debug, Clone, Copy)]
pub struct ResyncPolicy {
    /// A file disappeared from a partition.
    pub removed: ResyncMode,
    /// A file grew.
    pub expanded: ResyncMode,
    /// A file shrank.
    pub shrunken: ResyncMode,
    /// Whether added blocks are split into new partitions.
    pub split_added: bool,
}

impl Default for ResyncPolicy {
    fn default() -> Self {
        Self {
            removed: ResyncMode::Complete,
            expanded: ResyncMode::Changed,
            shrunken: ResyncMode::Changed,
            split_added: true,
        }
    }
}

/// Outcome of a strategy-level resync: the patched partition list plus the
/// indices needing intervention, in partition-number space.
#[derive(Debug, Clone)]
pub struct PartitionResync {
    pub partitions: Vec<Partition>,
    pub result: ResyncResult,
}

/// A splitting strategy, pluggable by name.
pub trait DataSplitter {
    fn name(&self) -> &'static str;

    /// Split a block list into partitions.
    fn partition_blocks(&self, blocks: &[DataBlock]) -> Result<Vec<Partition>, DatasetError>;

    /// Patch `old` partitions against a block-list diff.
    ///
    /// Partition identity must be preserved: surviving partitions keep
    /// their index, invalidated partitions keep their slot with
    /// `invalid = true`, and new partitions append at the end.
    fn resync_partitions(
        &self,
        diff: &BlockListDiff,
        old: &[Partition],
    ) -> Result<PartitionResync, DatasetError>;
}

// ---------------------------------------------------------------------------
// Partition map persistence
// ---------------------------------------------------------------------------

/// The persisted partition map: which strategy produced it, and the
/// partitions themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMap {
    pub splitter: String,
    pub partitions: Vec<Partition>,
}

pub fn save_partition_map(path: &Path, map: &PartitionMap) -> Result<(), DatasetError> {
    let json = serde_json::to_vec_pretty(map).map_err(|e| DatasetError::Malformed {
        what: "partition map",
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    fs::write(path, json).map_err(|e| DatasetError::io(path, e))
}

pub fn load_partition_map(path: &Path) -> Result<PartitionMap, DatasetError> {
    let data = fs::read(path).map_err(|e| DatasetError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| DatasetError::Malformed {
        what: "partition map",
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}
