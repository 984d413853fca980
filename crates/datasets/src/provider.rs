//! Dataset providers and the verification pass applied to their output.
//!
//! A provider is the sole source of truth for the "new" side of a dataset
//! resync. The engine treats providers as narrow collaborators: anything
//! that can produce a block list qualifies: a static in-memory list, a
//! previously written snapshot file, or a combination of several sources.

use std::path::PathBuf;

use gridsweep_core::hashing::sha256_parts;
use tracing::warn;

use crate::block::{load_block_list, DataBlock};
use crate::error::DatasetError;

/// Source of dataset blocks. Implementations must be idempotent: calling
/// `fetch_blocks` repeatedly returns the current catalog state each time.
pub trait DataProvider {
    /// The dataset expression this provider was configured with, used in
    /// error messages.
    fn dataset_expr(&self) -> &str;

    fn fetch_blocks(&mut self) -> Result<Vec<DataBlock>, DatasetError>;
}

/// A fixed in-memory block list. Used by tests and by debug tooling that
/// replays a known dataset without catalog access.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    expr: String,
    blocks: Vec<DataBlock>,
}

impl StaticProvider {
    pub fn new(expr: impl Into<String>, blocks: Vec<DataBlock>) -> Self {
        Self {
            expr: expr.into(),
            blocks,
        }
    }
}

impl DataProvider for StaticProvider {
    fn dataset_expr(&self) -> &str {
        &self.expr
    }

    fn fetch_blocks(&mut self) -> Result<Vec<DataBlock>, DatasetError> {
        Ok(self.blocks.clone())
    }
}

/// Reads blocks from a block-list snapshot file on every fetch.
#[derive(Debug, Clone)]
pub struct SnapshotProvider {
    expr: String,
    path: PathBuf,
}

impl SnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            expr: path.display().to_string(),
            path,
        }
    }
}

impl DataProvider for SnapshotProvider {
    fn dataset_expr(&self) -> &str {
        &self.expr
    }

    fn fetch_blocks(&mut self) -> Result<Vec<DataBlock>, DatasetError> {
        load_block_list(&self.path)
    }
}

/// Concatenates the output of several providers.
///
/// A failing child does not abort the fetch: its error is collected and all
/// remaining children are still tried, so one bad source cannot hide
/// problems in the others. If any child failed, the combined error lists
/// every failure.
pub struct MultiProvider {
    expr: String,
    children: Vec<Box<dyn DataProvider>>,
}

impl MultiProvider {
    pub fn new(children: Vec<Box<dyn DataProvider>>) -> Self {
        let expr = children
            .iter()
            .map(|c| c.dataset_expr().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        Self { expr, children }
    }
}

impl DataProvider for MultiProvider {
    fn dataset_expr(&self) -> &str {
        &self.expr
    }

    fn fetch_blocks(&mut self) -> Result<Vec<DataBlock>, DatasetError> {
        let mut blocks = Vec::new();
        let mut failures = Vec::new();
        for child in &mut self.children {
            match child.fetch_blocks() {
                Ok(child_blocks) => blocks.extend(child_blocks),
                Err(e) => failures.push(format!("{}: {e}", child.dataset_expr())),
            }
        }
        if failures.is_empty() {
            Ok(blocks)
        } else {
            Err(DatasetError::ProviderList(failures))
        }
    }
}

// ---------------------------------------------------------------------------
// Verification pass
// ---------------------------------------------------------------------------

/// Reaction to a duplicate URL or block fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateMode {
    Warn,
    /// Duplicates usually indicate a configuration mistake that would
    /// double-count data.
    #[default]
    Abort,
    Skip,
    Ignore,
}

/// Reaction to an internal consistency problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    Warn,
    #[default]
    Abort,
    Ignore,
}

/// Which checks run after a fetch, and how violations are handled.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyPolicy {
    pub entry_consistency: CheckMode,
    pub unique_url: DuplicateMode,
    pub unique_block: DuplicateMode,
}

fn file_fingerprint(block: &DataBlock, file_idx: usize) -> String {
    let file = &block.files[file_idx];
    let meta = serde_json::to_string(&file.metadata).unwrap_or_default();
    sha256_parts([file.url.as_str(), &file.entries.to_string(), &meta])
}

fn block_fingerprint(block: &DataBlock, url_hashes: &mut Vec<String>) -> String {
    url_hashes.sort();
    let locations = block
        .locations
        .as_ref()
        .map(|l| l.join(","))
        .unwrap_or_default();
    let mut parts = vec![
        block.dataset.clone(),
        block.block_name.clone(),
        block.entries.to_string(),
        locations,
    ];
    parts.append(url_hashes);
    sha256_parts(&parts)
}

/// Run the configured checks over a fetched block list.
///
/// `Skip` drops the offending file (its entries are subtracted from the
/// block) or the offending block; `Warn` logs and keeps it; `Abort`
/// returns the error.
pub fn verify_blocks(
    blocks: Vec<DataBlock>,
    policy: &VerifyPolicy,
) -> Result<Vec<DataBlock>, DatasetError> {
    let mut seen_urls = std::collections::HashSet::new();
    let mut seen_blocks = std::collections::HashSet::new();
    let mut result = Vec::with_capacity(blocks.len());

    for mut block in blocks {
        if policy.entry_consistency != CheckMode::Ignore && block.entries >= 0 {
            let file_sum = block.file_entry_sum();
            if file_sum != block.entries {
                let err = DatasetError::EntryMismatch {
                    block: block.display_name(),
                    block_entries: block.entries,
                    file_entries: file_sum,
                };
                match policy.entry_consistency {
                    CheckMode::Abort => return Err(err),
                    CheckMode::Warn => warn!("{err}"),
                    CheckMode::Ignore => {}
                }
            }
        }

        let mut url_hashes = Vec::new();
        if policy.unique_url != DuplicateMode::Ignore {
            let mut kept = Vec::with_capacity(block.files.len());
            for idx in 0..block.files.len() {
                let hash = file_fingerprint(&block, idx);
                let file = &block.files[idx];
                if !seen_urls.insert(hash.clone()) {
                    let err = DatasetError::DuplicateUrl(file.url.clone());
                    match policy.unique_url {
                        DuplicateMode::Abort => return Err(err),
                        DuplicateMode::Warn => warn!("{err}"),
                        DuplicateMode::Skip => {
                            block.entries -= file.entries.max(0);
                            continue;
                        }
                        DuplicateMode::Ignore => {}
                    }
                }
                url_hashes.push(hash);
                kept.push(file.clone());
            }
            block.files = kept;
        }

        if policy.unique_block != DuplicateMode::Ignore {
            let hash = block_fingerprint(&block, &mut url_hashes);
            if !seen_blocks.insert(hash) {
                let err = DatasetError::DuplicateBlock(block.display_name());
                match policy.unique_block {
                    DuplicateMode::Abort => return Err(err),
                    DuplicateMode::Warn => warn!("{err}"),
                    DuplicateMode::Skip => continue,
                    DuplicateMode::Ignore => {}
                }
            }
        }

        result.push(block);
    }
    Ok(result)
}
