//! File-level splitting strategies.
//!
//! All three strategies partition along file boundaries (a partition always
//! covers whole files), which lets them share one resync routine: patch
//! each existing partition from the file-level diff of its block, then
//! split added blocks into fresh partitions at the end.

use gridsweep_core::registry::Registry;
use gridsweep_core::ResyncResult;

use crate::block::{DataBlock, FileEntry};
use crate::diff::BlockListDiff;
use crate::error::DatasetError;
use crate::splitter::{DataSplitter, Partition, PartitionResync, ResyncMode, ResyncPolicy};

/// One partition per block.
#[derive(Debug, Clone, Default)]
pub struct BlockSplitter {
    policy: ResyncPolicy,
}

impl BlockSplitter {
    pub fn new(policy: ResyncPolicy) -> Self {
        Self { policy }
    }
}

impl DataSplitter for BlockSplitter {
    fn name(&self) -> &'static str {
        "blocks"
    }

    fn partition_blocks(&self, blocks: &[DataBlock]) -> Result<Vec<Partition>, DatasetError> {
        Ok(blocks
            .iter()
            .map(|block| Partition::from_block_files(block, &block.files))
            .collect())
    }

    fn resync_partitions(
        &self,
        diff: &BlockListDiff,
        old: &[Partition],
    ) -> Result<PartitionResync, DatasetError> {
        resync_file_level(self, &self.policy, diff, old)
    }
}

/// Fixed number of files per partition, within block boundaries.
#[derive(Debug, Clone)]
pub struct FileSplitter {
    files_per_partition: usize,
    policy: ResyncPolicy,
}

impl FileSplitter {
    pub fn new(files_per_partition: usize, policy: ResyncPolicy) -> Result<Self, DatasetError> {
        if files_per_partition == 0 {
            return Err(gridsweep_core::CoreError::Validation(
                "files per partition must be at least 1".to_string(),
            )
            .into());
        }
        Ok(Self {
            files_per_partition,
            policy,
        })
    }
}

impl DataSplitter for FileSplitter {
    fn name(&self) -> &'static str {
        "files"
    }

    fn partition_blocks(&self, blocks: &[DataBlock]) -> Result<Vec<Partition>, DatasetError> {
        let mut partitions = Vec::new();
        for block in blocks {
            for chunk in block.files.chunks(self.files_per_partition) {
                partitions.push(Partition::from_block_files(block, chunk));
            }
        }
        Ok(partitions)
    }

    fn resync_partitions(
        &self,
        diff: &BlockListDiff,
        old: &[Partition],
    ) -> Result<PartitionResync, DatasetError> {
        resync_file_level(self, &self.policy, diff, old)
    }
}

/// Pack whole files into partitions of (mostly at most) a target entry
/// count. A single file above the target still becomes its own partition,
/// which then simply holds more entries.
#[derive(Debug, Clone)]
pub struct HybridSplitter {
    entries_per_partition: i64,
    policy: ResyncPolicy,
}

impl HybridSplitter {
    pub fn new(entries_per_partition: i64, policy: ResyncPolicy) -> Result<Self, DatasetError> {
        if entries_per_partition <= 0 {
            return Err(gridsweep_core::CoreError::Validation(
                "entries per partition must be positive".to_string(),
            )
            .into());
        }
        Ok(Self {
            entries_per_partition,
            policy,
        })
    }
}

impl DataSplitter for HybridSplitter {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn partition_blocks(&self, blocks: &[DataBlock]) -> Result<Vec<Partition>, DatasetError> {
        let mut partitions = Vec::new();
        for block in blocks {
            let mut entries = 0i64;
            let mut group: Vec<FileEntry> = Vec::new();
            for file in &block.files {
                if !group.is_empty() && entries + file.entries.max(0) > self.entries_per_partition {
                    partitions.push(Partition::from_block_files(block, &group));
                    entries = 0;
                    group.clear();
                }
                entries += file.entries.max(0);
                group.push(file.clone());
            }
            if !group.is_empty() {
                partitions.push(Partition::from_block_files(block, &group));
            }
        }
        Ok(partitions)
    }

    fn resync_partitions(
        &self,
        diff: &BlockListDiff,
        old: &[Partition],
    ) -> Result<PartitionResync, DatasetError> {
        resync_file_level(self, &self.policy, diff, old)
    }
}

// ---------------------------------------------------------------------------
// Shared file-level resync
// ---------------------------------------------------------------------------

/// Patch existing partitions against the diff and append partitions for
/// added blocks. Existing indices are never renumbered.
fn resync_file_level(
    splitter: &dyn DataSplitter,
    policy: &ResyncPolicy,
    diff: &BlockListDiff,
    old: &[Partition],
) -> Result<PartitionResync, DatasetError> {
    let mut partitions = Vec::with_capacity(old.len());
    let mut result = ResyncResult::empty();

    for (index, partition) in old.iter().enumerate() {
        if partition.invalid {
            partitions.push(partition.clone());
            continue;
        }

        if diff.find_missing(partition.block_id()).is_some() {
            let mut patched = partition.clone();
            patched.invalid = true;
            patched.note("[block removed]");
            result.disable.insert(index);
            partitions.push(patched);
            continue;
        }

        let Some(matching) = diff.find_matching(partition.block_id()) else {
            // Block untouched by the diff: nothing changed for this
            // partition.
            partitions.push(partition.clone());
            continue;
        };

        let (patched, mode) = patch_partition(partition, matching, policy)?;
        match mode {
            ResyncMode::Disable => {
                result.disable.insert(index);
            }
            ResyncMode::Complete => {
                result.redo.insert(index);
            }
            ResyncMode::Changed | ResyncMode::Ignore => {}
        }
        partitions.push(patched);
    }

    if policy.split_added && !diff.added.is_empty() {
        let added = splitter.partition_blocks(&diff.added)?;
        partitions.extend(added);
    }

    result.size_changed = partitions.len() != old.len();
    result.normalize();
    Ok(PartitionResync { partitions, result })
}

/// Patch one partition from its block's file-level diff. Returns the
/// patched partition and the resolved reaction (`Changed` is resolved to
/// `Complete` or `Ignore` before returning).
fn patch_partition(
    partition: &Partition,
    matching: &crate::diff::MatchingBlock,
    policy: &ResyncPolicy,
) -> Result<(Partition, ResyncMode), DatasetError> {
    let mut patched = partition.clone();
    patched.locations = matching.new.locations.clone();

    let mut mode = ResyncMode::Ignore;
    let mut files = Vec::with_capacity(partition.files.len());
    let mut entries = 0i64;
    let mut files_removed = false;

    for url in &partition.files {
        if matching.is_file_missing(url) {
            patched.note(&format!("[rm] {url}"));
            mode = mode.max(policy.removed);
            files_removed = true;
            continue;
        }
        if let Some((old_file, new_file)) = matching.matched_by_url(url) {
            if new_file.entries != old_file.entries {
                if old_file.entries * new_file.entries < 0 {
                    return Err(DatasetError::EntrySignFlip {
                        url: url.clone(),
                        old: old_file.entries,
                        new: new_file.entries,
                    });
                }
                patched.note(&format!(
                    "[changed] {url} -{} +{}",
                    old_file.entries, new_file.entries
                ));
                mode = mode.max(if new_file.entries > old_file.entries {
                    policy.expanded
                } else {
                    policy.shrunken
                });
            }
            entries += new_file.entries.max(0);
        } else {
            // File not covered by the diff (absent from the old snapshot);
            // keep the partition's previous accounting for it.
            let known = matching
                .old
                .files
                .iter()
                .find(|f| &f.url == url)
                .map(|f| f.entries.max(0))
                .unwrap_or(0);
            entries += known;
        }
        files.push(url.clone());
    }

    let old_entries = patched.entries;
    patched.files = files;
    patched.entries = entries;

    if patched.files.is_empty() || (old_entries > 0 && patched.entries <= 0) {
        patched.invalid = true;
        return Ok((patched, ResyncMode::Disable));
    }

    let coverage_changed = files_removed || patched.entries != old_entries;
    let resolved = match mode {
        ResyncMode::Changed if coverage_changed => ResyncMode::Complete,
        ResyncMode::Changed => ResyncMode::Ignore,
        ResyncMode::Disable => {
            patched.invalid = true;
            ResyncMode::Disable
        }
        other => other,
    };
    Ok((patched, resolved))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Parameters a splitter factory may consume.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitterConfig {
    pub files_per_partition: Option<usize>,
    pub entries_per_partition: Option<i64>,
    pub policy: ResyncPolicy,
}

pub type SplitterFactory = fn(&SplitterConfig) -> Result<Box<dyn DataSplitter>, DatasetError>;

fn make_block_splitter(config: &SplitterConfig) -> Result<Box<dyn DataSplitter>, DatasetError> {
    Ok(Box::new(BlockSplitter::new(config.policy)))
}

fn make_file_splitter(config: &SplitterConfig) -> Result<Box<dyn DataSplitter>, DatasetError> {
    let files = config.files_per_partition.ok_or_else(|| {
        gridsweep_core::CoreError::Validation(
            "splitter \"files\" requires files_per_partition".to_string(),
        )
    })?;
    Ok(Box::new(FileSplitter::new(files, config.policy)?))
}

fn make_hybrid_splitter(config: &SplitterConfig) -> Result<Box<dyn DataSplitter>, DatasetError> {
    let entries = config.entries_per_partition.ok_or_else(|| {
        gridsweep_core::CoreError::Validation(
            "splitter \"hybrid\" requires entries_per_partition".to_string(),
        )
    })?;
    Ok(Box::new(HybridSplitter::new(entries, config.policy)?))
}

/// The built-in splitting strategies, resolvable by name or alias.
pub fn splitter_registry() -> Registry<SplitterFactory> {
    let mut registry = Registry::new("splitter");
    registry.register("blocks", make_block_splitter as SplitterFactory);
    registry.register("files", make_file_splitter as SplitterFactory);
    registry.register("hybrid", make_hybrid_splitter as SplitterFactory);
    registry.alias("default", "blocks", 0);
    registry.alias("files per job", "files", 10);
    registry
}
