//! Block-list diffing: classify two dataset snapshots into added, missing,
//! and matching blocks so a splitting strategy can patch its partitions.
//!
//! Blocks are compared by identity `(dataset, block_name)`, never by full
//! content; files within a matching block pair are compared by URL. Files
//! added to an existing block are re-exposed as a synthetic added block so
//! strategies only ever see whole blocks on the "added" side.

use gridsweep_core::diff::diff_by_key;

use crate::block::{DataBlock, FileEntry};

/// A block present in both snapshots, with its file-level changes.
#[derive(Debug, Clone)]
pub struct MatchingBlock {
    pub old: DataBlock,
    pub new: DataBlock,
    /// Files present only in the old snapshot.
    pub missing_files: Vec<FileEntry>,
    /// URL-matched `(old, new)` file pairs, changed or not.
    pub matched_files: Vec<(FileEntry, FileEntry)>,
}

impl MatchingBlock {
    /// Look up the old and new file entries for a URL, if it matched.
    pub fn matched_by_url(&self, url: &str) -> Option<&(FileEntry, FileEntry)> {
        self.matched_files.iter().find(|(old, _)| old.url == url)
    }

    /// True if the URL is gone from the new snapshot.
    pub fn is_file_missing(&self, url: &str) -> bool {
        self.missing_files.iter().any(|f| f.url == url)
    }
}

/// The full classification of old snapshot vs new snapshot.
#[derive(Debug, Clone, Default)]
pub struct BlockListDiff {
    /// Blocks (or per-block file additions) present only in the new
    /// snapshot.
    pub added: Vec<DataBlock>,
    /// Blocks present only in the old snapshot.
    pub missing: Vec<DataBlock>,
    /// Blocks present in both snapshots.
    pub matching: Vec<MatchingBlock>,
}

impl BlockListDiff {
    pub fn find_missing(&self, id: (&str, &str)) -> Option<&DataBlock> {
        self.missing.iter().find(|b| b.id() == id)
    }

    pub fn find_matching(&self, id: (&str, &str)) -> Option<&MatchingBlock> {
        self.matching.iter().find(|m| m.old.id() == id)
    }
}

/// Diff two block lists by block identity, and matching blocks by file URL.
pub fn diff_block_lists(old: &[DataBlock], new: &[DataBlock]) -> BlockListDiff {
    let block_diff = diff_by_key(old, new, |b| {
        (b.dataset.clone(), b.block_name.clone())
    });

    let mut diff = BlockListDiff {
        added: block_diff.added,
        missing: block_diff.missing,
        matching: Vec::new(),
    };

    for (old_block, new_block) in block_diff.matched {
        let file_diff = diff_by_key(&old_block.files, &new_block.files, |f| f.url.clone());

        if !file_diff.added.is_empty() {
            // Whole-block view of the files that appeared inside an
            // existing block.
            let mut added_block = new_block.clone();
            added_block.entries = file_diff.added.iter().map(|f| f.entries.max(0)).sum();
            added_block.files = file_diff.added;
            diff.added.push(added_block);
        }

        diff.matching.push(MatchingBlock {
            old: old_block,
            new: new_block,
            missing_files: file_diff.missing,
            matched_files: file_diff.matched,
        });
    }

    diff
}
