//! Dataset layer: block model, providers, block-list diffing, and the
//! splitting strategies that turn dataset blocks into job partitions.

pub mod block;
pub mod diff;
pub mod error;
pub mod provider;
pub mod splitter;
pub mod splitter_basic;

pub use block::{DataBlock, FileEntry};
pub use diff::{diff_block_lists, BlockListDiff, MatchingBlock};
pub use error::DatasetError;
pub use provider::{
    CheckMode, DataProvider, DuplicateMode, MultiProvider, SnapshotProvider, StaticProvider,
    VerifyPolicy,
};
pub use splitter::{DataSplitter, Partition, PartitionMap, PartitionResync, ResyncMode, ResyncPolicy};
pub use splitter_basic::{splitter_registry, BlockSplitter, FileSplitter, HybridSplitter};
