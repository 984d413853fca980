//! The partitioned data source: exposes dataset partitions as a parameter
//! space and owns the dataset resync commit protocol.
//!
//! Per datasource instance two paired files live in the working directory:
//! `<name>.blocks.json` (the block-list snapshot the current partitions
//! were built from) and `<name>.map.json` (the partition map). A resync
//! stages replacements for both under `.resync` names and renames them
//! into place only after both writes succeeded; an interrupted commit is
//! either completed on the next startup (both staged files present) or
//! reported as fatal (only one present), never silently repaired.

use std::path::{Path, PathBuf};

use gridsweep_core::fsutil;
use gridsweep_core::hashing::sha256_parts;
use gridsweep_core::{ParamKey, ParameterRecord, ResyncResult};
use gridsweep_datasets::block::{load_block_list, save_block_list};
use gridsweep_datasets::splitter::{load_partition_map, save_partition_map, PartitionMap};
use gridsweep_datasets::{
    diff_block_lists, DataProvider, DataSplitter, DatasetError, Partition, VerifyPolicy,
};
use tracing::{debug, info};

use crate::error::ParameterError;
use crate::source::ParameterSource;

/// Behavior knobs for a [`DataParameterSource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DataSourceOptions {
    pub verify: VerifyPolicy,
    /// Keep timestamped backups of superseded snapshot/map files.
    pub keep_old: bool,
}

/// A leaf parameter source with one record per dataset partition.
pub struct DataParameterSource {
    name: String,
    dir: Option<PathBuf>,
    provider: Option<Box<dyn DataProvider>>,
    splitter: Box<dyn DataSplitter>,
    options: DataSourceOptions,
    partitions: Vec<Partition>,
}

impl std::fmt::Debug for DataParameterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataParameterSource")
            .field("name", &self.name)
            .field("partitions", &self.partitions.len())
            .finish_non_exhaustive()
    }
}

impl DataParameterSource {
    /// Open (or bootstrap) a datasource in `dir`.
    ///
    /// On first use the provider is queried, the block list is verified
    /// and persisted, and the splitter builds the initial partition map.
    /// On later runs the persisted map is loaded as-is; the provider is
    /// only contacted again by [`resync`](ParameterSource::resync).
    pub fn open(
        dir: impl Into<PathBuf>,
        name: impl Into<String>,
        provider: Box<dyn DataProvider>,
        splitter: Box<dyn DataSplitter>,
        options: DataSourceOptions,
    ) -> Result<Self, ParameterError> {
        let name = name.into();
        let dir = dir.into();
        let blocks_path = Self::blocks_path_in(&dir, &name);
        let map_path = Self::map_path_in(&dir, &name);

        Self::recover_interrupted_commit(&name, &blocks_path, &map_path)?;

        let mut source = Self {
            name,
            dir: Some(dir),
            provider: Some(provider),
            splitter,
            options,
            partitions: Vec::new(),
        };

        if blocks_path.exists() && map_path.exists() {
            let map = load_partition_map(&map_path).map_err(ParameterError::from)?;
            if map.splitter != source.splitter.name() {
                return Err(ParameterError::Config(format!(
                    "Datasource {:?} was partitioned with splitter {:?}, configured is {:?}",
                    source.name,
                    map.splitter,
                    source.splitter.name()
                )));
            }
            source.partitions = map.partitions;
        } else {
            source.bootstrap(&blocks_path, &map_path)?;
        }

        info!(
            datasource = %source.name,
            partitions = source.partitions.len(),
            "datasource ready"
        );
        Ok(source)
    }

    /// Build a datasource over fixed partitions, without persistence or
    /// resync. Used by scripts and tests that replay a known partition
    /// map.
    pub fn from_partitions(
        name: impl Into<String>,
        splitter: Box<dyn DataSplitter>,
        partitions: Vec<Partition>,
    ) -> Self {
        Self {
            name: name.into(),
            dir: None,
            provider: None,
            splitter,
            options: DataSourceOptions::default(),
            partitions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn blocks_path_in(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.blocks.json"))
    }

    fn map_path_in(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.map.json"))
    }

    /// Deal with `.resync` leftovers of a previous run. Both present means
    /// the replacement files were fully written and only the renames were
    /// interrupted; completing them is safe. A single leftover is
    /// ambiguous and fatal.
    fn recover_interrupted_commit(
        name: &str,
        blocks_path: &Path,
        map_path: &Path,
    ) -> Result<(), ParameterError> {
        let blocks_staged = fsutil::has_staged(blocks_path);
        let map_staged = fsutil::has_staged(map_path);
        match (blocks_staged, map_staged) {
            (true, true) => {
                info!(datasource = %name, "completing interrupted resync commit");
                fsutil::commit(blocks_path).map_err(ParameterError::from)?;
                fsutil::commit(map_path).map_err(ParameterError::from)?;
                Ok(())
            }
            (false, false) => Ok(()),
            _ => Err(DatasetError::BrokenResyncState(name.to_string()).into()),
        }
    }

    fn bootstrap(&mut self, blocks_path: &Path, map_path: &Path) -> Result<(), ParameterError> {
        let provider = self.provider.as_mut().ok_or_else(|| {
            ParameterError::Config(format!(
                "Datasource {:?} has no provider and no persisted partition map",
                self.name
            ))
        })?;
        let blocks = gridsweep_datasets::provider::verify_blocks(
            provider.fetch_blocks()?,
            &self.options.verify,
        )?;
        save_block_list(blocks_path, &blocks)?;

        self.partitions = self.splitter.partition_blocks(&blocks)?;
        let map = PartitionMap {
            splitter: self.splitter.name().to_string(),
            partitions: self.partitions.clone(),
        };
        save_partition_map(map_path, &map)?;
        Ok(())
    }

    fn resync_impl(&mut self) -> Result<ResyncResult, ParameterError> {
        let (Some(dir), Some(provider)) = (self.dir.as_ref(), self.provider.as_mut()) else {
            return Ok(ResyncResult::empty());
        };
        let blocks_path = Self::blocks_path_in(dir, &self.name);
        let map_path = Self::map_path_in(dir, &self.name);

        info!(datasource = %self.name, "performing resync of datasource");
        let old_blocks = load_block_list(&blocks_path)?;
        let new_blocks = gridsweep_datasets::provider::verify_blocks(
            provider.fetch_blocks()?,
            &self.options.verify,
        )?;

        let diff = diff_block_lists(&old_blocks, &new_blocks);
        let sync = self.splitter.resync_partitions(&diff, &self.partitions)?;
        if sync.result.is_empty() && sync.partitions == self.partitions {
            debug!(datasource = %self.name, "dataset unchanged");
            return Ok(ResyncResult::empty());
        }

        let map = PartitionMap {
            splitter: self.splitter.name().to_string(),
            partitions: sync.partitions.clone(),
        };
        let map_json = serde_json::to_vec_pretty(&map).map_err(|e| ParameterError::Malformed {
            what: "partition map",
            path: map_path.clone(),
            detail: e.to_string(),
        })?;
        let blocks_json =
            serde_json::to_vec_pretty(&new_blocks).map_err(|e| ParameterError::Malformed {
                what: "block list",
                path: blocks_path.clone(),
                detail: e.to_string(),
            })?;

        // Stage both replacements before renaming either one.
        fsutil::stage(&blocks_path, &blocks_json).map_err(ParameterError::from)?;
        fsutil::stage(&map_path, &map_json).map_err(ParameterError::from)?;
        if self.options.keep_old {
            let stamp = chrono::Utc::now().timestamp();
            for (path, what) in [(&blocks_path, "blocks"), (&map_path, "map")] {
                let backup = dir.join(format!("{}.{what}-old-{stamp}.json", self.name));
                std::fs::rename(path, &backup).map_err(|e| ParameterError::io(path, e))?;
            }
        }
        fsutil::commit(&blocks_path).map_err(ParameterError::from)?;
        fsutil::commit(&map_path).map_err(ParameterError::from)?;

        debug!(
            datasource = %self.name,
            old = self.partitions.len(),
            new = sync.partitions.len(),
            redo = sync.result.redo.len(),
            disable = sync.result.disable.len(),
            "dataset resync finished"
        );
        self.partitions = sync.partitions;
        Ok(sync.result)
    }
}

impl ParameterSource for DataParameterSource {
    fn size(&self) -> Option<usize> {
        Some(self.partitions.len())
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.extend([
            ParamKey::untracked("FILE_NAMES"),
            ParamKey::untracked("MAX_EVENTS"),
            ParamKey::untracked("SKIP_EVENTS"),
            ParamKey::untracked("DATASETPATH"),
            ParamKey::untracked("DATASETBLOCK"),
            ParamKey::untracked("DATASETNICK"),
            // The partition number is the tracked identity; partition
            // content changes arrive through resync, not the hash.
            ParamKey::tracked("DATASETSPLIT"),
        ]);
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        let Some(partition) = self.partitions.get(index) else {
            return;
        };
        record.set("FILE_NAMES", partition.files.join(" "));
        record.set("MAX_EVENTS", partition.entries.to_string());
        record.set("SKIP_EVENTS", partition.skipped.to_string());
        record.set("DATASETPATH", &partition.dataset);
        record.set("DATASETBLOCK", &partition.block_name);
        record.set("DATASETNICK", partition.nickname.as_deref().unwrap_or(""));
        record.set("DATASETSPLIT", index.to_string());
        record.active = record.active && !partition.invalid;
    }

    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        self.resync_impl()
    }

    fn fingerprint(&self) -> String {
        sha256_parts(["data", &self.name, &self.partitions.len().to_string()])
    }

    fn describe(&self) -> String {
        format!("data({})", self.name)
    }
}
