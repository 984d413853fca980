//! The adapter between the job layer and a parameter-source tree.
//!
//! The job layer only ever deals in job numbers. [`ParameterAdapter`]
//! serves records straight from the tree (job number == parameter number);
//! [`TrackedParameterAdapter`] adds the persisted job ↔ parameter mapping
//! and the reconciliation that keeps job numbers stable while the space
//! underneath grows, shrinks, or gets edited.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use gridsweep_core::diff::diff_by_key;
use gridsweep_core::fsutil;
use gridsweep_core::{ParameterRecord, ResyncResult};
use tracing::{debug, error, info};

use crate::dump::{render_dump, write_dump, DumpSource};
use crate::error::ParameterError;
use crate::mapping::JobMapping;
use crate::source::{tracked_key_names, ParameterSource, JOB_ID_KEY, PARAM_ID_KEY};

/// A thin adapter without persistence: job number and parameter number
/// coincide, resync passes straight through to the tree.
pub struct ParameterAdapter {
    source: Box<dyn ParameterSource>,
    submit_cache: HashMap<usize, bool>,
}

impl ParameterAdapter {
    pub fn new(source: Box<dyn ParameterSource>) -> Self {
        Self {
            source,
            submit_cache: HashMap::new(),
        }
    }

    pub fn job_count(&self) -> Option<usize> {
        self.source.size()
    }

    pub fn record(&self, job: usize) -> ParameterRecord {
        let mut record = ParameterRecord::new();
        record.set(JOB_ID_KEY, job.to_string());
        record.set(PARAM_ID_KEY, job.to_string());
        self.source.fill(job, &mut record);
        if let Some(size) = self.source.size() {
            if job >= size {
                record.active = false;
            }
        }
        record.prune_empty();
        record
    }

    pub fn can_submit(&mut self, job: usize) -> bool {
        if let Some(&cached) = self.submit_cache.get(&job) {
            return cached;
        }
        let active = self.record(job).active;
        self.submit_cache.insert(job, active);
        active
    }

    pub fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        let result = self.source.resync()?;
        if !result.is_empty() {
            self.submit_cache.clear();
        }
        Ok(result)
    }
}

/// Which forced action wins when an explicit re-initialization request
/// coincides with a needed (or forced) resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupPrecedence {
    /// An explicit init is the stronger user statement.
    #[default]
    PreferInit,
    /// A needed resync overrides the init request.
    PreferResync,
}

/// Startup knobs for a [`TrackedParameterAdapter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterOptions {
    /// Rebuild the persisted mapping from scratch, discarding history.
    pub force_init: bool,
    /// Reconcile even if the space fingerprint looks unchanged.
    pub force_resync: bool,
    pub precedence: StartupPrecedence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartupAction {
    Init,
    Resync,
    Reuse,
}

/// Everything the persistence layer adds on top of the plain adapter.
struct TrackedState {
    map_path: PathBuf,
    dump_path: PathBuf,
    mapping: JobMapping,
    job_count: usize,
    /// Records of removed parameters, pinned past the live space so their
    /// jobs keep serving the content they were created for.
    pinned: BTreeMap<usize, ParameterRecord>,
    /// A resync already performed at startup, waiting to be reported.
    pending: Option<ResyncResult>,
}

/// Adapter with the durable job ↔ parameter mapping.
///
/// Jobs never get renumbered once persisted: parameters that vanish keep
/// their job number bound to a pinned copy of their last-known record, new
/// parameters get fresh job numbers after the old maximum. An unbounded
/// tree skips the bookkeeping entirely and behaves like the plain adapter.
pub struct TrackedParameterAdapter {
    source: Box<dyn ParameterSource>,
    submit_cache: HashMap<usize, bool>,
    state: Option<TrackedState>,
}

impl std::fmt::Debug for TrackedParameterAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedParameterAdapter")
            .field("tracked", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

/// One record's identity during reconciliation.
#[derive(Debug, Clone)]
struct HashedParam {
    hash: String,
    param: usize,
    active: bool,
    /// Set on the old side only: the job bound to this parameter.
    job: Option<usize>,
}

impl TrackedParameterAdapter {
    /// Open (or bootstrap) the adapter state in `dir`.
    pub fn open(
        dir: impl Into<PathBuf>,
        source: Box<dyn ParameterSource>,
        options: AdapterOptions,
    ) -> Result<Self, ParameterError> {
        let dir = dir.into();

        if source.size().is_none() {
            debug!("parameter space is unbounded, skipping mapping bootstrap");
            return Ok(Self {
                source,
                submit_cache: HashMap::new(),
                state: None,
            });
        }

        let map_path = dir.join("params.map");
        let dump_path = dir.join("params.dump");
        Self::recover_interrupted_commit(&map_path, &dump_path)?;

        let mut adapter = Self {
            source,
            submit_cache: HashMap::new(),
            state: Some(TrackedState {
                map_path,
                dump_path,
                mapping: JobMapping::default(),
                job_count: 0,
                pinned: BTreeMap::new(),
                pending: None,
            }),
        };

        match adapter.startup_action(&options) {
            StartupAction::Init => adapter.init()?,
            StartupAction::Resync => {
                adapter.load()?;
                let result = adapter.resync_now(options.force_resync)?;
                if let Some(state) = adapter.state.as_mut() {
                    state.pending = Some(result);
                }
            }
            StartupAction::Reuse => adapter.load()?,
        }
        Ok(adapter)
    }

    fn startup_action(&self, options: &AdapterOptions) -> StartupAction {
        let state = self.state.as_ref().expect("tracked state");
        if !state.map_path.exists() || !state.dump_path.exists() {
            return StartupAction::Init;
        }
        let needs_resync = options.force_resync || {
            let live = self.source.fingerprint();
            JobMapping::read(&state.map_path)
                .ok()
                .map(|m| m.fingerprint.as_deref() != Some(live.as_str()))
                .unwrap_or(true)
        };
        match (options.force_init, needs_resync) {
            (true, true) => match options.precedence {
                StartupPrecedence::PreferInit => StartupAction::Init,
                StartupPrecedence::PreferResync => StartupAction::Resync,
            },
            (true, false) => StartupAction::Init,
            (false, true) => StartupAction::Resync,
            (false, false) => StartupAction::Reuse,
        }
    }

    /// Paired-file recovery, same contract as the datasource files: both
    /// staged replacements present means only the renames were interrupted
    /// and committing is safe; a single leftover is ambiguous and fatal.
    fn recover_interrupted_commit(map_path: &Path, dump_path: &Path) -> Result<(), ParameterError> {
        match (fsutil::has_staged(map_path), fsutil::has_staged(dump_path)) {
            (true, true) => {
                info!("completing interrupted mapping commit");
                fsutil::commit(map_path)?;
                fsutil::commit(dump_path)?;
                Ok(())
            }
            (false, false) => Ok(()),
            _ => {
                error!(path = %map_path.display(), "broken mapping resync state");
                Err(ParameterError::BrokenMappingState(
                    map_path.parent().unwrap_or(map_path).to_path_buf(),
                ))
            }
        }
    }

    pub fn job_count(&self) -> Option<usize> {
        match &self.state {
            Some(state) => Some(state.job_count),
            None => self.source.size(),
        }
    }

    /// The parameter number `job` currently maps to.
    pub fn param_of(&self, job: usize) -> usize {
        match &self.state {
            Some(state) => state.mapping.param_of(job),
            None => job,
        }
    }

    pub fn record(&self, job: usize) -> ParameterRecord {
        let Some(state) = &self.state else {
            let mut record = ParameterRecord::new();
            record.set(JOB_ID_KEY, job.to_string());
            record.set(PARAM_ID_KEY, job.to_string());
            self.source.fill(job, &mut record);
            record.prune_empty();
            return record;
        };

        let param = state.mapping.param_of(job);
        let mut record = ParameterRecord::new();
        record.set(JOB_ID_KEY, job.to_string());
        record.set(PARAM_ID_KEY, param.to_string());

        let live_size = self.source.size().unwrap_or(0);
        if param < live_size {
            self.source.fill(param, &mut record);
        } else if let Some(pinned) = state.pinned.get(&param) {
            for (key, value) in pinned.iter() {
                record.set(key, value);
            }
            record
                .requirements
                .extend(pinned.requirements.iter().copied());
            record.active = false;
        }
        if job >= state.job_count {
            record.active = false;
        }
        record.prune_empty();
        record
    }

    pub fn can_submit(&mut self, job: usize) -> bool {
        if let Some(&cached) = self.submit_cache.get(&job) {
            return cached;
        }
        let active = self.record(job).active;
        self.submit_cache.insert(job, active);
        active
    }

    /// Reconcile with the current upstream state.
    ///
    /// Returns job-space indices. A resync already performed during
    /// [`open`](Self::open) is reported by the first call instead of
    /// running again.
    pub fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        if let Some(pending) = self.state.as_mut().and_then(|s| s.pending.take()) {
            if !pending.is_empty() {
                self.submit_cache.clear();
            }
            return Ok(pending);
        }
        if self.state.is_none() {
            let result = self.source.resync()?;
            if !result.is_empty() {
                self.submit_cache.clear();
            }
            return Ok(result);
        }
        self.resync_now(false)
    }

    // -- startup paths -------------------------------------------------------

    /// First-run bootstrap: the identity mapping over the current space.
    fn init(&mut self) -> Result<(), ParameterError> {
        let size = self.source.size().expect("init requires a bounded source");
        let keys = tracked_key_names(&*self.source);
        let fingerprint = self.source.fingerprint();
        let records: Vec<(usize, ParameterRecord)> = (0..size)
            .map(|param| (param, self.fill_fresh(param)))
            .collect();

        let state = self.state.as_mut().expect("tracked state");
        state.mapping = JobMapping::identity(size, fingerprint);
        state.job_count = size;
        state.pinned.clear();
        state.pending = None;

        state.mapping.write(&state.map_path)?;
        write_dump(&state.dump_path, &keys, records)?;
        info!(jobs = size, "initialized parameter mapping");
        Ok(())
    }

    fn load(&mut self) -> Result<(), ParameterError> {
        let state = self.state.as_mut().expect("tracked state");
        state.mapping = JobMapping::read(&state.map_path)?;
        let dump = DumpSource::read(&state.dump_path)?;
        state.job_count = dump.size().unwrap_or(0);
        state.pinned = state
            .mapping
            .entries
            .iter()
            .filter(|(_, entry)| !entry.active)
            .map(|(&job, entry)| {
                let mut record = dump.record(job);
                record.active = false;
                (entry.param, record)
            })
            .collect();
        Ok(())
    }

    // -- reconciliation ------------------------------------------------------

    fn fill_fresh(&self, param: usize) -> ParameterRecord {
        let mut record = ParameterRecord::new();
        record.set(PARAM_ID_KEY, param.to_string());
        self.source.fill(param, &mut record);
        record
    }

    fn resync_now(&mut self, forced: bool) -> Result<ResyncResult, ParameterError> {
        let tree_result = self.source.resync()?;
        let live_fingerprint = self.source.fingerprint();

        let state = self.state.as_ref().expect("tracked state");
        let fingerprint_unchanged =
            state.mapping.fingerprint.as_deref() == Some(live_fingerprint.as_str());
        if tree_result.is_empty() && fingerprint_unchanged && !forced {
            return Ok(ResyncResult::empty());
        }

        let new_size = self.source.size().ok_or_else(|| {
            ParameterError::Config(
                "Tracked parameter space became unbounded during resync".to_string(),
            )
        })?;
        info!(
            live = new_size,
            jobs = state.job_count,
            "reconciling parameter space"
        );

        let old_dump = DumpSource::read(&state.dump_path)?;
        let old_job_count = old_dump.size().unwrap_or(0);

        // Hash both sides over the union of tracked keys. Absent values do
        // not enter the hash, so records stay comparable even when one side
        // never declared a key.
        let mut all_keys = old_dump.keys().to_vec();
        all_keys.extend(tracked_key_names(&*self.source));
        all_keys.sort();
        all_keys.dedup();

        let old_entries: Vec<HashedParam> = (0..old_job_count)
            .map(|job| {
                let record = old_dump.record(job);
                HashedParam {
                    hash: record.content_hash(&all_keys),
                    param: state.mapping.param_of(job),
                    active: record.active,
                    job: Some(job),
                }
            })
            .collect();
        let new_entries: Vec<HashedParam> = (0..new_size)
            .map(|param| {
                let record = self.fill_fresh(param);
                HashedParam {
                    hash: record.content_hash(&all_keys),
                    param,
                    active: record.active,
                    job: None,
                }
            })
            .collect();

        check_merge_ambiguity(&old_entries, &new_entries)?;

        let diff = diff_by_key(&old_entries, &new_entries, |e| e.hash.clone());

        let mut mapping = JobMapping::identity(new_size, live_fingerprint);
        let mut job_of_param: BTreeMap<usize, usize> = BTreeMap::new();
        let mut pinned: BTreeMap<usize, ParameterRecord> = BTreeMap::new();
        let mut result = ResyncResult::empty();

        for (old, new) in &diff.matched {
            let job = old.job.expect("old entries carry job numbers");
            mapping.set(job, new.param, true);
            job_of_param.insert(new.param, job);
            match (old.active, new.active) {
                (true, false) => {
                    result.disable.insert(job);
                }
                (false, true) => {
                    result.redo.insert(job);
                }
                _ => {}
            }
        }

        // New content gets fresh job numbers after the old maximum, in
        // parameter order.
        let mut added = diff.added.clone();
        added.sort_by_key(|e| e.param);
        for (offset, new) in added.iter().enumerate() {
            let job = old_job_count + offset;
            mapping.set(job, new.param, true);
            job_of_param.insert(new.param, job);
            if new.active {
                result.redo.insert(job);
            } else {
                result.disable.insert(job);
            }
        }
        let job_count = old_job_count + added.len();

        // Vanished content keeps its job number, pinned past the live
        // space. Pin numbers are assigned in job order to stay
        // deterministic.
        let mut missing = diff.missing.clone();
        missing.sort_by_key(|e| e.job);
        for (offset, old) in missing.iter().enumerate() {
            let job = old.job.expect("old entries carry job numbers");
            let param = new_size + offset;
            mapping.set(job, param, false);
            job_of_param.insert(param, job);
            let mut record = old_dump.record(job);
            record.active = false;
            pinned.insert(param, record);
            if old.active {
                result.disable.insert(job);
            }
        }
        mapping.max_params = new_size + missing.len();

        // Changes the tree reported against stable indices (partition
        // content, range growth) arrive in parameter space; route them to
        // the jobs now holding those parameters.
        for &param in &tree_result.redo {
            if let Some(&job) = job_of_param.get(&param) {
                result.redo.insert(job);
            }
        }
        for &param in &tree_result.disable {
            if let Some(&job) = job_of_param.get(&param) {
                result.disable.insert(job);
            }
        }
        result.size_changed = tree_result.size_changed || job_count != old_job_count;
        result.normalize();

        let rows: Vec<(usize, ParameterRecord)> = (0..job_count)
            .map(|job| {
                let param = mapping.param_of(job);
                let record = match pinned.get(&param) {
                    Some(record) => record.clone(),
                    None => self.fill_fresh(param),
                };
                (job, record)
            })
            .collect();

        // Commit: stage both replacements, then rename both.
        let state = self.state.as_mut().expect("tracked state");
        fsutil::stage(&state.map_path, mapping.render().as_bytes())?;
        fsutil::stage(&state.dump_path, render_dump(&all_keys, rows).as_bytes())?;
        fsutil::commit(&state.map_path)?;
        fsutil::commit(&state.dump_path)?;

        state.mapping = mapping;
        state.job_count = job_count;
        state.pinned = pinned;
        if !result.is_empty() {
            self.submit_cache.clear();
        }
        debug!(
            jobs = job_count,
            redo = result.redo.len(),
            disable = result.disable.len(),
            size_changed = result.size_changed,
            "parameter reconciliation finished"
        );
        Ok(result)
    }
}

/// A content hash appearing on both sides with different multiplicity
/// leaves no defensible choice of which job numbers to reuse.
fn check_merge_ambiguity(old: &[HashedParam], new: &[HashedParam]) -> Result<(), ParameterError> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for entry in old {
        counts.entry(&entry.hash).or_default().0 += 1;
    }
    for entry in new {
        counts.entry(&entry.hash).or_default().1 += 1;
    }
    for (hash, (old_count, new_count)) in counts {
        if old_count > 0 && new_count > 0 && old_count != new_count {
            return Err(ParameterError::AmbiguousMerge {
                hash: hash.to_string(),
                old_count,
                new_count,
            });
        }
    }
    Ok(())
}
