//! End-to-end reconciliation scenarios: an adapter is opened over a
//! parameter space, the space changes between "runs" (adapter reopens),
//! and job numbers must stay bound to the content they were created for.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use assert_matches::assert_matches;
use gridsweep_datasets::block::FileEntry;
use gridsweep_datasets::{BlockSplitter, DataBlock, DataProvider, DatasetError, StaticProvider};
use gridsweep_params::{
    AdapterOptions, DataParameterSource, DataSourceOptions, ParameterError, ParameterSource,
    TrackedParameterAdapter, ValuesSource,
};

fn values(key: &str, values: &[&str]) -> Box<dyn ParameterSource> {
    Box::new(ValuesSource::new(key, values.iter().copied().collect::<Vec<_>>()).unwrap())
}

fn open(dir: &Path, source: Box<dyn ParameterSource>) -> TrackedParameterAdapter {
    TrackedParameterAdapter::open(dir, source, AdapterOptions::default()).unwrap()
}

#[test]
fn missing_parameter_preserves_job_identity() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("POINT", &["A", "B", "C"])));

    // B vanished. Its job keeps number 1, is disabled, and still serves
    // the content it was created for.
    let mut adapter = open(dir.path(), values("POINT", &["A", "C"]));
    let result = adapter.resync().unwrap();

    assert!(result.disable.contains(&1));
    assert!(!result.redo.contains(&1));
    assert_eq!(adapter.job_count(), Some(3));

    let record = adapter.record(1);
    assert_eq!(record.get("POINT"), Some("B"));
    assert!(!record.active);
    assert!(!adapter.can_submit(1));

    // The surviving points follow their content, not their old index.
    assert_eq!(adapter.record(0).get("POINT"), Some("A"));
    assert_eq!(adapter.record(2).get("POINT"), Some("C"));
    assert!(adapter.can_submit(2));
}

#[test]
fn added_parameters_get_new_job_numbers() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("POINT", &["A", "B"])));

    let mut adapter = open(dir.path(), values("POINT", &["A", "B", "C", "D"]));
    let result = adapter.resync().unwrap();

    assert_eq!(result.redo, BTreeSet::from([2, 3]));
    assert!(result.size_changed);
    assert_eq!(adapter.job_count(), Some(4));
    assert_eq!(adapter.record(2).get("POINT"), Some("C"));
    assert_eq!(adapter.record(3).get("POINT"), Some("D"));
}

#[test]
fn resync_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("POINT", &["A", "B"])));

    let mut adapter = open(dir.path(), values("POINT", &["A", "C"]));
    assert!(!adapter.resync().unwrap().is_empty());
    assert!(adapter.resync().unwrap().is_empty());
}

#[test]
fn value_edit_with_stable_index_is_caught_by_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("MASS", &["120", "125"])));

    // Index 1 now carries different content; the leaf reports nothing on
    // resync, so only the fingerprint double-check can catch this. The
    // edited content counts as removed-plus-added: the old job is
    // disabled, a fresh job covers the new value.
    let mut adapter = open(dir.path(), values("MASS", &["120", "130"]));
    let result = adapter.resync().unwrap();

    assert!(result.disable.contains(&1));
    assert!(result.redo.contains(&2));
    assert_eq!(adapter.job_count(), Some(3));
    assert_eq!(adapter.record(1).get("MASS"), Some("125"));
    assert!(!adapter.record(1).active);
    assert_eq!(adapter.record(2).get("MASS"), Some("130"));
}

#[test]
fn removed_parameter_can_be_revived() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("POINT", &["A", "B"])));

    let mut adapter = open(dir.path(), values("POINT", &["A"]));
    assert!(adapter.resync().unwrap().disable.contains(&1));
    drop(adapter);

    // B reappears: job 1 is matched against its pinned record and redone
    // under its original number.
    let mut adapter = open(dir.path(), values("POINT", &["A", "B"]));
    let result = adapter.resync().unwrap();

    assert!(result.redo.contains(&1));
    assert!(!result.disable.contains(&1));
    assert_eq!(adapter.job_count(), Some(2));
    let record = adapter.record(1);
    assert_eq!(record.get("POINT"), Some("B"));
    assert!(record.active);
}

#[test]
fn mapping_stays_injective_over_active_jobs() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("POINT", &["A", "B", "C"])));

    let mut adapter = open(dir.path(), values("POINT", &["C", "A", "D"]));
    adapter.resync().unwrap();

    let job_count = adapter.job_count().unwrap();
    let mut param_owner: BTreeMap<usize, usize> = BTreeMap::new();
    for job in 0..job_count {
        if !adapter.can_submit(job) {
            continue;
        }
        let param = adapter.param_of(job);
        assert!(
            param_owner.insert(param, job).is_none(),
            "parameter {param} owned by two active jobs"
        );
    }
}

#[test]
fn reordered_content_follows_its_hash() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("POINT", &["A", "B"])));

    // The same content in a different order: jobs keep serving "their"
    // point through the remapped parameter numbers.
    let mut adapter = open(dir.path(), values("POINT", &["B", "A"]));
    let result = adapter.resync().unwrap();

    assert!(result.redo.is_empty());
    assert!(result.disable.is_empty());
    assert_eq!(adapter.record(0).get("POINT"), Some("A"));
    assert_eq!(adapter.record(1).get("POINT"), Some("B"));
    assert_eq!(adapter.param_of(0), 1);
    assert_eq!(adapter.param_of(1), 0);
}

#[test]
fn colliding_content_with_unequal_counts_is_an_ambiguous_merge() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("POINT", &["A", "A", "B"])));

    // The startup resync refuses to guess which of the two old jobs keeps
    // the surviving parameter.
    let result = TrackedParameterAdapter::open(
        dir.path(),
        values("POINT", &["A", "B"]),
        AdapterOptions::default(),
    );
    assert_matches!(
        result,
        Err(ParameterError::AmbiguousMerge {
            old_count: 2,
            new_count: 1,
            ..
        })
    );
}

#[test]
fn interrupted_mapping_commit_is_fatal_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), values("POINT", &["A", "B"])));

    // Crash between the two renames: the dump's replacement was committed,
    // the mapping's was not.
    std::fs::write(dir.path().join("params.map.resync"), b"2\n\n\n").unwrap();

    let result = TrackedParameterAdapter::open(
        dir.path(),
        values("POINT", &["A", "B"]),
        AdapterOptions::default(),
    );
    assert_matches!(result, Err(ParameterError::BrokenMappingState(_)));
}

// -- dataset-backed space ----------------------------------------------------

fn block(dataset: &str, name: &str, files: &[(&str, i64)]) -> DataBlock {
    let mut b = DataBlock::new(dataset, name);
    b.files = files
        .iter()
        .map(|(url, entries)| FileEntry::new(*url, *entries))
        .collect();
    b.entries = b.file_entry_sum();
    b
}

/// A provider replaying scripted snapshots; the last one repeats.
struct SequenceProvider {
    snapshots: Vec<Vec<DataBlock>>,
    current: Vec<DataBlock>,
}

impl SequenceProvider {
    fn boxed(mut snapshots: Vec<Vec<DataBlock>>) -> Box<dyn DataProvider> {
        snapshots.reverse();
        let current = snapshots.pop().unwrap_or_default();
        Box::new(Self { snapshots, current })
    }
}

impl DataProvider for SequenceProvider {
    fn dataset_expr(&self) -> &str {
        "sequence"
    }

    fn fetch_blocks(&mut self) -> Result<Vec<DataBlock>, DatasetError> {
        let out = self.current.clone();
        if let Some(next) = self.snapshots.pop() {
            self.current = next;
        }
        Ok(out)
    }
}

#[test]
fn dataset_growth_flows_through_to_new_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let first = vec![block("/d", "b1", &[("f1", 10)])];
    let second = vec![
        block("/d", "b1", &[("f1", 10)]),
        block("/d", "b2", &[("f2", 5)]),
    ];
    let source = DataParameterSource::open(
        dir.path(),
        "dataset",
        SequenceProvider::boxed(vec![first, second]),
        Box::new(BlockSplitter::default()),
        DataSourceOptions::default(),
    )
    .unwrap();

    let mut adapter = open(dir.path(), Box::new(source));
    assert_eq!(adapter.job_count(), Some(1));

    let result = adapter.resync().unwrap();
    assert!(result.size_changed);
    assert!(result.redo.contains(&1));
    assert_eq!(adapter.job_count(), Some(2));

    let record = adapter.record(1);
    assert_eq!(record.get("FILE_NAMES"), Some("f2"));
    assert_eq!(record.get("DATASETSPLIT"), Some("1"));
    assert!(adapter.can_submit(1));
}

#[test]
fn dataset_shrink_disables_but_keeps_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let first = vec![
        block("/d", "b1", &[("f1", 10)]),
        block("/d", "b2", &[("f2", 5)]),
    ];
    let second = vec![block("/d", "b1", &[("f1", 10)])];
    let source = DataParameterSource::open(
        dir.path(),
        "dataset",
        SequenceProvider::boxed(vec![first, second]),
        Box::new(BlockSplitter::default()),
        DataSourceOptions::default(),
    )
    .unwrap();

    let mut adapter = open(dir.path(), Box::new(source));
    assert_eq!(adapter.job_count(), Some(2));

    let result = adapter.resync().unwrap();
    assert!(result.disable.contains(&1));
    assert_eq!(adapter.job_count(), Some(2));
    assert!(!adapter.can_submit(1));
    assert!(adapter.can_submit(0));
}

#[test]
fn static_dataset_space_reuses_cleanly_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let blocks = vec![block("/d", "b1", &[("f1", 10), ("f2", 5)])];

    let build = |dir: &Path| {
        let source = DataParameterSource::open(
            dir,
            "dataset",
            Box::new(StaticProvider::new("static", blocks.clone())),
            Box::new(BlockSplitter::default()),
            DataSourceOptions::default(),
        )
        .unwrap();
        open(dir, Box::new(source))
    };

    drop(build(dir.path()));
    let mut adapter = build(dir.path());
    assert_eq!(adapter.job_count(), Some(1));
    assert!(adapter.resync().unwrap().is_empty());
    assert_eq!(adapter.record(0).get("MAX_EVENTS"), Some("15"));
}
