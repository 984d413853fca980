//! The parameter-source contract.
//!
//! A source is one node of an indexed space of parameter records. Leaf
//! sources contribute values; combinators compose sub-spaces through index
//! translation. Composition is by ownership: a combinator owns boxed child
//! sources, there is no subclassing.

use gridsweep_core::{ParamKey, ParameterRecord, ResyncResult};

use crate::error::ParameterError;

/// Variable carrying the stable external job number on every record.
pub const JOB_ID_KEY: &str = "SWEEP_JOB_ID";

/// Variable carrying the internal parameter number a job currently maps to.
pub const PARAM_ID_KEY: &str = "SWEEP_PARAM_ID";

/// One node of a parameter space.
///
/// Indexing must be stable within a run: `fill(i, ..)` is a pure function
/// of `i` and the source's current upstream state. Callers pass indices
/// below `size()`; sources tolerate out-of-range indices by contributing
/// nothing (zip-long relies on this to run sub-spaces of different length
/// in parallel).
pub trait ParameterSource {
    /// Number of records, or `None` for unbounded generator-like axes.
    fn size(&self) -> Option<usize>;

    /// Append (or adjust) the variable names this source contributes.
    fn fill_keys(&self, keys: &mut Vec<ParamKey>);

    /// Contribute this source's share of the record at `index`.
    fn fill(&self, index: usize, record: &mut ParameterRecord);

    /// Reconcile with new upstream state. Only sources whose records are
    /// opaque references (like partition numbers) do real work here.
    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        Ok(ResyncResult::empty())
    }

    /// Content fingerprint; composites fold child fingerprints in.
    fn fingerprint(&self) -> String;

    /// One-line rendering for logs and diagnostics.
    fn describe(&self) -> String;
}

/// The empty contribution.
#[derive(Debug, Clone, Default)]
pub struct NullSource;

impl ParameterSource for NullSource {
    fn size(&self) -> Option<usize> {
        None
    }

    fn fill_keys(&self, _keys: &mut Vec<ParamKey>) {}

    fn fill(&self, _index: usize, _record: &mut ParameterRecord) {}

    fn fingerprint(&self) -> String {
        String::new()
    }

    fn describe(&self) -> String {
        "null()".to_string()
    }
}

/// Collect the tracked key names of a source, sorted, for content hashing.
pub fn tracked_key_names(source: &dyn ParameterSource) -> Vec<String> {
    let mut keys = Vec::new();
    source.fill_keys(&mut keys);
    let mut names: Vec<String> = keys
        .into_iter()
        .filter(|k| !k.untracked)
        .map(|k| k.name)
        .collect();
    names.sort();
    names.dedup();
    names
}
