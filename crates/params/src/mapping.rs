//! The persisted job ↔ parameter-number mapping.
//!
//! The mapping is a partial bijection: jobs not listed map to the
//! parameter number equal to their own job number (identity entries are
//! compacted away). Besides the entries it persists the last-known space
//! size and the content fingerprint of the whole space, which is how a
//! later run decides whether a resync is needed at all.
//!
//! Format: line 1 is the max parameter count; line 2 the comma-separated
//! `job:param` pairs, `!`-suffixed when the job is bound to an inactive
//! parameter; line 3 the space fingerprint.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use gridsweep_core::fsutil;

use crate::error::ParameterError;

/// One explicit (non-identity) mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub param: usize,
    /// False when the job is pinned to a removed parameter.
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobMapping {
    /// Size of the parameter space when the mapping was written.
    pub max_params: usize,
    pub entries: BTreeMap<usize, MapEntry>,
    /// Content fingerprint of the space when the mapping was written.
    pub fingerprint: Option<String>,
}

impl JobMapping {
    /// The identity mapping over a space of `max_params` parameters.
    pub fn identity(max_params: usize, fingerprint: impl Into<String>) -> Self {
        Self {
            max_params,
            entries: BTreeMap::new(),
            fingerprint: Some(fingerprint.into()),
        }
    }

    /// The parameter number a job currently maps to.
    pub fn param_of(&self, job: usize) -> usize {
        self.entries.get(&job).map(|e| e.param).unwrap_or(job)
    }

    /// Record `job -> param`; identity pairs are dropped.
    pub fn set(&mut self, job: usize, param: usize, active: bool) {
        if job == param && active {
            self.entries.remove(&job);
        } else {
            self.entries.insert(job, MapEntry { param, active });
        }
    }

    /// Inverse view: parameter number → job number for every explicit
    /// entry.
    pub fn inverted(&self) -> BTreeMap<usize, usize> {
        self.entries.iter().map(|(&job, e)| (e.param, job)).collect()
    }

    /// The file rendering; callers that stage paired commits use this
    /// directly.
    pub(crate) fn render(&self) -> String {
        let pairs: Vec<String> = self
            .entries
            .iter()
            .map(|(&job, entry)| {
                if entry.active {
                    format!("{job}:{}", entry.param)
                } else {
                    format!("{job}:{}!", entry.param)
                }
            })
            .collect();
        format!(
            "{}\n{}\n{}\n",
            self.max_params,
            pairs.join(","),
            self.fingerprint.as_deref().unwrap_or("")
        )
    }

    pub fn write(&self, path: &Path) -> Result<(), ParameterError> {
        fsutil::write_atomic(path, self.render().as_bytes())?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ParameterError> {
        let malformed = |detail: String| ParameterError::Malformed {
            what: "job mapping",
            path: path.to_path_buf(),
            detail,
        };

        let text = fs::read_to_string(path).map_err(|e| ParameterError::io(path, e))?;
        let mut lines = text.lines();

        let max_params: usize = lines
            .next()
            .ok_or_else(|| malformed("missing size line".to_string()))?
            .trim()
            .parse()
            .map_err(|e| malformed(format!("bad size line: {e}")))?;

        let mut entries = BTreeMap::new();
        for pair in lines.next().unwrap_or("").split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (job, param) = pair
                .split_once(':')
                .ok_or_else(|| malformed(format!("bad mapping entry {pair:?}")))?;
            let (param, active) = match param.strip_suffix('!') {
                Some(stripped) => (stripped, false),
                None => (param, true),
            };
            let job: usize = job
                .parse()
                .map_err(|_| malformed(format!("bad job number {job:?}")))?;
            let param: usize = param
                .parse()
                .map_err(|_| malformed(format!("bad parameter number {param:?}")))?;
            entries.insert(job, MapEntry { param, active });
        }

        let fingerprint = lines
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        Ok(Self {
            max_params,
            entries,
            fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_lookup_without_entries() {
        let mapping = JobMapping::identity(5, "abc");
        assert_eq!(mapping.param_of(3), 3);
        assert!(mapping.entries.is_empty());
    }

    #[test]
    fn set_compacts_identity_pairs() {
        let mut mapping = JobMapping::identity(5, "abc");
        mapping.set(2, 4, true);
        mapping.set(3, 3, true);
        assert_eq!(mapping.entries.len(), 1);
        assert_eq!(mapping.param_of(2), 4);
        assert_eq!(mapping.param_of(3), 3);
    }

    #[test]
    fn inactive_identity_pair_is_kept_explicit() {
        let mut mapping = JobMapping::identity(5, "abc");
        mapping.set(2, 2, false);
        assert_eq!(mapping.entries.len(), 1);
        assert!(!mapping.entries[&2].active);
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.map");

        let mut mapping = JobMapping::identity(7, "fp-123");
        mapping.set(1, 5, true);
        mapping.set(2, 8, false);
        mapping.write(&path).unwrap();

        let loaded = JobMapping::read(&path).unwrap();
        assert_eq!(loaded, mapping);
    }

    #[test]
    fn file_format_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.map");

        let mut mapping = JobMapping::identity(3, "fp");
        mapping.set(0, 2, true);
        mapping.set(1, 4, false);
        mapping.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "3\n0:2,1:4!\nfp\n");
    }

    #[test]
    fn reads_file_without_fingerprint_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.map");
        std::fs::write(&path, "4\n1:2\n").unwrap();

        let mapping = JobMapping::read(&path).unwrap();
        assert_eq!(mapping.max_params, 4);
        assert_eq!(mapping.param_of(1), 2);
        assert_eq!(mapping.fingerprint, None);
    }

    #[test]
    fn garbage_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.map");
        std::fs::write(&path, "not-a-number\n").unwrap();
        assert!(matches!(
            JobMapping::read(&path),
            Err(ParameterError::Malformed { .. })
        ));
    }

    #[test]
    fn inverted_view() {
        let mut mapping = JobMapping::identity(5, "fp");
        mapping.set(1, 4, true);
        mapping.set(3, 7, false);
        let inverted = mapping.inverted();
        assert_eq!(inverted[&4], 1);
        assert_eq!(inverted[&7], 3);
    }
}
