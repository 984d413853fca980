//! Parameter records and the variable-name metadata attached to them.
//!
//! A record is one job's variable assignment: an ordered name → value map
//! plus the implicit `active` flag and the resource requirements collected
//! for the job.

use std::collections::BTreeMap;

use crate::hashing::sha256_parts;

/// A variable name a parameter source can contribute.
///
/// Untracked keys are informational (derived file lists, per-job counters)
/// and never enter the content hash used to detect changed parameters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParamKey {
    pub name: String,
    pub untracked: bool,
}

impl ParamKey {
    pub fn tracked(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            untracked: false,
        }
    }

    pub fn untracked(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            untracked: true,
        }
    }

    /// Parse the `!NAME` convention: a leading `!` marks the key untracked.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('!') {
            Some(name) => Self::untracked(name),
            None => Self::tracked(spec),
        }
    }
}

impl std::fmt::Display for ParamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.untracked {
            write!(f, "!{}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// A resource request attached to a single job, merged with task-level
/// requirements by the job layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Wall-clock time in seconds.
    WallTime(u64),
    /// CPU time in seconds.
    CpuTime(u64),
    /// Memory in megabytes.
    Memory(u64),
}

/// One job's variable-name → value mapping.
///
/// Values are kept as strings; the ordering of the underlying map is the
/// lexical key order, which keeps dumps and hashes deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub active: bool,
    pub requirements: Vec<Requirement>,
    values: BTreeMap<String, String>,
}

impl Default for ParameterRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterRecord {
    pub fn new() -> Self {
        Self {
            active: true,
            requirements: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop all empty-string values for compactness.
    pub fn prune_empty(&mut self) {
        self.values.retain(|_, v| !v.is_empty());
    }

    /// Hash the record's content restricted to the given tracked key names.
    ///
    /// Absent and empty values are skipped, so a record that never set a
    /// key hashes the same as one that set it to the empty string.
    pub fn content_hash(&self, tracked: &[String]) -> String {
        let parts = tracked.iter().flat_map(|key| {
            self.values
                .get(key)
                .filter(|v| !v.is_empty())
                .map(|v| [key.as_str(), v.as_str()])
        });
        sha256_parts(parts.flatten())
    }
}
