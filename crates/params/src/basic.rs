//! Leaf parameter sources.

use gridsweep_core::hashing::sha256_parts;
use gridsweep_core::{ParamKey, ParameterRecord, Requirement};
use rand::Rng;
use regex::Regex;

use crate::error::ParameterError;
use crate::source::{ParameterSource, JOB_ID_KEY};

/// One key with the same value at every index. Unbounded.
#[derive(Debug, Clone)]
pub struct ConstSource {
    key: ParamKey,
    value: String,
}

impl ConstSource {
    /// `key` may carry the `!` untracked marker.
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: ParamKey::parse(key),
            value: value.into(),
        }
    }
}

impl ParameterSource for ConstSource {
    fn size(&self) -> Option<usize> {
        None
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.push(self.key.clone());
    }

    fn fill(&self, _index: usize, record: &mut ParameterRecord) {
        record.set(&self.key.name, &self.value);
    }

    fn fingerprint(&self) -> String {
        sha256_parts(["const", &self.key.name, &self.value])
    }

    fn describe(&self) -> String {
        format!("const({}, {:?})", self.key, self.value)
    }
}

/// One key with one value per index.
#[derive(Debug, Clone)]
pub struct ValuesSource {
    key: ParamKey,
    values: Vec<String>,
}

impl ValuesSource {
    pub fn new(
        key: &str,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ParameterError> {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(ParameterError::Config(format!("Missing values for {key}")));
        }
        Ok(Self {
            key: ParamKey::parse(key),
            values,
        })
    }
}

impl ParameterSource for ValuesSource {
    fn size(&self) -> Option<usize> {
        Some(self.values.len())
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.push(self.key.clone());
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        if let Some(value) = self.values.get(index) {
            record.set(&self.key.name, value);
        }
    }

    fn fingerprint(&self) -> String {
        let mut parts = vec!["var".to_string(), self.key.name.clone()];
        parts.extend(self.values.iter().cloned());
        sha256_parts(&parts)
    }

    fn describe(&self) -> String {
        format!("var({}, len = {})", self.key, self.values.len())
    }
}

/// An untracked counter: `seed + job number`. Unbounded.
#[derive(Debug, Clone)]
pub struct CounterSource {
    key: ParamKey,
    seed: i64,
}

impl CounterSource {
    pub fn new(key: &str, seed: i64) -> Self {
        Self {
            key: ParamKey::untracked(key.trim_start_matches('!')),
            seed,
        }
    }
}

impl ParameterSource for CounterSource {
    fn size(&self) -> Option<usize> {
        None
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.push(self.key.clone());
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        let job = record
            .get(JOB_ID_KEY)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(index as i64);
        record.set(&self.key.name, (self.seed + job).to_string());
    }

    fn fingerprint(&self) -> String {
        sha256_parts(["counter", &self.key.name, &self.seed.to_string()])
    }

    fn describe(&self) -> String {
        format!("counter({}, {})", self.key, self.seed)
    }
}

/// An untracked uniform random integer in `[low, high]`. Unbounded; a
/// fresh value is drawn on every fill, so it never enters the tracked
/// space.
#[derive(Debug, Clone)]
pub struct RngSource {
    key: ParamKey,
    low: i64,
    high: i64,
}

impl RngSource {
    pub fn new(key: &str, low: i64, high: i64) -> Self {
        Self {
            key: ParamKey::untracked(key.trim_start_matches('!')),
            low,
            high,
        }
    }
}

impl Default for RngSource {
    fn default() -> Self {
        Self::new("JOB_RANDOM", 1_000_000, 9_999_999)
    }
}

impl ParameterSource for RngSource {
    fn size(&self) -> Option<usize> {
        None
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.push(self.key.clone());
    }

    fn fill(&self, _index: usize, record: &mut ParameterRecord) {
        let value = rand::rng().random_range(self.low..=self.high);
        record.set(&self.key.name, value.to_string());
    }

    fn fingerprint(&self) -> String {
        sha256_parts([
            "rng",
            &self.key.name,
            &self.low.to_string(),
            &self.high.to_string(),
        ])
    }

    fn describe(&self) -> String {
        format!("rng({}, {}..={})", self.key, self.low, self.high)
    }
}

/// A fixed list of prebuilt records with declared keys.
///
/// The adapter uses this to keep serving the records of parameters that
/// vanished upstream, pinned behind the live space.
#[derive(Debug, Clone)]
pub struct InternalSource {
    keys: Vec<ParamKey>,
    records: Vec<ParameterRecord>,
}

impl InternalSource {
    pub fn new(records: Vec<ParameterRecord>, keys: Vec<ParamKey>) -> Self {
        Self { keys, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ParameterSource for InternalSource {
    fn size(&self) -> Option<usize> {
        Some(self.records.len())
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.extend(self.keys.iter().cloned());
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        if let Some(stored) = self.records.get(index) {
            record.active = record.active && stored.active;
            record.requirements.extend(stored.requirements.iter().copied());
            for (key, value) in stored.iter() {
                record.set(key, value);
            }
        }
    }

    fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = vec!["internal".to_string()];
        parts.extend(self.keys.iter().map(ToString::to_string));
        for record in &self.records {
            parts.push(record.active.to_string());
            for (key, value) in record.iter() {
                parts.push(key.to_string());
                parts.push(value.to_string());
            }
        }
        sha256_parts(&parts)
    }

    fn describe(&self) -> String {
        format!("internal(len = {})", self.records.len())
    }
}

/// Copies the first variable matching one of the name patterns into a new
/// key. `...` in a pattern is a wildcard.
#[derive(Debug, Clone)]
pub struct CollectSource {
    key: ParamKey,
    raw_patterns: Vec<String>,
    patterns: Vec<Regex>,
}

impl CollectSource {
    pub fn new(
        key: &str,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ParameterError> {
        let raw_patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let patterns = raw_patterns
            .iter()
            .map(|p| {
                let anchored = format!("^{}$", regex::escape(p).replace(r"\.\.\.", ".*"));
                Regex::new(&anchored)
                    .map_err(|e| ParameterError::Config(format!("Bad collect pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            key: ParamKey::parse(key),
            raw_patterns,
            patterns,
        })
    }
}

impl ParameterSource for CollectSource {
    fn size(&self) -> Option<usize> {
        None
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.push(self.key.clone());
    }

    fn fill(&self, _index: usize, record: &mut ParameterRecord) {
        for pattern in &self.patterns {
            let found = record
                .iter()
                .find(|(key, _)| pattern.is_match(key))
                .map(|(_, value)| value.to_string());
            if let Some(value) = found {
                record.set(&self.key.name, value);
                return;
            }
        }
    }

    fn fingerprint(&self) -> String {
        let mut parts = vec!["collect".to_string(), self.key.name.clone()];
        parts.extend(self.raw_patterns.iter().cloned());
        sha256_parts(&parts)
    }

    fn describe(&self) -> String {
        format!("collect({}, {:?})", self.key, self.raw_patterns)
    }
}

/// Converts the `WALLTIME`, `CPUTIME`, and `MEMORY` variables into typed
/// job requirements and removes them from the record and key set.
#[derive(Debug, Clone, Default)]
pub struct RequirementSource;

/// Parse `HH[:MM[:SS]]` into seconds.
fn parse_duration_secs(value: &str) -> Option<u64> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = match parts.next() {
        Some(m) => m.trim().parse().ok()?,
        None => 0,
    };
    let seconds: u64 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

impl ParameterSource for RequirementSource {
    fn size(&self) -> Option<usize> {
        None
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.retain(|k| !matches!(k.name.as_str(), "WALLTIME" | "CPUTIME" | "MEMORY"));
    }

    fn fill(&self, _index: usize, record: &mut ParameterRecord) {
        if let Some(value) = record.get("WALLTIME").map(str::to_string) {
            if let Some(secs) = parse_duration_secs(&value) {
                record.remove("WALLTIME");
                record.requirements.push(Requirement::WallTime(secs));
            }
        }
        if let Some(value) = record.get("CPUTIME").map(str::to_string) {
            if let Some(secs) = parse_duration_secs(&value) {
                record.remove("CPUTIME");
                record.requirements.push(Requirement::CpuTime(secs));
            }
        }
        if let Some(value) = record.get("MEMORY").map(str::to_string) {
            if let Ok(mb) = value.trim().parse::<u64>() {
                record.remove("MEMORY");
                record.requirements.push(Requirement::Memory(mb));
            }
        }
    }

    fn fingerprint(&self) -> String {
        String::new()
    }

    fn describe(&self) -> String {
        "req()".to_string()
    }
}
