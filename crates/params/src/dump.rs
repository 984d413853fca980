//! The parameter dump file: one line per job with the tracked values it
//! ran with.
//!
//! The dump is the "old" side of every reconciliation: it preserves what
//! each job number actually meant at the time of the last commit,
//! independent of what the live source tree produces today.
//!
//! Format: the first line is a `# `-prefixed, tab-separated, ordered list
//! of the tracked key names; each following line is the job number
//! (suffixed `!` when the job is inactive) and one escaped value per key,
//! tab-separated. Empty fields mean "value absent".

use std::fs;
use std::path::Path;

use gridsweep_core::fsutil;
use gridsweep_core::hashing::sha256_parts;
use gridsweep_core::{ParamKey, ParameterRecord};

use crate::error::ParameterError;
use crate::source::ParameterSource;

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// The file rendering; callers that stage paired commits use this
/// directly.
pub(crate) fn render_dump<I>(keys: &[String], records: I) -> String
where
    I: IntoIterator<Item = (usize, ParameterRecord)>,
{
    let mut out = String::new();
    out.push_str("# ");
    out.push_str(&keys.join("\t"));
    out.push('\n');

    for (job, record) in records {
        if record.active {
            out.push_str(&job.to_string());
        } else {
            out.push_str(&format!("{job}!"));
        }
        for key in keys {
            out.push('\t');
            out.push_str(&escape(record.get(key).unwrap_or("")));
        }
        out.push('\n');
    }
    out
}

/// Write a dump of `records` (in job-number order) to `path` through the
/// atomic temp-then-rename protocol.
pub fn write_dump<I>(path: &Path, keys: &[String], records: I) -> Result<(), ParameterError>
where
    I: IntoIterator<Item = (usize, ParameterRecord)>,
{
    fsutil::write_atomic(path, render_dump(keys, records).as_bytes())?;
    Ok(())
}

#[derive(Debug, Clone)]
struct DumpRow {
    active: bool,
    values: Vec<Option<String>>,
}

/// Replays a previously written dump file as a parameter source.
#[derive(Debug, Clone)]
pub struct DumpSource {
    keys: Vec<String>,
    rows: Vec<DumpRow>,
}

impl DumpSource {
    pub fn read(path: &Path) -> Result<Self, ParameterError> {
        let malformed = |detail: String| ParameterError::Malformed {
            what: "parameter dump",
            path: path.to_path_buf(),
            detail,
        };

        let text = fs::read_to_string(path).map_err(|e| ParameterError::io(path, e))?;
        let mut lines = text.lines();

        let header = lines
            .next()
            .ok_or_else(|| malformed("missing header line".to_string()))?;
        let header = header
            .strip_prefix('#')
            .ok_or_else(|| malformed("header line must start with '#'".to_string()))?
            .trim();
        let keys: Vec<String> = if header.is_empty() {
            Vec::new()
        } else {
            header.split('\t').map(str::to_string).collect()
        };

        let mut rows = Vec::new();
        for (line_no, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let job_field = fields.next().unwrap_or_default();
            let (job_field, active) = match job_field.strip_suffix('!') {
                Some(stripped) => (stripped, false),
                None => (job_field, true),
            };
            let job: usize = job_field
                .parse()
                .map_err(|_| malformed(format!("bad job number {job_field:?} on line {}", line_no + 2)))?;
            if job != rows.len() {
                return Err(malformed(format!(
                    "job number {job} out of order on line {}",
                    line_no + 2
                )));
            }
            let values: Vec<Option<String>> = (0..keys.len())
                .map(|_| fields.next().filter(|v| !v.is_empty()).map(|v| unescape(v)))
                .collect();
            rows.push(DumpRow { active, values });
        }

        Ok(Self { keys, rows })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Materialize the record stored for one job number.
    pub fn record(&self, index: usize) -> ParameterRecord {
        let mut record = ParameterRecord::new();
        self.fill(index, &mut record);
        record
    }
}

impl ParameterSource for DumpSource {
    fn size(&self) -> Option<usize> {
        Some(self.rows.len())
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        keys.extend(self.keys.iter().map(ParamKey::tracked));
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        let Some(row) = self.rows.get(index) else {
            return;
        };
        record.active = record.active && row.active;
        for (key, value) in self.keys.iter().zip(&row.values) {
            if let Some(value) = value {
                record.set(key, value);
            }
        }
    }

    fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = vec!["dump".to_string()];
        parts.extend(self.keys.iter().cloned());
        for row in &self.rows {
            parts.push(row.active.to_string());
            for value in row.values.iter().flatten() {
                parts.push(value.clone());
            }
        }
        sha256_parts(&parts)
    }

    fn describe(&self) -> String {
        format!("dump(len = {})", self.rows.len())
    }
}
