//! Combinator sources: build a large parameter space out of independent
//! axes.
//!
//! Each combinator implements the same two pieces of machinery: forward
//! index translation for `fill` (global index → child index) and the
//! inverse translation for `resync` (child index → every global index it
//! occupies). Resync aggregation is uniform: resync every child, translate
//! its result into the combined space, union, then recompute the combined
//! size.

use gridsweep_core::hashing::sha256_parts;
use gridsweep_core::{ParamKey, ParameterRecord, ResyncResult};
use tracing::debug;

use crate::error::ParameterError;
use crate::source::ParameterSource;

fn child_sizes(children: &[Box<dyn ParameterSource>]) -> Vec<Option<usize>> {
    children.iter().map(|c| c.size()).collect()
}

fn size_part(size: Option<usize>) -> String {
    match size {
        Some(n) => n.to_string(),
        None => "-".to_string(),
    }
}

fn combined_fingerprint(tag: &str, children: &[Box<dyn ParameterSource>]) -> String {
    let mut parts = vec![tag.to_string()];
    for child in children {
        parts.push(size_part(child.size()));
        parts.push(child.fingerprint());
    }
    sha256_parts(&parts)
}

fn describe_children(tag: &str, children: &[Box<dyn ParameterSource>]) -> String {
    let inner = children
        .iter()
        .map(|c| c.describe())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{tag}({inner})")
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

/// Transparent decorator: attaches a label for resync logging without
/// altering index semantics.
pub struct ForwardingSource {
    inner: Box<dyn ParameterSource>,
    label: String,
}

impl ForwardingSource {
    pub fn new(inner: Box<dyn ParameterSource>, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }
}

impl ParameterSource for ForwardingSource {
    fn size(&self) -> Option<usize> {
        self.inner.size()
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        self.inner.fill_keys(keys);
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        self.inner.fill(index, record);
    }

    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        let result = self.inner.resync()?;
        if !result.is_empty() {
            debug!(
                label = %self.label,
                redo = result.redo.len(),
                disable = result.disable.len(),
                size_changed = result.size_changed,
                "forwarded resync reported changes"
            );
        }
        Ok(result)
    }

    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }

    fn describe(&self) -> String {
        format!("{} <- {}", self.label, self.inner.describe())
    }
}

// ---------------------------------------------------------------------------
// Range
// ---------------------------------------------------------------------------

/// Restricts a child to the index window `[start, end]`.
///
/// With no explicit end, the window tracks the child's current size and is
/// recomputed on every resync, which follows the growth of unbounded
/// children that gained a bound.
pub struct RangeSource {
    inner: Box<dyn ParameterSource>,
    start: usize,
    end_user: Option<usize>,
    end: usize,
}

impl RangeSource {
    /// An end passed by the caller stays pinned; a derived end is
    /// recomputed at every resync.
    pub fn new(
        inner: Box<dyn ParameterSource>,
        start: usize,
        end: Option<usize>,
    ) -> Result<Self, ParameterError> {
        let end_user = end;
        let end = match end {
            Some(end) => end,
            None => match inner.size() {
                Some(size) if size > 0 => size - 1,
                Some(_) => {
                    return Err(ParameterError::Config(format!(
                        "Cannot range over the empty source {}",
                        inner.describe()
                    )))
                }
                None => {
                    return Err(ParameterError::Config(format!(
                        "Range over the unbounded source {} requires an explicit end",
                        inner.describe()
                    )))
                }
            },
        };
        if end < start {
            return Err(ParameterError::Config(format!(
                "Invalid range ({start}, {end})"
            )));
        }
        Ok(Self {
            inner,
            start,
            end_user,
            end,
        })
    }
}

impl ParameterSource for RangeSource {
    fn size(&self) -> Option<usize> {
        Some(self.end - self.start + 1)
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        self.inner.fill_keys(keys);
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        if self.start + index <= self.end {
            self.inner.fill(self.start + index, record);
        }
    }

    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        let inner_result = self.inner.resync()?;
        let mut result = ResyncResult::empty();
        for &index in &inner_result.redo {
            if index >= self.start && index <= self.end {
                result.redo.insert(index - self.start);
            }
        }
        for &index in &inner_result.disable {
            if index >= self.start && index <= self.end {
                result.disable.insert(index - self.start);
            }
        }
        let old_end = self.end;
        if self.end_user.is_none() {
            if let Some(size) = self.inner.size() {
                if size > self.start {
                    self.end = size - 1;
                }
            }
        }
        result.size_changed = old_end != self.end;
        Ok(result)
    }

    fn fingerprint(&self) -> String {
        sha256_parts([
            "range",
            &self.inner.fingerprint(),
            &self.start.to_string(),
            &self.end.to_string(),
        ])
    }

    fn describe(&self) -> String {
        format!(
            "range({}, {}..={})",
            self.inner.describe(),
            self.start,
            self.end
        )
    }
}

// ---------------------------------------------------------------------------
// Zip
// ---------------------------------------------------------------------------

/// Runs children "in parallel" at the same index.
///
/// Combined size is the max (long) or min (short) of the finite child
/// sizes; in long mode children shorter than the combined size simply stop
/// contributing past their bound. Child indices line up 1:1 with combined
/// indices, so resync aggregation needs no translation.
pub struct ZipSource {
    children: Vec<Box<dyn ParameterSource>>,
    long: bool,
    size: Option<usize>,
}

impl ZipSource {
    pub fn long(children: Vec<Box<dyn ParameterSource>>) -> Self {
        let size = Self::combined_size(&children, true);
        Self {
            children,
            long: true,
            size,
        }
    }

    pub fn short(children: Vec<Box<dyn ParameterSource>>) -> Self {
        let size = Self::combined_size(&children, false);
        Self {
            children,
            long: false,
            size,
        }
    }

    fn combined_size(children: &[Box<dyn ParameterSource>], long: bool) -> Option<usize> {
        let finite: Vec<usize> = children.iter().filter_map(|c| c.size()).collect();
        if long {
            finite.iter().max().copied()
        } else {
            finite.iter().min().copied()
        }
    }
}

impl ParameterSource for ZipSource {
    fn size(&self) -> Option<usize> {
        self.size
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        for child in &self.children {
            child.fill_keys(keys);
        }
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        for child in &self.children {
            match child.size() {
                Some(n) if index >= n => {}
                _ => child.fill(index, record),
            }
        }
    }

    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        let mut result = ResyncResult::empty();
        for child in &mut self.children {
            result.merge(child.resync()?);
        }
        let old_size = self.size;
        self.size = Self::combined_size(&self.children, self.long);
        result.size_changed |= old_size != self.size;
        Ok(result)
    }

    fn fingerprint(&self) -> String {
        combined_fingerprint(if self.long { "zip-long" } else { "zip-short" }, &self.children)
    }

    fn describe(&self) -> String {
        describe_children(if self.long { "zip" } else { "szip" }, &self.children)
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Concatenates child spaces end to end. All children must be finite.
pub struct ChainSource {
    children: Vec<Box<dyn ParameterSource>>,
    sizes: Vec<usize>,
    offsets: Vec<usize>,
}

impl ChainSource {
    pub fn new(children: Vec<Box<dyn ParameterSource>>) -> Result<Self, ParameterError> {
        let sizes = Self::finite_sizes(&children)?;
        let offsets = Self::offsets_of(&sizes);
        Ok(Self {
            children,
            sizes,
            offsets,
        })
    }

    fn finite_sizes(children: &[Box<dyn ParameterSource>]) -> Result<Vec<usize>, ParameterError> {
        children
            .iter()
            .map(|c| {
                c.size().ok_or_else(|| {
                    ParameterError::Config(format!(
                        "Cannot chain the unbounded source {}",
                        c.describe()
                    ))
                })
            })
            .collect()
    }

    fn offsets_of(sizes: &[usize]) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(sizes.len());
        let mut total = 0;
        for &size in sizes {
            offsets.push(total);
            total += size;
        }
        offsets
    }
}

impl ParameterSource for ChainSource {
    fn size(&self) -> Option<usize> {
        Some(self.sizes.iter().sum())
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        for child in &self.children {
            child.fill_keys(keys);
        }
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        for ((child, &size), &offset) in self.children.iter().zip(&self.sizes).zip(&self.offsets) {
            if index < offset + size {
                child.fill(index - offset, record);
                return;
            }
        }
    }

    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        let mut child_results = Vec::with_capacity(self.children.len());
        for child in &mut self.children {
            child_results.push(child.resync()?);
        }

        let old_size: usize = self.sizes.iter().sum();
        self.sizes = Self::finite_sizes(&self.children)?;
        self.offsets = Self::offsets_of(&self.sizes);

        let mut result = ResyncResult::empty();
        for (child_idx, child_result) in child_results.iter().enumerate() {
            let offset = self.offsets[child_idx];
            result.merge_translated(child_result, |i| [i + offset]);
        }
        result.size_changed |= old_size != self.sizes.iter().sum::<usize>();
        Ok(result)
    }

    fn fingerprint(&self) -> String {
        combined_fingerprint("chain", &self.children)
    }

    fn describe(&self) -> String {
        describe_children("chain", &self.children)
    }
}

// ---------------------------------------------------------------------------
// Repeat
// ---------------------------------------------------------------------------

/// Replicates one child `times` times, modulo-indexed. An unbounded child
/// collapses to size `times`.
pub struct RepeatSource {
    inner: Box<dyn ParameterSource>,
    times: usize,
    child_size: Option<usize>,
}

impl RepeatSource {
    pub fn new(inner: Box<dyn ParameterSource>, times: usize) -> Result<Self, ParameterError> {
        if times == 0 {
            return Err(ParameterError::Config(
                "repeat requires times >= 1".to_string(),
            ));
        }
        let child_size = inner.size();
        Ok(Self {
            inner,
            times,
            child_size,
        })
    }
}

impl ParameterSource for RepeatSource {
    fn size(&self) -> Option<usize> {
        Some(match self.child_size {
            Some(n) => self.times * n,
            None => self.times,
        })
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        self.inner.fill_keys(keys);
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        match self.child_size {
            Some(n) if n > 0 => self.inner.fill(index % n, record),
            Some(_) => {}
            None => self.inner.fill(index, record),
        }
    }

    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        let inner_result = self.inner.resync()?;
        let old_size = self.size();
        self.child_size = self.inner.size();

        let mut result = ResyncResult::empty();
        match self.child_size {
            Some(n) => {
                let times = self.times;
                result.merge_translated(&inner_result, |i| {
                    (0..times).map(move |rep| i + rep * n).collect::<Vec<_>>()
                });
            }
            None => result.merge(inner_result),
        }
        result.size_changed |= old_size != self.size();
        Ok(result)
    }

    fn fingerprint(&self) -> String {
        sha256_parts(["repeat", &self.inner.fingerprint(), &self.times.to_string()])
    }

    fn describe(&self) -> String {
        format!("repeat({}, {})", self.inner.describe(), self.times)
    }
}

// ---------------------------------------------------------------------------
// Cross
// ---------------------------------------------------------------------------

/// The full Cartesian product via mixed-radix index decomposition.
///
/// Child `k` with size `n_k` and stride `prev_k` (the product of the
/// preceding finite sizes) receives local index `(global / prev_k) % n_k`.
/// Unbounded children do not enter the product and receive the global
/// index directly.
pub struct CrossSource {
    children: Vec<Box<dyn ParameterSource>>,
    layout: Vec<(Option<usize>, usize)>,
}

impl CrossSource {
    pub fn new(children: Vec<Box<dyn ParameterSource>>) -> Self {
        let layout = Self::layout_of(&children);
        Self { children, layout }
    }

    fn layout_of(children: &[Box<dyn ParameterSource>]) -> Vec<(Option<usize>, usize)> {
        let mut layout = Vec::with_capacity(children.len());
        let mut prev = 1usize;
        for child in children {
            let size = child.size();
            layout.push((size, prev));
            if let Some(n) = size {
                if n > 0 {
                    prev *= n;
                }
            }
        }
        layout
    }

    fn combined_size(layout: &[(Option<usize>, usize)]) -> Option<usize> {
        let finite: Vec<usize> = layout.iter().filter_map(|(size, _)| *size).collect();
        if finite.is_empty() {
            None
        } else {
            Some(finite.iter().product())
        }
    }
}

impl ParameterSource for CrossSource {
    fn size(&self) -> Option<usize> {
        Self::combined_size(&self.layout)
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        for child in &self.children {
            child.fill_keys(keys);
        }
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        for (child, &(size, prev)) in self.children.iter().zip(&self.layout) {
            match size {
                Some(n) if n > 0 => child.fill((index / prev) % n, record),
                Some(_) => {}
                None => child.fill(index, record),
            }
        }
    }

    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        let mut child_results = Vec::with_capacity(self.children.len());
        for child in &mut self.children {
            child_results.push(child.resync()?);
        }

        let old_size = self.size();
        self.layout = Self::layout_of(&self.children);
        let total = self.size().unwrap_or(0);

        let mut result = ResyncResult::empty();
        for (child_idx, child_result) in child_results.iter().enumerate() {
            let (size, prev) = self.layout[child_idx];
            match size {
                Some(n) if n > 0 => {
                    result.merge_translated(child_result, |local| {
                        (0..total)
                            .filter(|global| (global / prev) % n == local)
                            .collect::<Vec<_>>()
                    });
                }
                Some(_) => {}
                None => result.merge(child_result.clone()),
            }
        }
        result.size_changed |= old_size != self.size();
        Ok(result)
    }

    fn fingerprint(&self) -> String {
        combined_fingerprint("cross", &self.children)
    }

    fn describe(&self) -> String {
        describe_children("cross", &self.children)
    }
}

// ---------------------------------------------------------------------------
// Variation
// ---------------------------------------------------------------------------

/// One-factor-at-a-time variation around the base point.
///
/// Index 0 evaluates every child at 0; the following block for each finite
/// child of size `n` walks that child through `1..n` while the others stay
/// at 0. Combined size is `1 + Σ (n_k - 1)`.
pub struct VariationSource {
    children: Vec<Box<dyn ParameterSource>>,
    /// `(child index, block length, global offset)` per varied child.
    blocks: Vec<(usize, usize, usize)>,
}

impl VariationSource {
    pub fn new(children: Vec<Box<dyn ParameterSource>>) -> Self {
        let blocks = Self::blocks_of(&children);
        Self { children, blocks }
    }

    fn blocks_of(children: &[Box<dyn ParameterSource>]) -> Vec<(usize, usize, usize)> {
        let mut blocks = Vec::new();
        let mut offset = 1;
        for (child_idx, child) in children.iter().enumerate() {
            if let Some(n) = child.size() {
                if n > 1 {
                    blocks.push((child_idx, n - 1, offset));
                    offset += n - 1;
                }
            }
        }
        blocks
    }

    fn total(&self) -> usize {
        1 + self.blocks.iter().map(|&(_, len, _)| len).sum::<usize>()
    }
}

impl ParameterSource for VariationSource {
    fn size(&self) -> Option<usize> {
        Some(self.total())
    }

    fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
        for child in &self.children {
            child.fill_keys(keys);
        }
    }

    fn fill(&self, index: usize, record: &mut ParameterRecord) {
        let varied = self
            .blocks
            .iter()
            .find(|&&(_, len, offset)| index >= offset && index < offset + len)
            .copied();
        for (child_idx, child) in self.children.iter().enumerate() {
            match varied {
                Some((varied_idx, _, offset)) if varied_idx == child_idx => {
                    child.fill(index - offset + 1, record);
                }
                _ => child.fill(0, record),
            }
        }
    }

    fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
        let mut child_results = Vec::with_capacity(self.children.len());
        for child in &mut self.children {
            child_results.push(child.resync()?);
        }

        let old_size = self.total();
        self.blocks = Self::blocks_of(&self.children);

        let mut result = ResyncResult::empty();
        for (child_idx, child_result) in child_results.iter().enumerate() {
            let own_block = self
                .blocks
                .iter()
                .find(|&&(idx, _, _)| idx == child_idx)
                .copied();
            result.merge_translated(child_result, |local| {
                self.translate(child_idx, own_block, local)
            });
        }
        result.size_changed |= old_size != self.total();
        Ok(result)
    }

    fn fingerprint(&self) -> String {
        combined_fingerprint("variation", &self.children)
    }

    fn describe(&self) -> String {
        describe_children("variation", &self.children)
    }
}

impl VariationSource {
    /// All global indices where child `child_idx` is evaluated at `local`.
    fn translate(
        &self,
        child_idx: usize,
        own_block: Option<(usize, usize, usize)>,
        local: usize,
    ) -> Vec<usize> {
        if local == 0 {
            // The base value appears at the base point and throughout every
            // other child's variation block.
            let mut indices = vec![0];
            for &(idx, len, offset) in &self.blocks {
                if idx != child_idx {
                    indices.extend(offset..offset + len);
                }
            }
            indices
        } else {
            match own_block {
                Some((_, len, offset)) if local - 1 < len => vec![offset + local - 1],
                _ => Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::{ConstSource, ValuesSource};
    use crate::source::NullSource;

    fn values(key: &str, values: &[&str]) -> Box<dyn ParameterSource> {
        Box::new(ValuesSource::new(key, values.iter().copied().collect::<Vec<_>>()).unwrap())
    }

    fn record_of(source: &dyn ParameterSource, index: usize) -> ParameterRecord {
        let mut record = ParameterRecord::new();
        source.fill(index, &mut record);
        record
    }

    // -- forwarding ----------------------------------------------------------

    #[test]
    fn forwarding_passes_everything_through() {
        let inner = values("A", &["a0", "a1"]);
        let source = ForwardingSource::new(inner, "axis-a");

        assert_eq!(source.size(), Some(2));
        assert_eq!(record_of(&source, 1).get("A"), Some("a1"));
        assert!(source.describe().starts_with("axis-a"));

        let plain = values("A", &["a0", "a1"]);
        assert_eq!(source.fingerprint(), plain.fingerprint());
    }

    // -- range ---------------------------------------------------------------

    #[test]
    fn range_translates_indices() {
        let source = RangeSource::new(values("A", &["a", "b", "c", "d"]), 1, Some(2)).unwrap();
        assert_eq!(source.size(), Some(2));
        assert_eq!(record_of(&source, 0).get("A"), Some("b"));
        assert_eq!(record_of(&source, 1).get("A"), Some("c"));
    }

    #[test]
    fn range_defaults_to_child_bounds() {
        let source = RangeSource::new(values("A", &["a", "b", "c"]), 1, None).unwrap();
        assert_eq!(source.size(), Some(2));
    }

    #[test]
    fn range_over_unbounded_needs_explicit_end() {
        assert!(RangeSource::new(Box::new(ConstSource::new("A", "x")), 0, None).is_err());
        assert!(RangeSource::new(Box::new(ConstSource::new("A", "x")), 0, Some(4)).is_ok());
    }

    #[test]
    fn range_rejects_inverted_window() {
        assert!(RangeSource::new(values("A", &["a", "b"]), 1, Some(0)).is_err());
    }

    // -- zip -----------------------------------------------------------------

    #[test]
    fn zip_long_takes_max_size_and_skips_short_children() {
        let source = ZipSource::long(vec![
            values("A", &["a0", "a1", "a2"]),
            values("B", &["b0"]),
        ]);
        assert_eq!(source.size(), Some(3));

        let record = record_of(&source, 2);
        assert_eq!(record.get("A"), Some("a2"));
        assert_eq!(record.get("B"), None);
    }

    #[test]
    fn zip_short_takes_min_size() {
        let source = ZipSource::short(vec![
            values("A", &["a0", "a1", "a2"]),
            values("B", &["b0"]),
        ]);
        assert_eq!(source.size(), Some(1));
    }

    #[test]
    fn zip_ignores_unbounded_children_for_size() {
        let source = ZipSource::long(vec![
            values("A", &["a0", "a1"]),
            Box::new(ConstSource::new("C", "x")),
        ]);
        assert_eq!(source.size(), Some(2));
        assert_eq!(record_of(&source, 1).get("C"), Some("x"));
    }

    #[test]
    fn zip_of_only_unbounded_children_is_unbounded() {
        let source = ZipSource::long(vec![
            Box::new(ConstSource::new("C", "x")) as Box<dyn ParameterSource>,
            Box::new(NullSource) as Box<dyn ParameterSource>,
        ]);
        assert_eq!(source.size(), None);
    }

    // -- chain ---------------------------------------------------------------

    #[test]
    fn chain_concatenates() {
        let source =
            ChainSource::new(vec![values("A", &["a0", "a1"]), values("A", &["a2"])]).unwrap();
        assert_eq!(source.size(), Some(3));
        assert_eq!(record_of(&source, 0).get("A"), Some("a0"));
        assert_eq!(record_of(&source, 2).get("A"), Some("a2"));
    }

    #[test]
    fn chain_rejects_unbounded_children() {
        let result = ChainSource::new(vec![
            values("A", &["a0"]),
            Box::new(ConstSource::new("B", "x")),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn chain_index_roundtrip() {
        let sizes = [2usize, 3, 4];
        let source = ChainSource::new(vec![
            values("A", &["a0", "a1"]),
            values("A", &["b0", "b1", "b2"]),
            values("A", &["c0", "c1", "c2", "c3"]),
        ])
        .unwrap();

        // Decompose every global index into (segment, local) and recompose.
        let mut global = 0;
        for (segment, &size) in sizes.iter().enumerate() {
            for local in 0..size {
                let offset: usize = sizes[..segment].iter().sum();
                assert_eq!(global, offset + local);
                let expected = ["a", "b", "c"][segment];
                let got = record_of(&source, global);
                assert_eq!(got.get("A"), Some(format!("{expected}{local}").as_str()));
                global += 1;
            }
        }
        assert_eq!(source.size(), Some(global));
    }

    // -- repeat --------------------------------------------------------------

    #[test]
    fn repeat_modulo_indexes() {
        let source = RepeatSource::new(values("A", &["a0", "a1"]), 3).unwrap();
        assert_eq!(source.size(), Some(6));
        assert_eq!(record_of(&source, 0).get("A"), Some("a0"));
        assert_eq!(record_of(&source, 3).get("A"), Some("a1"));
        assert_eq!(record_of(&source, 4).get("A"), Some("a0"));
    }

    #[test]
    fn repeat_of_unbounded_child_has_size_times() {
        let source = RepeatSource::new(Box::new(ConstSource::new("A", "x")), 5).unwrap();
        assert_eq!(source.size(), Some(5));
    }

    #[test]
    fn repeat_rejects_zero_times() {
        assert!(RepeatSource::new(values("A", &["a0"]), 0).is_err());
    }

    // -- cross ---------------------------------------------------------------

    #[test]
    fn cross_size_is_product_of_finite_children() {
        let source = CrossSource::new(vec![
            values("A", &["a0", "a1", "a2"]),
            values("B", &["b0", "b1", "b2", "b3"]),
            Box::new(ConstSource::new("C", "x")),
        ]);
        assert_eq!(source.size(), Some(12));
    }

    #[test]
    fn cross_mixed_radix_decomposition() {
        // Sizes (3, 4): strides are (1, 3); index 7 -> (7 % 3, (7 / 3) % 4)
        // = (1, 2).
        let source = CrossSource::new(vec![
            values("A", &["a0", "a1", "a2"]),
            values("B", &["b0", "b1", "b2", "b3"]),
        ]);
        let record = record_of(&source, 7);
        assert_eq!(record.get("A"), Some("a1"));
        assert_eq!(record.get("B"), Some("b2"));
    }

    #[test]
    fn cross_index_roundtrip() {
        let source = CrossSource::new(vec![
            values("A", &["a0", "a1", "a2"]),
            values("B", &["b0", "b1", "b2", "b3"]),
        ]);
        let total = source.size().unwrap();
        assert_eq!(total, 12);

        for global in 0..total {
            let (a, b) = (global % 3, (global / 3) % 4);
            // Recompose from the digits and the strides (1, 3).
            assert_eq!(a + 3 * b, global);
            let record = record_of(&source, global);
            assert_eq!(record.get("A"), Some(format!("a{a}").as_str()));
            assert_eq!(record.get("B"), Some(format!("b{b}").as_str()));
        }
    }

    #[test]
    fn cross_of_only_unbounded_children_is_unbounded() {
        let source = CrossSource::new(vec![
            Box::new(ConstSource::new("A", "x")) as Box<dyn ParameterSource>
        ]);
        assert_eq!(source.size(), None);
    }

    // -- variation -----------------------------------------------------------

    #[test]
    fn variation_size_and_base_point() {
        let source = VariationSource::new(vec![
            values("A", &["a0", "a1", "a2"]),
            values("B", &["b0", "b1"]),
        ]);
        // 1 base point + 2 variations of A + 1 variation of B.
        assert_eq!(source.size(), Some(4));

        let base = record_of(&source, 0);
        assert_eq!(base.get("A"), Some("a0"));
        assert_eq!(base.get("B"), Some("b0"));
    }

    #[test]
    fn variation_varies_one_axis_at_a_time() {
        let source = VariationSource::new(vec![
            values("A", &["a0", "a1", "a2"]),
            values("B", &["b0", "b1"]),
        ]);

        let record = record_of(&source, 1);
        assert_eq!(record.get("A"), Some("a1"));
        assert_eq!(record.get("B"), Some("b0"));

        let record = record_of(&source, 2);
        assert_eq!(record.get("A"), Some("a2"));
        assert_eq!(record.get("B"), Some("b0"));

        let record = record_of(&source, 3);
        assert_eq!(record.get("A"), Some("a0"));
        assert_eq!(record.get("B"), Some("b1"));
    }

    // -- resync aggregation --------------------------------------------------

    /// A controllable child for resync tests.
    struct Scripted {
        key: String,
        size: usize,
        pending: Option<ResyncResult>,
    }

    impl Scripted {
        fn boxed(key: &str, size: usize, pending: Option<ResyncResult>) -> Box<dyn ParameterSource> {
            Box::new(Self {
                key: key.to_string(),
                size,
                pending,
            })
        }
    }

    impl ParameterSource for Scripted {
        fn size(&self) -> Option<usize> {
            Some(self.size)
        }

        fn fill_keys(&self, keys: &mut Vec<ParamKey>) {
            keys.push(ParamKey::tracked(&self.key));
        }

        fn fill(&self, index: usize, record: &mut ParameterRecord) {
            record.set(&self.key, index.to_string());
        }

        fn resync(&mut self) -> Result<ResyncResult, ParameterError> {
            Ok(self.pending.take().unwrap_or_default())
        }

        fn fingerprint(&self) -> String {
            sha256_parts(["scripted", &self.key, &self.size.to_string()])
        }

        fn describe(&self) -> String {
            format!("scripted({})", self.key)
        }
    }

    fn redo_of(indices: &[usize]) -> ResyncResult {
        ResyncResult {
            redo: indices.iter().copied().collect(),
            ..ResyncResult::empty()
        }
    }

    #[test]
    fn chain_translates_resync_indices_by_offset() {
        let mut source = ChainSource::new(vec![
            Scripted::boxed("A", 2, None),
            Scripted::boxed("B", 3, Some(redo_of(&[1]))),
        ])
        .unwrap();

        let result = source.resync().unwrap();
        assert_eq!(result.redo.iter().copied().collect::<Vec<_>>(), vec![3]);
        assert!(!result.size_changed);
    }

    #[test]
    fn repeat_translates_resync_to_every_replica() {
        let mut source = RepeatSource::new(Scripted::boxed("A", 2, Some(redo_of(&[1]))), 3).unwrap();
        let result = source.resync().unwrap();
        assert_eq!(
            result.redo.iter().copied().collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
    }

    #[test]
    fn cross_translates_resync_to_matching_digit() {
        // Children of size (3, 4); a change in child 1 at local index 2
        // hits every global index whose second digit is 2: 6, 7, 8.
        let mut source = CrossSource::new(vec![
            Scripted::boxed("A", 3, None),
            Scripted::boxed("B", 4, Some(redo_of(&[2]))),
        ]);
        let result = source.resync().unwrap();
        assert_eq!(
            result.redo.iter().copied().collect::<Vec<_>>(),
            vec![6, 7, 8]
        );
    }

    #[test]
    fn zip_merges_resync_without_translation() {
        let mut source = ZipSource::long(vec![
            Scripted::boxed("A", 3, Some(redo_of(&[0]))),
            Scripted::boxed("B", 3, Some(redo_of(&[2]))),
        ]);
        let result = source.resync().unwrap();
        assert_eq!(
            result.redo.iter().copied().collect::<Vec<_>>(),
            vec![0, 2]
        );
    }

    #[test]
    fn variation_translates_base_value_changes_broadly() {
        // Children of size (3, 2): blocks are A -> [1, 2], B -> [3].
        // A change of child B at local 0 hits the base point and block A.
        let mut source = VariationSource::new(vec![
            Scripted::boxed("A", 3, None),
            Scripted::boxed("B", 2, Some(redo_of(&[0]))),
        ]);
        let result = source.resync().unwrap();
        assert_eq!(
            result.redo.iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn resync_with_no_changes_is_empty() {
        let mut source = CrossSource::new(vec![
            Scripted::boxed("A", 3, None),
            Scripted::boxed("B", 4, None),
        ]);
        assert!(source.resync().unwrap().is_empty());
        assert!(source.resync().unwrap().is_empty());
    }
}
