//! Instance-scoped plugin registry.
//!
//! Components that are pluggable by configured name (splitting strategies,
//! providers) resolve through one of these. Inheritance-style nearest-match
//! lookup is replaced by an explicit, priority-ordered alias table; the
//! registry is owned by whoever builds the component tree rather than
//! living in a process-wide singleton, so tests can construct independent
//! instances.

use std::collections::BTreeMap;

use crate::error::CoreError;

#[derive(Debug, Clone)]
struct AliasEntry {
    alias: String,
    target: String,
    priority: u32,
}

/// Maps a string key to a registered value (typically a factory function).
#[derive(Debug, Clone)]
pub struct Registry<T> {
    kind: &'static str,
    entries: BTreeMap<String, T>,
    aliases: Vec<AliasEntry>,
}

impl<T> Registry<T> {
    /// `kind` names what is being registered ("splitter", "provider") and
    /// only appears in error messages.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            aliases: Vec::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, value: T) -> &mut Self {
        self.entries.insert(name.into(), value);
        self
    }

    /// Register an alias for an existing name. Lower `priority` values win
    /// when several aliases share the same spelling.
    pub fn alias(
        &mut self,
        alias: impl Into<String>,
        target: impl Into<String>,
        priority: u32,
    ) -> &mut Self {
        self.aliases.push(AliasEntry {
            alias: alias.into(),
            target: target.into(),
            priority,
        });
        self.aliases.sort_by_key(|e| e.priority);
        self
    }

    /// Resolve a name: exact registrations first, then aliases in priority
    /// order.
    pub fn resolve(&self, name: &str) -> Result<&T, CoreError> {
        if let Some(value) = self.entries.get(name) {
            return Ok(value);
        }
        self.aliases
            .iter()
            .filter(|e| e.alias == name)
            .find_map(|e| self.entries.get(&e.target))
            .ok_or_else(|| CoreError::UnknownPlugin {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::error::CoreError;

    #[test]
    fn resolve_exact_name() {
        let mut registry = Registry::new("splitter");
        registry.register("blocks", 1);
        assert_eq!(registry.resolve("blocks").unwrap(), &1);
    }

    #[test]
    fn resolve_through_alias() {
        let mut registry = Registry::new("splitter");
        registry.register("blocks", 1);
        registry.alias("default", "blocks", 10);
        assert_eq!(registry.resolve("default").unwrap(), &1);
    }

    #[test]
    fn lower_priority_alias_wins() {
        let mut registry = Registry::new("splitter");
        registry.register("blocks", 1);
        registry.register("files", 2);
        registry.alias("default", "files", 20);
        registry.alias("default", "blocks", 10);
        assert_eq!(registry.resolve("default").unwrap(), &1);
    }

    #[test]
    fn exact_name_beats_alias() {
        let mut registry = Registry::new("splitter");
        registry.register("blocks", 1);
        registry.register("files", 2);
        registry.alias("files", "blocks", 0);
        assert_eq!(registry.resolve("files").unwrap(), &2);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry: Registry<u32> = Registry::new("splitter");
        assert_matches!(
            registry.resolve("nope"),
            Err(CoreError::UnknownPlugin { kind: "splitter", .. })
        );
    }
}
