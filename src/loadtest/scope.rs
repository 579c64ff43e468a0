//! Per-virtual-user variable bindings and `${name}` placeholder substitution.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Matches `${name}` placeholders. Names are word characters, dots and dashes.
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("placeholder regex is valid"))
}

/// Returns `true` if `input` contains at least one `${name}` placeholder.
pub fn has_placeholders(input: &str) -> bool {
    placeholder_regex().is_match(input)
}

/// Variable bindings owned by a single virtual user.
///
/// Seeded from the plan's user-defined variables when the VU starts and
/// mutated only by that VU's extractors, so no locking is involved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableScope {
    vars: BTreeMap<String, String>,
}

impl VariableScope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope seeded with a copy of `vars`.
    pub fn seeded(vars: &BTreeMap<String, String>) -> Self {
        Self { vars: vars.clone() }
    }

    /// Binds `name` to `value`, replacing any previous binding.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replaces every `${name}` in `input` with its bound value.
    ///
    /// Placeholders with no binding are left as written, so a request that
    /// depends on a failed extraction is still sent and visibly wrong in the
    /// results log.
    pub fn resolve(&self, input: &str) -> String {
        if !input.contains("${") {
            return input.to_owned();
        }
        placeholder_regex()
            .replace_all(input, |caps: &Captures<'_>| match self.vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_owned(),
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_variable() {
        let mut scope = VariableScope::new();
        scope.set("host", "example.com");
        assert_eq!(scope.resolve("https://${host}/a"), "https://example.com/a");
    }

    #[test]
    fn test_resolve_multiple_and_repeated() {
        let mut scope = VariableScope::new();
        scope.set("a", "1");
        scope.set("b", "2");
        assert_eq!(scope.resolve("${a}-${b}-${a}"), "1-2-1");
    }

    #[test]
    fn test_resolve_unknown_left_untouched() {
        let scope = VariableScope::new();
        assert_eq!(scope.resolve("/items/${id}"), "/items/${id}");
    }

    #[test]
    fn test_resolve_without_placeholders_is_identity() {
        let scope = VariableScope::new();
        assert_eq!(scope.resolve("/plain/path?q=$x"), "/plain/path?q=$x");
    }

    #[test]
    fn test_seeded_copies_plan_variables() {
        let mut vars = BTreeMap::new();
        vars.insert("user".to_string(), "alice".to_string());
        let mut scope = VariableScope::seeded(&vars);
        scope.set("user", "bob");
        assert_eq!(scope.get("user"), Some("bob"));
        assert_eq!(vars["user"], "alice");
    }

    #[test]
    fn test_has_placeholders() {
        assert!(has_placeholders("/a/${b}"));
        assert!(!has_placeholders("/a/$b"));
        assert!(!has_placeholders("/a/${}"));
    }
}
