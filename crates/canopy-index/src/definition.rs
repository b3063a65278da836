//! Index definitions and their key filters.

use regex::Regex;

/// Predicate deciding whether a write to a given key feeds a definition.
///
/// A filter is exactly one of the two kinds: exact string equality or a
/// pattern test against the key.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches only a key equal to the string.
    Exact(String),
    /// Matches any key the pattern finds a match in.
    Pattern(Regex),
}

impl Filter {
    /// Evaluate the filter against a key.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Filter::Exact(value) => value == key,
            Filter::Pattern(re) => re.is_match(key),
        }
    }

    /// The persisted kind tag for this filter.
    pub fn kind(&self) -> &'static str {
        match self {
            Filter::Exact(_) => "string",
            Filter::Pattern(_) => "pattern",
        }
    }

    /// The persisted value for this filter.
    pub fn value(&self) -> &str {
        match self {
            Filter::Exact(value) => value,
            Filter::Pattern(re) => re.as_str(),
        }
    }
}

/// A registered secondary index.
///
/// `transform` is a handler identifier, not executable code: the embedding
/// application registers the concrete handler under this id before the
/// registry is loaded.
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    /// Unique name within the registry.
    pub name: String,
    /// Which written keys feed this index.
    pub filter: Filter,
    /// Key of the aggregate document this index merges into.
    pub target_key: String,
    /// Identifier of the registered transform handler.
    pub transform: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_filter_is_string_equality() {
        let filter = Filter::Exact("/a/c".to_string());
        assert!(filter.matches("/a/c"));
        assert!(!filter.matches("/a/c/d"));
        assert!(!filter.matches("/a/C"));
    }

    #[test]
    fn pattern_filter_tests_key() {
        let filter = Filter::Pattern(Regex::new("^/games/").unwrap());
        assert!(filter.matches("/games/halo/match1"));
        assert!(!filter.matches("/players/x"));
    }

    #[test]
    fn persisted_kind_tags() {
        assert_eq!(Filter::Exact("/a".into()).kind(), "string");
        assert_eq!(
            Filter::Pattern(Regex::new("a").unwrap()).kind(),
            "pattern"
        );
    }
}
