//! Path parameters captured by a route match.
//!
//! The trie pushes one pair per `:name` segment while it descends and
//! rewinds with [`Params::truncate`] when it backtracks out of a branch, so
//! the surviving pairs are exactly those of the matched pattern, in path
//! order. A trailing `*` segment is not captured.

use smallvec::SmallVec;

/// Patterns rarely have more than this many `:name` segments.
const INLINE_PARAMS: usize = 4;

/// `(name, value)` pairs of one matched path.
///
/// ```rust
/// use portico_router::Params;
///
/// let mut params = Params::new();
/// params.push("org", "acme");
/// params.push("user", "42");
///
/// assert_eq!(params.get("user"), Some("42"));
/// assert_eq!(params.names().collect::<Vec<_>>(), vec!["org", "user"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    pairs: SmallVec<[(String, String); INLINE_PARAMS]>,
}

impl Params {
    /// An empty set, used for the 404 and 405 endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a captured segment.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Value captured for `name`. The first capture wins if a name repeats.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter().find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Returns true if `name` was captured.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Parameter names in path order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(n, _)| n)
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of captured segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Drops captures pushed after the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.pairs.truncate(len);
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let mut params = Params::new();
        params.push("id", "123");
        params.push("name", "alice");

        assert_eq!(params.get("name"), Some("alice"));
        assert!(params.contains("id"));
        assert!(!params.contains("unknown"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_first_capture_wins() {
        let params: Params = [("a", "1"), ("b", "2"), ("a", "3")]
            .into_iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();

        assert_eq!(params.get("a"), Some("1"));
        assert_eq!(params.names().collect::<Vec<_>>(), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_truncate_rewinds_a_branch() {
        let mut params = Params::new();
        params.push("org", "acme");
        let mark = params.len();
        params.push("user", "42");
        params.truncate(mark);

        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("org", "acme")]);
    }

    #[test]
    fn test_many_segments() {
        let params: Params = (0..10).map(|i| (format!("p{i}"), i.to_string())).collect();
        assert_eq!(params.len(), 10);
        assert_eq!(params.get("p7"), Some("7"));
    }
}
