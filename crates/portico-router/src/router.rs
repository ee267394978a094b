//! Per-method route table.
//!
//! Each HTTP method owns its own [`Trie`]. A lookup that misses for the
//! requested method but hits for another one reports the allowed methods so
//! the caller can answer `405 Method Not Allowed` with an `Allow` header.

use std::collections::HashMap;

use http::Method;

use crate::error::RouterResult;
use crate::node::Trie;
use crate::params::Params;

/// A matched route with its value and extracted parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a, T> {
    /// The value registered for the route.
    pub value: &'a T,
    /// Extracted path parameters.
    pub params: Params,
}

/// Outcome of a [`Router::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<'a, T> {
    /// The method and path resolved to a route.
    Matched(RouteMatch<'a, T>),
    /// The path exists under other methods only.
    MethodNotAllowed {
        /// Allowed methods, sorted and joined with `", "`.
        allow: String,
    },
    /// Nothing matched.
    NotFound,
}

/// Routes `(method, path)` pairs to values.
///
/// # Example
///
/// ```rust
/// use http::Method;
/// use portico_router::{Lookup, Router};
///
/// let mut router = Router::new();
/// router.handle(Method::GET, "/users/:id", "getUser", false).unwrap();
/// router.handle(Method::DELETE, "/users/:id", "deleteUser", false).unwrap();
///
/// match router.lookup(&Method::GET, "/users/7") {
///     Lookup::Matched(m) => assert_eq!(m.params.get("id"), Some("7")),
///     other => panic!("unexpected {other:?}"),
/// }
///
/// assert_eq!(
///     router.lookup(&Method::POST, "/users/7"),
///     Lookup::MethodNotAllowed { allow: "DELETE, GET".to_string() },
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Router<T> {
    tries: HashMap<Method, Trie<T>>,
    handle_method_not_allowed: bool,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Router<T> {
    /// Creates an empty router that reports method-not-allowed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tries: HashMap::new(),
            handle_method_not_allowed: true,
        }
    }

    /// Enables or disables method-not-allowed detection. When disabled,
    /// wrong-method requests resolve to [`Lookup::NotFound`].
    #[must_use]
    pub fn with_method_not_allowed(mut self, enabled: bool) -> Self {
        self.handle_method_not_allowed = enabled;
        self
    }

    /// Registers `value` for `method` and `pattern`.
    pub fn handle(
        &mut self,
        method: Method,
        pattern: &str,
        value: T,
        whitelisted: bool,
    ) -> RouterResult<()> {
        self.tries
            .entry(method)
            .or_default()
            .set(pattern, value, whitelisted)
    }

    /// Resolves a request.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup<'_, T> {
        if let Some((value, params)) = self.tries.get(method).and_then(|t| t.get(path)) {
            return Lookup::Matched(RouteMatch { value, params });
        }

        if self.handle_method_not_allowed {
            let allow = self.allowed(method, path);
            if !allow.is_empty() {
                return Lookup::MethodNotAllowed { allow };
            }
        }

        Lookup::NotFound
    }

    /// Returns the methods other than `method` (and `OPTIONS`) that match
    /// `path`, sorted and joined with `", "`.
    #[must_use]
    pub fn allowed(&self, method: &Method, path: &str) -> String {
        let mut allow: Vec<&str> = self
            .tries
            .iter()
            .filter(|(m, _)| *m != method && **m != Method::OPTIONS)
            .filter(|(_, trie)| trie.get(path).is_some())
            .map(|(m, _)| m.as_str())
            .collect();
        allow.sort_unstable();
        allow.join(", ")
    }

    /// Returns the total number of registered routes across all methods.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.tries.values().map(Trie::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_are_independent() {
        let mut router = Router::new();
        router.handle(Method::GET, "/a/:b", 1, false).unwrap();
        router.handle(Method::POST, "/a/c", 2, false).unwrap();

        match router.lookup(&Method::POST, "/a/c") {
            Lookup::Matched(m) => assert_eq!(*m.value, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(router.route_count(), 2);
    }

    #[test]
    fn test_options_excluded_from_allow() {
        let mut router = Router::new();
        router.handle(Method::OPTIONS, "/a", 0, false).unwrap();
        router.handle(Method::PUT, "/a", 1, false).unwrap();

        assert_eq!(
            router.lookup(&Method::GET, "/a"),
            Lookup::MethodNotAllowed {
                allow: "PUT".to_string()
            }
        );
    }

    #[test]
    fn test_not_found_when_disabled() {
        let mut router = Router::new().with_method_not_allowed(false);
        router.handle(Method::PUT, "/a", 1, false).unwrap();
        assert_eq!(router.lookup(&Method::GET, "/a"), Lookup::NotFound);
    }

    #[test]
    fn test_unknown_path_not_found() {
        let mut router = Router::new();
        router.handle(Method::GET, "/a", 1, false).unwrap();
        assert_eq!(router.lookup(&Method::GET, "/b"), Lookup::NotFound);
    }

    #[test]
    fn test_collision_is_per_method() {
        let mut router = Router::new();
        router.handle(Method::GET, "/a", 1, false).unwrap();
        assert!(router.handle(Method::GET, "/a", 2, false).is_err());
        assert!(router.handle(Method::POST, "/a", 2, false).is_ok());
    }
}
