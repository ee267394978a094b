//! Segment trie storing one value per path pattern.
//!
//! Patterns are `/`-separated. A segment starting with `:` is a named
//! parameter that matches exactly one path segment; a final `*` segment
//! matches one or more remaining segments and captures nothing.
//!
//! Two patterns collide when an existing pattern would match the new one,
//! treating a parameter on either side as matching anything in that
//! position. `/a/:b` and `/a/b/c` do not collide, `/a/:b` and `/a/c` do.
//! Under a whitelisted registration a static segment and a parameter may
//! share a position; the static one wins at lookup.

use crate::error::{RouterError, RouterResult};
use crate::params::Params;

/// Kind of a single pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal segment (e.g. `users`).
    Static(String),
    /// Named parameter (e.g. `:id`), stored without the colon.
    Param(String),
    /// Trailing `*`.
    Wildcard,
}

/// Normalizes a path: rejects empty paths and empty segments, adds a
/// leading `/` and strips one trailing `/`.
pub fn normalize_path(path: &str) -> RouterResult<String> {
    if path.is_empty() || path.contains("//") {
        return Err(RouterError::bad_path(path));
    }
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    if normalized == "/" {
        normalized.clear();
    }
    Ok(normalized)
}

/// Parses a route pattern into segments.
pub fn parse_pattern(pattern: &str) -> RouterResult<(String, Vec<Segment>)> {
    let normalized = normalize_path(pattern)?;
    if normalized.matches('*').count() > 1 {
        return Err(RouterError::MultipleWildcards { path: normalized });
    }
    if normalized.contains('*') && !normalized.ends_with("/*") {
        return Err(RouterError::WildcardNotLast { path: normalized });
    }

    let segments = normalized
        .split('/')
        .skip(1)
        .map(|s| {
            if s == "*" {
                Segment::Wildcard
            } else if let Some(name) = s.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else {
                Segment::Static(s.to_string())
            }
        })
        .collect();
    Ok((normalized, segments))
}

#[derive(Debug, Clone)]
struct ParamChild<T> {
    name: String,
    origin: String,
    node: Node<T>,
}

#[derive(Debug, Clone)]
struct Node<T> {
    value: Option<T>,
    /// Static children, sorted by segment for binary search.
    static_children: Vec<(String, Node<T>)>,
    param_child: Option<Box<ParamChild<T>>>,
    wildcard: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            value: None,
            static_children: Vec::new(),
            param_child: None,
            wildcard: None,
        }
    }
}

impl<T> Node<T> {
    fn find_static(&self, segment: &str) -> Option<&Self> {
        self.static_children
            .binary_search_by(|(s, _)| s.as_str().cmp(segment))
            .ok()
            .map(|i| &self.static_children[i].1)
    }

    fn static_entry(&mut self, segment: &str) -> &mut Self {
        let idx = match self
            .static_children
            .binary_search_by(|(s, _)| s.as_str().cmp(segment))
        {
            Ok(i) => i,
            Err(i) => {
                self.static_children
                    .insert(i, (segment.to_string(), Self::default()));
                i
            }
        };
        &mut self.static_children[idx].1
    }

    fn has_segment_children(&self) -> bool {
        !self.static_children.is_empty() || self.param_child.is_some() || self.wildcard.is_some()
    }

    fn check_param_names(&self, segments: &[Segment], pattern: &str) -> RouterResult<()> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(());
        };
        match first {
            Segment::Static(s) => match self.find_static(s) {
                Some(child) => child.check_param_names(rest, pattern),
                None => Ok(()),
            },
            Segment::Param(name) => match &self.param_child {
                Some(child) if child.name != *name => Err(RouterError::ParamMismatch {
                    path: pattern.to_string(),
                    actual: format!(":{name}"),
                    expected: format!(":{}", child.name),
                    existing: child.origin.clone(),
                }),
                Some(child) => child.node.check_param_names(rest, pattern),
                None => Ok(()),
            },
            Segment::Wildcard => Ok(()),
        }
    }

    fn collides(&self, segments: &[Segment], whitelisted: bool) -> bool {
        let Some((first, rest)) = segments.split_first() else {
            return self.value.is_some();
        };
        if self.wildcard.is_some() {
            return true;
        }
        match first {
            Segment::Wildcard => self.has_segment_children(),
            Segment::Static(s) => {
                self.find_static(s)
                    .is_some_and(|child| child.collides(rest, whitelisted))
                    || (!whitelisted
                        && self
                            .param_child
                            .as_ref()
                            .is_some_and(|p| p.node.collides(rest, whitelisted)))
            }
            Segment::Param(_) => {
                self.param_child
                    .as_ref()
                    .is_some_and(|p| p.node.collides(rest, whitelisted))
                    || (!whitelisted
                        && self
                            .static_children
                            .iter()
                            .any(|(_, child)| child.collides(rest, whitelisted)))
            }
        }
    }

    fn insert(&mut self, segments: &[Segment], pattern: &str, value: T) {
        let Some((first, rest)) = segments.split_first() else {
            self.value = Some(value);
            return;
        };
        match first {
            Segment::Static(s) => self.static_entry(s).insert(rest, pattern, value),
            Segment::Param(name) => {
                let child = self.param_child.get_or_insert_with(|| {
                    Box::new(ParamChild {
                        name: name.clone(),
                        origin: pattern.to_string(),
                        node: Node::default(),
                    })
                });
                child.node.insert(rest, pattern, value);
            }
            Segment::Wildcard => self.wildcard = Some(value),
        }
    }

    fn find<'a>(&'a self, segments: &[&str], params: &mut Params) -> Option<&'a T> {
        let Some((first, rest)) = segments.split_first() else {
            return self.value.as_ref();
        };

        if let Some(child) = self.find_static(first) {
            if let Some(value) = child.find(rest, params) {
                return Some(value);
            }
        }

        if let Some(child) = &self.param_child {
            let mark = params.len();
            params.push(child.name.clone(), *first);
            if let Some(value) = child.node.find(rest, params) {
                return Some(value);
            }
            params.truncate(mark);
        }

        self.wildcard.as_ref()
    }
}

/// A trie mapping route patterns to values.
///
/// # Example
///
/// ```rust
/// use portico_router::Trie;
///
/// let mut trie = Trie::new();
/// trie.set("/users/:id", "getUser", false).unwrap();
/// trie.set("/files/*", "serveFile", false).unwrap();
///
/// let (value, params) = trie.get("/users/42").unwrap();
/// assert_eq!(*value, "getUser");
/// assert_eq!(params.get("id"), Some("42"));
///
/// assert!(trie.get("/files/a/b.png").is_some());
/// assert!(trie.set("/users/me", "me", false).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Trie<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Trie<T> {
    /// Creates an empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }

    /// Registers `value` under `pattern`.
    ///
    /// With `whitelisted` set, a static segment and a parameter segment may
    /// coexist at the same position.
    pub fn set(&mut self, pattern: &str, value: T, whitelisted: bool) -> RouterResult<()> {
        let (normalized, segments) = parse_pattern(pattern)?;
        self.root.check_param_names(&segments, &normalized)?;
        if self.root.collides(&segments, whitelisted) {
            return Err(RouterError::exists(normalized));
        }
        self.root.insert(&segments, &normalized, value);
        self.len += 1;
        Ok(())
    }

    /// Looks up a request path, returning the value and captured params.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<(&T, Params)> {
        let normalized = normalize_path(path).ok()?;
        let segments: Vec<&str> = normalized.split('/').skip(1).collect();
        let mut params = Params::new();
        self.root.find(&segments, &mut params).map(|v| (v, params))
    }

    /// Returns the number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no pattern is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
