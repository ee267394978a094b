//! Tagged measurement scopes.
//!
//! A [`Scope`] is a set of tags from which counters, timers, histograms and
//! gauges are derived. Tags become labels on the `metrics` facade, so a
//! scope tagged `{endpoint: "bar", handler: "foo"}` emits
//! `endpoint.request{endpoint="bar",handler="foo"}`.
//!
//! Scopes are immutable and cheap to clone. [`Scope::tagged`] returns a new
//! scope whose tags are the old ones with the new ones merged on top.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use portico_telemetry::Scope;
//!
//! let scope = Scope::new().tagged([("protocol", "http"), ("endpoint", "bar")]);
//! let scope = scope.tagged([("endpoint", "baz")]);
//!
//! assert_eq!(scope.tag("endpoint"), Some("baz"));
//! scope.counter("endpoint.request").increment(1);
//! scope.timer("endpoint.latency").record(Duration::from_millis(3));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{Counter, Gauge, Histogram, Label};

/// Tag map carried by a scope.
pub type Tags = BTreeMap<String, String>;

/// A measurement namespace with tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    tags: Arc<Tags>,
}

impl Scope {
    /// Creates an untagged root scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a sub-scope with `tags` merged over this scope's tags.
    #[must_use]
    pub fn tagged<K, V>(&self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut merged = (*self.tags).clone();
        merged.extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self {
            tags: Arc::new(merged),
        }
    }

    /// Returns the tags of this scope.
    #[must_use]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Returns one tag value.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns a counter named `name` carrying this scope's tags.
    pub fn counter(&self, name: &str) -> Counter {
        metrics::counter!(name.to_string(), self.labels())
    }

    /// Returns a timer named `name`. Timers record seconds.
    pub fn timer(&self, name: &str) -> Timer {
        Timer(metrics::histogram!(name.to_string(), self.labels()))
    }

    /// Returns a histogram named `name`.
    ///
    /// Bucket boundaries are bound by the recorder; see
    /// [`MetricsConfig::latency_buckets`](crate::MetricsConfig::latency_buckets).
    pub fn histogram(&self, name: &str) -> Histogram {
        metrics::histogram!(name.to_string(), self.labels())
    }

    /// Returns a gauge named `name`.
    pub fn gauge(&self, name: &str) -> Gauge {
        metrics::gauge!(name.to_string(), self.labels())
    }

    fn labels(&self) -> Vec<Label> {
        self.tags
            .iter()
            .map(|(k, v)| Label::new(k.clone(), v.clone()))
            .collect()
    }
}

/// A histogram recording durations in seconds.
#[derive(Clone)]
pub struct Timer(Histogram);

impl Timer {
    /// Records one duration sample.
    pub fn record(&self, elapsed: Duration) {
        self.0.record(elapsed.as_secs_f64());
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_merges_over_parent() {
        let root = Scope::new().tagged([("protocol", "HTTP"), ("endpoint", "a")]);
        let child = root.tagged([("endpoint", "b"), ("handler", "h")]);

        assert_eq!(root.tag("endpoint"), Some("a"));
        assert_eq!(root.tag("handler"), None);
        assert_eq!(child.tag("endpoint"), Some("b"));
        assert_eq!(child.tag("protocol"), Some("HTTP"));
        assert_eq!(child.tags().len(), 3);
    }

    #[test]
    fn test_labels_follow_tags() {
        let scope = Scope::new().tagged([("b", "2"), ("a", "1")]);
        let labels: Vec<_> = scope
            .labels()
            .into_iter()
            .map(|l| (l.key().to_string(), l.value().to_string()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_emitting_without_recorder_is_noop() {
        let scope = Scope::new().tagged([("endpoint", "noop")]);
        scope.counter("endpoint.request").increment(1);
        scope.timer("endpoint.latency").record(Duration::from_millis(1));
        scope.histogram("endpoint.latency-hist").record(0.001);
        scope.gauge("inflight").set(1.0);
    }
}
