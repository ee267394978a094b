//! Header containers shared by both inbound protocols.
//!
//! [`HttpHeaders`] is case-insensitive and multi-valued; names are stored
//! in the lowercase canonical form of the `http` crate. [`ChannelHeaders`]
//! is case-sensitive and single-valued: `add` replaces like `set`.

use indexmap::IndexMap;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use thiserror::Error;

/// Errors raised by header containers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// A required header is absent.
    #[error("missing mandatory header: {0}")]
    Missing(String),

    /// The name is not a legal HTTP header name.
    #[error("invalid header name: {0:?}")]
    InvalidName(String),

    /// The value is not a legal HTTP header value.
    #[error("invalid value for header {0:?}")]
    InvalidValue(String),
}

/// Operations shared by HTTP and channel-protocol headers.
pub trait Header {
    /// Returns the first value of `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Returns every value of `key`.
    fn values(&self, key: &str) -> Option<Vec<String>>;

    /// Appends a value.
    fn add(&mut self, key: &str, value: &str) -> Result<(), HeaderError>;

    /// Replaces every value of `key`.
    fn set(&mut self, key: &str, value: &str) -> Result<(), HeaderError>;

    /// Removes `key`.
    fn unset(&mut self, key: &str);

    /// Returns every header name.
    fn keys(&self) -> Vec<String>;

    /// Fails with the first key of `required` that is absent.
    fn ensure(&self, required: &[&str]) -> Result<(), HeaderError> {
        match required.iter().find(|key| self.get(key).is_none()) {
            Some(missing) => Err(HeaderError::Missing((*missing).to_string())),
            None => Ok(()),
        }
    }
}

/// HTTP headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    inner: HeaderMap,
}

impl HttpHeaders {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &HeaderMap {
        &self.inner
    }

    /// Returns the underlying map mutably.
    pub fn as_map_mut(&mut self) -> &mut HeaderMap {
        &mut self.inner
    }

    /// Unwraps into the underlying map.
    #[must_use]
    pub fn into_map(self) -> HeaderMap {
        self.inner
    }

    fn parse(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), HeaderError> {
        let name = HeaderName::try_from(key).map_err(|_| HeaderError::InvalidName(key.to_string()))?;
        let value =
            HeaderValue::try_from(value).map_err(|_| HeaderError::InvalidValue(key.to_string()))?;
        Ok((name, value))
    }
}

impl From<HeaderMap> for HttpHeaders {
    fn from(inner: HeaderMap) -> Self {
        Self { inner }
    }
}

impl Header for HttpHeaders {
    fn get(&self, key: &str) -> Option<String> {
        self.inner
            .get(key)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
    }

    fn values(&self, key: &str) -> Option<Vec<String>> {
        let values: Vec<String> = self
            .inner
            .get_all(key)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        (!values.is_empty()).then_some(values)
    }

    fn add(&mut self, key: &str, value: &str) -> Result<(), HeaderError> {
        let (name, value) = Self::parse(key, value)?;
        self.inner.append(name, value);
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), HeaderError> {
        let (name, value) = Self::parse(key, value)?;
        self.inner.insert(name, value);
        Ok(())
    }

    fn unset(&mut self, key: &str) {
        self.inner.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys().map(|k| k.as_str().to_string()).collect()
    }
}

/// Channel-protocol headers, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelHeaders {
    inner: IndexMap<String, String>,
}

impl ChannelHeaders {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &IndexMap<String, String> {
        &self.inner
    }

    /// Unwraps into the underlying map.
    #[must_use]
    pub fn into_map(self) -> IndexMap<String, String> {
        self.inner
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<IndexMap<String, String>> for ChannelHeaders {
    fn from(inner: IndexMap<String, String>) -> Self {
        Self { inner }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ChannelHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Header for ChannelHeaders {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    fn values(&self, key: &str) -> Option<Vec<String>> {
        self.inner.get(key).map(|v| vec![v.clone()])
    }

    fn add(&mut self, key: &str, value: &str) -> Result<(), HeaderError> {
        self.set(key, value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), HeaderError> {
        self.inner.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn unset(&mut self, key: &str) {
        self.inner.shift_remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }
}
