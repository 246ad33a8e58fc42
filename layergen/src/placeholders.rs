use indexmap::IndexMap;
use std::fmt::Display;

/// The named values a template can substitute for one item.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Values {
    inner: IndexMap<String, String>,
}

impl Values {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to the textual form of `value`. Booleans become `true`/`false`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Display) {
        self.inner.insert(key.into(), value.to_string());
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    /// Adds all of `other`'s values, overwriting keys present in both.
    pub fn extend(&mut self, other: Values) {
        self.inner.extend(other.inner);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Implemented by every model entity a template can iterate over.
pub trait Placeholders {
    fn placeholders(&self) -> Values;
}
