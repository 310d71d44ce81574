//! Cache key trait and implementations.

use std::fmt::Display;

/// Types usable as cache keys. Implement this to use a custom type as a key
/// directly, instead of formatting it to a `String` at every call site.
pub trait CacheKey: Send + Sync {
    fn cache_key(&self) -> String;

    /// Optional namespace prefix, joined with `:` ahead of [`Self::cache_key`].
    fn namespace(&self) -> Option<&str> {
        None
    }

    fn full_key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}:{}", ns, self.cache_key()),
            None => self.cache_key(),
        }
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl CacheKey for &str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for &String {
    fn cache_key(&self) -> String {
        (*self).clone()
    }
}

impl<T: Display + Send + Sync> CacheKey for (T,) {
    fn cache_key(&self) -> String {
        self.0.to_string()
    }
}

impl<T1: Display + Send + Sync, T2: Display + Send + Sync> CacheKey for (T1, T2) {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

impl<T1: Display + Send + Sync, T2: Display + Send + Sync, T3: Display + Send + Sync> CacheKey
    for (T1, T2, T3)
{
    fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.0, self.1, self.2)
    }
}

impl<
        T1: Display + Send + Sync,
        T2: Display + Send + Sync,
        T3: Display + Send + Sync,
        T4: Display + Send + Sync,
    > CacheKey for (T1, T2, T3, T4)
{
    fn cache_key(&self) -> String {
        format!("{}:{}:{}:{}", self.0, self.1, self.2, self.3)
    }
}

/// Builder for composite keys assembled from heterogeneous parts.
#[derive(Debug, Clone, Default)]
pub struct CompositeKey {
    parts: Vec<String>,
    ns: Option<String>,
}

impl CompositeKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    pub fn part(mut self, part: impl Display) -> Self {
        self.parts.push(part.to_string());
        self
    }

    pub fn parts<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Display,
    {
        self.parts.extend(parts.into_iter().map(|p| p.to_string()));
        self
    }

    pub fn get_namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }
}

impl CacheKey for CompositeKey {
    fn cache_key(&self) -> String {
        self.parts.join(":")
    }

    fn namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_key() {
        let key = "my_key".to_string();
        assert_eq!(key.cache_key(), "my_key");
        assert_eq!(key.full_key(), "my_key");
    }

    #[test]
    fn tuple_keys() {
        assert_eq!(("user", 123).cache_key(), "user:123");
        assert_eq!(("org", 1, "user").cache_key(), "org:1:user");
    }

    #[test]
    fn composite_key() {
        let key = CompositeKey::new()
            .with_namespace("myapp")
            .part("user")
            .part(123);

        assert_eq!(key.cache_key(), "user:123");
        assert_eq!(key.get_namespace(), Some("myapp"));
        assert_eq!(key.full_key(), "myapp:user:123");
    }
}
