//! Shared key/value store that steps read from and the engine writes into.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Type-safe context key wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a new ContextKey.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContextKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ContextKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ContextKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Execution context shared by every step of one workflow run.
///
/// Values are of a single type `T` chosen by the caller (an enum or a
/// `serde_json::Value` works well for heterogeneous data). The engine inserts
/// each successful step's output under the step's name, so dependents read
/// their inputs with `ctx.get("<dependency>")`.
///
/// String metadata travels alongside the data and is copied into the
/// [`WorkflowResult`](crate::WorkflowResult) when the run ends.
///
/// # Examples
///
/// ```
/// use kumiito::Context;
///
/// let mut ctx = Context::new();
/// ctx.insert("premise", "a lighthouse keeper".to_string());
/// ctx.set_metadata("genre", "mystery");
///
/// assert_eq!(ctx.get("premise").map(String::as_str), Some("a lighthouse keeper"));
/// assert_eq!(ctx.get_metadata("genre"), Some("mystery"));
/// assert!(ctx.contains_key("premise"));
/// ```
#[derive(Debug, Clone)]
pub struct Context<T> {
    data: HashMap<ContextKey, T>,
    metadata: HashMap<String, String>,
    started_at: Instant,
}

impl<T> Default for Context<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Context<T> {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            metadata: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Inserts a value, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<ContextKey>, value: T) -> Option<T> {
        self.data.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.data.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.data.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns an iterator over all keys in the context.
    pub fn keys(&self) -> impl Iterator<Item = &ContextKey> {
        self.data.keys()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub(crate) fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Returns the time elapsed since the context was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl<K, T> FromIterator<(K, T)> for Context<T>
where
    K: Into<ContextKey>,
{
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut ctx = Context::new();
        for (key, value) in iter {
            ctx.insert(key, value);
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_context_data_operations() {
        let mut ctx = Context::<String>::new();

        ctx.insert("key1", "value1".to_string());
        assert_eq!(ctx.get("key1").map(|s| s.as_str()), Some("value1"));
        assert_eq!(ctx.get("nonexistent"), None);

        let previous = ctx.insert("key1", "value2".to_string());
        assert_eq!(previous.as_deref(), Some("value1"));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_get_mut_and_remove() {
        let mut ctx = Context::new();
        ctx.insert("count", 0i32);

        if let Some(count) = ctx.get_mut("count") {
            *count += 1;
        }
        assert_eq!(ctx.get("count"), Some(&1));

        assert_eq!(ctx.remove("count"), Some(1));
        assert!(!ctx.contains_key("count"));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_context_metadata_operations() {
        let mut ctx = Context::<String>::new();

        ctx.set_metadata("meta1", "metadata1");
        assert_eq!(ctx.get_metadata("meta1"), Some("metadata1"));
        assert_eq!(ctx.get_metadata("nonexistent"), None);
    }

    #[test]
    fn test_context_from_iter() {
        let ctx: Context<u32> = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(ctx.get("a"), Some(&1));
        assert_eq!(ctx.get("b"), Some(&2));
        assert_eq!(ctx.keys().count(), 2);
    }

    #[test]
    fn test_context_elapsed_time() {
        let ctx = Context::<String>::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(ctx.elapsed() >= Duration::from_millis(10));
    }
}
