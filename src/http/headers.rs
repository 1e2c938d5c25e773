//! HTTP header map with case-insensitive name lookup.
//!
//! HTTP headers are order-preserving and case-insensitive per [RFC 9110 §5].
//! A request header whose value is not UTF-8 is kept without a value: it
//! counts as present, but reading it yields `None`.

use std::fmt;

/// A case-insensitive, multi-value HTTP header map.
///
/// Preserves insertion order and allows multiple values per header name,
/// matching the semantics of HTTP/1.1 header fields (RFC 9110 §5.3).
///
/// # Examples
///
/// ```
/// use switchyard::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/html; charset=utf-8");
/// headers.insert("X-Custom", "first");
/// headers.insert("X-Custom", "second");
///
/// assert_eq!(headers.get("content-type"), Some("text/html; charset=utf-8"));
/// let all: Vec<_> = headers.get_all("x-custom").collect();
/// assert_eq!(all, vec!["first", "second"]);
/// assert_eq!(headers.len(), 3);
/// assert_eq!(headers.len_keys(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    // `None` marks a value that arrived as non-UTF-8 bytes.
    inner: Vec<(String, Option<String>)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with pre-allocated capacity for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), Some(value.into())));
    }

    /// Appends an entry whose value could not be decoded.
    ///
    /// The name counts towards [`len`](Self::len) and [`len_keys`](Self::len_keys)
    /// and satisfies [`contains`](Self::contains); the value is never returned
    /// or serialized.
    pub fn insert_unreadable(&mut self, name: impl Into<String>) {
        self.inner.push((name.into(), None));
    }

    /// Replaces every entry named `name` with a single one, keeping the
    /// position of the first.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = Some(value.into());
        match self.position(&name) {
            Some(first) => {
                self.inner[first].1 = value;
                let mut index = 0;
                self.inner.retain(|(k, _)| {
                    let keep = index <= first || !k.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.inner.push((name, value)),
        }
    }

    /// Removes every entry named `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.inner.len()
    }

    /// Returns the value of the first entry with the given name
    /// (case-insensitive), or `None` if it is absent or unreadable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner[self.position(name)?].1.as_deref()
    }

    /// Returns an iterator over all readable values for the given header name
    /// (case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .filter_map(|(_, v)| v.as_deref())
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns the number of distinct header names, compared case-insensitively.
    pub fn len_keys(&self) -> usize {
        self.inner
            .iter()
            .enumerate()
            .filter(|(i, (name, _))| self.position(name) == Some(*i))
            .count()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over readable `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .iter()
            .filter_map(|(k, v)| Some((k.as_str(), v.as_deref()?)))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.inner.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl Extend<(String, String)> for Headers {
    fn extend<T: IntoIterator<Item = (String, String)>>(&mut self, iter: T) {
        self.inner
            .extend(iter.into_iter().map(|(name, value)| (name, Some(value))));
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(h.get("x-missing"), None);
    }

    #[test]
    fn repeated_names_count_once_as_keys() {
        let mut h = Headers::new();
        h.insert("Accept", "a");
        h.insert("accept", "b");
        h.insert("Host", "h");
        assert_eq!(h.len(), 3);
        assert_eq!(h.len_keys(), 2);
        let vals: Vec<_> = h.get_all("ACCEPT").collect();
        assert_eq!(vals, vec!["a", "b"]);
    }

    #[test]
    fn unreadable_value_is_present_but_hidden() {
        let mut h = Headers::new();
        h.insert_unreadable("X-Binary");
        h.insert("Host", "h");
        assert!(h.contains("x-binary"));
        assert_eq!(h.get("x-binary"), None);
        assert_eq!(h.len_keys(), 2);
        assert_eq!(h.iter().count(), 1);
        assert_eq!(h.to_string(), "Host: h\r\n");
    }

    #[test]
    fn set_collapses_to_one_entry_in_place() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        h.insert("X-Id", "1");
        h.insert("content-type", "text/csv");
        h.set("CONTENT-TYPE", "text/html");

        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(pairs, vec![("Content-Type", "text/html"), ("X-Id", "1")]);

        h.set("X-New", "2");
        assert_eq!(h.get("x-new"), Some("2"));
    }

    #[test]
    fn remove_drops_every_entry() {
        let mut h = Headers::new();
        h.insert("Set-Cookie", "a=1");
        h.insert("set-cookie", "b=2");
        h.insert("Host", "h");
        assert_eq!(h.remove("SET-COOKIE"), 2);
        assert_eq!(h.remove("set-cookie"), 0);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn extend_appends_in_order() {
        let mut h = Headers::new();
        h.insert("A", "1");
        h.extend(vec![("B".to_owned(), "2".to_owned())]);
        let names: Vec<_> = h.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
