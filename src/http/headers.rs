//! HTTP header map with case-insensitive name lookup.
//!
//! HTTP headers are order-preserving and case-insensitive per [RFC 9110 §5].
//! A proxy additionally has to tell end-to-end headers apart from hop-by-hop
//! ones (RFC 9110 §7.6.1), which [`Headers::end_to_end`] takes care of.

/// Connection-scoped headers that must never be relayed by a proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Returns `true` if `name` is a hop-by-hop header.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// A case-insensitive, multi-value HTTP header map.
///
/// Preserves insertion order and allows multiple values per header name,
/// matching the semantics of HTTP/1.1 header fields (RFC 9110 §5.3).
///
/// # Examples
///
/// ```
/// use edgecache::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "image/png");
/// headers.insert("Connection", "keep-alive");
///
/// assert_eq!(headers.get("content-type"), Some("image/png"));
/// assert!(!headers.end_to_end().contains("connection"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
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
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every entry named `name` with a single `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries with the given header name (case-insensitive).
    ///
    /// Returns `true` if any entries were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a copy containing only the end-to-end headers.
    ///
    /// Drops the fixed hop-by-hop set plus every header named in a
    /// `Connection` field (`Connection: close, X-Trace` also drops `X-Trace`).
    pub fn end_to_end(&self) -> Headers {
        let listed: Vec<&str> = self
            .inner
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("connection"))
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect();

        let inner = self
            .inner
            .iter()
            .filter(|(k, _)| !is_hop_by_hop(k) && !listed.iter().any(|l| l.eq_ignore_ascii_case(k)))
            .cloned()
            .collect();

        Headers { inner }
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl From<&reqwest::header::HeaderMap> for Headers {
    /// Copies an upstream header map, skipping values that are not visible ASCII.
    fn from(map: &reqwest::header::HeaderMap) -> Self {
        map.iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
            .collect()
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
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.insert("X-Cache", "MISS");
        h.insert("x-cache", "MISS");
        h.set("X-Cache", "HIT");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("x-cache"), Some("HIT"));
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.insert("X-Foo", "bar");
        h.insert("X-Foo", "baz");
        assert!(h.remove("x-foo"));
        assert!(h.is_empty());
        assert!(!h.remove("x-foo"));
    }

    #[test]
    fn end_to_end_drops_hop_by_hop() {
        let h: Headers = [
            ("Host", "edge.local"),
            ("Connection", "keep-alive"),
            ("Transfer-Encoding", "chunked"),
            ("Authorization", "Bearer t"),
            ("Keep-Alive", "timeout=5"),
        ]
        .into_iter()
        .collect();

        let e2e = h.end_to_end();
        assert!(e2e.contains("host"));
        assert!(e2e.contains("authorization"));
        assert!(!e2e.contains("connection"));
        assert!(!e2e.contains("transfer-encoding"));
        assert!(!e2e.contains("keep-alive"));
    }

    #[test]
    fn end_to_end_honours_connection_tokens() {
        let h: Headers = [
            ("Connection", "close, X-Internal-Trace"),
            ("x-internal-trace", "abc"),
            ("X-Request-Id", "42"),
        ]
        .into_iter()
        .collect();

        let e2e = h.end_to_end();
        assert!(!e2e.contains("x-internal-trace"));
        assert_eq!(e2e.get("x-request-id"), Some("42"));
    }

    #[test]
    fn hop_by_hop_is_case_insensitive() {
        assert!(is_hop_by_hop("Upgrade"));
        assert!(is_hop_by_hop("TE"));
        assert!(!is_hop_by_hop("Content-Type"));
    }
}
