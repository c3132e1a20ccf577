//! Request fingerprinting.
//!
//! A [`CacheKeyInput`] is the normalized view of an opted-in request: its
//! parameters in key order plus the artifact extension. Its canonical
//! serialization is hashed with SHA-256 into a [`Fingerprint`], which names
//! the object in the cache store.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};
use url::form_urlencoded;

/// Parameter whose value `true` opts a request into caching.
pub const CACHE_MARKER_KEY: &str = "cache";
pub const CACHE_MARKER_VALUE: &str = "true";

/// Parameter selecting the artifact format on endpoints that support several.
pub const FORMAT_KEY: &str = "format";

/// Hex SHA-256 of the UTF-8 bytes of `input`.
///
/// # Examples
///
/// ```
/// use edgecache::fingerprint::fingerprint;
///
/// assert_eq!(
///     fingerprint(""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
pub fn fingerprint(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// A 64-character lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request parameters with unique keys, kept in key order.
///
/// Values are stored decoded. When a key repeats, the first value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` string (no leading `?`).
    ///
    /// `+` decodes to a space and `%XX` escapes are decoded once.
    pub fn from_query(query: &str) -> Self {
        form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Inserts a pair unless the key is already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `true` when the request opted into caching with `cache=true`.
    pub fn cache_requested(&self) -> bool {
        self.get(CACHE_MARKER_KEY) == Some(CACHE_MARKER_VALUE)
    }

    /// The requested output format, ignoring an empty value.
    pub fn format(&self) -> Option<&str> {
        self.get(FORMAT_KEY).filter(|f| !f.is_empty())
    }

    /// Decoded pairs in key order as `key=value` joined by `&`.
    ///
    /// Readable but ambiguous: a value holding a decoded `&` renders the same
    /// as two pairs. Keys are built from [`CacheKeyInput::serialize`] instead.
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Everything that determines which cached artifact answers a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyInput {
    params: Params,
    extension: String,
}

impl CacheKeyInput {
    pub fn new(params: Params, extension: impl Into<String>) -> Self {
        Self {
            params,
            extension: extension.into(),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Byte-stable serialization of the decoded parameters.
    ///
    /// The extension comes first, then every pair in key order. Each field is
    /// written as `{byte length}:{decoded text}`, so a decoded `&`, `=` or
    /// newline inside a value cannot be mistaken for a separator:
    ///
    /// ```text
    /// 4:html
    /// 5:cache=4:true&3:url=19:https://example.com
    /// ```
    pub fn serialize(&self) -> String {
        let pairs = self
            .params
            .0
            .iter()
            .map(|(k, v)| format!("{}:{k}={}:{v}", k.len(), v.len()))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}:{}\n{pairs}", self.extension.len(), self.extension)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(fingerprint(&self.serialize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        let s = "cache=true&url=https://example.com";
        let first = fingerprint(s);
        for _ in 0..10 {
            assert_eq!(fingerprint(s), first);
        }
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn distinct_inputs_distinct_digests() {
        assert_ne!(fingerprint("url=a"), fingerprint("url=b"));
        assert_ne!(fingerprint(""), fingerprint(" "));
    }

    #[test]
    fn params_are_order_independent() {
        let a = Params::from_query("url=https%3A%2F%2Fexample.com&cache=true&format=png");
        let b = Params::from_query("format=png&cache=true&url=https://example.com");
        assert_eq!(a, b);
        assert_eq!(
            CacheKeyInput::new(a, "png").fingerprint(),
            CacheKeyInput::new(b, "png").fingerprint()
        );
    }

    #[test]
    fn first_duplicate_wins() {
        let p = Params::from_query("format=png&format=webp");
        assert_eq!(p.format(), Some("png"));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn plus_decodes_to_space() {
        let p = Params::from_query("q=hello+world&r=a%20b");
        assert_eq!(p.get("q"), Some("hello world"));
        assert_eq!(p.get("r"), Some("a b"));
    }

    #[test]
    fn serialization_uses_decoded_text() {
        let key = CacheKeyInput::new(
            Params::from_query("url=https%3A%2F%2Fexample.com&cache=true"),
            "png",
        );
        assert_eq!(key.serialize(), "3:png\n5:cache=4:true&3:url=19:https://example.com");
        assert_eq!(key.params().canonical(), "cache=true&url=https://example.com");
    }

    #[test]
    fn decoded_separators_do_not_alias() {
        let tricky = Params::from_query("a=1%26b%3D2");
        let plain = Params::from_query("a=1&b=2");
        assert_eq!(tricky.canonical(), plain.canonical());
        assert_ne!(
            CacheKeyInput::new(tricky, "html").fingerprint(),
            CacheKeyInput::new(plain, "html").fingerprint()
        );
    }

    #[test]
    fn cache_marker_must_be_exact() {
        assert!(Params::from_query("cache=true").cache_requested());
        assert!(!Params::from_query("cache=TRUE").cache_requested());
        assert!(!Params::from_query("nocache=true").cache_requested());
        assert!(!Params::from_query("cache=truest").cache_requested());
        assert!(!Params::new().cache_requested());
    }

    #[test]
    fn empty_format_is_absent() {
        assert_eq!(Params::from_query("format=").format(), None);
        assert_eq!(Params::from_query("format=webm").format(), Some("webm"));
    }

    #[test]
    fn extension_is_part_of_the_key() {
        let params = Params::from_query("cache=true&url=x");
        let pdf = CacheKeyInput::new(params.clone(), "pdf");
        let html = CacheKeyInput::new(params, "html");
        assert_ne!(pdf.fingerprint(), html.fingerprint());
        assert_eq!(html.serialize(), "4:html\n5:cache=4:true&3:url=1:x");
        assert_eq!(
            html.fingerprint().as_str(),
            fingerprint("4:html\n5:cache=4:true&3:url=1:x")
        );
    }

    #[test]
    fn empty_input_still_fingerprints() {
        let key = CacheKeyInput::new(Params::new(), "");
        assert_eq!(key.serialize(), "0:\n");
        assert_eq!(key.fingerprint().as_str().len(), 64);
    }
}
