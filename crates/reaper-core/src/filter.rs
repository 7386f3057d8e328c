//! Filter canonicalization and the shared filter store.
//!
//! Clients submit filters as URL-encoded query strings. The same predicate
//! can arrive with its pairs in any order, so each line is canonicalized to a
//! sorted JSON-object form that serves both as the deduplication key and as
//! the argument handed to the container runtime.

use crate::error::FilterError;
use percent_encoding::percent_decode_str;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A canonicalized predicate over runtime resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    args: BTreeMap<String, BTreeSet<String>>,
    canonical: String,
}

impl Filter {
    /// Parses a URL-encoded query string (`key=value&key=value`) into a
    /// filter. `+` decodes to a space and `%XX` escapes are honoured.
    ///
    /// # Errors
    ///
    /// Returns an error if the line contains no pairs, a malformed percent
    /// escape, or a component that is not valid UTF-8.
    pub fn parse(line: &str) -> Result<Self, FilterError> {
        let mut args: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for pair in line.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (decode(key)?, decode(value)?),
                None => (decode(pair)?, String::new()),
            };
            args.entry(key).or_default().insert(value);
        }
        if args.is_empty() {
            return Err(FilterError::Empty);
        }

        let canonical = canonicalize(&args);
        Ok(Self { args, canonical })
    }

    /// The canonical serialization, e.g. `{"label":{"foo=bar":true}}`. Keys
    /// and inner keys are emitted in a stable sort order.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// The grouped key-value pairs.
    #[must_use]
    pub const fn args(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.args
    }

    /// The values collected for `key`, if any.
    #[must_use]
    pub fn values(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.args.get(key)
    }

    /// Returns a copy with `value` added under `key`. The original filter is
    /// not mutated, so its identity in the store is preserved.
    #[must_use]
    pub fn with(&self, key: &str, value: &str) -> Self {
        let mut args = self.args.clone();
        args.entry(key.to_owned()).or_default().insert(value.to_owned());
        let canonical = canonicalize(&args);
        Self { args, canonical }
    }

    /// The filter as the key-to-values map expected by runtime list calls.
    #[must_use]
    pub fn to_query_map(&self) -> HashMap<String, Vec<String>> {
        self.args
            .iter()
            .map(|(key, values)| (key.clone(), values.iter().cloned().collect()))
            .collect()
    }
}

/// Emits the sorted JSON-object form: each key maps to an object whose keys
/// are the values and whose values are the literal `true`.
fn canonicalize(args: &BTreeMap<String, BTreeSet<String>>) -> String {
    let mut root = serde_json::Map::new();
    for (key, values) in args {
        let mut inner = serde_json::Map::new();
        for value in values {
            inner.insert(value.clone(), serde_json::Value::Bool(true));
        }
        root.insert(key.clone(), serde_json::Value::Object(inner));
    }
    serde_json::Value::Object(root).to_string()
}

/// Percent-decodes one query-string component, treating `+` as a space.
/// Unlike the lenient decoders, a dangling or non-hex escape is an error.
fn decode(raw: &str) -> Result<String, FilterError> {
    let spaced = raw.replace('+', " ");
    let bytes = spaced.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let valid = bytes.get(index + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(index + 2).is_some_and(u8::is_ascii_hexdigit);
            if !valid {
                return Err(FilterError::InvalidEscape(raw.to_owned()));
            }
            index += 3;
        } else {
            index += 1;
        }
    }

    Ok(percent_decode_str(&spaced).decode_utf8()?.into_owned())
}

/// Thread-safe set of canonicalized filters.
///
/// Written by client sessions, snapshotted once by the pruner. The canonical
/// form is the uniqueness key, so semantically-equivalent lines collapse to
/// one entry.
#[derive(Debug, Clone, Default)]
pub struct FilterStore {
    inner: Arc<Mutex<BTreeMap<String, Filter>>>,
}

impl FilterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `line` and adds it to the store. Returns `false` when an
    /// equivalent filter was already present. Safe under concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be parsed.
    pub fn add(&self, line: &str) -> Result<bool, FilterError> {
        let filter = Filter::parse(line)?;
        for (key, values) in filter.args() {
            info!(key = %key, values = ?values, "adding filter");
        }

        let mut filters = self.inner.lock().map_err(|_| FilterError::LockPoisoned)?;
        if filters.contains_key(filter.canonical()) {
            debug!(key = %filter.canonical(), "filter already exists");
            return Ok(false);
        }

        debug!(key = %filter.canonical(), "adding filter");
        let key = filter.canonical().to_owned();
        filters.insert(key, filter);
        Ok(true)
    }

    /// An immutable copy of the stored filters, taken under the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn snapshot(&self) -> Result<Vec<Filter>, FilterError> {
        let filters = self.inner.lock().map_err(|_| FilterError::LockPoisoned)?;
        Ok(filters.values().cloned().collect())
    }

    /// Number of distinct filters currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |filters| filters.len())
    }

    /// Whether the store holds no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_form_is_sorted() {
        let filter = Filter::parse("name=svc&label=foo=bar").unwrap();
        assert_eq!(
            filter.canonical(),
            r#"{"label":{"foo=bar":true},"name":{"svc":true}}"#
        );
    }

    #[test]
    fn canonical_form_is_order_insensitive() {
        let one = Filter::parse("a=1&b=2").unwrap();
        let two = Filter::parse("b=2&a=1").unwrap();
        assert_eq!(one.canonical(), two.canonical());
        assert_eq!(one, two);
    }

    #[test]
    fn repeated_keys_group_values() {
        let filter = Filter::parse("label=a=1&label=b=2").unwrap();
        assert_eq!(filter.canonical(), r#"{"label":{"a=1":true,"b=2":true}}"#);
    }

    #[test]
    fn percent_and_plus_decode() {
        let filter = Filter::parse("label=foo%3Dbar&name=my+svc").unwrap();
        assert!(filter.values("label").unwrap().contains("foo=bar"));
        assert!(filter.values("name").unwrap().contains("my svc"));
    }

    #[test]
    fn bare_key_gets_empty_value() {
        let filter = Filter::parse("param").unwrap();
        assert_eq!(filter.canonical(), r#"{"param":{"":true}}"#);
    }

    #[test]
    fn invalid_escape_is_rejected() {
        let err = Filter::parse("label=%zz").unwrap_err();
        assert!(matches!(err, FilterError::InvalidEscape(_)));

        let err = Filter::parse("label=%2").unwrap_err();
        assert!(matches!(err, FilterError::InvalidEscape(_)));
    }

    #[test]
    fn empty_lines_are_rejected() {
        assert!(matches!(Filter::parse(""), Err(FilterError::Empty)));
        assert!(matches!(Filter::parse("&&"), Err(FilterError::Empty)));
    }

    #[test]
    fn with_clones_without_mutating() {
        let filter = Filter::parse("label=k=v").unwrap();
        let augmented = filter.with("dangling", "false");

        assert_eq!(filter.canonical(), r#"{"label":{"k=v":true}}"#);
        assert_eq!(
            augmented.canonical(),
            r#"{"dangling":{"false":true},"label":{"k=v":true}}"#
        );
        assert!(filter.values("dangling").is_none());
    }

    #[test]
    fn store_deduplicates_equivalent_lines() {
        let store = FilterStore::new();
        assert!(store.add("a=1&b=2").unwrap());
        assert!(!store.add("b=2&a=1").unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_keeps_distinct_filters() {
        let store = FilterStore::new();
        assert!(store.add("a=1").unwrap());
        assert!(store.add("a=2").unwrap());
        assert_eq!(store.snapshot().unwrap().len(), 2);
    }

    proptest! {
        #[test]
        fn canonicalization_ignores_pair_order(
            pairs in prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{1,8}"), 1..6),
        ) {
            let forward: Vec<String> =
                pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let mut backward = forward.clone();
            backward.reverse();

            let one = Filter::parse(&forward.join("&")).unwrap();
            let two = Filter::parse(&backward.join("&")).unwrap();
            prop_assert_eq!(one.canonical(), two.canonical());
        }

        #[test]
        fn add_is_idempotent(
            pairs in prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{1,8}"), 1..6),
        ) {
            let line: String = pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");

            let store = FilterStore::new();
            store.add(&line).unwrap();
            let once = store.snapshot().unwrap();
            store.add(&line).unwrap();
            let twice = store.snapshot().unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
