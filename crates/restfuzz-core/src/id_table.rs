//! Dynamic identifier table.
//!
//! Maps a symbolic key (`userId`, `orderKey`) to every concrete value observed
//! under that name in a response. Keys are never removed; each key keeps its
//! full history and the most recently appended value is the "latest".

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use restfuzz_types::EndpointCatalog;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest identifier value worth remembering.
const MAX_ID_LEN: usize = 30;

/// How a placeholder key is matched against table keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMatch {
    /// Case-insensitive equality only.
    Exact,
    /// Equality, or one key is a prefix or suffix of the other (`userId` ~ `id`).
    #[default]
    Relaxed,
}

impl KeyMatch {
    pub fn matches(&self, wanted: &str, stored: &str) -> bool {
        let (w, s) = (wanted.to_ascii_lowercase(), stored.to_ascii_lowercase());
        match self {
            KeyMatch::Exact => w == s,
            KeyMatch::Relaxed => {
                w == s || w.starts_with(&s) || w.ends_with(&s) || s.starts_with(&w) || s.ends_with(&w)
            }
        }
    }
}

/// Which historical value a lookup returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum ValuePolicy {
    #[default]
    Latest,
    /// Deterministic pick among all values of the key.
    Any { seed: u64 },
}

/// Decides whether a response field carries a resource identifier.
pub trait IdentifierPredicate: Send + Sync {
    fn is_identifier(&self, field_name: &str, schema: Option<&Value>) -> bool;
}

/// Name-based identifier heuristic.
///
/// A field is an identifier when its name equals a known path parameter name,
/// when it ends in one of the suffixes at a word boundary (`id`, `user_id`,
/// `userId`, `apiKey`) or when its schema declares `format: uuid`.
#[derive(Debug, Clone)]
pub struct SuffixPredicate {
    suffixes: Vec<String>,
    names: BTreeSet<String>,
}

impl Default for SuffixPredicate {
    fn default() -> Self {
        Self::new(BTreeSet::new())
    }
}

impl SuffixPredicate {
    pub const DEFAULT_SUFFIXES: [&'static str; 3] = ["id", "key", "token"];

    pub fn new(path_param_names: BTreeSet<String>) -> Self {
        Self {
            suffixes: Self::DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            names: path_param_names
                .into_iter()
                .map(|n| n.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn for_catalog(catalog: &EndpointCatalog) -> Self {
        Self::new(catalog.path_parameter_names())
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffixes.push(suffix.to_ascii_lowercase());
        self
    }

    fn has_suffix(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.suffixes.iter().any(|suffix| {
            if lower == *suffix {
                return true;
            }
            if !lower.ends_with(suffix.as_str()) {
                return false;
            }
            let cut = name.len() - suffix.len();
            // `user_id`, `user-id` or camelCase `userId`
            let before = name[..cut].chars().last();
            let first = name[cut..].chars().next();
            matches!(before, Some('_') | Some('-'))
                || first.map(|c| c.is_ascii_uppercase()).unwrap_or(false)
        })
    }
}

impl IdentifierPredicate for SuffixPredicate {
    fn is_identifier(&self, field_name: &str, schema: Option<&Value>) -> bool {
        if schema
            .and_then(|s| s.get("format"))
            .and_then(|f| f.as_str())
            .map(|f| f == "uuid")
            .unwrap_or(false)
        {
            return true;
        }
        self.names.contains(&field_name.to_ascii_lowercase()) || self.has_suffix(field_name)
    }
}

/// Whether `value` looks like an identifier worth storing.
fn is_identifier_value(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => {
            !s.is_empty()
                && s.len() <= MAX_ID_LEN
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        _ => false,
    }
}

/// Scan a response body for identifier values, recursing into objects and arrays.
pub fn extract_ids(body: &Value, predicate: &dyn IdentifierPredicate) -> BTreeMap<String, Vec<Value>> {
    let mut found: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    collect_ids(body, predicate, &mut found);
    found
}

fn collect_ids(
    value: &Value,
    predicate: &dyn IdentifierPredicate,
    found: &mut BTreeMap<String, Vec<Value>>,
) {
    match value {
        Value::Object(fields) => {
            for (name, field) in fields {
                if is_identifier_value(field) && predicate.is_identifier(name, None) {
                    let values = found.entry(name.clone()).or_default();
                    if !values.contains(field) {
                        values.push(field.clone());
                    }
                }
                collect_ids(field, predicate, found);
            }
        }
        Value::Array(items) => items.iter().for_each(|i| collect_ids(i, predicate, found)),
        _ => {}
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IdEntry {
    values: Vec<Value>,
    /// Table clock at the last append.
    updated: u64,
}

/// Run-scoped store of identifier values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicIdTable {
    entries: BTreeMap<String, IdEntry>,
    clock: u64,
}

impl DynamicIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value. A value already present moves to the latest position.
    pub fn insert(&mut self, key: &str, value: Value) {
        self.clock += 1;
        let entry = self.entries.entry(key.to_string()).or_default();
        entry.values.retain(|v| *v != value);
        entry.values.push(value);
        entry.updated = self.clock;
    }

    /// Merge extracted ids; returns how many pairs were appended.
    pub fn update(&mut self, ids: BTreeMap<String, Vec<Value>>) -> usize {
        let mut appended = 0;
        for (key, values) in ids {
            for value in values {
                self.insert(&key, value);
                appended += 1;
            }
        }
        appended
    }

    pub fn latest(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).and_then(|e| e.values.last())
    }

    pub fn values(&self, key: &str) -> &[Value] {
        self.entries
            .get(key)
            .map(|e| e.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Table key a placeholder resolves to.
    ///
    /// A case-insensitive exact match wins; otherwise, under
    /// [`KeyMatch::Relaxed`], the most recently updated matching key.
    pub fn find_key(&self, name: &str, key_match: KeyMatch) -> Option<&str> {
        if let Some(key) = self.entries.keys().find(|k| k.eq_ignore_ascii_case(name)) {
            return Some(key);
        }
        if key_match == KeyMatch::Exact {
            return None;
        }
        self.entries
            .iter()
            .filter(|(k, _)| key_match.matches(name, k))
            .max_by_key(|(_, e)| e.updated)
            .map(|(k, _)| k.as_str())
    }

    /// Value for a placeholder key under the given policies.
    pub fn lookup(&self, name: &str, key_match: KeyMatch, policy: ValuePolicy) -> Option<&Value> {
        let key = self.find_key(name, key_match)?;
        let values = self.values(key);
        match policy {
            ValuePolicy::Latest => values.last(),
            ValuePolicy::Any { seed } => {
                if values.is_empty() {
                    return None;
                }
                let mut hasher = DefaultHasher::new();
                (seed, key).hash(&mut hasher);
                values.get((hasher.finish() % values.len() as u64) as usize)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn predicate() -> SuffixPredicate {
        SuffixPredicate::new(["petName".to_string()].into_iter().collect())
    }

    #[test]
    fn test_suffix_predicate_word_boundaries() {
        let p = predicate();
        assert!(p.is_identifier("id", None));
        assert!(p.is_identifier("userId", None));
        assert!(p.is_identifier("user_id", None));
        assert!(p.is_identifier("apiKey", None));
        assert!(p.is_identifier("accessToken", None));
        assert!(p.is_identifier("petname", None));
        assert!(!p.is_identifier("paid", None));
        assert!(!p.is_identifier("valid", None));
        assert!(!p.is_identifier("monkey", None));
        assert!(p.is_identifier("ref", Some(&json!({"format": "uuid"}))));
    }

    #[test]
    fn test_extract_ids_recursive_with_value_filter() {
        let body = json!({
            "userId": "u1",
            "name": "alice",
            "profile": {"avatarId": 77, "bio": "x"},
            "orders": [{"orderId": "o-1"}, {"orderId": "o_2"}],
            "sessionToken": "has space",
            "longId": "x".repeat(31),
            "floatId": 1.5
        });
        let ids = extract_ids(&body, &predicate());
        assert_eq!(ids["userId"], vec![json!("u1")]);
        assert_eq!(ids["avatarId"], vec![json!(77)]);
        assert_eq!(ids["orderId"], vec![json!("o-1"), json!("o_2")]);
        assert!(!ids.contains_key("sessionToken"));
        assert!(!ids.contains_key("longId"));
        assert!(!ids.contains_key("floatId"));
        assert!(!ids.contains_key("name"));
    }

    #[test]
    fn test_update_keeps_history_and_latest() {
        let mut table = DynamicIdTable::new();
        table.insert("userId", json!("u1"));
        table.insert("userId", json!("u2"));
        assert_eq!(table.latest("userId"), Some(&json!("u2")));
        assert_eq!(table.values("userId").len(), 2);

        table.insert("userId", json!("u1"));
        assert_eq!(table.latest("userId"), Some(&json!("u1")));
        assert_eq!(table.values("userId").len(), 2);
    }

    #[test]
    fn test_update_empty_is_noop() {
        let mut table = DynamicIdTable::new();
        assert_eq!(table.update(BTreeMap::new()), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_find_key_exact_beats_relaxed() {
        let mut table = DynamicIdTable::new();
        table.insert("userId", json!("u1"));
        table.insert("id", json!("x9"));
        assert_eq!(table.find_key("userid", KeyMatch::Exact), Some("userId"));
        assert_eq!(table.find_key("userId", KeyMatch::Relaxed), Some("userId"));
        // relaxed falls back to the freshest compatible key
        assert_eq!(table.find_key("petId", KeyMatch::Relaxed), Some("id"));
        assert_eq!(table.find_key("petId", KeyMatch::Exact), None);
    }

    #[test]
    fn test_lookup_any_policy_is_deterministic() {
        let mut table = DynamicIdTable::new();
        for i in 0..5 {
            table.insert("orderId", json!(i));
        }
        let policy = ValuePolicy::Any { seed: 42 };
        let a = table.lookup("orderId", KeyMatch::Exact, policy).cloned();
        let b = table.lookup("orderId", KeyMatch::Exact, policy).cloned();
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(
            table.lookup("orderId", KeyMatch::Exact, ValuePolicy::Latest),
            Some(&json!(4))
        );
    }
}
