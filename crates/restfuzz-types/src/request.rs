//! Request and response model.
//!
//! A [`Request`] is built as a draft whose leaves are either concrete values or
//! placeholders naming an identifier key (`placeholder(userId)`). It may only be
//! sent once every placeholder has been resolved; [`Request::is_resolved`]
//! checks exactly that.

use std::collections::{BTreeMap, BTreeSet};

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::endpoint::{EndpointId, HttpMethod};

/// Media type of every request body the fuzzer sends.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Characters escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\'')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// A leaf value of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Slot {
    Concrete(Value),
    /// Must be filled from the identifier table before sending.
    Placeholder(String),
}

impl Slot {
    pub fn concrete(value: Value) -> Self {
        Slot::Concrete(value)
    }

    pub fn placeholder(key: &str) -> Self {
        Slot::Placeholder(key.to_string())
    }

    pub fn placeholder_key(&self) -> Option<&str> {
        match self {
            Slot::Placeholder(key) => Some(key),
            Slot::Concrete(_) => None,
        }
    }

    pub fn as_concrete(&self) -> Option<&Value> {
        match self {
            Slot::Concrete(v) => Some(v),
            Slot::Placeholder(_) => None,
        }
    }
}

/// Structured request body whose leaves are [`Slot`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BodyField {
    Leaf(Slot),
    Object(BTreeMap<String, BodyField>),
    Array(Vec<BodyField>),
}

impl BodyField {
    pub fn value(value: Value) -> Self {
        BodyField::Leaf(Slot::Concrete(value))
    }

    fn collect_placeholders(&self, out: &mut BTreeSet<String>) {
        match self {
            BodyField::Leaf(slot) => {
                if let Some(key) = slot.placeholder_key() {
                    out.insert(key.to_string());
                }
            }
            BodyField::Object(fields) => fields.values().for_each(|f| f.collect_placeholders(out)),
            BodyField::Array(items) => items.iter().for_each(|f| f.collect_placeholders(out)),
        }
    }

    fn collect_leaves<'a>(&'a self, path: &mut Vec<PathSeg>, out: &mut Vec<(FieldRef, &'a Slot)>) {
        match self {
            BodyField::Leaf(slot) => out.push((FieldRef::Body(path.clone()), slot)),
            BodyField::Object(fields) => {
                for (name, field) in fields {
                    path.push(PathSeg::Key(name.clone()));
                    field.collect_leaves(path, out);
                    path.pop();
                }
            }
            BodyField::Array(items) => {
                for (i, field) in items.iter().enumerate() {
                    path.push(PathSeg::Index(i));
                    field.collect_leaves(path, out);
                    path.pop();
                }
            }
        }
    }

    fn at_mut(&mut self, path: &[PathSeg]) -> Option<&mut BodyField> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        match (self, first) {
            (BodyField::Object(fields), PathSeg::Key(k)) => fields.get_mut(k)?.at_mut(rest),
            (BodyField::Array(items), PathSeg::Index(i)) => items.get_mut(*i)?.at_mut(rest),
            _ => None,
        }
    }

    /// Convert to JSON. Returns the first placeholder key on failure.
    pub fn to_json(&self) -> Result<Value, String> {
        match self {
            BodyField::Leaf(Slot::Concrete(v)) => Ok(v.clone()),
            BodyField::Leaf(Slot::Placeholder(key)) => Err(key.clone()),
            BodyField::Object(fields) => {
                let mut map = Map::new();
                for (name, field) in fields {
                    map.insert(name.clone(), field.to_json()?);
                }
                Ok(Value::Object(map))
            }
            BodyField::Array(items) => items
                .iter()
                .map(BodyField::to_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }
}

/// One step of a body path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// Address of a leaf inside a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldRef {
    Path(String),
    Query(String),
    Header(String),
    Body(Vec<PathSeg>),
}

impl FieldRef {
    /// Dotted label, e.g. `body.address.zip` or `query.limit`.
    pub fn label(&self) -> String {
        match self {
            FieldRef::Path(n) => format!("path.{n}"),
            FieldRef::Query(n) => format!("query.{n}"),
            FieldRef::Header(n) => format!("header.{n}"),
            FieldRef::Body(segs) => {
                let mut s = String::from("body");
                for seg in segs {
                    match seg {
                        PathSeg::Key(k) => {
                            s.push('.');
                            s.push_str(k);
                        }
                        PathSeg::Index(i) => s.push_str(&format!(".{i}")),
                    }
                }
                s
            }
        }
    }
}

/// A draft or resolved HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub endpoint: EndpointId,
    pub method: HttpMethod,
    /// Template path of the originating endpoint.
    pub template: String,
    /// Current path; equals `template` until resolution renders it.
    pub path: String,
    pub path_params: BTreeMap<String, Slot>,
    pub query: BTreeMap<String, Slot>,
    pub headers: BTreeMap<String, Slot>,
    pub body: Option<BodyField>,
}

impl Request {
    pub fn new(endpoint: EndpointId, method: HttpMethod, template: &str) -> Self {
        Self {
            endpoint,
            method,
            template: template.to_string(),
            path: template.to_string(),
            path_params: BTreeMap::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Every placeholder key still present, across path, query, headers and body.
    pub fn placeholder_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self
            .path_params
            .values()
            .chain(self.query.values())
            .chain(self.headers.values())
            .filter_map(|s| s.placeholder_key().map(String::from))
            .collect();
        if let Some(body) = &self.body {
            body.collect_placeholders(&mut keys);
        }
        keys
    }

    /// True when no placeholder remains and the path has been rendered.
    pub fn is_resolved(&self) -> bool {
        self.placeholder_keys().is_empty() && !self.path.contains('{')
    }

    /// All leaves with their addresses, in a stable order.
    pub fn leaves(&self) -> Vec<(FieldRef, &Slot)> {
        let mut out = Vec::new();
        for (name, slot) in &self.path_params {
            out.push((FieldRef::Path(name.clone()), slot));
        }
        for (name, slot) in &self.query {
            out.push((FieldRef::Query(name.clone()), slot));
        }
        for (name, slot) in &self.headers {
            out.push((FieldRef::Header(name.clone()), slot));
        }
        if let Some(body) = &self.body {
            body.collect_leaves(&mut Vec::new(), &mut out);
        }
        out
    }

    pub fn slot_mut(&mut self, field: &FieldRef) -> Option<&mut Slot> {
        match field {
            FieldRef::Path(n) => self.path_params.get_mut(n),
            FieldRef::Query(n) => self.query.get_mut(n),
            FieldRef::Header(n) => self.headers.get_mut(n),
            FieldRef::Body(path) => match self.body.as_mut()?.at_mut(path)? {
                BodyField::Leaf(slot) => Some(slot),
                _ => None,
            },
        }
    }

    /// Set a field, creating it when the parent exists (query/header maps, body objects).
    pub fn set_field(&mut self, field: &FieldRef, value: BodyField) -> bool {
        let leaf = |value: BodyField| match value {
            BodyField::Leaf(slot) => Some(slot),
            other => other.to_json().ok().map(Slot::Concrete),
        };
        match field {
            FieldRef::Path(n) => leaf(value)
                .map(|s| self.path_params.insert(n.clone(), s))
                .is_some(),
            FieldRef::Query(n) => leaf(value).map(|s| self.query.insert(n.clone(), s)).is_some(),
            FieldRef::Header(n) => leaf(value)
                .map(|s| self.headers.insert(n.clone(), s))
                .is_some(),
            FieldRef::Body(path) => {
                let Some((last, parent)) = path.split_last() else {
                    self.body = Some(value);
                    return true;
                };
                let body = self
                    .body
                    .get_or_insert_with(|| BodyField::Object(BTreeMap::new()));
                match (body.at_mut(parent), last) {
                    (Some(BodyField::Object(fields)), PathSeg::Key(k)) => {
                        fields.insert(k.clone(), value);
                        true
                    }
                    (Some(BodyField::Array(items)), PathSeg::Index(i)) if *i < items.len() => {
                        items[*i] = value;
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Remove an optional field. Path parameters cannot be removed.
    pub fn remove_field(&mut self, field: &FieldRef) -> bool {
        match field {
            FieldRef::Path(_) => false,
            FieldRef::Query(n) => self.query.remove(n).is_some(),
            FieldRef::Header(n) => self.headers.remove(n).is_some(),
            FieldRef::Body(path) => {
                let Some((PathSeg::Key(k), parent)) = path.split_last() else {
                    return false;
                };
                match self.body.as_mut().and_then(|b| b.at_mut(parent)) {
                    Some(BodyField::Object(fields)) => fields.remove(k).is_some(),
                    _ => false,
                }
            }
        }
    }

    /// Render the template path with the current path parameter values.
    ///
    /// Values are percent-encoded as single segments. Fails with the first
    /// placeholder key that is still unresolved.
    pub fn render_path(&self) -> Result<String, String> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            let name = &rest[start + 1..start + len];
            out.push_str(&rest[..start]);
            match self.path_params.get(name) {
                Some(Slot::Concrete(v)) => {
                    out.extend(utf8_percent_encode(&render_scalar(v), PATH_SEGMENT))
                }
                Some(Slot::Placeholder(key)) => return Err(key.clone()),
                None => return Err(name.to_string()),
            }
            rest = &rest[start + len + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    pub fn body_json(&self) -> Result<Option<Value>, String> {
        self.body.as_ref().map(BodyField::to_json).transpose()
    }

    /// Concrete query pairs; placeholders are skipped.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        concrete_pairs(&self.query)
    }

    /// Concrete header pairs; placeholders are skipped.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        concrete_pairs(&self.headers)
    }

    /// `GET /users/u1` style label.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

fn concrete_pairs(map: &BTreeMap<String, Slot>) -> Vec<(String, String)> {
    map.iter()
        .filter_map(|(k, s)| s.as_concrete().map(|v| (k.clone(), render_scalar(v))))
        .collect()
}

/// Render a JSON value for a path segment, query string or header.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// An HTTP response, schema-unaware at this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body; `Null` when empty, a JSON string when not JSON.
    pub body: Value,
    /// Raw body length in bytes.
    pub body_len: usize,
}

impl Response {
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: Value, body_len: usize) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            status,
            headers,
            body,
            body_len,
        }
    }

    /// JSON response with `content-type: application/json`.
    pub fn json(status: u16, body: Value) -> Self {
        let body_len = if body.is_null() {
            0
        } else {
            body.to_string().len()
        };
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self::new(status, headers, body, body_len)
    }

    /// Parse a raw body: JSON when it parses, otherwise kept as a string.
    pub fn from_raw(status: u16, headers: BTreeMap<String, String>, raw: &str) -> Self {
        let body = if raw.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        Self::new(status, headers, body, raw.len())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> Request {
        let mut req = Request::new(EndpointId(1), HttpMethod::Get, "/users/{userId}/posts");
        req.path_params
            .insert("userId".into(), Slot::placeholder("userId"));
        req.query.insert("limit".into(), Slot::concrete(json!(10)));
        let mut body = BTreeMap::new();
        body.insert("owner".into(), BodyField::Leaf(Slot::placeholder("ownerId")));
        body.insert("name".into(), BodyField::value(json!("rex")));
        req.body = Some(BodyField::Object(body));
        req
    }

    #[test]
    fn test_placeholder_keys_span_all_locations() {
        let keys = draft().placeholder_keys();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["ownerId", "userId"]
        );
        assert!(!draft().is_resolved());
    }

    #[test]
    fn test_render_path_fails_on_placeholder() {
        assert_eq!(draft().render_path(), Err("userId".to_string()));
        let mut req = draft();
        req.path_params
            .insert("userId".into(), Slot::concrete(json!(42)));
        assert_eq!(req.render_path().unwrap(), "/users/42/posts");
    }

    #[test]
    fn test_render_path_encodes_segments() {
        let mut req = draft();
        req.path_params
            .insert("userId".into(), Slot::concrete(json!("a b/../' OR ?x#")));
        assert_eq!(
            req.render_path().unwrap(),
            "/users/a%20b%2F..%2F%27%20OR%20%3Fx%23/posts"
        );
        req.path_params
            .insert("userId".into(), Slot::concrete(json!("ünï")));
        assert_eq!(req.render_path().unwrap(), "/users/%C3%BCn%C3%AF/posts");
    }

    #[test]
    fn test_leaves_and_slot_mut() {
        let mut req = draft();
        let labels: Vec<String> = req.leaves().iter().map(|(f, _)| f.label()).collect();
        assert_eq!(
            labels,
            vec!["path.userId", "query.limit", "body.name", "body.owner"]
        );
        let name = FieldRef::Body(vec![PathSeg::Key("name".into())]);
        *req.slot_mut(&name).unwrap() = Slot::concrete(json!("fido"));
        let body = req.body_json();
        assert_eq!(body, Err("ownerId".to_string()));
    }

    #[test]
    fn test_set_and_remove_body_field() {
        let mut req = draft();
        let tag = FieldRef::Body(vec![PathSeg::Key("tag".into())]);
        assert!(req.set_field(&tag, BodyField::value(json!("x"))));
        assert!(req.remove_field(&tag));
        assert!(!req.remove_field(&tag));
        assert!(!req.remove_field(&FieldRef::Path("userId".into())));
    }

    #[test]
    fn test_response_from_raw() {
        let resp = Response::from_raw(200, BTreeMap::new(), r#"{"id": 1}"#);
        assert_eq!(resp.body, json!({"id": 1}));
        let resp = Response::from_raw(500, BTreeMap::new(), "boom");
        assert_eq!(resp.body, json!("boom"));
        let resp = Response::from_raw(204, BTreeMap::new(), "");
        assert!(resp.body.is_null());
        assert_eq!(resp.body_len, 0);
    }

    #[test]
    fn test_response_headers_lowercased() {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
        let resp = Response::new(200, headers, Value::Null, 0);
        assert_eq!(resp.content_type(), Some("text/plain"));
    }
}
