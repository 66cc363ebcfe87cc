//! Request synthesizer: endpoint descriptor to draft request.
//!
//! Deterministic. Dependency parameters become placeholders, everything else
//! gets one schema-conformant example value.

use std::collections::BTreeMap;
use std::sync::Arc;

use restfuzz_types::schema::{self, SchemaType};
use restfuzz_types::{
    BodyField, EndpointDescriptor, EndpointId, ParamLocation, Parameter, Request, Slot,
};
use serde_json::{json, Map, Value};

use crate::id_table::IdentifierPredicate;

/// Headers the transport manages itself.
const MANAGED_HEADERS: [&str; 2] = ["content-type", "accept"];

const EXAMPLE_INT: f64 = 123.0;
const EXAMPLE_NUMBER: f64 = 123.45;
const EXAMPLE_STRING: &str = "example-string";

#[derive(Clone)]
pub struct RequestSynthesizer {
    predicate: Arc<dyn IdentifierPredicate>,
}

impl RequestSynthesizer {
    pub fn new(predicate: Arc<dyn IdentifierPredicate>) -> Self {
        Self { predicate }
    }

    pub fn predicate(&self) -> &dyn IdentifierPredicate {
        self.predicate.as_ref()
    }

    /// A parameter that must come from the identifier table.
    pub fn is_dependency(&self, param: &Parameter) -> bool {
        if param.has_static_value() {
            return false;
        }
        if param.location == ParamLocation::Header
            && MANAGED_HEADERS.contains(&param.name.to_ascii_lowercase().as_str())
        {
            return false;
        }
        self.predicate
            .is_identifier(&param.name, Some(&param.schema))
    }

    /// A body property that must come from the identifier table.
    pub fn is_dependency_field(&self, name: &str, field_schema: &Value) -> bool {
        schema::static_value(field_schema).is_none()
            && !schema::is_read_only(field_schema)
            && self.predicate.is_identifier(name, Some(field_schema))
    }

    /// Build the draft request for `endpoint`.
    pub fn build(&self, id: EndpointId, endpoint: &EndpointDescriptor) -> Request {
        let mut request = Request::new(id, endpoint.method, &endpoint.path);
        let mut body_params: BTreeMap<String, BodyField> = BTreeMap::new();

        for param in &endpoint.parameters {
            if !param.is_required() {
                continue;
            }
            let slot = if self.is_dependency(param) {
                Slot::placeholder(&param.name)
            } else {
                Slot::concrete(example_value(&param.schema))
            };
            match param.location {
                ParamLocation::Path => {
                    request.path_params.insert(param.name.clone(), slot);
                }
                ParamLocation::Query => {
                    request.query.insert(param.name.clone(), slot);
                }
                ParamLocation::Header => {
                    if !MANAGED_HEADERS.contains(&param.name.to_ascii_lowercase().as_str()) {
                        request.headers.insert(param.name.clone(), slot);
                    }
                }
                ParamLocation::Body => {
                    let field = match slot {
                        Slot::Placeholder(_) => BodyField::Leaf(slot),
                        Slot::Concrete(_) => self.build_body(&param.schema),
                    };
                    body_params.insert(param.name.clone(), field);
                }
            }
        }

        request.body = match &endpoint.request_body_schema {
            Some(body_schema) => {
                let mut body = self.build_body(body_schema);
                if let BodyField::Object(fields) = &mut body {
                    for (name, field) in body_params {
                        fields.entry(name).or_insert(field);
                    }
                }
                Some(body)
            }
            None if !body_params.is_empty() => Some(BodyField::Object(body_params)),
            None => None,
        };
        request
    }

    /// Recursively build a body: every required property, one array element.
    pub fn build_body(&self, body_schema: &Value) -> BodyField {
        if let Some(value) = schema::static_value(body_schema) {
            return BodyField::value(value.clone());
        }
        match schema::schema_type(body_schema) {
            SchemaType::Object => {
                let mut fields = BTreeMap::new();
                let required = schema::required(body_schema);
                if let Some(props) = schema::properties(body_schema) {
                    for (name, prop) in props {
                        if !required.contains(name) || schema::is_read_only(prop) {
                            continue;
                        }
                        let field = if self.is_dependency_field(name, prop) {
                            BodyField::Leaf(Slot::placeholder(name))
                        } else {
                            self.build_body(prop)
                        };
                        fields.insert(name.clone(), field);
                    }
                }
                BodyField::Object(fields)
            }
            SchemaType::Array => {
                let item = schema::items(body_schema)
                    .map(|items| self.build_body(items))
                    .unwrap_or_else(|| BodyField::value(json!(EXAMPLE_STRING)));
                let count = schema::min_items(body_schema).unwrap_or(1).max(1) as usize;
                BodyField::Array(vec![item; count])
            }
            _ => BodyField::value(example_value(body_schema)),
        }
    }
}

/// One schema-conformant example value. Deterministic.
pub fn example_value(value_schema: &Value) -> Value {
    if let Some(value) = schema::static_value(value_schema) {
        return value.clone();
    }
    if let Some(first) = schema::enum_values(value_schema).and_then(|e| e.first()) {
        return first.clone();
    }
    match schema::schema_type(value_schema) {
        SchemaType::String => Value::String(example_string(value_schema)),
        SchemaType::Integer => {
            let v = clamp(EXAMPLE_INT, value_schema).round() as i64;
            json!(v)
        }
        SchemaType::Number => json!(clamp(EXAMPLE_NUMBER, value_schema)),
        SchemaType::Boolean => Value::Bool(true),
        SchemaType::Null => Value::Null,
        SchemaType::Array => {
            let item = schema::items(value_schema)
                .map(example_value)
                .unwrap_or_else(|| json!(EXAMPLE_STRING));
            let count = schema::min_items(value_schema).unwrap_or(1).max(1) as usize;
            Value::Array(vec![item; count])
        }
        SchemaType::Object => {
            let required = schema::required(value_schema);
            let mut out = Map::new();
            if let Some(props) = schema::properties(value_schema) {
                for (name, prop) in props {
                    if required.contains(name) && !schema::is_read_only(prop) {
                        out.insert(name.clone(), example_value(prop));
                    }
                }
            }
            Value::Object(out)
        }
        SchemaType::Any => json!(EXAMPLE_STRING),
    }
}

fn clamp(v: f64, value_schema: &Value) -> f64 {
    let mut v = v;
    if let Some(min) = schema::minimum(value_schema) {
        v = v.max(min);
    }
    if let Some(max) = schema::maximum(value_schema) {
        v = v.min(max);
    }
    if schema::schema_type(value_schema) == SchemaType::Integer {
        // bounds may be fractional; stay inside them
        let min = schema::minimum(value_schema).map(f64::ceil);
        let max = schema::maximum(value_schema).map(f64::floor);
        v = v.round();
        if let Some(min) = min {
            v = v.max(min);
        }
        if let Some(max) = max {
            v = v.min(max);
        }
    }
    v
}

fn example_string(value_schema: &Value) -> String {
    let base = match schema::format(value_schema) {
        Some("email") => "user@example.com",
        Some("date") => "2024-01-01",
        Some("date-time") => "2024-01-01T00:00:00Z",
        Some("uuid") => "00000000-0000-4000-8000-000000000000",
        Some("uri") | Some("url") => "https://example.com",
        Some("ipv4") => "192.0.2.1",
        Some("byte") => "ZXhhbXBsZQ==",
        Some("int32") | Some("int64") => "0",
        _ => EXAMPLE_STRING,
    };
    fit_length(base, value_schema)
}

/// Pad or truncate to satisfy `minLength`/`maxLength`.
pub(crate) fn fit_length(base: &str, value_schema: &Value) -> String {
    let mut s: String = base.to_string();
    let len = s.chars().count() as u64;
    if let Some(min) = schema::min_length(value_schema) {
        if len < min {
            s.extend(std::iter::repeat('a').take((min - len) as usize));
        }
    }
    if let Some(max) = schema::max_length(value_schema) {
        s = s.chars().take(max as usize).collect();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_table::SuffixPredicate;
    use restfuzz_types::{EndpointCatalog, HttpMethod};

    fn synth_for(catalog: &EndpointCatalog) -> RequestSynthesizer {
        RequestSynthesizer::new(Arc::new(SuffixPredicate::for_catalog(catalog)))
    }

    #[test]
    fn test_example_values() {
        assert_eq!(example_value(&json!({"type": "string"})), json!("example-string"));
        assert_eq!(
            example_value(&json!({"type": "string", "format": "email"})),
            json!("user@example.com")
        );
        assert_eq!(
            example_value(&json!({"type": "integer", "maximum": 50})),
            json!(50)
        );
        assert_eq!(
            example_value(&json!({"type": "integer", "minimum": 500})),
            json!(500)
        );
        assert_eq!(example_value(&json!({"type": "number"})), json!(123.45));
        assert_eq!(example_value(&json!({"type": "boolean"})), json!(true));
        assert_eq!(example_value(&json!({"enum": ["b", "a"]})), json!("b"));
        assert_eq!(
            example_value(&json!({"type": "array", "items": {"type": "integer"}})),
            json!([123])
        );
        assert_eq!(
            example_value(&json!({"type": "string", "maxLength": 3})),
            json!("exa")
        );
        assert_eq!(
            example_value(&json!({"type": "string", "minLength": 16})),
            json!("example-stringaa")
        );
    }

    #[test]
    fn test_build_leaves_path_dependency_as_placeholder() {
        let catalog = EndpointCatalog::new(vec![EndpointDescriptor::new(
            HttpMethod::Get,
            "/users/{userId}",
        )
        .with_parameter(Parameter::new(
            "userId",
            ParamLocation::Path,
            json!({"type": "string"}),
            true,
        ))
        .with_parameter(Parameter::new(
            "verbose",
            ParamLocation::Query,
            json!({"type": "boolean"}),
            false,
        ))]);
        let draft = synth_for(&catalog).build(EndpointId(0), &catalog.endpoints[0]);
        assert_eq!(
            draft.path_params.get("userId"),
            Some(&Slot::placeholder("userId"))
        );
        // optional parameters are omitted
        assert!(draft.query.is_empty());
        assert!(!draft.is_resolved());
    }

    #[test]
    fn test_build_body_required_only_and_deterministic() {
        let endpoint = EndpointDescriptor::new(HttpMethod::Post, "/orders").with_body(json!({
            "type": "object",
            "required": ["item", "ownerId", "lines"],
            "properties": {
                "item": {"type": "string"},
                "note": {"type": "string"},
                "ownerId": {"type": "string"},
                "id": {"type": "string", "readOnly": true},
                "lines": {"type": "array", "items": {
                    "type": "object",
                    "required": ["qty"],
                    "properties": {"qty": {"type": "integer", "minimum": 1, "maximum": 10}}
                }}
            }
        }));
        let catalog = EndpointCatalog::new(vec![endpoint]);
        let synth = synth_for(&catalog);
        let a = synth.build(EndpointId(0), &catalog.endpoints[0]);
        let b = synth.build(EndpointId(0), &catalog.endpoints[0]);
        assert_eq!(a, b);
        assert_eq!(
            a.placeholder_keys().into_iter().collect::<Vec<_>>(),
            vec!["ownerId"]
        );
        let Some(BodyField::Object(fields)) = &a.body else {
            panic!("expected object body");
        };
        assert!(fields.contains_key("item"));
        assert!(!fields.contains_key("note"));
        assert!(!fields.contains_key("id"));
        assert_eq!(
            fields["lines"],
            BodyField::Array(vec![BodyField::Object(
                [("qty".to_string(), BodyField::value(json!(10)))]
                    .into_iter()
                    .collect()
            )])
        );
    }

    #[test]
    fn test_static_example_is_not_dependency() {
        let endpoint = EndpointDescriptor::new(HttpMethod::Get, "/users/{userId}").with_parameter(
            Parameter::new(
                "userId",
                ParamLocation::Path,
                json!({"type": "string", "example": "admin"}),
                true,
            ),
        );
        let catalog = EndpointCatalog::new(vec![endpoint]);
        let draft = synth_for(&catalog).build(EndpointId(0), &catalog.endpoints[0]);
        assert!(draft.placeholder_keys().is_empty());
        assert_eq!(draft.render_path().unwrap(), "/users/admin");
    }

    #[test]
    fn test_format_examples_validate() {
        for fmt in [
            "email", "date", "date-time", "uuid", "uri", "url", "ipv4", "byte", "int32", "int64",
        ] {
            let s = json!({"type": "string", "format": fmt});
            assert!(
                restfuzz_types::validate(&example_value(&s), &s, "q").is_ok(),
                "{fmt}"
            );
        }
    }
}
