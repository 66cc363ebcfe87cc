//! Candidate value domains for mutable request fields.

use restfuzz_types::schema::{self, SchemaType};
use restfuzz_types::{
    BodyField, EndpointDescriptor, FieldRef, ParamLocation, PathSeg, Request, Slot,
};
use serde_json::{json, Value};

use crate::synth::{example_value, fit_length, RequestSynthesizer};

/// Per-field cap so covering arrays stay small.
pub const MAX_DOMAIN: usize = 6;
/// Cap on mutable fields per endpoint; extra fields keep their draft value.
pub const MAX_FIELDS: usize = 16;

/// One choice for a field. `None` removes the field.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub value: Option<Value>,
    /// Deliberately outside the declared schema.
    pub out_of_schema: bool,
}

impl Candidate {
    fn valid(value: Value) -> Self {
        Self {
            value: Some(value),
            out_of_schema: false,
        }
    }

    fn absent() -> Self {
        Self {
            value: None,
            out_of_schema: false,
        }
    }

    fn invalid(value: Value) -> Self {
        Self {
            value: Some(value),
            out_of_schema: true,
        }
    }
}

/// A mutable field and its candidates. The first candidate is the draft's own value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDomain {
    pub field: FieldRef,
    pub candidates: Vec<Candidate>,
}

/// Enumerate the mutable fields of `draft`.
///
/// Placeholders are dependencies and never mutated. Optional fields the
/// synthesizer would treat as dependencies are never toggled on, since their
/// only value would be an invented identifier. Only fields with more than one
/// candidate are returned.
pub fn collect_fields(
    draft: &Request,
    endpoint: &EndpointDescriptor,
    synth: &RequestSynthesizer,
    allow_schema_violations: bool,
) -> Vec<FieldDomain> {
    let mut out = Vec::new();

    for param in &endpoint.parameters {
        let (field, slot) = match param.location {
            ParamLocation::Path => (
                FieldRef::Path(param.name.clone()),
                draft.path_params.get(&param.name),
            ),
            ParamLocation::Query => (
                FieldRef::Query(param.name.clone()),
                draft.query.get(&param.name),
            ),
            ParamLocation::Header => (
                FieldRef::Header(param.name.clone()),
                draft.headers.get(&param.name),
            ),
            ParamLocation::Body => continue,
        };
        match slot {
            Some(Slot::Concrete(current)) => {
                let mut domain =
                    scalar_domain(field, current, &param.schema, allow_schema_violations);
                if param.location == ParamLocation::Path {
                    // an empty segment changes the route
                    domain
                        .candidates
                        .retain(|c| c.value.as_ref() != Some(&Value::String(String::new())));
                }
                out.push(domain);
            }
            Some(Slot::Placeholder(_)) => {}
            None if !param.is_required()
                && param.location == ParamLocation::Query
                && !synth.is_dependency(param) =>
            {
                out.push(FieldDomain {
                    field,
                    candidates: vec![
                        Candidate::absent(),
                        Candidate::valid(example_value(&param.schema)),
                    ],
                });
            }
            None => {}
        }
    }

    if let (Some(body), Some(body_schema)) = (&draft.body, &endpoint.request_body_schema) {
        walk_body(
            body,
            body_schema,
            &mut Vec::new(),
            synth,
            allow_schema_violations,
            &mut out,
        );
    }

    out.retain(|d| d.candidates.len() > 1);
    out.truncate(MAX_FIELDS);
    out
}

fn walk_body(
    field: &BodyField,
    field_schema: &Value,
    path: &mut Vec<PathSeg>,
    synth: &RequestSynthesizer,
    allow_schema_violations: bool,
    out: &mut Vec<FieldDomain>,
) {
    match field {
        BodyField::Leaf(Slot::Concrete(current)) => out.push(scalar_domain(
            FieldRef::Body(path.clone()),
            current,
            field_schema,
            allow_schema_violations,
        )),
        BodyField::Leaf(Slot::Placeholder(_)) => {}
        BodyField::Object(fields) => {
            let Some(props) = schema::properties(field_schema) else {
                return;
            };
            for (name, prop) in props {
                path.push(PathSeg::Key(name.clone()));
                match fields.get(name) {
                    Some(child) => {
                        walk_body(child, prop, path, synth, allow_schema_violations, out)
                    }
                    None if !schema::is_read_only(prop)
                        && !synth.is_dependency_field(name, prop) =>
                    {
                        out.push(FieldDomain {
                            field: FieldRef::Body(path.clone()),
                            candidates: vec![
                                Candidate::absent(),
                                Candidate::valid(example_value(prop)),
                            ],
                        })
                    }
                    None => {}
                }
                path.pop();
            }
        }
        BodyField::Array(items) => {
            if let (Some(first), Some(item_schema)) = (items.first(), schema::items(field_schema)) {
                path.push(PathSeg::Index(0));
                walk_body(first, item_schema, path, synth, allow_schema_violations, out);
                path.pop();
            }
        }
    }
}

fn scalar_domain(
    field: FieldRef,
    current: &Value,
    field_schema: &Value,
    allow_schema_violations: bool,
) -> FieldDomain {
    let mut candidates = vec![Candidate::valid(current.clone())];
    for v in in_schema_values(field_schema) {
        if candidates.len() >= MAX_DOMAIN {
            break;
        }
        if !candidates.iter().any(|c| c.value.as_ref() == Some(&v)) {
            candidates.push(Candidate::valid(v));
        }
    }
    if allow_schema_violations {
        candidates.extend(out_of_schema_values(field_schema).into_iter().map(Candidate::invalid));
    }
    FieldDomain { field, candidates }
}

/// Boundary and alternative values that still satisfy `field_schema`.
pub fn in_schema_values(field_schema: &Value) -> Vec<Value> {
    if let Some(members) = schema::enum_values(field_schema) {
        return members.clone();
    }
    let raw: Vec<Value> = match schema::schema_type(field_schema) {
        SchemaType::Boolean => vec![json!(true), json!(false)],
        SchemaType::Integer => {
            let min = schema::minimum(field_schema).map(|m| m.ceil() as i64);
            let max = schema::maximum(field_schema).map(|m| m.floor() as i64);
            let mut values = Vec::new();
            if let Some(min) = min {
                values.extend([min, min.saturating_add(1)]);
            }
            if let Some(max) = max {
                values.extend([max, max.saturating_sub(1)]);
            }
            values.extend([0, -1, 1, i64::from(i32::MAX), i64::from(i32::MIN)]);
            values.into_iter().map(|v| json!(v)).collect()
        }
        SchemaType::Number => {
            let mut values = Vec::new();
            values.extend(schema::minimum(field_schema));
            values.extend(schema::maximum(field_schema));
            values.extend([0.0, -1.5, 0.001, 1e9]);
            values.into_iter().map(|v| json!(v)).collect()
        }
        SchemaType::String if schema::pattern(field_schema).is_some() => Vec::new(),
        SchemaType::String if schema::format(field_schema).is_some() => {
            format_values(schema::format(field_schema).unwrap_or_default())
                .into_iter()
                .map(|v| json!(fit_length(v, field_schema)))
                .collect()
        }
        SchemaType::String => {
            let min = schema::min_length(field_schema).unwrap_or(0) as usize;
            let max = schema::max_length(field_schema).map(|m| m as usize).unwrap_or(256).min(256);
            vec![
                json!("a".repeat(min.max(1))),
                json!("z".repeat(max)),
                json!(fit_length("ünïcødé ✓", field_schema)),
                json!(fit_length("' OR '1'='1", field_schema)),
                json!(""),
            ]
        }
        _ => Vec::new(),
    };
    raw.into_iter()
        .filter(|v| schema::validate(v, field_schema, "candidate").is_ok())
        .collect()
}

/// Alternative values for well-known string formats; empty for unknown ones.
fn format_values(format: &str) -> Vec<&'static str> {
    match format {
        "date" => vec!["1970-01-01", "2000-02-29", "9999-12-31"],
        "date-time" => vec![
            "1970-01-01T00:00:00Z",
            "2038-01-19T03:14:07Z",
            "2024-06-30T23:59:59+14:00",
        ],
        "uuid" => vec![
            "00000000-0000-0000-0000-000000000000",
            "ffffffff-ffff-ffff-ffff-ffffffffffff",
        ],
        "email" => vec!["a@b.co", "first.last+tag@example.org"],
        "uri" | "url" => vec!["http://localhost/", "https://example.com/a?b=c"],
        "ipv4" => vec!["0.0.0.0", "255.255.255.255", "127.0.0.1"],
        "int32" | "int64" => vec!["0", "-1", "2147483647"],
        _ => Vec::new(),
    }
}

/// Wrong-type values, only used when schema violations are allowed.
pub fn out_of_schema_values(field_schema: &Value) -> Vec<Value> {
    match schema::schema_type(field_schema) {
        SchemaType::String => vec![json!(12345), Value::Null],
        SchemaType::Integer => vec![json!("not-a-number"), json!(1.5)],
        SchemaType::Number => vec![json!("NaN"), Value::Null],
        SchemaType::Boolean => vec![json!("true"), json!(0)],
        _ if schema::enum_values(field_schema).is_some() => vec![json!("__invalid_enum__")],
        _ => vec![Value::Null],
    }
}
