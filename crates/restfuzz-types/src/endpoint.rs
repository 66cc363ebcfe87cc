//! Endpoint catalog: the typed, read-only view of a parsed API contract.
//!
//! The catalog is produced by an external contract-parsing step and loaded here
//! from JSON. It is immutable for the whole run; endpoints are addressed by their
//! stable [`EndpointId`] (position in the catalog).

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::JSON_CONTENT_TYPE;
use crate::schema;

/// HTTP method of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a parameter travels in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Body,
}

/// A declared operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(alias = "in")]
    pub location: ParamLocation,
    #[serde(default = "empty_schema")]
    pub schema: Value,
    #[serde(default)]
    pub required: bool,
}

impl Parameter {
    pub fn new(name: &str, location: ParamLocation, schema: Value, required: bool) -> Self {
        Self {
            name: name.to_string(),
            location,
            schema,
            required,
        }
    }

    /// Path parameters are always required, whatever the contract says.
    pub fn is_required(&self) -> bool {
        self.required || self.location == ParamLocation::Path
    }

    /// Whether the schema carries a static example or default value.
    pub fn has_static_value(&self) -> bool {
        schema::static_value(&self.schema).is_some()
    }
}

fn empty_schema() -> Value {
    Value::Object(Default::default())
}

/// Stable address of an endpoint inside its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(pub usize);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One operation of the API contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub method: HttpMethod,
    /// Template path, e.g. `/users/{userId}`.
    pub path: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, alias = "requestBodySchema")]
    pub request_body_schema: Option<Value>,
    /// Media types the contract accepts for the body; JSON when empty.
    #[serde(default, alias = "requestContentTypes")]
    pub request_content_types: Vec<String>,
    #[serde(default, alias = "responseSchema")]
    pub response_schema: Option<Value>,
    /// Status codes the contract declares for this operation.
    #[serde(default, alias = "declaredStatuses")]
    pub declared_statuses: Vec<u16>,
}

impl EndpointDescriptor {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            parameters: Vec::new(),
            request_body_schema: None,
            request_content_types: Vec::new(),
            response_schema: None,
            declared_statuses: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_body(mut self, schema: Value) -> Self {
        self.request_body_schema = Some(schema);
        self
    }

    pub fn with_content_types(mut self, content_types: &[&str]) -> Self {
        self.request_content_types = content_types.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Body media types as `(method, path, type)` triples, lowercased.
    pub fn input_content_types(&self) -> Vec<(HttpMethod, String, String)> {
        if self.request_body_schema.is_none() {
            return Vec::new();
        }
        if self.request_content_types.is_empty() {
            return vec![(self.method, self.path.clone(), JSON_CONTENT_TYPE.to_string())];
        }
        self.request_content_types
            .iter()
            .map(|c| (self.method, self.path.clone(), c.trim().to_ascii_lowercase()))
            .collect()
    }

    pub fn with_response(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_statuses(mut self, statuses: &[u16]) -> Self {
        self.declared_statuses = statuses.to_vec();
        self
    }

    pub fn parameters_in(&self, location: ParamLocation) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }

    /// `GET /users/{userId}` style label for logs and reports.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// First non-empty path segment, used as the resource root.
    pub fn resource_root(&self) -> Option<&str> {
        self.path.split('/').find(|s| !s.is_empty())
    }
}

/// The static API surface used for cumulative coverage reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSurface {
    pub paths: BTreeSet<String>,
    pub operations: BTreeSet<(HttpMethod, String)>,
    pub parameters: BTreeSet<String>,
    pub statuses: BTreeSet<u16>,
    /// Top-level response properties declared by response schemas.
    pub response_fields: BTreeSet<String>,
    /// `(method, template, media type)` of every operation taking a body.
    pub input_content_types: BTreeSet<(HttpMethod, String, String)>,
}

/// Read-only list of endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointCatalog {
    pub endpoints: Vec<EndpointDescriptor>,
}

impl EndpointCatalog {
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self { endpoints }
    }

    /// Load an already-parsed catalog from a JSON file.
    ///
    /// Accepts either `{"endpoints": [...]}` or a bare array of descriptors.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read catalog {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parse catalog {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let catalog = if value.is_array() {
            Self::new(serde_json::from_value(value)?)
        } else {
            serde_json::from_value(value)?
        };
        if catalog.endpoints.is_empty() {
            return Err(anyhow!("catalog contains no endpoints"));
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, id: EndpointId) -> Option<&EndpointDescriptor> {
        self.endpoints.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EndpointId, &EndpointDescriptor)> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(i, ep)| (EndpointId(i), ep))
    }

    /// Every parameter name declared as a path parameter anywhere in the catalog.
    pub fn path_parameter_names(&self) -> BTreeSet<String> {
        self.endpoints
            .iter()
            .flat_map(|ep| ep.parameters_in(ParamLocation::Path))
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn surface(&self) -> ApiSurface {
        let mut surface = ApiSurface::default();
        for ep in &self.endpoints {
            surface.paths.insert(ep.path.clone());
            surface.operations.insert((ep.method, ep.path.clone()));
            for p in &ep.parameters {
                surface.parameters.insert(p.name.clone());
            }
            if let Some(props) = ep
                .request_body_schema
                .as_ref()
                .and_then(schema::properties)
            {
                surface.parameters.extend(props.keys().cloned());
            }
            surface.input_content_types.extend(ep.input_content_types());
            surface.statuses.extend(ep.declared_statuses.iter().copied());
            if let Some(response) = &ep.response_schema {
                let object = schema::items(response).unwrap_or(response);
                if let Some(props) = schema::properties(object) {
                    surface.response_fields.extend(props.keys().cloned());
                }
            }
        }
        surface
    }
}

/// Segment-wise template match: `/owners/{ownerId}` matches `/owners/5`.
pub fn match_template(template: &str, concrete: &str) -> bool {
    let concrete = concrete.split('?').next().unwrap_or(concrete);
    let t: Vec<&str> = template.trim_matches('/').split('/').collect();
    let c: Vec<&str> = concrete.trim_matches('/').split('/').collect();
    if t.len() != c.len() {
        return false;
    }
    t.iter()
        .zip(c.iter())
        .all(|(tp, cp)| (tp.starts_with('{') && tp.ends_with('}')) || tp == cp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users_catalog() -> EndpointCatalog {
        EndpointCatalog::new(vec![
            EndpointDescriptor::new(HttpMethod::Post, "/users")
                .with_body(json!({
                    "type": "object",
                    "required": ["name"],
                    "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}
                }))
                .with_response(json!({
                    "type": "object",
                    "properties": {"userId": {"type": "string"}, "name": {"type": "string"}}
                }))
                .with_statuses(&[201, 400]),
            EndpointDescriptor::new(HttpMethod::Get, "/users/{userId}")
                .with_parameter(Parameter::new(
                    "userId",
                    ParamLocation::Path,
                    json!({"type": "string"}),
                    true,
                ))
                .with_statuses(&[200, 404]),
        ])
    }

    #[test]
    fn test_match_template() {
        assert!(match_template("/owners/{ownerId}", "/owners/5"));
        assert!(match_template("/owners/{ownerId}", "/owners/5?x=1"));
        assert!(!match_template("/owners/{ownerId}", "/owners/5/pets"));
        assert!(!match_template("/owners", "/pets"));
    }

    #[test]
    fn test_path_parameter_names() {
        let names = users_catalog().path_parameter_names();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["userId"]);
    }

    #[test]
    fn test_surface_includes_body_properties_and_statuses() {
        let surface = users_catalog().surface();
        assert!(surface.parameters.contains("name"));
        assert!(surface.parameters.contains("userId"));
        assert_eq!(surface.statuses.len(), 4);
        assert!(surface.response_fields.contains("userId"));
        assert!(surface
            .operations
            .contains(&(HttpMethod::Get, "/users/{userId}".to_string())));
        assert_eq!(
            surface.input_content_types.into_iter().collect::<Vec<_>>(),
            vec![(HttpMethod::Post, "/users".to_string(), JSON_CONTENT_TYPE.to_string())]
        );
    }

    #[test]
    fn test_declared_content_types_replace_json_default() {
        let ep = EndpointDescriptor::new(HttpMethod::Put, "/files")
            .with_body(json!({"type": "object"}))
            .with_content_types(&["Application/JSON", "multipart/form-data"]);
        let types: Vec<String> = ep.input_content_types().into_iter().map(|t| t.2).collect();
        assert_eq!(types, vec!["application/json", "multipart/form-data"]);
        assert!(EndpointDescriptor::new(HttpMethod::Get, "/files")
            .input_content_types()
            .is_empty());
    }

    #[test]
    fn test_catalog_json_accepts_bare_array_and_aliases() {
        let raw = r#"[{
            "method": "GET",
            "path": "/users/{userId}",
            "parameters": [{"name": "userId", "in": "path", "schema": {"type": "string"}}],
            "declaredStatuses": [200]
        }]"#;
        let catalog = EndpointCatalog::from_json_str(raw).unwrap();
        let ep = catalog.get(EndpointId(0)).unwrap();
        assert_eq!(ep.parameters[0].location, ParamLocation::Path);
        assert!(ep.parameters[0].is_required());
        assert_eq!(ep.declared_statuses, vec![200]);
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(EndpointCatalog::from_json_str(r#"{"endpoints": []}"#).is_err());
    }

    #[test]
    fn test_resource_root() {
        let ep = EndpointDescriptor::new(HttpMethod::Get, "/users/{userId}");
        assert_eq!(ep.resource_root(), Some("users"));
        assert_eq!(ep.label(), "GET /users/{userId}");
    }
}
