//! Shared types for the restfuzz workspace.
//!
//! This crate provides the foundational types used across the transport, the
//! engine and the CLI, breaking circular dependency chains.
//!
//! ## Modules
//!
//! - [`endpoint`]: the read-only endpoint catalog ([`EndpointDescriptor`], [`EndpointCatalog`])
//! - [`schema`]: accessors and a small validator over JSON-schema values
//! - [`request`]: draft/resolved [`Request`]s with placeholder slots, and [`Response`]s
//! - [`env_utils`]: environment variable parsing helpers

pub mod endpoint;
pub mod env_utils;
pub mod request;
pub mod schema;

// Re-export commonly used types at crate root
pub use endpoint::{
    match_template, ApiSurface, EndpointCatalog, EndpointDescriptor, EndpointId, HttpMethod,
    ParamLocation, Parameter,
};
pub use env_utils::{env_bool, env_bool_or, env_list, env_var, env_var_or};
pub use request::{
    render_scalar, BodyField, FieldRef, PathSeg, Request, Response, Slot, JSON_CONTENT_TYPE,
};
pub use schema::{schema_type, static_value, validate, SchemaType, SchemaViolation};
