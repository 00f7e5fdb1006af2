use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A resolved API contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSpec {
    /// Source filename, when loaded from disk.
    pub filename: Option<String>,
    /// The `openapi` version string (e.g. "3.1.0").
    pub version: String,
    /// The `info.title` field.
    pub title: String,
    /// The `info.version` field.
    pub api_version: String,
    /// Flattened operations, in document order.
    pub operations: Vec<Operation>,
    /// Declared security schemes, by name.
    pub security_schemes: BTreeMap<String, SecurityScheme>,
    /// Root-level `x-portcullis-*` extensions.
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// A single API operation (path + method) with everything resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// The path template (e.g. "/users/{id}").
    pub path: String,
    /// The HTTP method (uppercase).
    pub method: String,
    /// The `operationId`, if present.
    pub operation_id: Option<String>,
    /// Path-level, operation-level and security-derived parameters.
    pub parameters: Vec<Parameter>,
    /// Request body, if declared.
    pub request_body: Option<RequestBody>,
    /// Declared responses keyed by status (`"200"`, `"2XX"`, `"default"`).
    pub responses: BTreeMap<String, ResponseObject>,
    /// Names of the security schemes the operation accepts.
    pub security: Vec<String>,
    /// Operation-level `x-portcullis-*` extensions.
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// Where a parameter declaration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    /// Declared in the path item or the operation.
    Declared,
    /// Injected from an `apiKey` security scheme.
    ApiKey,
    /// Injected from an `http`, `oauth2` or `openIdConnect` scheme.
    Credentials,
}

/// An OpenAPI parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Raw `in` value; the compiler decides which locations it supports.
    pub location: String,
    pub required: bool,
    /// Schema with `$ref`s inlined.
    pub schema: Option<serde_json::Value>,
    /// Explicit `style`, if any.
    pub style: Option<String>,
    /// Whether the declaration carries a `content` map instead of a schema.
    pub has_content: bool,
    pub source: ParameterSource,
}

/// Request body definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBody {
    pub required: bool,
    /// Media type -> schema.
    pub content: BTreeMap<String, ContentSchema>,
}

/// Schema for one media type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSchema {
    pub schema: Option<serde_json::Value>,
}

/// One declared response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseObject {
    /// Media type -> schema. Empty for bodyless responses.
    pub content: BTreeMap<String, ContentSchema>,
}

/// A security scheme from `components.securitySchemes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecurityScheme {
    ApiKey { name: String, location: String },
    Http { scheme: String },
    #[serde(rename = "oauth2")]
    OAuth2,
    OpenIdConnect,
    /// Transport-level; injects no parameter.
    #[serde(rename = "mutualTLS")]
    MutualTls,
}
