use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use portcullis_router::{parse_template, RouteMatch, RouteSegment, Router};
use portcullis_spec_parser::{ApiSpec, ContentSchema, Operation, Parameter};
use portcullis_validator::{
    BodySchema, BodyValidator, CoercionOptions, JsonSchemaProvider, ParameterLocation,
    ParameterValidator, SchemaProvider, SchemaValidator, ValueShape,
};
use serde_json::Value;

use crate::descriptor::{OperationDescriptor, OperationParameters, ResponseSchemas};
use crate::error::CompileError;
use crate::query::QueryParser;

/// Charsets the default body codecs understand.
pub const DEFAULT_CHARSETS: &[&str] = &["utf-8", "iso-8859-1", "us-ascii"];

/// Compiler settings.
#[derive(Clone)]
pub struct CompileOptions {
    pub provider: Arc<dyn SchemaProvider>,
    pub coercion: CoercionOptions,
    /// Charsets bodies may be decoded from and encoded to.
    pub charsets: Vec<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            provider: Arc::new(JsonSchemaProvider),
            coercion: CoercionOptions::default(),
            charsets: DEFAULT_CHARSETS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl fmt::Debug for CompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileOptions")
            .field("coercion", &self.coercion)
            .field("charsets", &self.charsets)
            .finish_non_exhaustive()
    }
}

/// The immutable routing table: compiled operations plus their tries.
#[derive(Debug)]
pub struct RoutingTable {
    pub title: String,
    pub api_version: String,
    operations: Vec<Arc<OperationDescriptor>>,
    router: Router<Arc<OperationDescriptor>>,
}

impl RoutingTable {
    /// Route a request. `HEAD` falls back to `GET`.
    pub fn lookup(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(Arc<OperationDescriptor>, Vec<(String, String)>)> {
        match self.router.lookup(method, path) {
            RouteMatch::Found { entry, params } => Some((Arc::clone(entry), params)),
            RouteMatch::NotFound => None,
        }
    }

    pub fn operations(&self) -> &[Arc<OperationDescriptor>] {
        &self.operations
    }

    pub fn operation(&self, operation_id: &str) -> Option<&Arc<OperationDescriptor>> {
        self.operations.iter().find(|op| op.operation_id == operation_id)
    }
}

/// Compile a resolved contract.
pub fn compile(spec: &ApiSpec, options: &CompileOptions) -> Result<RoutingTable, CompileError> {
    let mut operations: Vec<Arc<OperationDescriptor>> = Vec::with_capacity(spec.operations.len());
    let mut router = Router::new(options.coercion);
    let mut seen_operation_ids: HashMap<String, String> = HashMap::new();

    for op in &spec.operations {
        let location = format!("{} {}", op.method, op.path);
        let operation_id = op.operation_id.clone().ok_or_else(|| CompileError::MissingOperationId {
            method: op.method.clone(),
            path: op.path.clone(),
        })?;

        if let Some(first) = seen_operation_ids.get(&operation_id) {
            return Err(CompileError::DuplicateOperationId {
                operation_id,
                first: first.clone(),
                duplicate: location,
            });
        }
        seen_operation_ids.insert(operation_id.clone(), location.clone());

        let descriptor = Arc::new(compile_operation(op, operation_id, &location, options)?);
        router.insert(&descriptor.method, &descriptor.segments, Arc::clone(&descriptor))?;
        tracing::debug!(
            operation_id = %descriptor.operation_id,
            method = %descriptor.method,
            path = %descriptor.path,
            "compiled operation"
        );
        operations.push(descriptor);
    }

    warn_divergent_head_routes(&operations);

    Ok(RoutingTable {
        title: spec.title.clone(),
        api_version: spec.api_version.clone(),
        operations,
        router,
    })
}

fn compile_operation(
    op: &Operation,
    operation_id: String,
    location: &str,
    options: &CompileOptions,
) -> Result<OperationDescriptor, CompileError> {
    let mut parameters = OperationParameters::default();
    let mut query_parser = QueryParser::new();

    for param in &op.parameters {
        let Some(validator) = compile_parameter(param, location, options)? else {
            continue;
        };
        match validator.location() {
            ParameterLocation::Query => {
                query_parser.declare(param.name.clone(), validator.shape().is_array());
                parameters.query.insert(param.name.clone(), validator);
            }
            ParameterLocation::Header => {
                parameters.header.insert(param.name.to_ascii_lowercase(), validator);
            }
            ParameterLocation::Path => {
                parameters.path.insert(param.name.clone(), validator);
            }
            ParameterLocation::Cookie => {}
        }
    }

    let segments = compile_segments(&op.path, &parameters.path, location)?;

    let (body, consumable_media_types) = match &op.request_body {
        None => (BodyValidator::none(), Vec::new()),
        Some(request_body) => {
            let schemas = compile_content(&request_body.content, location, "request body", options)?;
            let media_types = schemas.keys().cloned().collect();
            (BodyValidator::declared(request_body.required, schemas), media_types)
        }
    };

    let mut produceable_media_types: Vec<String> = Vec::new();
    let mut responses = BTreeMap::new();
    for (status, response) in &op.responses {
        let context = format!("response {}", status);
        let content = compile_content(&response.content, location, &context, options)?;
        for media_type in content.keys() {
            if !produceable_media_types.contains(media_type) {
                produceable_media_types.push(media_type.clone());
            }
        }
        responses.insert(status.clone(), content);
    }

    Ok(OperationDescriptor {
        path: op.path.clone(),
        method: op.method.to_ascii_uppercase(),
        operation_id,
        segments,
        parameters,
        body,
        consumable_media_types,
        produceable_media_types,
        consumable_charsets: options.charsets.clone(),
        produceable_charsets: options.charsets.clone(),
        query_parser,
        responses: ResponseSchemas::new(responses),
        extensions: op.extensions.clone(),
    })
}

/// Compile one parameter. Cookie parameters are checked but yield no validator.
fn compile_parameter(
    param: &Parameter,
    operation: &str,
    options: &CompileOptions,
) -> Result<Option<ParameterValidator>, CompileError> {
    let unsupported = |reason: String| CompileError::UnsupportedParameterDefinition {
        name: param.name.clone(),
        location: param.location.clone(),
        operation: operation.to_string(),
        reason,
    };

    let location = ParameterLocation::parse(&param.location)
        .ok_or_else(|| unsupported(format!("unknown location '{}'", param.location)))?;

    if param.has_content {
        return Err(unsupported("content-based parameters are not supported".into()));
    }
    match param.style.as_deref() {
        None | Some("simple") => {}
        Some("form") if location == ParameterLocation::Query => {}
        Some(style) => return Err(unsupported(format!("unsupported style '{}'", style))),
    }

    if location == ParameterLocation::Cookie {
        return Ok(None);
    }

    let shape = match ValueShape::from_schema(param.schema.as_ref()) {
        Ok(ValueShape::Array(_)) if location == ParameterLocation::Path => {
            return Err(CompileError::UnsupportedPathParameter {
                name: param.name.clone(),
                operation: operation.to_string(),
                reason: "path parameters must be primitives".into(),
            });
        }
        Ok(shape) => shape,
        Err(reason) if location == ParameterLocation::Path => {
            return Err(CompileError::UnsupportedPathParameter {
                name: param.name.clone(),
                operation: operation.to_string(),
                reason,
            });
        }
        Err(reason) => return Err(unsupported(reason)),
    };

    let schema = match &param.schema {
        Some(schema) => Some(compile_schema(
            schema,
            &format!("parameter '{}' ({}) in {}", param.name, param.location, operation),
            options,
        )?),
        None => None,
    };

    Ok(Some(ParameterValidator::new(
        param.name.clone(),
        location,
        param.required,
        shape,
        schema,
        options.coercion,
    )))
}

/// Turn the path template into route segments, tying every capture to its
/// declared path parameter.
fn compile_segments(
    template: &str,
    path_parameters: &BTreeMap<String, ParameterValidator>,
    operation: &str,
) -> Result<Vec<RouteSegment>, CompileError> {
    let segments = parse_template(template, |name| match path_parameters.get(name) {
        Some(validator) => match validator.shape() {
            ValueShape::Primitive(kind) => Ok(kind),
            ValueShape::Array(_) => Err(CompileError::UnsupportedPathParameter {
                name: name.to_string(),
                operation: operation.to_string(),
                reason: "path parameters must be primitives".into(),
            }),
        },
        None => Err(CompileError::UndeclaredPathParameter {
            name: name.to_string(),
            operation: operation.to_string(),
        }),
    })?;

    for segment in &segments {
        if let RouteSegment::Literal(literal) = segment {
            if literal.contains(['{', '}']) {
                return Err(CompileError::UnsupportedPathParameter {
                    name: literal.clone(),
                    operation: operation.to_string(),
                    reason: "captures must span a whole path segment".into(),
                });
            }
        }
    }

    for name in path_parameters.keys() {
        let used = segments
            .iter()
            .any(|s| matches!(s, RouteSegment::Capture { name: n, .. } if n == name));
        if !used {
            return Err(CompileError::UndeclaredPathParameter {
                name: name.clone(),
                operation: operation.to_string(),
            });
        }
    }

    Ok(segments)
}

fn compile_content(
    content: &BTreeMap<String, ContentSchema>,
    operation: &str,
    context: &str,
    options: &CompileOptions,
) -> Result<BTreeMap<String, BodySchema>, CompileError> {
    let mut schemas = BTreeMap::new();
    for (media_type, content_schema) in content {
        let bare = bare_media_type(media_type);
        let schema = match &content_schema.schema {
            Some(schema) if is_binary_schema(schema) => BodySchema::Binary,
            Some(schema) => BodySchema::Schema(compile_schema(
                schema,
                &format!("{} {} in {}", context, bare, operation),
                options,
            )?),
            None => BodySchema::Unconstrained,
        };
        schemas.insert(bare, schema);
    }
    Ok(schemas)
}

fn compile_schema(
    schema: &Value,
    context: &str,
    options: &CompileOptions,
) -> Result<Arc<dyn SchemaValidator>, CompileError> {
    options.provider.compile(schema).map_err(|e| CompileError::BadSchema {
        context: context.to_string(),
        reason: e.0,
    })
}

/// `type: string, format: binary` bodies are opaque bytes.
fn is_binary_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("string")
        && schema.get("format").and_then(Value::as_str) == Some("binary")
}

fn bare_media_type(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or(media_type)
        .trim()
        .to_ascii_lowercase()
}

/// HEAD requests fall back to GET routes and are then validated against the
/// GET operation's parameter types. A HEAD operation whose template only
/// differs from a GET one by capture types is most likely a contract mistake.
fn warn_divergent_head_routes(operations: &[Arc<OperationDescriptor>]) {
    let structure = |segments: &[RouteSegment]| -> Vec<Option<String>> {
        segments
            .iter()
            .map(|s| match s {
                RouteSegment::Literal(l) => Some(l.clone()),
                RouteSegment::Capture { .. } => None,
            })
            .collect()
    };

    for head in operations.iter().filter(|op| op.method == "HEAD") {
        let head_structure = structure(&head.segments);
        for get in operations.iter().filter(|op| op.method == "GET") {
            if structure(&get.segments) == head_structure && get.segments != head.segments {
                tracing::warn!(
                    head_operation = %head.operation_id,
                    get_operation = %get.operation_id,
                    path = %head.path,
                    "HEAD and GET routes declare divergent path parameter types"
                );
            }
        }
    }
}
