use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::error::ParseError;
use crate::model::{
    ApiSpec, ContentSchema, Operation, Parameter, ParameterSource, RequestBody, ResponseObject,
    SecurityScheme,
};
use crate::security::{inject_security_parameters, parse_security_schemes, requirement_names};

/// Prefix of the vendor extensions kept on [`ApiSpec`] and [`Operation`].
pub const EXTENSION_PREFIX: &str = "x-portcullis-";

/// HTTP methods recognized in OpenAPI path items.
const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Resolve a JSON Reference like `#/components/schemas/User` from the document root.
///
/// Only local references (`#/...`) are supported. Returns `None` for external refs.
fn resolve_ref<'a>(root: &'a Value, ref_path: &str) -> Option<&'a Value> {
    let pointer = ref_path.strip_prefix("#/")?;
    let mut current = root;
    for segment in pointer.split('/') {
        let unescaped = segment.replace("~1", "/").replace("~0", "~");
        current = current.get(&unescaped)?;
    }
    Some(current)
}

/// Recursively inline every `$ref` in a JSON value.
///
/// `visited` tracks the current resolution chain to detect circular references.
fn resolve_schema_refs(
    value: &Value,
    root: &Value,
    visited: &mut HashSet<String>,
) -> Result<Value, ParseError> {
    match value {
        Value::Object(obj) => {
            if let Some(ref_str) = obj.get("$ref").and_then(|v| v.as_str()) {
                if !visited.insert(ref_str.to_string()) {
                    return Err(ParseError::CircularRef(ref_str.to_string()));
                }
                let target = resolve_ref(root, ref_str)
                    .ok_or_else(|| ParseError::UnresolvedRef(ref_str.to_string()))?;
                let resolved = resolve_schema_refs(target, root, visited)?;
                visited.remove(ref_str);
                Ok(resolved)
            } else {
                let mut new_obj = serde_json::Map::with_capacity(obj.len());
                for (key, val) in obj {
                    new_obj.insert(key.clone(), resolve_schema_refs(val, root, visited)?);
                }
                Ok(Value::Object(new_obj))
            }
        }
        Value::Array(arr) => {
            let items: Result<Vec<_>, _> = arr
                .iter()
                .map(|v| resolve_schema_refs(v, root, visited))
                .collect();
            Ok(Value::Array(items?))
        }
        other => Ok(other.clone()),
    }
}

fn resolve(value: &Value, root: &Value) -> Result<Value, ParseError> {
    resolve_schema_refs(value, root, &mut HashSet::new())
}

/// Parse an OpenAPI contract from a YAML/JSON string.
pub fn parse_spec(input: &str) -> Result<ApiSpec, ParseError> {
    // JSON is valid YAML, so one parser covers both.
    let root: Value = serde_yaml::from_str(input).map_err(|e| ParseError::Syntax(e.to_string()))?;

    let root_obj = root
        .as_object()
        .ok_or_else(|| ParseError::Syntax("contract root must be an object".into()))?;

    let version = detect_version(root_obj)?;

    let info = root_obj
        .get("info")
        .and_then(|v| v.as_object())
        .ok_or_else(|| ParseError::Structure("missing 'info' object".into()))?;

    let title = info
        .get("title")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ParseError::Structure("missing 'info.title'".into()))?
        .to_string();

    let api_version = info
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or("0.0.0")
        .to_string();

    let security_schemes = parse_security_schemes(root_obj)?;
    let root_security = requirement_names(root_obj.get("security")).unwrap_or_default();

    let operations = parse_paths(root_obj, &root, &security_schemes, &root_security)?;

    Ok(ApiSpec {
        filename: None,
        version,
        title,
        api_version,
        operations,
        security_schemes,
        extensions: extract_extensions(root_obj),
    })
}

/// Parse a contract from a file path.
pub fn parse_spec_file(path: &std::path::Path) -> Result<ApiSpec, ParseError> {
    let content = std::fs::read_to_string(path)?;
    let mut spec = parse_spec(&content)?;
    spec.filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string());
    Ok(spec)
}

fn detect_version(root: &serde_json::Map<String, Value>) -> Result<String, ParseError> {
    let version = root
        .get("openapi")
        .and_then(|v| v.as_str())
        .ok_or(ParseError::UnknownFormat)?;
    if !version.starts_with("3.") {
        return Err(ParseError::Structure(format!(
            "unsupported OpenAPI version: {} (only 3.x supported)",
            version
        )));
    }
    Ok(version.to_string())
}

fn extract_extensions(obj: &serde_json::Map<String, Value>) -> BTreeMap<String, Value> {
    obj.iter()
        .filter(|(k, _)| k.starts_with(EXTENSION_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn parse_paths(
    root: &serde_json::Map<String, Value>,
    spec_root: &Value,
    schemes: &BTreeMap<String, SecurityScheme>,
    root_security: &[String],
) -> Result<Vec<Operation>, ParseError> {
    let mut operations = Vec::new();

    let Some(paths) = root.get("paths").and_then(|v| v.as_object()) else {
        return Ok(operations);
    };

    for (path, path_item) in paths {
        let path_item = resolve(path_item, spec_root)?;
        let path_obj = path_item.as_object().ok_or_else(|| {
            ParseError::Structure(format!("path item for '{}' must be an object", path))
        })?;

        // Inherited by every operation under this path.
        let path_params = parse_parameters(path_obj, spec_root, path)?;

        for method in HTTP_METHODS {
            let Some(op_value) = path_obj.get(*method) else {
                continue;
            };
            let method = method.to_uppercase();
            let context = format!("{} {}", method, path);
            let op_obj = op_value.as_object().ok_or_else(|| {
                ParseError::Structure(format!("operation {} must be an object", context))
            })?;

            let mut params = path_params.clone();
            for param in parse_parameters(op_obj, spec_root, &context)? {
                merge_parameter(&mut params, param);
            }

            let security =
                requirement_names(op_obj.get("security")).unwrap_or_else(|| root_security.to_vec());
            inject_security_parameters(&mut params, &security, schemes, &context)?;

            operations.push(Operation {
                path: path.clone(),
                method,
                operation_id: op_obj
                    .get("operationId")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                parameters: params,
                request_body: parse_request_body(op_obj, spec_root)?,
                responses: parse_responses(op_obj, spec_root)?,
                security,
                extensions: extract_extensions(op_obj),
            });
        }
    }

    Ok(operations)
}

/// Insert `param`, replacing an inherited one with the same `(in, name)`.
fn merge_parameter(params: &mut Vec<Parameter>, param: Parameter) {
    match params
        .iter_mut()
        .find(|p| p.location == param.location && p.name == param.name)
    {
        Some(existing) => *existing = param,
        None => params.push(param),
    }
}

/// Parse the `parameters` array of a path item or operation object.
fn parse_parameters(
    obj: &serde_json::Map<String, Value>,
    spec_root: &Value,
    context: &str,
) -> Result<Vec<Parameter>, ParseError> {
    let Some(arr) = obj.get("parameters").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };

    let mut params = Vec::with_capacity(arr.len());
    for item in arr {
        let item = resolve(item, spec_root)?;
        let param_obj = item.as_object().ok_or_else(|| {
            ParseError::Structure(format!("parameter in {} must be an object", context))
        })?;

        let name = param_obj
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ParseError::BadParameterName(context.to_string()))?;

        let location = param_obj
            .get("in")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ParseError::Structure(format!(
                    "parameter '{}' in {} is missing 'in'",
                    name, context
                ))
            })?;

        params.push(Parameter {
            name: name.to_string(),
            location: location.to_string(),
            required: param_obj
                .get("required")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            schema: param_obj.get("schema").cloned(),
            style: param_obj
                .get("style")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            has_content: param_obj.contains_key("content"),
            source: ParameterSource::Declared,
        });
    }
    Ok(params)
}

fn parse_content(
    obj: &serde_json::Map<String, Value>,
) -> BTreeMap<String, ContentSchema> {
    let mut content = BTreeMap::new();
    if let Some(content_obj) = obj.get("content").and_then(|v| v.as_object()) {
        for (media_type, media_obj) in content_obj {
            let schema = media_obj.as_object().and_then(|o| o.get("schema").cloned());
            content.insert(media_type.to_lowercase(), ContentSchema { schema });
        }
    }
    content
}

fn parse_request_body(
    obj: &serde_json::Map<String, Value>,
    spec_root: &Value,
) -> Result<Option<RequestBody>, ParseError> {
    let Some(body) = obj.get("requestBody") else {
        return Ok(None);
    };
    let body = resolve(body, spec_root)?;
    let Some(body) = body.as_object() else {
        return Err(ParseError::Structure("requestBody must be an object".into()));
    };

    let required = body
        .get("required")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(Some(RequestBody {
        required,
        content: parse_content(body),
    }))
}

fn parse_responses(
    obj: &serde_json::Map<String, Value>,
    spec_root: &Value,
) -> Result<BTreeMap<String, ResponseObject>, ParseError> {
    let mut responses = BTreeMap::new();
    let Some(declared) = obj.get("responses").and_then(|v| v.as_object()) else {
        return Ok(responses);
    };

    for (status, response) in declared {
        let response = resolve(response, spec_root)?;
        let content = response
            .as_object()
            .map(parse_content)
            .unwrap_or_default();
        responses.insert(status.to_uppercase(), ResponseObject { content });
    }
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_openapi() {
        let yaml = r#"
openapi: "3.1.0"
info:
  title: Test API
  version: "1.0.0"
paths:
  /health:
    get:
      operationId: getHealth
      responses:
        "200":
          description: ok
"#;
        let spec = parse_spec(yaml).unwrap();
        assert_eq!(spec.version, "3.1.0");
        assert_eq!(spec.title, "Test API");
        assert_eq!(spec.api_version, "1.0.0");
        assert_eq!(spec.operations.len(), 1);

        let op = &spec.operations[0];
        assert_eq!(op.path, "/health");
        assert_eq!(op.method, "GET");
        assert_eq!(op.operation_id, Some("getHealth".to_string()));
        assert!(op.responses.contains_key("200"));
        assert!(op.responses["200"].content.is_empty());
    }

    #[test]
    fn reject_swagger_2() {
        let yaml = r#"
swagger: "2.0"
info:
  title: Old API
  version: "1.0.0"
paths: {}
"#;
        assert!(matches!(parse_spec(yaml), Err(ParseError::UnknownFormat)));
    }

    #[test]
    fn operation_parameters_override_path_parameters() {
        let yaml = r#"
openapi: "3.0.3"
info:
  title: Test API
  version: "1.0.0"
paths:
  /users/{id}:
    parameters:
      - name: id
        in: path
        required: true
        schema:
          type: string
      - name: verbose
        in: query
        schema:
          type: boolean
    get:
      operationId: getUser
      parameters:
        - name: id
          in: path
          required: true
          schema:
            type: number
    delete:
      operationId: deleteUser
"#;
        let spec = parse_spec(yaml).unwrap();
        let get = spec.operations.iter().find(|o| o.method == "GET").unwrap();
        assert_eq!(get.parameters.len(), 2);
        assert_eq!(get.parameters[0].name, "id");
        assert_eq!(get.parameters[0].schema.as_ref().unwrap()["type"], "number");

        let delete = spec.operations.iter().find(|o| o.method == "DELETE").unwrap();
        assert_eq!(delete.parameters[0].schema.as_ref().unwrap()["type"], "string");
    }

    #[test]
    fn resolve_ref_in_parameters_and_bodies() {
        let yaml = r##"
openapi: "3.1.0"
info:
  title: Test API
  version: "1.0.0"
components:
  parameters:
    Limit:
      name: limit
      in: query
      schema:
        $ref: "#/components/schemas/Count"
  schemas:
    Count:
      type: integer
      minimum: 0
    User:
      type: object
      properties:
        name:
          type: string
  requestBodies:
    UserBody:
      required: true
      content:
        application/json:
          schema:
            $ref: "#/components/schemas/User"
paths:
  /users:
    post:
      operationId: createUser
      parameters:
        - $ref: "#/components/parameters/Limit"
      requestBody:
        $ref: "#/components/requestBodies/UserBody"
      responses:
        "201":
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/User"
"##;
        let spec = parse_spec(yaml).unwrap();
        let op = &spec.operations[0];

        let limit = &op.parameters[0];
        assert_eq!(limit.name, "limit");
        assert_eq!(limit.schema.as_ref().unwrap()["minimum"], 0);

        let body = op.request_body.as_ref().unwrap();
        assert!(body.required);
        let schema = body.content["application/json"].schema.as_ref().unwrap();
        assert_eq!(schema["properties"]["name"]["type"], "string");

        let response = &op.responses["201"].content["application/json"];
        assert_eq!(response.schema.as_ref().unwrap()["type"], "object");
    }

    #[test]
    fn unresolved_ref_returns_error() {
        let yaml = r##"
openapi: "3.1.0"
info:
  title: Test API
  version: "1.0.0"
paths:
  /users:
    get:
      parameters:
        - $ref: "#/components/parameters/Missing"
"##;
        let err = parse_spec(yaml).unwrap_err();
        assert_eq!(err.code(), "E_UNRESOLVED_REF");
    }

    #[test]
    fn circular_ref_returns_error() {
        let yaml = r##"
openapi: "3.1.0"
info:
  title: Test API
  version: "1.0.0"
components:
  schemas:
    A:
      $ref: "#/components/schemas/B"
    B:
      $ref: "#/components/schemas/A"
paths:
  /a:
    post:
      requestBody:
        content:
          application/json:
            schema:
              $ref: "#/components/schemas/A"
"##;
        let err = parse_spec(yaml).unwrap_err();
        assert_eq!(err.code(), "E_CIRCULAR_REF");
    }

    #[test]
    fn non_string_parameter_name_is_rejected() {
        let yaml = r#"
openapi: "3.1.0"
info:
  title: Test API
  version: "1.0.0"
paths:
  /users:
    get:
      parameters:
        - name: 42
          in: query
"#;
        let err = parse_spec(yaml).unwrap_err();
        assert_eq!(err.code(), "E_BAD_PARAMETER_NAME");
    }

    #[test]
    fn operation_security_overrides_root_security() {
        let yaml = r#"
openapi: "3.1.0"
info:
  title: Test API
  version: "1.0.0"
security:
  - bearerAuth: []
components:
  securitySchemes:
    bearerAuth:
      type: http
      scheme: Bearer
    key:
      type: apiKey
      in: query
      name: api_key
paths:
  /private:
    get:
      operationId: getPrivate
  /keyed:
    get:
      operationId: getKeyed
      security:
        - key: []
  /public:
    get:
      operationId: getPublic
      security: []
"#;
        let spec = parse_spec(yaml).unwrap();
        let find = |id: &str| {
            spec.operations
                .iter()
                .find(|o| o.operation_id.as_deref() == Some(id))
                .unwrap()
        };

        let private = find("getPrivate");
        assert_eq!(private.security, vec!["bearerAuth".to_string()]);
        assert_eq!(private.parameters[0].name, "authorization");

        let keyed = find("getKeyed");
        assert_eq!(keyed.parameters.len(), 1);
        assert_eq!(keyed.parameters[0].name, "api_key");
        assert_eq!(keyed.parameters[0].location, "query");

        assert!(find("getPublic").parameters.is_empty());
    }

    #[test]
    fn extract_portcullis_extensions() {
        let yaml = r#"
openapi: "3.1.0"
info:
  title: Test API
  version: "1.0.0"
x-portcullis-owner: platform
x-other: ignored
paths:
  /health:
    get:
      operationId: getHealth
      x-portcullis-mock:
        status: 204
"#;
        let spec = parse_spec(yaml).unwrap();
        assert!(spec.extensions.contains_key("x-portcullis-owner"));
        assert!(!spec.extensions.contains_key("x-other"));
        assert_eq!(spec.operations[0].extensions["x-portcullis-mock"]["status"], 204);
    }

    #[test]
    fn content_parameter_and_style_are_recorded() {
        let yaml = r#"
openapi: "3.1.0"
info:
  title: Test API
  version: "1.0.0"
paths:
  /search:
    get:
      parameters:
        - name: filter
          in: query
          content:
            application/json:
              schema:
                type: object
        - name: tags
          in: query
          style: pipeDelimited
          schema:
            type: array
"#;
        let spec = parse_spec(yaml).unwrap();
        let params = &spec.operations[0].parameters;
        assert!(params[0].has_content);
        assert_eq!(params[1].style.as_deref(), Some("pipeDelimited"));
    }
}
