//! Security-scheme derived parameters.
//!
//! Security requirements imply request parameters the router must let
//! through and shape-check: an `authorization` header for credential based
//! schemes, an `access_token` query parameter for OAuth2/OpenID, and the
//! declared header/query/cookie slot for API keys.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use crate::error::ParseError;
use crate::model::{Parameter, ParameterSource, SecurityScheme};

/// Header carrying credentials for `http`, `oauth2` and `openIdConnect` schemes.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Query parameter accepted by OAuth2/OpenID schemes.
pub const ACCESS_TOKEN_PARAMETER: &str = "access_token";

/// Parse `components.securitySchemes`.
pub fn parse_security_schemes(
    root: &serde_json::Map<String, Value>,
) -> Result<BTreeMap<String, SecurityScheme>, ParseError> {
    let mut schemes = BTreeMap::new();

    let Some(declared) = root
        .get("components")
        .and_then(|c| c.get("securitySchemes"))
        .and_then(|s| s.as_object())
    else {
        return Ok(schemes);
    };

    for (name, value) in declared {
        let obj = value.as_object().ok_or_else(|| {
            ParseError::Structure(format!("security scheme '{}' must be an object", name))
        })?;
        let kind = obj.get("type").and_then(|v| v.as_str()).ok_or_else(|| {
            ParseError::Structure(format!("security scheme '{}' is missing 'type'", name))
        })?;

        let scheme = match kind {
            "apiKey" => {
                let key_name = obj.get("name").and_then(|v| v.as_str()).ok_or_else(|| {
                    ParseError::Structure(format!("apiKey scheme '{}' is missing 'name'", name))
                })?;
                let location = obj.get("in").and_then(|v| v.as_str()).ok_or_else(|| {
                    ParseError::Structure(format!("apiKey scheme '{}' is missing 'in'", name))
                })?;
                SecurityScheme::ApiKey {
                    name: key_name.to_string(),
                    location: location.to_string(),
                }
            }
            "http" => {
                let scheme = obj.get("scheme").and_then(|v| v.as_str()).ok_or_else(|| {
                    ParseError::Structure(format!("http scheme '{}' is missing 'scheme'", name))
                })?;
                SecurityScheme::Http {
                    scheme: scheme.to_lowercase(),
                }
            }
            "oauth2" => SecurityScheme::OAuth2,
            "openIdConnect" => SecurityScheme::OpenIdConnect,
            "mutualTLS" => SecurityScheme::MutualTls,
            other => {
                return Err(ParseError::Structure(format!(
                    "security scheme '{}' has unsupported type '{}'",
                    name, other
                )))
            }
        };
        schemes.insert(name.clone(), scheme);
    }

    Ok(schemes)
}

/// Collect the scheme names referenced by a `security` array, in order.
///
/// Returns `None` when the field is absent so callers can fall back to the
/// root-level requirements.
pub fn requirement_names(value: Option<&Value>) -> Option<Vec<String>> {
    let requirements = value?.as_array()?;
    let mut names = Vec::new();
    for requirement in requirements {
        if let Some(obj) = requirement.as_object() {
            for name in obj.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
    }
    Some(names)
}

/// Append the parameters implied by `requirements` to `parameters`.
///
/// Explicitly declared parameters always win; `apiKey` slots win over the
/// generic `authorization` header and `access_token` query parameter.
pub fn inject_security_parameters(
    parameters: &mut Vec<Parameter>,
    requirements: &[String],
    schemes: &BTreeMap<String, SecurityScheme>,
    context: &str,
) -> Result<(), ParseError> {
    let mut keywords = BTreeSet::new();
    let mut wants_access_token = false;
    let mut api_keys = Vec::new();

    for name in requirements {
        let scheme = schemes
            .get(name)
            .ok_or_else(|| ParseError::UndeclaredSecurityScheme {
                scheme: name.clone(),
                context: context.to_string(),
            })?;

        match scheme {
            SecurityScheme::ApiKey { name, location } => {
                api_keys.push((location.clone(), name.clone()));
            }
            SecurityScheme::Http { scheme } => {
                keywords.insert(scheme.clone());
            }
            SecurityScheme::OAuth2 | SecurityScheme::OpenIdConnect => {
                keywords.insert("bearer".to_string());
                wants_access_token = true;
            }
            SecurityScheme::MutualTls => {}
        }
    }

    for (location, name) in api_keys {
        push_if_absent(
            parameters,
            Parameter {
                name,
                location,
                required: false,
                schema: Some(json!({ "type": "string" })),
                style: None,
                has_content: false,
                source: ParameterSource::ApiKey,
            },
        );
    }

    if !keywords.is_empty() {
        push_if_absent(
            parameters,
            Parameter {
                name: AUTHORIZATION_HEADER.to_string(),
                location: "header".to_string(),
                required: false,
                schema: Some(json!({
                    "type": "string",
                    "pattern": authorization_pattern(&keywords),
                })),
                style: None,
                has_content: false,
                source: ParameterSource::Credentials,
            },
        );
    }

    if wants_access_token {
        push_if_absent(
            parameters,
            Parameter {
                name: ACCESS_TOKEN_PARAMETER.to_string(),
                location: "query".to_string(),
                required: false,
                schema: Some(json!({ "type": "string" })),
                style: None,
                has_content: false,
                source: ParameterSource::Credentials,
            },
        );
    }

    Ok(())
}

fn push_if_absent(parameters: &mut Vec<Parameter>, candidate: Parameter) {
    let taken = parameters.iter().any(|p| {
        p.location == candidate.location && same_name(&p.location, &p.name, &candidate.name)
    });
    if !taken {
        parameters.push(candidate);
    }
}

/// Header names compare case-insensitively, everything else exactly.
fn same_name(location: &str, a: &str, b: &str) -> bool {
    if location == "header" {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// Build `^(kw1|kw2) .+$` with each keyword matched case-insensitively.
///
/// Character classes are used instead of an inline `(?i)` flag so the pattern
/// means the same thing to every JSON Schema regex dialect.
pub fn authorization_pattern(keywords: &BTreeSet<String>) -> String {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|keyword| {
            keyword
                .chars()
                .map(|c| {
                    if c.is_ascii_alphabetic() {
                        format!("[{}{}]", c.to_ascii_uppercase(), c.to_ascii_lowercase())
                    } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c.to_string()
                    } else {
                        format!("\\{}", c)
                    }
                })
                .collect()
        })
        .collect();
    format!("^({}) .+$", alternatives.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schemes() -> BTreeMap<String, SecurityScheme> {
        let mut schemes = BTreeMap::new();
        schemes.insert(
            "bearerAuth".to_string(),
            SecurityScheme::Http {
                scheme: "bearer".to_string(),
            },
        );
        schemes.insert(
            "basicAuth".to_string(),
            SecurityScheme::Http {
                scheme: "basic".to_string(),
            },
        );
        schemes.insert("oauth".to_string(), SecurityScheme::OAuth2);
        schemes.insert(
            "headerKey".to_string(),
            SecurityScheme::ApiKey {
                name: "Authorization".to_string(),
                location: "header".to_string(),
            },
        );
        schemes
    }

    #[test]
    fn pattern_is_case_insensitive_on_keyword() {
        let keywords: BTreeSet<String> = ["basic", "bearer"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            authorization_pattern(&keywords),
            "^([Bb][Aa][Ss][Ii][Cc]|[Bb][Ee][Aa][Rr][Ee][Rr]) .+$"
        );
    }

    #[test]
    fn http_schemes_share_one_authorization_header() {
        let mut params = Vec::new();
        inject_security_parameters(
            &mut params,
            &["bearerAuth".to_string(), "basicAuth".to_string()],
            &schemes(),
            "GET /",
        )
        .unwrap();

        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, AUTHORIZATION_HEADER);
        assert_eq!(params[0].location, "header");
        assert!(!params[0].required);
        assert_eq!(params[0].source, ParameterSource::Credentials);
    }

    #[test]
    fn oauth2_adds_access_token() {
        let mut params = Vec::new();
        inject_security_parameters(&mut params, &["oauth".to_string()], &schemes(), "GET /").unwrap();

        let names: Vec<_> = params.iter().map(|p| (p.location.as_str(), p.name.as_str())).collect();
        assert_eq!(
            names,
            vec![("header", "authorization"), ("query", "access_token")]
        );
    }

    #[test]
    fn api_key_named_authorization_wins() {
        let mut params = Vec::new();
        inject_security_parameters(
            &mut params,
            &["headerKey".to_string(), "bearerAuth".to_string()],
            &schemes(),
            "GET /",
        )
        .unwrap();

        assert_eq!(params.len(), 1);
        assert_eq!(params[0].source, ParameterSource::ApiKey);
        assert_eq!(params[0].name, "Authorization");
    }

    #[test]
    fn explicit_declaration_wins() {
        let mut params = vec![Parameter {
            name: "authorization".to_string(),
            location: "header".to_string(),
            required: true,
            schema: Some(json!({ "type": "string" })),
            style: None,
            has_content: false,
            source: ParameterSource::Declared,
        }];
        inject_security_parameters(&mut params, &["bearerAuth".to_string()], &schemes(), "GET /")
            .unwrap();

        assert_eq!(params.len(), 1);
        assert!(params[0].required);
        assert_eq!(params[0].source, ParameterSource::Declared);
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let mut params = Vec::new();
        let err = inject_security_parameters(&mut params, &["nope".to_string()], &schemes(), "GET /")
            .unwrap_err();
        assert_eq!(err.code(), "E_UNDECLARED_SECURITY_SCHEME");
    }

    #[test]
    fn requirement_names_are_deduplicated() {
        let value = json!([{ "a": [] }, { "b": [], "a": ["scope"] }, {}]);
        assert_eq!(
            requirement_names(Some(&value)),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(requirement_names(None), None);
    }
}
