use std::collections::BTreeMap;

use portcullis_router::RouteSegment;
use portcullis_validator::{BodySchema, BodyValidator, ParameterValidator};
use serde_json::Value;

use crate::query::QueryParser;

/// Compiled, immutable description of one (path, method) operation.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub path: String,
    /// Uppercase HTTP method.
    pub method: String,
    pub operation_id: String,
    pub segments: Vec<RouteSegment>,
    pub parameters: OperationParameters,
    pub body: BodyValidator,
    /// Bare media types accepted in request bodies, in declaration order.
    pub consumable_media_types: Vec<String>,
    /// Bare media types declared across all responses, in declaration order.
    pub produceable_media_types: Vec<String>,
    pub consumable_charsets: Vec<String>,
    pub produceable_charsets: Vec<String>,
    pub query_parser: QueryParser,
    pub responses: ResponseSchemas,
    /// The operation's `x-portcullis-*` extensions.
    pub extensions: BTreeMap<String, Value>,
}

impl OperationDescriptor {
    /// Look up a vendor extension by its name without the `x-portcullis-` prefix.
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extensions
            .get(&format!("{}{}", portcullis_spec_parser::parser::EXTENSION_PREFIX, name))
    }
}

/// Parameter validators by location. Header names are lowercase.
#[derive(Debug, Clone, Default)]
pub struct OperationParameters {
    pub query: BTreeMap<String, ParameterValidator>,
    pub header: BTreeMap<String, ParameterValidator>,
    pub path: BTreeMap<String, ParameterValidator>,
}

/// Declared response content, keyed by status key then media type.
#[derive(Debug, Clone, Default)]
pub struct ResponseSchemas {
    by_status: BTreeMap<String, BTreeMap<String, BodySchema>>,
}

impl ResponseSchemas {
    pub fn new(by_status: BTreeMap<String, BTreeMap<String, BodySchema>>) -> Self {
        Self { by_status }
    }

    /// Find the declared content for a status: exact code, then `NXX`, then `default`.
    pub fn lookup(&self, status: u16) -> Option<&BTreeMap<String, BodySchema>> {
        self.by_status
            .get(&status.to_string())
            .or_else(|| self.by_status.get(&format!("{}XX", status / 100)))
            .or_else(|| self.by_status.get("DEFAULT"))
    }

    /// Find the schema for one media type of a status.
    pub fn schema_for(&self, status: u16, media_type: &str) -> Option<&BodySchema> {
        let content = self.lookup(status)?;
        content.get(media_type).or_else(|| {
            let (main, _) = media_type.split_once('/')?;
            content
                .get(&format!("{}/*", main))
                .or_else(|| content.get("*/*"))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.by_status.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schemas() -> ResponseSchemas {
        let mut by_status = BTreeMap::new();
        let mut ok = BTreeMap::new();
        ok.insert("application/json".to_string(), BodySchema::Unconstrained);
        by_status.insert("200".to_string(), ok);
        let mut client = BTreeMap::new();
        client.insert("text/*".to_string(), BodySchema::Unconstrained);
        by_status.insert("4XX".to_string(), client);
        let mut fallback = BTreeMap::new();
        fallback.insert("application/octet-stream".to_string(), BodySchema::Binary);
        by_status.insert("DEFAULT".to_string(), fallback);
        ResponseSchemas::new(by_status)
    }

    #[test]
    fn lookup_order() {
        let schemas = schemas();
        assert!(schemas.lookup(200).unwrap().contains_key("application/json"));
        assert!(schemas.lookup(404).unwrap().contains_key("text/*"));
        assert!(schemas.lookup(500).unwrap().contains_key("application/octet-stream"));
    }

    #[test]
    fn schema_for_wildcard_media_type() {
        let schemas = schemas();
        assert!(matches!(
            schemas.schema_for(404, "text/plain"),
            Some(BodySchema::Unconstrained)
        ));
        assert!(schemas.schema_for(200, "text/plain").is_none());
        assert!(matches!(
            schemas.schema_for(503, "application/octet-stream"),
            Some(BodySchema::Binary)
        ));
    }
}
