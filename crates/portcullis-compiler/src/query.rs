use std::collections::{BTreeSet, HashMap};

use portcullis_validator::{RawValue, ValidationError};

/// Query string parser specialised for one operation's declared parameters.
///
/// Array parameters may repeat (`?tag=a&tag=b`); repeating any other
/// declared parameter is a client error. Undeclared keys are ignored.
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    single: BTreeSet<String>,
    repeatable: BTreeSet<String>,
}

impl QueryParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, repeatable: bool) {
        let name = name.into();
        if repeatable {
            self.single.remove(&name);
            self.repeatable.insert(name);
        } else {
            self.repeatable.remove(&name);
            self.single.insert(name);
        }
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.single.contains(name) || self.repeatable.contains(name)
    }

    /// Parse a raw (still percent-encoded) query string.
    pub fn parse(&self, query: &str) -> Result<HashMap<String, RawValue>, ValidationError> {
        let mut values: HashMap<String, RawValue> = HashMap::new();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let repeatable = self.repeatable.contains(key.as_ref());
            if !repeatable && !self.single.contains(key.as_ref()) {
                continue;
            }

            if let Some(existing) = values.get_mut(key.as_ref()) {
                if !repeatable {
                    return Err(ValidationError::BadQueryString {
                        name: key.into_owned(),
                    });
                }
                let previous = std::mem::replace(existing, RawValue::Multiple(Vec::new()));
                let mut items = match previous {
                    RawValue::Single(first) => vec![first],
                    RawValue::Multiple(items) => items,
                };
                items.push(value.into_owned());
                *existing = RawValue::Multiple(items);
                continue;
            }
            values.insert(key.into_owned(), RawValue::Single(value.into_owned()));
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> QueryParser {
        let mut parser = QueryParser::new();
        parser.declare("limit", false);
        parser.declare("tag", true);
        parser
    }

    #[test]
    fn parses_declared_parameters() {
        let values = parser().parse("limit=10&tag=a%20b&other=x").unwrap();
        assert_eq!(values.get("limit"), Some(&RawValue::single("10")));
        assert_eq!(values.get("tag"), Some(&RawValue::single("a b")));
        assert!(!values.contains_key("other"));
    }

    #[test]
    fn repeated_array_parameter_accumulates() {
        let values = parser().parse("tag=a&tag=b&tag=c").unwrap();
        assert_eq!(
            values.get("tag"),
            Some(&RawValue::Multiple(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn repeated_single_parameter_is_rejected() {
        let err = parser().parse("limit=1&limit=2").unwrap_err();
        assert_eq!(err.code(), "E_BAD_QUERY_STRING");
    }

    #[test]
    fn plus_decodes_to_space() {
        let values = parser().parse("tag=hello+world").unwrap();
        assert_eq!(values.get("tag"), Some(&RawValue::single("hello world")));
    }

    #[test]
    fn empty_query() {
        assert!(parser().parse("").unwrap().is_empty());
    }
}
