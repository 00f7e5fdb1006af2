//! Body codecs: charset transcoding plus per-media-type parsers and stringifiers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};

/// Charsets bodies can be decoded from and encoded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    /// Parse a charset label, accepting the common aliases.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "iso-8859-1" | "iso_8859-1" | "iso8859-1" | "latin1" | "l1" => Some(Self::Latin1),
            "us-ascii" | "ascii" => Some(Self::Ascii),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "iso-8859-1",
            Self::Ascii => "us-ascii",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| e.to_string()),
            Self::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Self::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(index) => Err(format!("non-ASCII byte at offset {}", index)),
                None => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            },
        }
    }

    pub fn encode(&self, text: &str) -> Result<Bytes, String> {
        match self {
            Self::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Self::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c))
                        .map_err(|_| format!("'{}' is not representable in iso-8859-1", c))
                })
                .collect::<Result<Vec<u8>, String>>()
                .map(Bytes::from),
            Self::Ascii if text.is_ascii() => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Self::Ascii => Err("text is not representable in us-ascii".to_string()),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns decoded body text into a structured value.
pub trait BodyParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Value, String>;
}

/// Turns a structured value into body text.
pub trait BodyStringifier: Send + Sync {
    fn stringify(&self, value: &Value) -> Result<String, String>;
}

/// `application/json` and `+json` media types.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl BodyParser for JsonCodec {
    fn parse(&self, text: &str) -> Result<Value, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

impl BodyStringifier for JsonCodec {
    fn stringify(&self, value: &Value) -> Result<String, String> {
        serde_json::to_string(value).map_err(|e| e.to_string())
    }
}

/// `text/plain`: the body is a single string.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl BodyParser for TextCodec {
    fn parse(&self, text: &str) -> Result<Value, String> {
        Ok(Value::String(text.to_string()))
    }
}

impl BodyStringifier for TextCodec {
    fn stringify(&self, value: &Value) -> Result<String, String> {
        Ok(portcullis_validator::stringify(value))
    }
}

/// `application/x-www-form-urlencoded`. Repeated keys become arrays.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormCodec;

impl BodyParser for FormCodec {
    fn parse(&self, text: &str) -> Result<Value, String> {
        let mut object = Map::new();
        for (key, value) in form_urlencoded::parse(text.as_bytes()) {
            let value = Value::String(value.into_owned());
            match object.get_mut(key.as_ref()) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    object.insert(key.into_owned(), value);
                }
            }
        }
        Ok(Value::Object(object))
    }
}

impl BodyStringifier for FormCodec {
    fn stringify(&self, value: &Value) -> Result<String, String> {
        let Value::Object(object) = value else {
            return Err("form bodies must be objects".to_string());
        };
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in object {
            match value {
                Value::Array(items) => {
                    for item in items {
                        serializer.append_pair(key, &portcullis_validator::stringify(item));
                    }
                }
                other => {
                    serializer.append_pair(key, &portcullis_validator::stringify(other));
                }
            }
        }
        Ok(serializer.finish())
    }
}

/// Parsers and stringifiers by bare media type.
#[derive(Clone)]
pub struct Codecs {
    parsers: HashMap<String, Arc<dyn BodyParser>>,
    stringifiers: HashMap<String, Arc<dyn BodyStringifier>>,
}

impl fmt::Debug for Codecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parsers: Vec<_> = self.parsers.keys().collect();
        parsers.sort();
        let mut stringifiers: Vec<_> = self.stringifiers.keys().collect();
        stringifiers.sort();
        f.debug_struct("Codecs")
            .field("parsers", &parsers)
            .field("stringifiers", &stringifiers)
            .finish()
    }
}

impl Default for Codecs {
    fn default() -> Self {
        Self::empty()
            .with_codec("application/json", JsonCodec)
            .with_codec("text/plain", TextCodec)
            .with_codec("application/x-www-form-urlencoded", FormCodec)
    }
}

impl Codecs {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
            stringifiers: HashMap::new(),
        }
    }

    pub fn with_parser(mut self, media_type: &str, parser: impl BodyParser + 'static) -> Self {
        self.parsers
            .insert(media_type.to_ascii_lowercase(), Arc::new(parser));
        self
    }

    pub fn with_stringifier(
        mut self,
        media_type: &str,
        stringifier: impl BodyStringifier + 'static,
    ) -> Self {
        self.stringifiers
            .insert(media_type.to_ascii_lowercase(), Arc::new(stringifier));
        self
    }

    pub fn with_codec<C>(self, media_type: &str, codec: C) -> Self
    where
        C: BodyParser + BodyStringifier + Clone + 'static,
    {
        self.with_parser(media_type, codec.clone())
            .with_stringifier(media_type, codec)
    }

    pub fn parser(&self, media_type: &str) -> Option<&Arc<dyn BodyParser>> {
        lookup(&self.parsers, media_type)
    }

    pub fn stringifier(&self, media_type: &str) -> Option<&Arc<dyn BodyStringifier>> {
        lookup(&self.stringifiers, media_type)
    }
}

/// Exact type, then the structured-syntax suffix (`+json` -> `application/json`),
/// then `type/*`, then `*/*`.
fn lookup<'a, T: ?Sized>(map: &'a HashMap<String, Arc<T>>, media_type: &str) -> Option<&'a Arc<T>> {
    if let Some(found) = map.get(media_type) {
        return Some(found);
    }
    let (main, sub) = media_type.split_once('/')?;
    if let Some((_, suffix)) = sub.rsplit_once('+') {
        if let Some(found) = map.get(&format!("application/{}", suffix)) {
            return Some(found);
        }
    }
    map.get(&format!("{}/*", main)).or_else(|| map.get("*/*"))
}
