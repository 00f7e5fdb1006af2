//! Content negotiation for request bodies and responses.

use crate::codec::Charset;
use crate::error::DispatchError;

/// One entry of an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    pub main: String,
    pub sub: String,
    pub q: f32,
}

impl MediaRange {
    /// Parse one range such as `text/*;q=0.5`. Malformed entries yield `None`.
    pub fn parse(item: &str) -> Option<Self> {
        let mime: mime::Mime = item.trim().parse().ok()?;
        let q = mime
            .get_param("q")
            .and_then(|q| parse_quality(q.as_str()))
            .unwrap_or(1.0);
        Some(Self {
            main: mime.type_().as_str().to_ascii_lowercase(),
            sub: mime.subtype().as_str().to_ascii_lowercase(),
            q,
        })
    }

    /// How closely this range names `media_type`: 2 exact, 1 `type/*`, 0 `*/*`.
    fn specificity_for(&self, main: &str, sub: &str) -> Option<u8> {
        match (self.main.as_str(), self.sub.as_str()) {
            ("*", _) => Some(0),
            (m, "*") if m == main => Some(1),
            (m, s) if m == main && s == sub => Some(2),
            _ => None,
        }
    }

    fn is_concrete(&self) -> bool {
        self.main != "*" && self.sub != "*"
    }

    fn essence(&self) -> String {
        format!("{}/{}", self.main, self.sub)
    }
}

/// Parse an `Accept` header, dropping malformed entries.
pub fn parse_accept(header: &str) -> Vec<MediaRange> {
    header
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .filter_map(MediaRange::parse)
        .collect()
}

/// Parse an `Accept-Charset` header into `(label, q)` pairs sorted by q descending.
pub fn parse_accept_charset(header: &str) -> Vec<(String, f32)> {
    let mut charsets = Vec::new();

    for part in header.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let mut quality = 1.0f32;
        let mut label = part;

        if let Some(semicolon_pos) = part.find(';') {
            label = &part[..semicolon_pos];
            for param in part[semicolon_pos + 1..].split(';') {
                if let Some(q) = param.trim().strip_prefix("q=").and_then(parse_quality) {
                    quality = q;
                }
            }
        }

        charsets.push((label.trim().to_ascii_lowercase(), quality));
    }

    charsets.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    charsets
}

fn parse_quality(value: &str) -> Option<f32> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|q| q.is_finite())
        .map(|q| q.clamp(0.0, 1.0))
}

/// Pick the response media type.
///
/// Without an `Accept` header the first concrete produceable type wins.
/// Otherwise the produceable type with the highest q wins, ties going to
/// declaration order; a wildcard produceable type takes the concrete type
/// the client asked for. `Ok(None)` means the operation declares no
/// concrete response content.
pub fn negotiate_media_type(
    accept: Option<&str>,
    produceable: &[String],
) -> Result<Option<String>, DispatchError> {
    if produceable.is_empty() {
        return Ok(None);
    }

    let accept = accept.map(str::trim).filter(|a| !a.is_empty());
    let Some(accept) = accept else {
        return Ok(produceable.iter().find(|p| !p.contains('*')).cloned());
    };

    let ranges = parse_accept(accept);
    if ranges.is_empty() {
        return Ok(produceable.iter().find(|p| !p.contains('*')).cloned());
    }

    let mut best: Option<(String, f32)> = None;
    for candidate in produceable {
        let Some((chosen, q)) = score_media_type(candidate, &ranges) else {
            continue;
        };
        if q > 0.0 && best.as_ref().map_or(true, |(_, best_q)| q > *best_q) {
            best = Some((chosen, q));
        }
    }

    match best {
        Some((media_type, _)) => Ok(Some(media_type)),
        None => Err(DispatchError::UnacceptableMediaType {
            accept: accept.to_string(),
            produceable: produceable.to_vec(),
        }),
    }
}

fn score_media_type(candidate: &str, ranges: &[MediaRange]) -> Option<(String, f32)> {
    let (main, sub) = candidate.split_once('/')?;

    if main == "*" || sub == "*" {
        // A wildcard declaration serves the best concrete range it covers.
        return ranges
            .iter()
            .filter(|r| r.is_concrete() && (main == "*" || r.main == main))
            .fold(None, |best: Option<&MediaRange>, r| match best {
                Some(b) if b.q >= r.q => Some(b),
                _ => Some(r),
            })
            .map(|r| (r.essence(), r.q));
    }

    ranges
        .iter()
        .filter_map(|r| r.specificity_for(main, sub).map(|s| (s, r.q)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, q)| (candidate.to_string(), q))
}

/// Pick the response charset.
///
/// Without an `Accept-Charset` header the first produceable charset wins.
pub fn negotiate_charset(
    accept_charset: Option<&str>,
    produceable: &[String],
) -> Result<String, DispatchError> {
    let fallback = || {
        produceable
            .first()
            .cloned()
            .unwrap_or_else(|| Charset::Utf8.as_str().to_string())
    };

    let Some(header) = accept_charset.map(str::trim).filter(|h| !h.is_empty()) else {
        return Ok(fallback());
    };

    let preferences = parse_accept_charset(header);
    let wildcard = preferences
        .iter()
        .find(|(label, _)| label == "*")
        .map(|(_, q)| *q);

    let mut best: Option<(&String, f32)> = None;
    for candidate in produceable {
        let canonical = Charset::parse(candidate);
        let explicit = preferences.iter().find(|(label, _)| {
            label == candidate || (canonical.is_some() && Charset::parse(label) == canonical)
        });
        let q = explicit.map(|(_, q)| *q).or(wildcard).unwrap_or(0.0);
        if q > 0.0 && best.map_or(true, |(_, best_q)| q > best_q) {
            best = Some((candidate, q));
        }
    }

    match best {
        Some((charset, _)) => Ok(charset.clone()),
        None => Err(DispatchError::UnacceptableCharset {
            accept_charset: header.to_string(),
            produceable: produceable.to_vec(),
        }),
    }
}

/// The negotiated shape of the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSpec {
    pub media_type: Option<String>,
    pub charset: String,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            media_type: None,
            charset: Charset::Utf8.as_str().to_string(),
        }
    }
}

/// The declared shape of the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBodySpec {
    /// Bare, lowercase media type.
    pub media_type: String,
    pub charset: String,
}

/// Split a `Content-Type` value into bare media type and charset (default utf-8).
pub fn parse_content_type(value: &str) -> Option<RequestBodySpec> {
    let mime: mime::Mime = value.trim().parse().ok()?;
    let charset = mime
        .get_param(mime::CHARSET)
        .map(|c| c.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| Charset::Utf8.as_str().to_string());
    Some(RequestBodySpec {
        media_type: mime.essence_str().to_ascii_lowercase(),
        charset,
    })
}

/// Check a request `Content-Type` against the consumable media types and charsets.
///
/// Media types match exactly, then by `type/*`, then by `*/*`.
pub fn negotiate_body(
    content_type: Option<&str>,
    consumable_media_types: &[String],
    consumable_charsets: &[String],
) -> Result<RequestBodySpec, DispatchError> {
    let raw = content_type.unwrap_or("").trim();
    let spec = parse_content_type(raw).ok_or_else(|| DispatchError::UnsupportedMediaType {
        media_type: raw.to_string(),
        supported: consumable_media_types.to_vec(),
    })?;

    let main = spec.media_type.split('/').next().unwrap_or("");
    let consumable = consumable_media_types.iter().any(|c| {
        c == &spec.media_type || *c == format!("{}/*", main) || c == "*/*"
    });
    if !consumable {
        return Err(DispatchError::UnsupportedMediaType {
            media_type: spec.media_type,
            supported: consumable_media_types.to_vec(),
        });
    }

    let canonical = Charset::parse(&spec.charset);
    let charset_ok = consumable_charsets.iter().any(|c| {
        c.eq_ignore_ascii_case(&spec.charset)
            || (canonical.is_some() && Charset::parse(c) == canonical)
    });
    if !charset_ok {
        return Err(DispatchError::UnsupportedCharset {
            charset: spec.charset,
            supported: consumable_charsets.to_vec(),
        });
    }

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn media_range_parsing() {
        let range = MediaRange::parse("Text/HTML; q=0.3").unwrap();
        assert_eq!(range.main, "text");
        assert_eq!(range.sub, "html");
        assert!((range.q - 0.3).abs() < f32::EPSILON);
        assert!(MediaRange::parse("garbage").is_none());
        assert_eq!(parse_accept("a/b, nonsense, */*;q=0.1").len(), 2);
    }

    #[test]
    fn absent_accept_picks_first_produceable() {
        let produceable = types(&["application/json", "text/plain"]);
        assert_eq!(
            negotiate_media_type(None, &produceable).unwrap().as_deref(),
            Some("application/json")
        );
        assert_eq!(
            negotiate_media_type(Some("  "), &produceable).unwrap().as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn highest_quality_wins() {
        let produceable = types(&["application/json", "text/plain"]);
        let chosen =
            negotiate_media_type(Some("application/json;q=0.5, text/plain"), &produceable).unwrap();
        assert_eq!(chosen.as_deref(), Some("text/plain"));
    }

    #[test]
    fn ties_follow_declaration_order() {
        let produceable = types(&["text/plain", "application/json"]);
        let chosen = negotiate_media_type(Some("*/*"), &produceable).unwrap();
        assert_eq!(chosen.as_deref(), Some("text/plain"));
    }

    #[test]
    fn most_specific_range_sets_quality() {
        let produceable = types(&["text/html", "text/plain"]);
        let chosen =
            negotiate_media_type(Some("text/*;q=0.8, text/html;q=0.1"), &produceable).unwrap();
        assert_eq!(chosen.as_deref(), Some("text/plain"));
    }

    #[test]
    fn wildcard_produceable_takes_concrete_accept() {
        let produceable = types(&["image/*"]);
        let chosen = negotiate_media_type(Some("image/png"), &produceable).unwrap();
        assert_eq!(chosen.as_deref(), Some("image/png"));
    }

    #[test]
    fn unacceptable_media_type() {
        let produceable = types(&["application/json"]);
        let err = negotiate_media_type(Some("text/html"), &produceable).unwrap_err();
        assert_eq!(err.code(), "E_UNACCEPTABLE_MEDIA_TYPE");
        let err = negotiate_media_type(Some("application/json;q=0"), &produceable).unwrap_err();
        assert_eq!(err.code(), "E_UNACCEPTABLE_MEDIA_TYPE");
    }

    #[test]
    fn nothing_produceable_means_no_media_type() {
        assert_eq!(negotiate_media_type(Some("text/html"), &[]).unwrap(), None);
    }

    #[test]
    fn accept_charset_parsing_sorts_by_quality() {
        let parsed = parse_accept_charset("iso-8859-1;q=0.5, UTF-8, *;q=0.1");
        assert_eq!(parsed[0].0, "utf-8");
        assert_eq!(parsed[1].0, "iso-8859-1");
        assert_eq!(parsed[2].0, "*");
    }

    #[test]
    fn charset_negotiation() {
        let produceable = types(&["utf-8", "iso-8859-1", "us-ascii"]);
        assert_eq!(negotiate_charset(None, &produceable).unwrap(), "utf-8");
        assert_eq!(
            negotiate_charset(Some("latin1, utf-8;q=0.2"), &produceable).unwrap(),
            "iso-8859-1"
        );
        assert_eq!(
            negotiate_charset(Some("utf-8;q=0, *;q=0.3"), &produceable).unwrap(),
            "iso-8859-1"
        );
        let err = negotiate_charset(Some("koi8-r"), &produceable).unwrap_err();
        assert_eq!(err.code(), "E_UNACCEPTABLE_CHARSET");
    }

    #[test]
    fn body_negotiation() {
        let media = types(&["application/json", "text/*"]);
        let charsets = types(&["utf-8", "iso-8859-1"]);

        let spec = negotiate_body(Some("Application/JSON"), &media, &charsets).unwrap();
        assert_eq!(spec.media_type, "application/json");
        assert_eq!(spec.charset, "utf-8");

        let spec = negotiate_body(Some("text/csv; charset=ISO-8859-1"), &media, &charsets).unwrap();
        assert_eq!(spec.media_type, "text/csv");
        assert_eq!(spec.charset, "iso-8859-1");

        let err = negotiate_body(Some("image/png"), &media, &charsets).unwrap_err();
        assert_eq!(err.code(), "E_UNSUPPORTED_MEDIA_TYPE");

        let err = negotiate_body(None, &media, &charsets).unwrap_err();
        assert_eq!(err.code(), "E_UNSUPPORTED_MEDIA_TYPE");

        let err =
            negotiate_body(Some("application/json; charset=koi8-r"), &media, &charsets).unwrap_err();
        assert_eq!(err.code(), "E_UNSUPPORTED_CHARSET");
    }
}
