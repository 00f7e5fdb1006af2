use std::collections::HashMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use portcullis_validator::{coerce, CoercionOptions, PrimitiveType};
use thiserror::Error;

/// One segment of a route template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteSegment {
    Literal(String),
    /// `{name}`, matching a single segment that casts into `kind`.
    Capture { name: String, kind: PrimitiveType },
}

impl fmt::Display for RouteSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::Capture { name, .. } => write!(f, "{{{}}}", name),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("duplicate route: {method} {template}")]
    DuplicateRoute { method: String, template: String },
}

impl RouteError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateRoute { .. } => "E_DUPLICATE_ROUTE",
        }
    }
}

/// The result of a route lookup.
#[derive(Debug)]
pub enum RouteMatch<'a, T> {
    /// Matched a route; `params` holds the percent-decoded captures in
    /// template order.
    Found {
        entry: &'a T,
        params: Vec<(String, String)>,
    },
    NotFound,
}

/// The routing tries, one per HTTP method.
#[derive(Debug)]
pub struct Router<T> {
    tries: HashMap<String, Node<T>>,
    coercion: CoercionOptions,
    len: usize,
}

#[derive(Debug)]
struct Node<T> {
    literal_children: HashMap<String, Node<T>>,
    /// Capture children in insertion order.
    captures: Vec<CaptureNode<T>>,
    entry: Option<T>,
}

#[derive(Debug)]
struct CaptureNode<T> {
    name: String,
    kind: PrimitiveType,
    node: Node<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            literal_children: HashMap::new(),
            captures: Vec::new(),
            entry: None,
        }
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new(CoercionOptions::default())
    }
}

impl<T> Router<T> {
    /// Create an empty router. `coercion` decides which raw segments a
    /// typed capture accepts.
    pub fn new(coercion: CoercionOptions) -> Self {
        Self {
            tries: HashMap::new(),
            coercion,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a route. Method is case-insensitive.
    pub fn insert(
        &mut self,
        method: &str,
        segments: &[RouteSegment],
        entry: T,
    ) -> Result<(), RouteError> {
        let method = method.to_ascii_uppercase();
        let mut current = self.tries.entry(method.clone()).or_default();

        for segment in segments {
            current = match segment {
                RouteSegment::Literal(name) => {
                    current.literal_children.entry(name.clone()).or_default()
                }
                RouteSegment::Capture { name, kind } => {
                    let position = current
                        .captures
                        .iter()
                        .position(|c| c.name == *name && c.kind == *kind);
                    let index = match position {
                        Some(index) => index,
                        None => {
                            current.captures.push(CaptureNode {
                                name: name.clone(),
                                kind: *kind,
                                node: Node::default(),
                            });
                            current.captures.len() - 1
                        }
                    };
                    &mut current.captures[index].node
                }
            };
        }

        if current.entry.is_some() {
            return Err(RouteError::DuplicateRoute {
                method,
                template: render_template(segments),
            });
        }
        current.entry = Some(entry);
        self.len += 1;
        Ok(())
    }

    /// Look up a request path. `HEAD` falls back to the `GET` routes.
    pub fn lookup(&self, method: &str, path: &str) -> RouteMatch<'_, T> {
        let method = method.to_ascii_uppercase();
        let normalized = normalize_path(path);
        let segments: Vec<String> = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();

        let found = self.lookup_in(&method, &segments);
        if found.is_none() && method == "HEAD" {
            return self.lookup_in("GET", &segments).unwrap_or(RouteMatch::NotFound);
        }
        found.unwrap_or(RouteMatch::NotFound)
    }

    fn lookup_in(&self, method: &str, segments: &[String]) -> Option<RouteMatch<'_, T>> {
        let root = self.tries.get(method)?;
        let mut params = Vec::new();
        let entry = self.traverse_and_match(root, segments, &mut params)?;
        Some(RouteMatch::Found { entry, params })
    }

    /// Traverse the trie matching actual path segments, capturing parameters.
    fn traverse_and_match<'a>(
        &'a self,
        node: &'a Node<T>,
        segments: &[String],
        params: &mut Vec<(String, String)>,
    ) -> Option<&'a T> {
        let Some((segment, remaining)) = segments.split_first() else {
            return node.entry.as_ref();
        };

        // Literal children take precedence (most specific match).
        if let Some(child) = node.literal_children.get(segment.as_str()) {
            if let Some(result) = self.traverse_and_match(child, remaining, params) {
                return Some(result);
            }
        }

        for capture in &node.captures {
            if !self.accepts(capture.kind, segment) {
                continue;
            }
            let param_len = params.len();
            params.push((capture.name.clone(), segment.clone()));

            if let Some(result) = self.traverse_and_match(&capture.node, remaining, params) {
                return Some(result);
            }

            // Backtrack if this path didn't work.
            params.truncate(param_len);
        }

        None
    }

    fn accepts(&self, kind: PrimitiveType, segment: &str) -> bool {
        kind == PrimitiveType::String || coerce(segment, kind, self.coercion).is_ok()
    }
}

fn render_template(segments: &[RouteSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&segment.to_string());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Split a path template into route segments.
///
/// `resolve` is called with the name of every `{name}` segment and returns
/// its capture type. Segments that merely contain braces stay literal.
pub fn parse_template<E>(
    template: &str,
    mut resolve: impl FnMut(&str) -> Result<PrimitiveType, E>,
) -> Result<Vec<RouteSegment>, E> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) if !name.is_empty() && !name.contains(['{', '}']) => {
                let kind = resolve(name)?;
                Ok(RouteSegment::Capture {
                    name: name.to_string(),
                    kind,
                })
            }
            _ => Ok(RouteSegment::Literal(s.to_string())),
        })
        .collect()
}

/// Normalize a request path: strip trailing slashes, collapse double slashes.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut prev_slash = false;

    for ch in path.chars() {
        if ch == '/' {
            if !prev_slash {
                normalized.push('/');
            }
            prev_slash = true;
        } else {
            normalized.push(ch);
            prev_slash = false;
        }
    }

    // Strip trailing slash (but keep root "/")
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    if normalized.is_empty() {
        "/".to_string()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(path: &str, kinds: &[(&str, PrimitiveType)]) -> Vec<RouteSegment> {
        parse_template::<()>(path, |name| {
            Ok(kinds
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, k)| *k)
                .unwrap_or(PrimitiveType::String))
        })
        .unwrap()
    }

    fn router(routes: &[(&str, &str, usize)]) -> Router<usize> {
        let mut router = Router::default();
        for (method, path, index) in routes {
            router.insert(method, &template(path, &[]), *index).unwrap();
        }
        router
    }

    // === Normalization tests ===

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(normalize_path("/users/"), "/users");
    }

    #[test]
    fn normalize_collapses_double_slashes() {
        assert_eq!(normalize_path("/users//123"), "/users/123");
    }

    #[test]
    fn normalize_preserves_root() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    // === Template tests ===

    #[test]
    fn parse_template_segments() {
        let segments = template("/users/{id}/orders", &[("id", PrimitiveType::Number)]);
        assert_eq!(
            segments,
            vec![
                RouteSegment::Literal("users".into()),
                RouteSegment::Capture {
                    name: "id".into(),
                    kind: PrimitiveType::Number
                },
                RouteSegment::Literal("orders".into()),
            ]
        );
        assert_eq!(render_template(&segments), "/users/{id}/orders");
    }

    #[test]
    fn partial_braces_stay_literal() {
        let segments = template("/files/{name}.json", &[]);
        assert_eq!(segments[1], RouteSegment::Literal("{name}.json".into()));
    }

    // === Routing tests ===

    #[test]
    fn route_static_path() {
        let router = router(&[("GET", "/health", 0)]);
        match router.lookup("GET", "/health") {
            RouteMatch::Found { entry, params } => {
                assert_eq!(*entry, 0);
                assert!(params.is_empty());
            }
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn route_root_path() {
        let router = router(&[("GET", "/", 0)]);
        match router.lookup("GET", "/") {
            RouteMatch::Found { entry, .. } => assert_eq!(*entry, 0),
            _ => panic!("expected Found for root"),
        }
    }

    #[test]
    fn route_with_multiple_parameters() {
        let router = router(&[("GET", "/users/{userId}/orders/{orderId}", 0)]);
        match router.lookup("GET", "/users/42/orders/99") {
            RouteMatch::Found { params, .. } => assert_eq!(
                params,
                vec![
                    ("userId".to_string(), "42".to_string()),
                    ("orderId".to_string(), "99".to_string()),
                ]
            ),
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn unknown_method_is_not_found() {
        let router = router(&[("GET", "/users", 0)]);
        assert!(matches!(router.lookup("DELETE", "/users"), RouteMatch::NotFound));
        assert!(matches!(router.lookup("GET", "/posts"), RouteMatch::NotFound));
    }

    #[test]
    fn method_is_case_insensitive() {
        let router = router(&[("get", "/users", 0)]);
        assert!(matches!(router.lookup("GET", "/users"), RouteMatch::Found { .. }));
    }

    #[test]
    fn literal_takes_precedence_over_capture() {
        let router = router(&[("GET", "/users/{id}", 1), ("GET", "/users/me", 0)]);

        match router.lookup("GET", "/users/me") {
            RouteMatch::Found { entry, params } => {
                assert_eq!(*entry, 0);
                assert!(params.is_empty());
            }
            _ => panic!("expected Found for literal"),
        }
        match router.lookup("GET", "/users/123") {
            RouteMatch::Found { entry, params } => {
                assert_eq!(*entry, 1);
                assert_eq!(params, vec![("id".to_string(), "123".to_string())]);
            }
            _ => panic!("expected Found for capture"),
        }
    }

    #[test]
    fn literal_dead_end_backtracks_into_capture() {
        let router = router(&[("GET", "/users/me/profile", 0), ("GET", "/users/{id}/orders", 1)]);
        match router.lookup("GET", "/users/me/orders") {
            RouteMatch::Found { entry, params } => {
                assert_eq!(*entry, 1);
                assert_eq!(params, vec![("id".to_string(), "me".to_string())]);
            }
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn typed_captures_are_tried_in_insertion_order() {
        let mut router = Router::default();
        router
            .insert("GET", &template("/items/{id}", &[("id", PrimitiveType::Integer)]), 0)
            .unwrap();
        router
            .insert("GET", &template("/items/{slug}", &[]), 1)
            .unwrap();

        match router.lookup("GET", "/items/42") {
            RouteMatch::Found { entry, .. } => assert_eq!(*entry, 0),
            _ => panic!("expected integer route"),
        }
        match router.lookup("GET", "/items/forty-two") {
            RouteMatch::Found { entry, params } => {
                assert_eq!(*entry, 1);
                assert_eq!(params[0].0, "slug");
            }
            _ => panic!("expected string route"),
        }
    }

    #[test]
    fn typed_capture_rejects_mismatched_segment() {
        let mut router = Router::default();
        router
            .insert("GET", &template("/users/{id}", &[("id", PrimitiveType::Number)]), 0)
            .unwrap();
        assert!(matches!(router.lookup("GET", "/users/abc"), RouteMatch::NotFound));
        assert!(matches!(router.lookup("GET", "/users/4.2"), RouteMatch::Found { .. }));
    }

    #[test]
    fn captures_are_percent_decoded() {
        let router = router(&[("GET", "/tags/{tag}", 0)]);
        match router.lookup("GET", "/tags/r%C3%A9sum%C3%A9%20a") {
            RouteMatch::Found { params, .. } => assert_eq!(params[0].1, "résumé a"),
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn head_falls_back_to_get() {
        let router = router(&[("GET", "/users", 0), ("HEAD", "/status", 1)]);
        match router.lookup("HEAD", "/users") {
            RouteMatch::Found { entry, .. } => assert_eq!(*entry, 0),
            _ => panic!("expected GET fallback"),
        }
        match router.lookup("HEAD", "/status") {
            RouteMatch::Found { entry, .. } => assert_eq!(*entry, 1),
            _ => panic!("expected HEAD route"),
        }
        assert!(matches!(router.lookup("GET", "/status"), RouteMatch::NotFound));
    }

    #[test]
    fn route_normalizes_request_path() {
        let router = router(&[("GET", "/users/{id}", 0)]);
        for path in ["/users/123/", "/users//123"] {
            match router.lookup("GET", path) {
                RouteMatch::Found { params, .. } => {
                    assert_eq!(params, vec![("id".to_string(), "123".to_string())])
                }
                _ => panic!("expected Found for {}", path),
            }
        }
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let mut router = Router::default();
        router.insert("GET", &template("/users/{id}", &[]), 0).unwrap();
        let err = router
            .insert("get", &template("/users/{id}", &[]), 1)
            .unwrap_err();
        assert_eq!(err.code(), "E_DUPLICATE_ROUTE");
        assert_eq!(
            err,
            RouteError::DuplicateRoute {
                method: "GET".into(),
                template: "/users/{id}".into()
            }
        );
        assert_eq!(router.len(), 1);
    }
}
