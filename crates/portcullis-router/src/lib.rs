//! Prefix-trie HTTP request router.
//!
//! One trie per HTTP method, built once from the compiled contract. Literal
//! segments take precedence over typed captures, captures only match
//! segments that cast into their primitive type, and `HEAD` requests fall
//! back to the `GET` routes.

pub mod trie;

pub use trie::{normalize_path, parse_template, RouteError, RouteMatch, RouteSegment, Router};
