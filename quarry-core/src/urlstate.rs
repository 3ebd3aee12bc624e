//! URL round-tripping for search state
//!
//! The URL query string is the canonical serialization of the search
//! view's committed state: `q` carries the query text, `filters` carries
//! a URL-encoded JSON object mapping tag names to selection flags.
//! `decode(encode(s)) == s` holds for any normalized state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logical state of the search view: query text plus tag filters.
///
/// Filters live in a `BTreeMap` so serialization order is stable without
/// an explicit sort step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchState {
    pub query: String,
    pub filters: BTreeMap<String, bool>,
}

impl SearchState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: BTreeMap::new(),
        }
    }

    /// Normalized form: trimmed query, deselected tags dropped.
    ///
    /// Equivalent requests must collapse to one cache key, so everything
    /// that does not change the search result is erased here.
    pub fn normalized(&self) -> Self {
        Self {
            query: self.query.trim().to_string(),
            filters: self
                .filters
                .iter()
                .filter(|(_, selected)| **selected)
                .map(|(tag, _)| (tag.clone(), true))
                .collect(),
        }
    }

    /// Selected tags in stable (sorted) order.
    pub fn selected_tags(&self) -> Vec<String> {
        self.filters
            .iter()
            .filter(|(_, selected)| **selected)
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.query.trim().is_empty()
    }
}

/// Encode a search state as a URL query string.
///
/// An empty filter set encodes to the absence of the `filters` parameter,
/// and an empty query to an empty string.
pub fn encode(state: &SearchState) -> String {
    let state = state.normalized();
    let mut parts = Vec::new();

    if !state.query.is_empty() {
        parts.push(format!("q={}", urlencoding::encode(&state.query)));
    }

    if !state.filters.is_empty() {
        // BTreeMap keys serialize in sorted order
        let json = serde_json::to_string(&state.filters).expect("filter map serializes");
        parts.push(format!("filters={}", urlencoding::encode(&json)));
    }

    parts.join("&")
}

/// Decode a URL query string back into a search state.
///
/// Unknown parameters are ignored; a malformed `filters` payload is an
/// error rather than a silently empty filter set.
pub fn decode(query_string: &str) -> Result<SearchState> {
    let mut state = SearchState::default();

    let trimmed = query_string.trim_start_matches('?');
    if trimmed.is_empty() {
        return Ok(state);
    }

    for pair in trimmed.split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map_err(|e| Error::QueryString(format!("bad percent-encoding in {:?}: {}", name, e)))?;

        match name {
            "q" => state.query = value.into_owned(),
            "filters" => {
                let filters: BTreeMap<String, bool> = serde_json::from_str(&value)
                    .map_err(|e| Error::QueryString(format!("bad filters payload: {}", e)))?;
                state.filters = filters;
            }
            _ => {}
        }
    }

    Ok(state.normalized())
}
