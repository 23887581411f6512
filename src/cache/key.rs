//! Cache key derivation.
//!
//! A key is the blake3 digest of a canonical JSON document holding the
//! method, the URL without its query, the selected query parameters, the
//! significant request headers and a digest of a non-empty body. Maps are
//! `BTreeMap`s so the document, and therefore the key, is deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::CacheConfig;
use crate::http::request::HttpRequest;

/// Opaque cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct KeyDocument<'a> {
    method: &'a str,
    url: String,
    params: BTreeMap<String, Vec<String>>,
    headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

/// Derive the cache key of `request` under `config`.
pub fn cache_key(request: &HttpRequest, config: &CacheConfig) -> CacheKey {
    let mut base = request.url.clone();
    base.set_query(None);
    base.set_fragment(None);

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in request.query_pairs() {
        let selected = config
            .key_params
            .as_ref()
            .map_or(true, |keep| keep.contains(&name));
        if selected {
            params.entry(name).or_default().push(value);
        }
    }

    let mut headers = BTreeMap::new();
    for (name, value) in request.headers.iter() {
        let name = name.as_str();
        if config.keys_header(name) {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
    }

    let body = (!request.body.is_empty()).then(|| blake3::hash(&request.body).to_hex().to_string());

    let document = KeyDocument {
        method: request.method.as_str(),
        url: base.to_string(),
        params,
        headers,
        body,
    };

    // Serializing string maps cannot fail.
    let canonical = serde_json::to_vec(&document)
        .unwrap_or_else(|_| format!("{}|{}", document.method, document.url).into_bytes());
    CacheKey(blake3::hash(&canonical).to_hex().to_string())
}
