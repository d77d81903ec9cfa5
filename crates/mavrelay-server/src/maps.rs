use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

/// Map provider parameters handed to viewers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapsParams {
    pub api_key: String,
    pub map_id: String,
}

impl MapsParams {
    pub fn new(api_key: impl Into<String>, map_id: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), map_id: map_id.into() }
    }

    /// The parameters as served: key obfuscated, map id as is.
    pub fn published(&self) -> Self {
        Self { api_key: obfuscate_key(&self.api_key), map_id: self.map_id.clone() }
    }
}

/// Base64 of the key, characters reversed. Keeps the key out of casual
/// scrapes of the page source; it is not encryption.
pub fn obfuscate_key(key: &str) -> String {
    STANDARD.encode(key.as_bytes()).chars().rev().collect()
}
