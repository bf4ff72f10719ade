//! The record written by the formatter.

use serde::Serialize;

/// One formatted record. Field order here is the key order on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Record {
    pub text: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub phase: String,
    pub outcome: String,
    pub tags: Vec<String>,
    pub mood: String,
}

impl Record {
    /// Compact JSON. Empty metadata stays present as `""` or `[]`.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Splits `raw` on commas, trims each tag and drops empty ones.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}
