//! Wire-format content blocks sent to the generative backend.
//!
//! Requests carry an ordered list of role-tagged [`Content`] blocks, each
//! holding [`Part`]s. A part serializes as a single-key object:
//!
//! ```text
//! {"text": "..."}
//! {"inlineData": {"mimeType": "image/png", "data": "<base64>"}}
//! {"functionCall": {"name": "generate_image", "args": {...}}}
//! {"functionResponse": {"name": "generate_image", "response": {...}}}
//! ```

use serde::{Deserialize, Serialize};

/// Role of a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    /// User input.
    User,
    /// Model output (text or function calls).
    Model,
    /// Function results returned to the model.
    Tool,
}

/// Base64 payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

impl InlineData {
    /// Create from a MIME type and base64 payload.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (meta, payload) = rest.split_once(',')?;
        let mime_type = meta.strip_suffix(";base64")?;
        if mime_type.is_empty() || payload.is_empty() {
            return None;
        }
        Some(Self::new(mime_type, payload))
    }

    /// Render as a `data:` URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A function invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// JSON arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The result of a function invocation, returned to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Function name, matching the call.
    pub name: String,
    /// JSON result.
    pub response: serde_json::Value,
}

/// One part of a content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    /// Plain text.
    Text(String),
    /// Inline binary (image or audio).
    InlineData(InlineData),
    /// Model function call.
    FunctionCall(FunctionCall),
    /// Function result.
    FunctionResponse(FunctionResponse),
}

/// A role-tagged content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Who produced the block.
    pub role: WireRole,
    /// Ordered parts.
    pub parts: Vec<Part>,
}

impl Content {
    /// A block with the given role and parts.
    pub fn new(role: WireRole, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// A single-text user block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(WireRole::User, vec![Part::Text(text.into())])
    }
}

/// Geographic bias for map-grounded retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_serializes_as_single_key_object() {
        let json = serde_json::to_value(Part::Text("hi".into())).unwrap_or_default();
        assert_eq!(json, serde_json::json!({"text": "hi"}));

        let json = serde_json::to_value(Part::InlineData(InlineData::new("image/png", "AAA=")))
            .unwrap_or_default();
        assert_eq!(
            json,
            serde_json::json!({"inlineData": {"mimeType": "image/png", "data": "AAA="}})
        );
    }

    #[test]
    fn content_role_is_lowercase() {
        let json = serde_json::to_value(Content::new(WireRole::Tool, vec![])).unwrap_or_default();
        assert_eq!(json["role"], "tool");
    }

    #[test]
    fn data_url_parse() {
        let parsed = InlineData::from_data_url("data:image/jpeg;base64,/9j/4AAQ");
        assert_eq!(parsed, Some(InlineData::new("image/jpeg", "/9j/4AAQ")));
        assert_eq!(
            parsed.map(|d| d.to_data_url()).as_deref(),
            Some("data:image/jpeg;base64,/9j/4AAQ")
        );
    }

    #[test]
    fn data_url_rejects_non_base64_and_remote_urls() {
        assert!(InlineData::from_data_url("https://example.test/a.png").is_none());
        assert!(InlineData::from_data_url("data:text/plain,hello").is_none());
        assert!(InlineData::from_data_url("data:;base64,AAA").is_none());
    }
}
