//! Content blocks returned by tool calls and prompts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Meta, Resource, ResourceContents};

/// A single content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Text content
    #[serde(rename = "text")]
    Text(TextContent),
    /// Image content (base64 encoded)
    #[serde(rename = "image")]
    Image(MediaContent),
    /// Audio content (base64 encoded)
    #[serde(rename = "audio")]
    Audio(MediaContent),
    /// Link to a resource without embedding it
    #[serde(rename = "resource_link")]
    ResourceLink(Resource),
    /// Embedded resource contents
    #[serde(rename = "resource")]
    Resource(EmbeddedResource),
}

impl Content {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent {
            text: text.into(),
            annotations: None,
            meta: None,
        })
    }

    /// Text of a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

/// Text content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// The text
    pub text: String,
    /// Audience and priority hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Image or audio content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaContent {
    /// Base64 encoded data
    pub data: String,
    /// MIME type of the data
    pub mime_type: String,
    /// Audience and priority hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Resource contents embedded in a content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    /// The embedded contents
    pub resource: ResourceContents,
    /// Audience and priority hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    /// Extension metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Sender of a prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human side of the conversation
    User,
    /// Model side of the conversation
    Assistant,
}
