//! Shared types for the model client.
//!
//! Conversation types double as the wire format of the Gemini
//! `generateContent` API, so a `ConversationTurn` can be sent as-is inside a
//! request body and parsed back out of a response candidate.

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

// ─── Conversation Types ──────────────────────────────────────────────────────

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// The role expected to follow this one in a valid conversation.
    pub fn next(self) -> Self {
        match self {
            Role::User => Role::Model,
            Role::Model => Role::User,
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl ConversationTurn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    /// First text part of this turn, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(Part::as_text)
    }
}

/// A single content part of a turn.
///
/// Serialized untagged: the provider distinguishes parts by which key is
/// present (`text`, `inlineData`, `functionCall`, `functionResponse`).
/// Shapes this crate does not model are kept verbatim in `Other` so history
/// round-trips without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineMedia {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    ToolCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
        /// Opaque signature attached by thinking models; must be echoed back.
        #[serde(
            rename = "thoughtSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        thought_signature: Option<String>,
    },
    ToolResult {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
    Other(serde_json::Value),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Build an inline media part from raw bytes (base64-encoded on the wire).
    pub fn inline_media(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Part::InlineMedia {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        }
    }

    pub fn tool_result(name: impl Into<String>, response: serde_json::Value) -> Self {
        Part::ToolResult {
            function_response: FunctionResponse {
                name: name.into(),
                response,
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Base64 media payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// A tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default = "empty_object")]
    pub args: serde_json::Value,
}

/// A tool result sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

// ─── Tool Types ──────────────────────────────────────────────────────────────

/// A callable tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// OpenAPI-style object schema for the arguments.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model for the current round.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        let args = match args {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            name: name.into(),
            args,
        }
    }

    /// Read a string argument, treating empty strings as absent.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

impl From<&FunctionCall> for ToolInvocation {
    fn from(call: &FunctionCall) -> Self {
        Self::new(call.name.clone(), call.args.clone())
    }
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// Provider-agnostic request handed to a `ModelBackend`.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDeclaration>,
    pub contents: Vec<ConversationTurn>,
}

/// Request body for `models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest<'a> {
    pub contents: &'a [ConversationTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet<'a>>,
}

impl<'a> GenerateContentRequest<'a> {
    pub fn from_request(request: &'a ModelRequest) -> Self {
        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolSet {
                function_declarations: &request.tools,
            }]
        };
        Self {
            contents: &request.contents,
            system_instruction: request
                .system_instruction
                .as_ref()
                .map(|text| SystemInstruction {
                    parts: vec![Part::text(text.clone())],
                }),
            tools,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet<'a> {
    pub function_declarations: &'a [ToolDeclaration],
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Raw `generateContent` response (also the shape of each SSE event).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

/// A parsed model response: the first candidate's parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub parts: Vec<Part>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageMetadata>,
}

impl ModelResponse {
    /// Convert a raw provider response.
    ///
    /// A response with no candidates and a block reason means the prompt was
    /// refused; anything else without candidates is an empty (keep-alive) response.
    pub fn from_wire(raw: GenerateContentResponse) -> Result<Self, InferenceError> {
        let GenerateContentResponse {
            candidates,
            prompt_feedback,
            usage_metadata,
        } = raw;

        let Some(candidate) = candidates.into_iter().next() else {
            if let Some(reason) = prompt_feedback.and_then(|f| f.block_reason) {
                return Err(InferenceError::Blocked { reason });
            }
            return Ok(Self {
                usage: usage_metadata,
                ..Self::default()
            });
        };

        Ok(Self {
            parts: candidate.content.map(|c| c.parts).unwrap_or_default(),
            finish_reason: candidate.finish_reason,
            usage: usage_metadata,
        })
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    /// Tool calls in the order the model emitted them.
    pub fn tool_calls(&self) -> Vec<ToolInvocation> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall { function_call, .. } => Some(ToolInvocation::from(function_call)),
                _ => None,
            })
            .collect()
    }

    /// Fold a streamed fragment into this (aggregated) response.
    ///
    /// Adjacent text fragments are joined into a single text part; every
    /// other part is appended as-is.
    pub fn merge(&mut self, fragment: ModelResponse) {
        for part in fragment.parts {
            match (self.parts.last_mut(), part) {
                (Some(Part::Text { text: acc }), Part::Text { text }) => acc.push_str(&text),
                (_, part) => self.parts.push(part),
            }
        }
        if fragment.finish_reason.is_some() {
            self.finish_reason = fragment.finish_reason;
        }
        if fragment.usage.is_some() {
            self.usage = fragment.usage;
        }
    }

    /// The turn to record in history for this response.
    ///
    /// The provider rejects turns with no parts, so an empty response is
    /// recorded as an empty text part.
    pub fn to_turn(&self) -> ConversationTurn {
        let parts = if self.parts.is_empty() {
            vec![Part::text("")]
        } else {
            self.parts.clone()
        };
        ConversationTurn::new(Role::Model, parts)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
