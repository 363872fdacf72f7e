use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{FinishReason, ProtoError, StreamPartType};

/// Response header announcing the data stream protocol to clients.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishMessage {
    pub finish_reason: FinishReason,
    pub usage: StreamUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishStep {
    pub finish_reason: FinishReason,
    pub usage: StreamUsage,
    pub is_continued: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStep {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallStart {
    pub tool_call_id: String,
    pub tool_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallDelta {
    pub tool_call_id: String,
    pub args_text_delta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: Value,
}

/// JSON string literal for `s`, quotes included.
fn quote(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

/// Encodes one protocol line: `<tag>:<payload>\n`.
///
/// String parts (text, reasoning, error) are escaped as JSON strings. Redacted
/// reasoning and source parts wrap the payload in `{"data":..}` / `{"url":..}`.
/// Every other part expects `payload` to already be a JSON document and
/// embeds it verbatim.
pub fn encode(part: StreamPartType, payload: &str) -> String {
    let body = match part {
        p if p.is_text() => quote(payload),
        StreamPartType::RedactedReasoning => json!({ "data": payload }).to_string(),
        StreamPartType::Source => json!({ "url": payload }).to_string(),
        _ => payload.to_owned(),
    };
    format!("{}:{}\n", part.code(), body)
}

/// Like [`encode`] but keyed by the raw tag. Unknown tags produce an empty
/// string, which callers treat as nothing to send.
pub fn encode_tagged(tag: &str, payload: &str) -> String {
    match StreamPartType::from_code(tag) {
        Some(part) => encode(part, payload),
        None => String::new(),
    }
}

/// Serializes a structured payload and encodes it under `part`.
pub fn encode_json<T: Serialize>(part: StreamPartType, value: &T) -> Result<String, ProtoError> {
    let raw = serde_json::to_string(value)?;
    Ok(encode(part, &raw))
}

/// Splits a protocol line back into its part type and raw payload.
pub fn decode_line(line: &str) -> Result<(StreamPartType, &str), ProtoError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let (tag, payload) = line
        .split_once(':')
        .ok_or_else(|| ProtoError::UnknownTag(line.to_owned()))?;
    let part = StreamPartType::from_code(tag).ok_or_else(|| ProtoError::UnknownTag(tag.to_owned()))?;
    Ok((part, payload))
}
