use serde::{Deserialize, Serialize};

/// Line types of the data stream protocol. Every variant owns a single
/// character tag that prefixes its line on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StreamPartType {
    Text,
    Reasoning,
    RedactedReasoning,
    ReasoningSignature,
    Source,
    Data,
    MessageAnnotation,
    Error,
    ToolCallStreamingStart,
    ToolCallDelta,
    ToolCall,
    ToolResult,
    StartStep,
    FinishStep,
    FinishMessage,
}

impl StreamPartType {
    pub const ALL: [StreamPartType; 15] = [
        StreamPartType::Text,
        StreamPartType::Reasoning,
        StreamPartType::RedactedReasoning,
        StreamPartType::ReasoningSignature,
        StreamPartType::Source,
        StreamPartType::Data,
        StreamPartType::MessageAnnotation,
        StreamPartType::Error,
        StreamPartType::ToolCallStreamingStart,
        StreamPartType::ToolCallDelta,
        StreamPartType::ToolCall,
        StreamPartType::ToolResult,
        StreamPartType::StartStep,
        StreamPartType::FinishStep,
        StreamPartType::FinishMessage,
    ];

    pub fn code(self) -> char {
        match self {
            StreamPartType::Text => '0',
            StreamPartType::Reasoning => 'g',
            StreamPartType::RedactedReasoning => 'i',
            StreamPartType::ReasoningSignature => 'j',
            StreamPartType::Source => 'h',
            StreamPartType::Data => '2',
            StreamPartType::MessageAnnotation => '8',
            StreamPartType::Error => '3',
            StreamPartType::ToolCallStreamingStart => 'b',
            StreamPartType::ToolCallDelta => 'c',
            StreamPartType::ToolCall => '9',
            StreamPartType::ToolResult => 'a',
            StreamPartType::StartStep => 'f',
            StreamPartType::FinishStep => 'e',
            StreamPartType::FinishMessage => 'd',
        }
    }

    pub fn from_code(tag: &str) -> Option<Self> {
        let mut chars = tag.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Self::ALL.into_iter().find(|p| p.code() == c)
    }

    /// Parts whose payload is a plain string that must be quoted on the wire.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            StreamPartType::Text | StreamPartType::Reasoning | StreamPartType::Error
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    Unknown,
}
