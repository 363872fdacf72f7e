use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::LlmProvider;
use crate::models::chat::{ChatMessage, ContentPart, MessageRole, MessageType, PromptMessage, TokenUsage};
use crate::utils::error::ChatError;
use crate::utils::token_estimator::estimate_tokens;

/// Error code carried by the synthetic fragment of a failed model stream.
pub const STREAM_ERROR_CODE: u32 = 500;

/// Fragments of one assistant reply, in `sentence_id` order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = ChatMessage> + Send>>;

/// Batches model deltas into sentence fragments of one assistant reply.
#[derive(Clone)]
pub struct SentenceStreamer {
    provider: Arc<dyn LlmProvider>,
    min_sentence_runes: usize,
}

enum Step {
    Delta(String),
    Done,
    Cancelled,
    Failed(anyhow::Error),
}

impl SentenceStreamer {
    pub fn new(provider: Arc<dyn LlmProvider>, min_sentence_runes: usize) -> Self {
        Self {
            provider,
            min_sentence_runes,
        }
    }

    /// Opens the model stream and returns the fragments it batches into.
    ///
    /// The model is only read while the returned stream is polled, so a
    /// consumer that cancels between two fragments stops further reads.
    /// Fragments carry contiguous `sentence_id`s starting at 0. Exactly one
    /// terminal fragment ends the stream: the trailing buffer (`is_end`,
    /// `is_truncated`) on completion or cancellation, or an error-typed one
    /// if the model stream fails midway. The buffer of a failed stream is
    /// discarded.
    pub async fn chat_stream(
        &self,
        cancel: CancellationToken,
        prompt: &[PromptMessage],
        reply_id: String,
        prompt_tokens: u64,
    ) -> Result<FragmentStream, ChatError> {
        let mut deltas = self
            .provider
            .generate_stream(prompt)
            .await
            .map_err(|e| ChatError::Llm(e.to_string()))?;
        let min_sentence_runes = self.min_sentence_runes;

        let fragments = async_stream::stream! {
            let mut buffer = String::new();
            let mut sentence_id: u32 = 0;
            let mut completion_tokens: u64 = 0;

            loop {
                let step = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Cancelled,
                    item = deltas.next() => match item {
                        Some(Ok(delta)) => Step::Delta(delta),
                        Some(Err(e)) => Step::Failed(e),
                        None => Step::Done,
                    },
                };

                let cancelled = matches!(step, Step::Cancelled);
                match step {
                    Step::Delta(delta) => {
                        buffer.push_str(&delta);
                        let runes = estimate_tokens(&buffer);
                        if runes == 0 || runes < min_sentence_runes {
                            continue;
                        }
                        completion_tokens += runes as u64;
                        let usage = TokenUsage::new(prompt_tokens, completion_tokens);
                        debug!("Reply {} sentence {} ({} runes)", reply_id, sentence_id, runes);
                        yield answer_fragment(&reply_id, sentence_id, std::mem::take(&mut buffer), false, usage);
                        sentence_id += 1;
                    }
                    Step::Done | Step::Cancelled => {
                        if cancelled {
                            info!("Reply {} cancelled after {} sentence(s)", reply_id, sentence_id);
                        }
                        completion_tokens += estimate_tokens(&buffer) as u64;
                        let usage = TokenUsage::new(prompt_tokens, completion_tokens);
                        yield answer_fragment(&reply_id, sentence_id, buffer, true, usage);
                        break;
                    }
                    Step::Failed(e) => {
                        warn!("Model stream for reply {} failed: {}", reply_id, e);
                        yield error_fragment(&reply_id, sentence_id, &e.to_string());
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(fragments))
    }
}

fn answer_fragment(reply_id: &str, sentence_id: u32, text: String, is_end: bool, usage: TokenUsage) -> ChatMessage {
    let mut fragment = ChatMessage::new(reply_id, MessageRole::Assistant, MessageType::Answer);
    fragment.sentence_id = sentence_id;
    fragment.is_end = is_end;
    fragment.is_truncated = is_end;
    fragment.content = vec![ContentPart::text(text.clone())];
    fragment.text = text;
    fragment.usage = Some(usage);
    fragment
}

pub(crate) fn error_fragment(reply_id: &str, sentence_id: u32, error_msg: &str) -> ChatMessage {
    let mut fragment = ChatMessage::new(reply_id, MessageRole::Assistant, MessageType::Error);
    fragment.sentence_id = sentence_id;
    fragment.is_end = true;
    fragment.error_code = Some(STREAM_ERROR_CODE);
    fragment.error_msg = Some(error_msg.to_string());
    fragment
}
