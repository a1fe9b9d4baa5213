//! History compression using LLM summarization.

use super::types::SessionMessage;
use crate::error::{RelayError, RelayResult};
use crate::provider::{ChatMessage, ChatRequest, Provider};
use qqbot_common::ChatConfig;
use std::sync::Arc;

/// Prefix of the system message that replaces compressed history.
pub const SUMMARY_PREFIX: &str = "[历史对话摘要] ";

const SUMMARY_INSTRUCTION: &str = "请用一段简短的文字总结以下对话的要点，保留关键信息：";
const SUMMARY_MAX_TOKENS: u32 = 300;

/// Whether `history` has outgrown the configured window.
pub fn needs_compression(history: &[SessionMessage], config: &ChatConfig) -> bool {
    history.len() > config.history_window()
}

/// Replaces old history with a one-message summary.
pub struct HistoryCompressor {
    provider: Arc<dyn Provider>,
}

impl HistoryCompressor {
    /// `provider` should be the bare client; summaries are not retried.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Compress `history`, keeping the newest `2 × summaryThreshold` messages
    /// verbatim (capped below the history window).
    ///
    /// Histories no longer than the kept tail are returned unchanged, without
    /// a summary request. On summary failure the older part is dropped.
    pub async fn compress(
        &self,
        mut history: Vec<SessionMessage>,
        config: &ChatConfig,
    ) -> Vec<SessionMessage> {
        let keep = config.keep_after_compression();
        if history.len() <= keep {
            return history;
        }

        let to_keep = history.split_off(history.len() - keep);
        let to_compress = history;

        match self.summarize(&to_compress, config).await {
            Ok(summary) => {
                tracing::info!(
                    compressed = to_compress.len(),
                    kept = to_keep.len(),
                    "Compressed session history"
                );
                let mut result = Vec::with_capacity(to_keep.len() + 1);
                result.push(SessionMessage::system(format!("{SUMMARY_PREFIX}{summary}")));
                result.extend(to_keep);
                result
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    dropped = to_compress.len(),
                    "History summary failed, truncating"
                );
                to_keep
            }
        }
    }

    async fn summarize(
        &self,
        messages: &[SessionMessage],
        config: &ChatConfig,
    ) -> RelayResult<String> {
        let request = ChatRequest {
            model: config.summary_model().to_string(),
            messages: vec![ChatMessage::user(format!(
                "{SUMMARY_INSTRUCTION}\n\n{}",
                format_transcript(messages)
            ))],
            max_tokens: Some(SUMMARY_MAX_TOKENS),
            temperature: None,
        };

        let response = self
            .provider
            .chat(request)
            .await
            .map_err(|e| RelayError::Summarization(e.to_string()))?;

        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(RelayError::Summarization("empty summary".into()));
        }
        Ok(summary.to_string())
    }
}

/// Flatten messages into `role: content` lines.
fn format_transcript(messages: &[SessionMessage]) -> String {
    messages
        .iter()
        .map(|msg| format!("{}: {}", msg.role.as_str(), msg.content))
        .collect::<Vec<_>>()
        .join("\n")
}
