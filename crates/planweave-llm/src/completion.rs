use futures::StreamExt;
use tracing::debug;

use planweave_core::config::ModelConfig;
use planweave_core::error::Result;
use planweave_core::traits::LlmClient;
use planweave_core::types::{ChatMessage, StreamDelta};

/// A fully drained model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Send a single user prompt and collect the whole text reply.
pub async fn complete(
    llm: &dyn LlmClient,
    config: &ModelConfig,
    prompt: impl Into<String>,
) -> Result<Completion> {
    complete_messages(llm, config, vec![ChatMessage::user(prompt)]).await
}

/// Send a conversation and collect the whole text reply.
///
/// Thinking deltas are dropped; a stream error aborts the call.
pub async fn complete_messages(
    llm: &dyn LlmClient,
    config: &ModelConfig,
    messages: Vec<ChatMessage>,
) -> Result<Completion> {
    let mut stream = llm.chat_stream(config, messages).await?;
    let mut completion = Completion::default();

    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::TextDelta(text) => completion.content.push_str(&text),
            StreamDelta::Usage {
                input_tokens,
                output_tokens,
            } => {
                completion.input_tokens += input_tokens;
                completion.output_tokens += output_tokens;
            }
            StreamDelta::ThinkingDelta(_) | StreamDelta::Stop(_) => {}
        }
    }

    debug!(
        model = %config.model_id,
        chars = completion.content.len(),
        output_tokens = completion.output_tokens,
        "Completion received"
    );
    Ok(completion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planweave_core::error::PlanweaveError;
    use planweave_test_utils::{FnLlm, ScriptedLlm};

    #[tokio::test]
    async fn test_complete_joins_text_deltas() {
        let llm = ScriptedLlm::new(vec!["Hello, world"]);
        let config = ModelConfig::new("test-model");

        let completion = complete(&llm, &config, "hi").await.unwrap();
        assert_eq!(completion.content, "Hello, world");
        assert_eq!(llm.prompts(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_complete_propagates_request_error() {
        let llm = FnLlm::new(|_| Err(PlanweaveError::LlmRequest("503".into())));
        let config = ModelConfig::new("test-model");

        let err = complete(&llm, &config, "hi").await.unwrap_err();
        assert!(matches!(err, PlanweaveError::LlmRequest(_)));
    }
}
