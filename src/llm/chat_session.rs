//! Conversation history with context window tracking.
//!
//! A [`ChatSession`] owns the running conversation for the console chat: the system
//! prompt, every user question and every assistant reply. Token counts are kept per
//! message so the oldest turns can be dropped once the history outgrows the model's
//! context window.

use crate::error::Result;
use crate::llm::broker::LlmBroker;
use crate::llm::gateway::CompletionConfig;
use crate::llm::gateways::TokenizerGateway;
use crate::llm::models::{LlmMessage, MessageRole};
use crate::llm::tools::LlmTool;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use tracing::debug;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_MAX_CONTEXT: usize = 32768;

/// An `LlmMessage` together with its token count.
#[derive(Debug, Clone, Serialize)]
pub struct SizedLlmMessage {
    #[serde(flatten)]
    pub message: LlmMessage,
    pub token_length: usize,
}

impl SizedLlmMessage {
    pub fn new(message: LlmMessage, token_length: usize) -> Self {
        Self {
            message,
            token_length,
        }
    }

    pub fn role(&self) -> MessageRole {
        self.message.role
    }

    pub fn content(&self) -> Option<&str> {
        self.message.content.as_deref()
    }
}

/// A chat session that trims its history to fit a context window.
///
/// The system prompt (first message) and the latest user turn are never trimmed.
///
/// # Examples
///
/// ```ignore
/// use quarto_chat::config::AppConfig;
/// use quarto_chat::llm::{ChatSession, LlmBroker};
///
/// let config = AppConfig::from_env()?;
/// let gateway = config.provider.build_gateway(&config)?;
/// let broker = LlmBroker::new(config.model(), gateway);
/// let mut session = ChatSession::new(broker);
///
/// let reply = session.send("How do I read a CSV with pandas?").await?;
/// println!("{}", reply);
/// ```
pub struct ChatSession {
    broker: LlmBroker,
    messages: Vec<SizedLlmMessage>,
    tools: Option<Vec<Box<dyn LlmTool>>>,
    max_context: usize,
    tokenizer_gateway: TokenizerGateway,
    temperature: f32,
}

impl ChatSession {
    pub fn new(broker: LlmBroker) -> Self {
        Self::builder(broker).build()
    }

    /// Start building a session.
    ///
    /// ```ignore
    /// let session = ChatSession::builder(broker)
    ///     .system_prompt(prompt::system_prompt(&author, Local::now().naive_local()))
    ///     .tools(vec![Box::new(ShowAnswerTool::new(config.writer()))])
    ///     .max_context(16384)
    ///     .build();
    /// ```
    pub fn builder(broker: LlmBroker) -> ChatSessionBuilder {
        ChatSessionBuilder::new(broker)
    }

    /// Send a user message and wait for the full reply.
    ///
    /// The user message is recorded before the model is called and stays in the
    /// history if the call fails. The reply is recorded on success.
    pub async fn send(&mut self, query: &str) -> Result<String> {
        self.insert_message(LlmMessage::user(query));

        let messages = self.conversation();
        let config = self.completion_config();

        let response = self.broker.generate(&messages, self.tools.as_deref(), &config).await?;

        self.insert_message(LlmMessage::assistant(&response));
        Ok(response)
    }

    /// Send a user message and stream the reply.
    ///
    /// The assembled reply is recorded once the stream has been fully consumed. If the
    /// stream yields an error, nothing is recorded for the reply.
    pub fn send_stream<'a>(
        &'a mut self,
        query: &str,
    ) -> Pin<Box<dyn Stream<Item = Result<String>> + 'a>> {
        self.insert_message(LlmMessage::user(query));

        let messages = self.conversation();
        let config = self.completion_config();

        Box::pin(async_stream::stream! {
            let mut reply = String::new();
            let mut inner = self.broker.generate_stream(&messages, self.tools.as_deref(), &config);

            while let Some(result) = inner.next().await {
                match result {
                    Ok(chunk) => {
                        reply.push_str(&chunk);
                        yield Ok(chunk);
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            drop(inner);
            self.insert_message(LlmMessage::assistant(reply));
        })
    }

    /// Append a message, then drop the oldest turns until the history fits in
    /// `max_context` tokens.
    ///
    /// Trimming removes whole turns: everything before the next user message goes at once,
    /// so the first message after the system prompt is always a user message. The system
    /// prompt and the latest user turn (with anything after it) are never removed, even if
    /// they alone exceed the limit.
    pub fn insert_message(&mut self, message: LlmMessage) {
        let sized = self.build_sized_message(message);
        self.messages.push(sized);

        let mut total = self.total_tokens();
        while total > self.max_context {
            let Some(end) = self.next_trim_boundary() else {
                break;
            };
            for removed in self.messages.drain(1..end) {
                total -= removed.token_length;
                debug!(
                    role = ?removed.role(),
                    removed_tokens = removed.token_length,
                    remaining = total,
                    "Trimmed message from history"
                );
            }
        }
    }

    /// Index of the user message the history should start from after dropping the oldest
    /// turn, or `None` when nothing can be dropped.
    fn next_trim_boundary(&self) -> Option<usize> {
        let newest = self.messages.len().checked_sub(1)?;
        let keep_from = self
            .messages
            .iter()
            .rposition(|m| m.role() == MessageRole::User)
            .unwrap_or(newest);

        // with no user message at all, drop one message at a time
        (2..=keep_from)
            .find(|&i| self.messages[i].role() == MessageRole::User)
            .or((keep_from > 1).then_some(2))
    }

    pub fn messages(&self) -> &[SizedLlmMessage] {
        &self.messages
    }

    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.token_length).sum()
    }

    pub fn model(&self) -> &str {
        self.broker.model()
    }

    fn conversation(&self) -> Vec<LlmMessage> {
        self.messages.iter().map(|m| m.message.clone()).collect()
    }

    fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            temperature: self.temperature,
            ..Default::default()
        }
    }

    fn build_sized_message(&self, message: LlmMessage) -> SizedLlmMessage {
        let token_length = message
            .content
            .as_deref()
            .map(|content| self.tokenizer_gateway.count_tokens(content))
            .unwrap_or(0);

        SizedLlmMessage::new(message, token_length)
    }
}

/// Builder for [`ChatSession`].
pub struct ChatSessionBuilder {
    broker: LlmBroker,
    system_prompt: String,
    tools: Option<Vec<Box<dyn LlmTool>>>,
    max_context: usize,
    tokenizer_gateway: Option<TokenizerGateway>,
    temperature: f32,
}

impl ChatSessionBuilder {
    fn new(broker: LlmBroker) -> Self {
        Self {
            broker,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tools: None,
            max_context: DEFAULT_MAX_CONTEXT,
            tokenizer_gateway: None,
            temperature: 1.0,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tools(mut self, tools: Vec<Box<dyn LlmTool>>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Maximum history size in tokens (default: 32768)
    pub fn max_context(mut self, max_context: usize) -> Self {
        self.max_context = max_context;
        self
    }

    /// Tokenizer used to size messages (default: cl100k_base)
    pub fn tokenizer_gateway(mut self, gateway: TokenizerGateway) -> Self {
        self.tokenizer_gateway = Some(gateway);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build(self) -> ChatSession {
        let tokenizer_gateway = self.tokenizer_gateway.unwrap_or_default();
        let token_length = tokenizer_gateway.count_tokens(&self.system_prompt);

        ChatSession {
            broker: self.broker,
            messages: vec![SizedLlmMessage::new(
                LlmMessage::system(self.system_prompt),
                token_length,
            )],
            tools: self.tools,
            max_context: self.max_context,
            tokenizer_gateway,
            temperature: self.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuartoChatError;
    use crate::llm::gateway::{LlmGateway, StreamChunk};
    use crate::llm::models::{LlmGatewayResponse, LlmToolCall};
    use crate::llm::tools::ShowAnswerTool;
    use crate::writer::UniqueWriter;
    use futures::stream;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    // Each call pops the next scripted turn; buffered and streamed calls share the script
    struct ScriptedGateway {
        turns: Mutex<Vec<Result<LlmGatewayResponse>>>,
        temperatures: Mutex<Vec<f32>>,
    }

    impl ScriptedGateway {
        fn new(turns: Vec<Result<LlmGatewayResponse>>) -> Self {
            Self {
                turns: Mutex::new(turns.into_iter().rev().collect()),
                temperatures: Mutex::new(vec![]),
            }
        }

        fn replies(replies: &[&str]) -> Self {
            Self::new(
                replies
                    .iter()
                    .map(|r| {
                        Ok(LlmGatewayResponse {
                            content: Some(r.to_string()),
                            tool_calls: vec![],
                        })
                    })
                    .collect(),
            )
        }

        fn next(&self, config: &CompletionConfig) -> Result<LlmGatewayResponse> {
            self.temperatures.lock().unwrap().push(config.temperature);
            self.turns.lock().unwrap().pop().unwrap_or_else(|| {
                Ok(LlmGatewayResponse {
                    content: Some("default response".to_string()),
                    tool_calls: vec![],
                })
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmGateway for ScriptedGateway {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _model: &str,
            _messages: &[LlmMessage],
            _tools: Option<&[Box<dyn LlmTool>]>,
            config: &CompletionConfig,
        ) -> Result<LlmGatewayResponse> {
            self.next(config)
        }

        fn complete_stream<'a>(
            &'a self,
            _model: &'a str,
            _messages: &'a [LlmMessage],
            _tools: Option<&'a [Box<dyn LlmTool>]>,
            config: &'a CompletionConfig,
        ) -> Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>> {
            let chunks: Vec<Result<StreamChunk>> = match self.next(config) {
                Ok(response) => {
                    let mut chunks: Vec<Result<StreamChunk>> = response
                        .content
                        .unwrap_or_default()
                        .split_inclusive(' ')
                        .map(|word| Ok(StreamChunk::Content(word.to_string())))
                        .collect();
                    if !response.tool_calls.is_empty() {
                        chunks.push(Ok(StreamChunk::ToolCalls(response.tool_calls)));
                    }
                    chunks
                }
                Err(e) => vec![Err(e)],
            };
            Box::pin(stream::iter(chunks))
        }
    }

    fn session_with(gateway: ScriptedGateway) -> ChatSession {
        ChatSession::new(LlmBroker::new("test-model", Arc::new(gateway)))
    }

    async fn drain(session: &mut ChatSession, query: &str) -> Vec<Result<String>> {
        session.send_stream(query).collect().await
    }

    #[test]
    fn test_new_session_has_system_message() {
        let session = session_with(ScriptedGateway::replies(&[]));

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role(), MessageRole::System);
        assert_eq!(session.messages()[0].content(), Some(DEFAULT_SYSTEM_PROMPT));
        assert_eq!(session.model(), "test-model");
    }

    #[test]
    fn test_builder_options() {
        let broker = LlmBroker::new("m", Arc::new(ScriptedGateway::replies(&[])));
        let tool: Box<dyn LlmTool> = Box::new(ShowAnswerTool::new(UniqueWriter::new(".")));

        let session = ChatSession::builder(broker)
            .system_prompt("Answer with Quarto documents.")
            .tools(vec![tool])
            .max_context(16384)
            .temperature(0.5)
            .tokenizer_gateway(TokenizerGateway::new("p50k_base").unwrap())
            .build();

        assert_eq!(session.messages()[0].content(), Some("Answer with Quarto documents."));
        assert_eq!(session.tools.as_ref().map(Vec::len), Some(1));
        assert_eq!(session.max_context, 16384);
        assert_eq!(session.temperature, 0.5);
    }

    #[tokio::test]
    async fn test_send_adds_messages_to_history() {
        let mut session = session_with(ScriptedGateway::replies(&["Hello, World!"]));

        let response = session.send("Hi").await.unwrap();

        assert_eq!(response, "Hello, World!");
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[1].role(), MessageRole::User);
        assert_eq!(session.messages()[1].content(), Some("Hi"));
        assert_eq!(session.messages()[2].role(), MessageRole::Assistant);
        assert_eq!(session.messages()[2].content(), Some("Hello, World!"));
    }

    #[tokio::test]
    async fn test_send_multiple_turns() {
        let mut session = session_with(ScriptedGateway::replies(&["First", "Second"]));

        session.send("First query").await.unwrap();
        session.send("Second query").await.unwrap();

        assert_eq!(session.messages().len(), 5);
        assert_eq!(session.messages()[3].content(), Some("Second query"));
        assert_eq!(session.messages()[4].content(), Some("Second"));
    }

    #[tokio::test]
    async fn test_send_uses_session_temperature() {
        let gateway = Arc::new(ScriptedGateway::replies(&["ok"]));
        let broker = LlmBroker::new("m", gateway.clone());
        let mut session = ChatSession::builder(broker).temperature(0.2).build();

        session.send("Hi").await.unwrap();

        assert_eq!(*gateway.temperatures.lock().unwrap(), vec![0.2]);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_user_message() {
        let mut session = session_with(ScriptedGateway::new(vec![Err(
            QuartoChatError::GatewayError("HTTP 529: overloaded".to_string()),
        )]));

        let result = session.send("What is a p-value?").await;

        assert!(matches!(result, Err(QuartoChatError::GatewayError(_))));
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content(), Some("What is a p-value?"));
    }

    #[tokio::test]
    async fn test_send_with_show_answer_records_final_reply() {
        let dir = TempDir::new().unwrap();
        let call = LlmToolCall {
            id: Some("toolu_1".to_string()),
            name: "show_answer".to_string(),
            arguments: [
                ("filename".to_string(), Value::from("read-a-csv-file")),
                ("answer".to_string(), Value::from("pd.read_csv()")),
            ]
            .into_iter()
            .collect(),
        };
        let gateway = ScriptedGateway::new(vec![
            Ok(LlmGatewayResponse {
                content: None,
                tool_calls: vec![call],
            }),
            Ok(LlmGatewayResponse {
                content: Some("Written.".to_string()),
                tool_calls: vec![],
            }),
        ]);
        let broker = LlmBroker::new("m", Arc::new(gateway));
        let tools: Vec<Box<dyn LlmTool>> =
            vec![Box::new(ShowAnswerTool::new(UniqueWriter::new(dir.path())))];
        let mut session = ChatSession::builder(broker).tools(tools).build();

        let reply = session.send("How do I read a CSV?").await.unwrap();

        assert_eq!(reply, "Written.");
        assert!(dir.path().join("read-a-csv-file.qmd").exists());
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn test_insert_message_calculates_token_length() {
        let mut session = session_with(ScriptedGateway::replies(&[]));

        session.insert_message(LlmMessage::user("Hello"));

        assert_eq!(session.messages().len(), 2);
        assert!(session.messages()[1].token_length > 0);
    }

    #[test]
    fn test_message_with_no_content_has_zero_tokens() {
        let mut session = session_with(ScriptedGateway::replies(&[]));

        session.insert_message(LlmMessage::assistant_tool_calls(None, vec![]));

        assert_eq!(session.messages()[1].token_length, 0);
    }

    #[test]
    fn test_context_window_trimming() {
        let broker = LlmBroker::new("m", Arc::new(ScriptedGateway::replies(&[])));
        let mut session = ChatSession::builder(broker).max_context(50).build();

        for i in 0..10 {
            session.insert_message(LlmMessage::user(format!(
                "This is a longer message number {} with more content to increase token count",
                i
            )));
        }

        assert!(session.messages().len() < 11);
        assert_eq!(session.messages()[0].role(), MessageRole::System);
        assert!(session.total_tokens() <= 50);
        let last = session.messages().last().unwrap();
        assert!(last.content().unwrap().contains("number 9"));
    }

    #[test]
    fn test_context_window_preserves_system_prompt() {
        let broker = LlmBroker::new("m", Arc::new(ScriptedGateway::replies(&[])));
        let mut session = ChatSession::builder(broker)
            .system_prompt("Important system prompt")
            .max_context(50)
            .build();

        for i in 0..20 {
            session.insert_message(LlmMessage::user(format!("Message {}", i)));
        }

        assert_eq!(session.messages()[0].content(), Some("Important system prompt"));
    }

    #[test]
    fn test_trimming_keeps_oversized_newest_message() {
        let broker = LlmBroker::new("m", Arc::new(ScriptedGateway::replies(&[])));
        let mut session = ChatSession::builder(broker).max_context(20).build();
        session.insert_message(LlmMessage::user("Hi"));
        session.insert_message(LlmMessage::assistant("Hello"));

        let question = "Please explain in detail how a generalized additive model differs \
                        from a generalized linear model, with an example in R and Python";
        session.insert_message(LlmMessage::user(question));

        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0].role(), MessageRole::System);
        assert_eq!(session.messages()[1].content(), Some(question));
    }

    #[test]
    fn test_trimming_drops_whole_turns() {
        let broker = LlmBroker::new("m", Arc::new(ScriptedGateway::replies(&[])));
        let mut session = ChatSession::builder(broker).max_context(60).build();

        for i in 0..6 {
            session.insert_message(LlmMessage::user(format!("Question number {} about pandas", i)));
            session.insert_message(LlmMessage::assistant(format!(
                "Answer number {} with a longer explanation of the pandas API",
                i
            )));
        }

        let messages = session.messages();
        assert_eq!(messages[0].role(), MessageRole::System);
        assert_eq!(messages[1].role(), MessageRole::User);
        assert!(messages.len() < 13);
        assert!(session.total_tokens() <= 60);
        assert!(messages.last().unwrap().content().unwrap().starts_with("Answer number 5"));
    }

    #[test]
    fn test_trimming_keeps_latest_user_turn_with_its_reply() {
        let broker = LlmBroker::new("m", Arc::new(ScriptedGateway::replies(&[])));
        let mut session = ChatSession::builder(broker).max_context(30).build();
        session.insert_message(LlmMessage::user("What is a p-value?"));
        session.insert_message(LlmMessage::assistant("A probability."));
        session.insert_message(LlmMessage::user("And a confidence interval?"));

        session.insert_message(LlmMessage::assistant(
            "A range of plausible values for a parameter, computed from the sample so that \
             the procedure covers the true value at the stated rate",
        ));

        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content(), Some("And a confidence interval?"));
        assert_eq!(messages[2].role(), MessageRole::Assistant);
    }

    #[test]
    fn test_total_tokens() {
        let mut session = session_with(ScriptedGateway::replies(&[]));
        let initial = session.total_tokens();
        assert!(initial > 0);

        session.insert_message(LlmMessage::user("Hello"));

        assert!(session.total_tokens() > initial);
    }

    #[test]
    fn test_sized_message_serializes_flat() {
        let sized = SizedLlmMessage::new(LlmMessage::user("Test content"), 5);

        let json = serde_json::to_value(&sized).unwrap();

        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Test content");
        assert_eq!(json["token_length"], 5);
    }

    #[tokio::test]
    async fn test_send_stream_yields_chunks_and_records_reply() {
        let mut session = session_with(ScriptedGateway::replies(&["Hello world"]));

        let chunks: Vec<String> =
            drain(&mut session, "Hi").await.into_iter().map(|c| c.unwrap()).collect();

        assert_eq!(chunks, vec!["Hello ", "world"]);
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[1].content(), Some("Hi"));
        assert_eq!(session.messages()[2].role(), MessageRole::Assistant);
        assert_eq!(session.messages()[2].content(), Some("Hello world"));
    }

    #[tokio::test]
    async fn test_send_stream_error_records_no_reply() {
        let mut session = session_with(ScriptedGateway::new(vec![Err(
            QuartoChatError::GatewayError("stream dropped".to_string()),
        )]));

        let items = drain(&mut session, "Hi").await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].role(), MessageRole::User);
    }

    #[tokio::test]
    async fn test_send_stream_respects_context_capacity() {
        let broker = LlmBroker::new(
            "m",
            Arc::new(ScriptedGateway::replies(&[
                "This is a longer response to consume tokens in the context window",
                "Another longer response that also consumes many tokens in context",
            ])),
        );
        let mut session = ChatSession::builder(broker).max_context(50).build();

        drain(&mut session, "First longer query message with extra words").await;
        drain(&mut session, "Second longer query message with extra words").await;

        assert_eq!(session.messages()[0].role(), MessageRole::System);
        assert!(session.total_tokens() <= 50);
    }
}
