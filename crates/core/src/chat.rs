use crate::endpoint::base_url;
use crate::error::ChatError;
use crate::retriever::Retriever;
use crate::traits::VectorIndex;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

pub const GENERATION_SEED: u64 = 365;
pub const MAX_RESPONSE_TOKENS: u32 = 500;
const DEFAULT_USER_NAME: &str = "User";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseStyle {
    #[default]
    Normal,
    Explain,
    Summarize,
    StepByStep,
}

impl ResponseStyle {
    pub fn instruction(self) -> &'static str {
        match self {
            ResponseStyle::Normal => "Answer concisely with relevant information",
            ResponseStyle::Explain => "Explain it like I am seven years old",
            ResponseStyle::Summarize => "Provide a short, clear summary of the topic",
            ResponseStyle::StepByStep => "Break it down into logical step-by-step explanations",
        }
    }
}

impl FromStr for ResponseStyle {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
            "normal" | "concise" => Ok(ResponseStyle::Normal),
            "explain" => Ok(ResponseStyle::Explain),
            "summarize" => Ok(ResponseStyle::Summarize),
            "step by step" => Ok(ResponseStyle::StepByStep),
            other => Err(ChatError::InvalidSetting(format!("unknown response style '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    PokerBasics,
    ExpectedValue,
    Bluffing,
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Focus::PokerBasics => "Poker Basics",
            Focus::ExpectedValue => "Expected Value",
            Focus::Bluffing => "Bluffing",
        })
    }
}

impl FromStr for Focus {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
            "poker basics" | "basics" => Ok(Focus::PokerBasics),
            "expected value" | "ev" => Ok(Focus::ExpectedValue),
            "bluffing" => Ok(Focus::Bluffing),
            other => Err(ChatError::InvalidSetting(format!("unknown focus '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroundingMode {
    #[default]
    Rag,
    General,
}

impl GroundingMode {
    pub fn instructions(self) -> &'static str {
        match self {
            GroundingMode::Rag => {
                "- **Answer ONLY using the provided context for questions.**\n\
                 - If the answer is **NOT** in the context, say \"I don't know. I don't have enough information from the documents.\"\n\
                 - **Do NOT generate** information beyond the given sources."
            }
            GroundingMode::General => {
                "- **Prefer the provided context** when answering questions.\n\
                 - If no relevant information is found, use general poker knowledge **ONLY if highly confident**.\n\
                 - If unsure, say \"I don't know.\"\n\
                 - **Do NOT generate** speculative or misleading information."
            }
        }
    }
}

impl FromStr for GroundingMode {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rag" => Ok(GroundingMode::Rag),
            "general" => Ok(GroundingMode::General),
            other => Err(ChatError::InvalidSetting(format!("unknown mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSettings {
    pub name: String,
    pub style: ResponseStyle,
    pub focus: Focus,
    pub mode: GroundingMode,
}

impl ChatSettings {
    pub fn display_name(&self) -> &str {
        match self.name.trim() {
            "" => DEFAULT_USER_NAME,
            name => name,
        }
    }

    pub fn system_prompt(&self) -> String {
        let name = self.display_name();
        format!(
            "You are a **poker strategy assistant** helping user {name} with poker-related questions.\n\n\
             ### Instructions:\n\
             - **Response Style:** {style}\n\
             - **Focus:** Center answers on {focus} topics\n\
             - Follow the selected style and focus consistently.\n\
             - Maintain conversation context across answers and ensure consistency.\n\n\
             {mode}\n\n\
             - Each source has a **name - page followed by colon** and the actual information.\n\
             - Always reference sources using **square brackets**, e.g., [source1.pdf].\n\
             - If multiple sources apply, reference all relevant ones.\n\n\
             {name} will ask poker-related questions.",
            style = self.style.instruction(),
            focus = self.focus,
            mode = self.mode.instructions(),
        )
    }

    pub fn welcome(&self) -> String {
        format!(
            "Hello {}! How can I assist you with your poker questions today?",
            self.display_name()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    System(String),
    User(String),
    Assistant(String),
}

impl Turn {
    pub fn role(&self) -> &'static str {
        match self {
            Turn::System(_) => "system",
            Turn::User(_) => "user",
            Turn::Assistant(_) => "assistant",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Turn::System(content) | Turn::User(content) | Turn::Assistant(content) => content,
        }
    }

    fn history_line(&self) -> String {
        let label = match self {
            Turn::System(_) => "System",
            Turn::User(_) => "User",
            Turn::Assistant(_) => "Assistant",
        };
        format!("{label}: {}", self.content())
    }
}

/// Append-only turn log. Opens with one system turn and a welcome.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn start(settings: &ChatSettings) -> Self {
        Self {
            turns: vec![
                Turn::System(settings.system_prompt()),
                Turn::Assistant(settings.welcome()),
            ],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn displayed_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns
            .iter()
            .filter(|turn| !matches!(turn, Turn::System(_)))
    }

    pub fn render_history(&self) -> String {
        self.turns
            .iter()
            .map(Turn::history_line)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub question: String,
    pub context: String,
    pub history: String,
    pub seed: u64,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(question: impl Into<String>, context: impl Into<String>, history: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: context.into(),
            history: history.into(),
            seed: GENERATION_SEED,
            max_tokens: MAX_RESPONSE_TOKENS,
        }
    }

    pub fn prompt(&self) -> String {
        format!(
            "You are a poker strategy assistant. Follow the same instructions provided at the start of this chat.\n\n\
             Question:\n{}\n\n\
             Context:\n{}\n\n\
             History:\n{}",
            self.question, self.context, self.history
        )
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream, ChatError>;
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Token(String),
    Done,
    Ignore,
}

fn parse_sse_line(line: &str) -> Result<SseLine, ChatError> {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(SseLine::Ignore);
    };
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let event: Value = serde_json::from_str(data)?;
    match event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(token) if !token.is_empty() => Ok(SseLine::Token(token.to_string())),
        _ => Ok(SseLine::Ignore),
    }
}

pub struct OpenAiChatModel {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(base: &str, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ChatError> {
        Ok(Self {
            client: Client::new(),
            endpoint: base_url(base)?.join("v1/chat/completions")?,
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

struct SseState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

// Lines are decoded only once complete, so a character split across
// network chunks survives.
fn sse_tokens(bytes: ByteStream) -> TokenStream {
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let tokens = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(token) = state.pending.pop_front() {
                return Some((Ok(token), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    while let Some(newline) = state.buffer.iter().position(|byte| *byte == b'\n') {
                        let raw = state.buffer.drain(..=newline).collect::<Vec<_>>();
                        let line = String::from_utf8_lossy(&raw[..newline]);
                        match parse_sse_line(line.trim_end_matches('\r')) {
                            Ok(SseLine::Token(token)) => state.pending.push_back(token),
                            Ok(SseLine::Done) => {
                                state.finished = true;
                                break;
                            }
                            Ok(SseLine::Ignore) => {}
                            Err(error) => {
                                state.finished = true;
                                return Some((Err(error), state));
                            }
                        }
                    }
                }
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(ChatError::Http(error)), state));
                }
                None => state.finished = true,
            }
        }
    });

    Box::pin(tokens)
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream, ChatError> {
        debug!(model = %self.model, "starting chat completion stream");
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": request.prompt() }],
                "seed": request.seed,
                "max_tokens": request.max_tokens,
                "stream": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Generation(format!("{status}: {body}")));
        }

        Ok(sse_tokens(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec())),
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub answer: String,
    pub context: String,
}

pub struct ChatSession {
    settings: ChatSettings,
    conversation: Conversation,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn ChatModel>,
}

impl ChatSession {
    pub fn start(settings: ChatSettings, index: Arc<dyn VectorIndex>, model: Arc<dyn ChatModel>) -> Self {
        info!(user = settings.display_name(), style = ?settings.style, focus = %settings.focus, mode = ?settings.mode, "chat session started");
        Self {
            conversation: Conversation::start(&settings),
            settings,
            index,
            model,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Answers `question`, handing each token to `on_token` as it arrives.
    /// The assistant turn is appended only once the stream has finished.
    pub async fn ask<F>(&mut self, question: &str, mut on_token: F) -> Result<AssistantReply, ChatError>
    where
        F: FnMut(&str),
    {
        self.conversation.push(Turn::User(question.to_string()));

        let context = Retriever::new(self.index.as_ref()).context(question).await?;
        let history = self.conversation.render_history();
        let request = GenerationRequest::new(question, context.clone(), history);

        let mut tokens = self.model.stream(request).await?;
        let mut answer = String::new();
        while let Some(token) = tokens.next().await {
            let token = token?;
            on_token(&token);
            answer.push_str(&token);
        }

        self.conversation.push(Turn::Assistant(answer.clone()));
        Ok(AssistantReply { answer, context })
    }
}
