//! Remote language-model client.
//!
//! One operation hides the wire format: [`LlmClient::generate_with_tools`]
//! posts an Ollama-style chat request and returns content, requested tool
//! calls and the stop reason. A legacy completion endpoint is used as a
//! fallback when the chat endpoint fails at the protocol level. The
//! translator persona rewrites the request (model + system prompt) and
//! sends no history.
//!
//! Failures are typed, never fatal: call sites map them to radio phrases
//! via [`crate::phrases::for_error`].

pub mod clarifier;
pub mod hygiene;
pub mod summarizer;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{Result, SkywaveError};
use crate::memory::{ConversationMessage, Role};
use crate::tools::{ToolCall, ToolDefinition};

/// Upper bound on tool-execution iterations per turn.
pub const MAX_TOOL_ITERATIONS: usize = 5;

/// One chat completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: String,
}

impl ChatOutcome {
    /// The model ran out of budget; the content is unusable on air.
    pub fn is_truncated(&self) -> bool {
        matches!(self.stop_reason.as_str(), "length" | "max_tokens")
    }
}

/// Everything one generation call needs beyond the client's own config.
#[derive(Debug, Default)]
pub struct GenerateRequest<'a> {
    pub user_prompt: &'a str,
    pub tools: &'a [ToolDefinition],
    pub history: &'a [ConversationMessage],
    pub timeout_ms: Option<u64>,
    pub max_tokens: Option<u32>,
    pub model_override: Option<&'a str>,
    pub system_prompt_override: Option<&'a str>,
}

/// Seam between the pipeline and the concrete HTTP client, so turn logic
/// is testable without a server.
pub trait ChatModel: Send + 'static {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<ChatOutcome>;

    fn translate(&self, text: &str, language: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::blocking::Client,
    config: LlmConfig,
}

impl ChatModel for LlmClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<ChatOutcome> {
        self.generate_with_tools(request)
    }

    fn translate(&self, text: &str, language: &str) -> Result<String> {
        LlmClient::translate(self, text, language)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// Objects arrive verbatim; some servers send a JSON-encoded string.
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(alias = "stop_reason", default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize)]
struct LegacyRequest<'a> {
    prompt: String,
    n_predict: u32,
    stop: &'a [String],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct LegacyResponse {
    #[serde(default)]
    content: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// One chat completion with optional tool advertising.
    ///
    /// The request carries `[system, …history, user]`; when the last history
    /// message already equals the user prompt it is not appended again.
    ///
    /// # Errors
    /// `LlmTransport` (connection), `LlmTimeout`, `LlmProtocol` (bad JSON /
    /// bad status, after the legacy fallback was also exhausted).
    pub fn generate_with_tools(&self, request: &GenerateRequest<'_>) -> Result<ChatOutcome> {
        let model = request.model_override.unwrap_or(&self.config.model_name);
        let system = request
            .system_prompt_override
            .unwrap_or(&self.config.system_prompt);
        let timeout_ms = request.timeout_ms.unwrap_or(self.config.timeout_ms);
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);

        let messages = build_messages(system, request.history, request.user_prompt);
        let tools: Option<Vec<WireTool<'_>>> = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| WireTool {
                        kind: "function",
                        function: t,
                    })
                    .collect(),
            )
        };
        let tool_choice = tools.as_ref().map(|_| "auto");

        let body = ChatRequest {
            model,
            messages,
            temperature: self.config.temperature,
            stream: false,
            max_tokens: Some(max_tokens),
            stop: if self.config.stop_sequences.is_empty() {
                None
            } else {
                Some(&self.config.stop_sequences)
            },
            tools,
            tool_choice,
        };

        debug!(model, timeout_ms, "chat request");
        let sent = self
            .http
            .post(&self.config.endpoint)
            .timeout(Duration::from_millis(timeout_ms))
            .json(&body)
            .send();

        let response = match sent {
            Ok(r) => r,
            Err(e) => return Err(map_transport_error(e, timeout_ms)),
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(%status, "chat endpoint rejected request");
            return self.legacy_fallback(&body, timeout_ms, SkywaveError::LlmProtocol(
                format!("chat endpoint returned {status}"),
            ));
        }

        let parsed: ChatResponse = match response.json() {
            Ok(p) => p,
            Err(e) => {
                return self.legacy_fallback(
                    &body,
                    timeout_ms,
                    SkywaveError::LlmProtocol(format!("chat response decode: {e}")),
                )
            }
        };

        Ok(outcome_from_chat(parsed))
    }

    /// Translate `text` using the translator persona: overridden model and
    /// system prompt, no history.
    pub fn translate(&self, text: &str, language: &str) -> Result<String> {
        let system = translator_system_prompt(language);
        let request = GenerateRequest {
            user_prompt: text,
            system_prompt_override: Some(&system),
            model_override: self.config.translation_model.as_deref(),
            ..Default::default()
        };
        let outcome = self.generate_with_tools(&request)?;
        Ok(outcome.content)
    }

    /// Page the translation model in with a throwaway request. Failures are
    /// logged and ignored; the first real turn will retry anyway.
    pub fn warm_up_translator(&self, language: &str) {
        info!(language, "warming up translation model");
        if let Err(e) = self.translate("Radio check.", language) {
            warn!(error = %e, "translator warmup failed");
        }
    }

    /// Legacy completion endpoint: flatten the dialogue into one prompt.
    fn legacy_fallback(
        &self,
        chat: &ChatRequest<'_>,
        timeout_ms: u64,
        original: SkywaveError,
    ) -> Result<ChatOutcome> {
        let Some(endpoint) = self.config.legacy_endpoint.as_deref() else {
            return Err(original);
        };
        info!(endpoint, "falling back to legacy completion endpoint");

        let prompt = chat
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let body = LegacyRequest {
            prompt,
            n_predict: chat.max_tokens.unwrap_or(self.config.max_tokens),
            stop: &self.config.stop_sequences,
            stream: false,
        };

        let response = self
            .http
            .post(endpoint)
            .timeout(Duration::from_millis(timeout_ms))
            .json(&body)
            .send()
            .map_err(|e| map_transport_error(e, timeout_ms))?;

        if !response.status().is_success() {
            return Err(SkywaveError::LlmProtocol(format!(
                "legacy endpoint returned {}",
                response.status()
            )));
        }

        let parsed: LegacyResponse = response
            .json()
            .map_err(|e| SkywaveError::LlmProtocol(format!("legacy response decode: {e}")))?;

        Ok(ChatOutcome {
            content: parsed.content,
            tool_calls: Vec::new(),
            stop_reason: "stop".into(),
        })
    }
}

fn map_transport_error(e: reqwest::Error, timeout_ms: u64) -> SkywaveError {
    if e.is_timeout() {
        SkywaveError::LlmTimeout(timeout_ms)
    } else {
        SkywaveError::LlmTransport(e.to_string())
    }
}

/// Build `[system, …history, user]`, skipping the trailing duplicate. An
/// empty `user_prompt` appends nothing — tool-loop iterations carry the
/// user message inside the history already.
fn build_messages(
    system: &str,
    history: &[ConversationMessage],
    user_prompt: &str,
) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(WireMessage {
        role: "system".into(),
        content: system.into(),
        tool_call_id: None,
        tool_calls: None,
    });
    for message in history {
        messages.push(WireMessage {
            role: role_name(message.role).into(),
            content: message.content.clone(),
            tool_call_id: message.tool_call_id.clone(),
            tool_calls: message.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: Some(c.id.clone()),
                        function: WireFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect()
            }),
        });
    }

    let duplicate = history
        .last()
        .map(|m| m.role == Role::User && m.content == user_prompt)
        .unwrap_or(false);
    if !user_prompt.is_empty() && !duplicate {
        messages.push(WireMessage {
            role: "user".into(),
            content: user_prompt.into(),
            tool_call_id: None,
            tool_calls: None,
        });
    }
    messages
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn outcome_from_chat(parsed: ChatResponse) -> ChatOutcome {
    let tool_calls = parsed
        .message
        .tool_calls
        .into_iter()
        .enumerate()
        .map(|(idx, wire)| {
            let arguments = match wire.function.arguments {
                // Some servers double-encode the arguments object.
                serde_json::Value::String(raw) => {
                    serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null)
                }
                other => other,
            };
            ToolCall {
                id: wire.id.unwrap_or_else(|| format!("call-{idx}")),
                name: wire.function.name,
                arguments,
            }
        })
        .collect();

    ChatOutcome {
        content: parsed.message.content,
        tool_calls,
        stop_reason: parsed.done_reason.unwrap_or_else(|| "stop".into()),
    }
}

/// System prompt for the stateless translation persona.
pub fn translator_system_prompt(language: &str) -> String {
    let name = match language {
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        other => other,
    };
    format!(
        "You are a professional English to {name} translator. \
         Output only the {name} translation, no explanations. \
         End transmissions with \"over\"."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConversationMessage;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn parse_chat(raw: &str) -> ChatOutcome {
        outcome_from_chat(serde_json::from_str::<ChatResponse>(raw).unwrap())
    }

    #[test]
    fn message_list_is_system_history_user() {
        let history = vec![
            ConversationMessage::user("first"),
            ConversationMessage::assistant("reply, over"),
        ];
        let messages = build_messages("sys", &history, "second");
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages.last().unwrap().content, "second");
    }

    #[test]
    fn trailing_duplicate_user_prompt_is_not_appended() {
        let history = vec![ConversationMessage::user("say again")];
        let messages = build_messages("sys", &history, "say again");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages.last().unwrap().content, "say again");
    }

    #[test]
    fn empty_user_prompt_sends_history_only() {
        let history = vec![
            ConversationMessage::user("run the check"),
            ConversationMessage::tool("call-0", "42"),
        ];
        let messages = build_messages("sys", &history, "");
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "tool"]);
    }

    #[test]
    fn chat_response_parses_content_and_stop_reason() {
        let outcome = parse_chat(
            r#"{"message": {"content": "All stations clear."}, "done_reason": "stop"}"#,
        );
        assert_eq!(outcome.content, "All stations clear.");
        assert_eq!(outcome.stop_reason, "stop");
        assert!(outcome.tool_calls.is_empty());
        assert!(!outcome.is_truncated());
    }

    #[test]
    fn stop_reason_alias_and_truncation() {
        let outcome =
            parse_chat(r#"{"message": {"content": "lorem ipsum"}, "stop_reason": "length"}"#);
        assert!(outcome.is_truncated());
    }

    #[test]
    fn tool_calls_parse_object_and_string_arguments() {
        let outcome = parse_chat(
            r#"{
                "message": {
                    "content": "",
                    "tool_calls": [
                        {"function": {"name": "current_time", "arguments": {}}},
                        {"id": "abc", "function": {"name": "lookup", "arguments": "{\"q\": 7}"}}
                    ]
                },
                "done_reason": "tool_calls"
            }"#,
        );
        assert_eq!(outcome.tool_calls.len(), 2);
        assert_eq!(outcome.tool_calls[0].id, "call-0");
        assert_eq!(outcome.tool_calls[0].name, "current_time");
        assert_eq!(outcome.tool_calls[1].id, "abc");
        assert_eq!(outcome.tool_calls[1].arguments["q"], 7);
    }

    #[test]
    fn request_body_advertises_tools_with_auto_choice() {
        let tools = vec![ToolDefinition {
            name: "current_time".into(),
            description: "clock".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let body = ChatRequest {
            model: "llama3.1",
            messages: build_messages("sys", &[], "hello"),
            temperature: 0.7,
            stream: false,
            max_tokens: Some(128),
            stop: None,
            tools: Some(
                tools
                    .iter()
                    .map(|t| WireTool {
                        kind: "function",
                        function: t,
                    })
                    .collect(),
            ),
            tool_choice: Some("auto"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "current_time");
    }

    #[test]
    fn translator_prompt_names_the_language() {
        let prompt = translator_system_prompt("de");
        assert!(prompt.contains("English to German"));
        assert!(prompt.contains("\"over\""));
    }

    /// Serve one canned HTTP response on a local socket.
    fn one_shot_server(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn generate_round_trip_against_local_server() {
        let endpoint = one_shot_server(
            r#"{"message": {"content": "Winds calm, over"}, "done_reason": "stop"}"#,
        );
        let config = LlmConfig {
            endpoint,
            timeout_ms: 2_000,
            ..Default::default()
        };
        let client = LlmClient::new(config);
        let outcome = client
            .generate_with_tools(&GenerateRequest {
                user_prompt: "weather report",
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.content, "Winds calm, over");
    }

    #[test]
    fn connection_refused_maps_to_transport_error() {
        let config = LlmConfig {
            // Nothing listens here; bind-then-drop guarantees a dead port.
            endpoint: {
                let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                let addr = listener.local_addr().unwrap();
                drop(listener);
                format!("http://{addr}")
            },
            timeout_ms: 2_000,
            ..Default::default()
        };
        let client = LlmClient::new(config);
        let err = client
            .generate_with_tools(&GenerateRequest {
                user_prompt: "anyone there",
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, SkywaveError::LlmTransport(_)), "{err}");
    }
}
