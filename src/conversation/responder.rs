//! Chat responders
//!
//! A responder sees the running transcript and produces the warden's next
//! line. Appending [`CLOSE_CUE`] to a reply asks the session to end after it
//! is spoken.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::session::{Speaker, TranscriptLine};
use crate::config::{ApiKeys, ConversationConfig};
use crate::{Error, Result};

/// Marker a responder appends to end the conversation
pub const CLOSE_CUE: &str = "[END]";

/// Transcript lines sent as context
const CONTEXT_LINES: usize = 6;

/// Longest reply spoken, in characters
const MAX_REPLY_CHARS: usize = 200;

const MAX_TOKENS: u32 = 100;

const SYSTEM_PROMPT: &str = "You are a security AI assistant. An unknown person has been detected \
in a restricted area. Your goal is to:
1. Identify who they are and why they're there
2. Determine if they have authorization
3. Keep them engaged while security is notified
4. Be professional but firm

Keep responses SHORT (1-2 sentences max). Be direct and authoritative.
When the person has identified themselves and no further questions are useful, \
end your reply with [END].";

/// What the responder gets to see
#[derive(Debug, Clone, Copy)]
pub struct ChatContext<'a> {
    /// Everything said so far, oldest first
    pub transcript: &'a [TranscriptLine],
    /// Turn being answered (1-based)
    pub turn: u32,
    pub max_turns: u32,
}

impl ChatContext<'_> {
    /// Most recent visitor line
    #[must_use]
    pub fn last_visitor_line(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|l| l.speaker == Speaker::Visitor)
            .map(|l| l.text.as_str())
    }
}

/// A responder's next line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text to speak, cue removed
    pub text: String,
    /// Whether the responder asked to end the session
    pub close: bool,
}

/// Generates the warden's side of the dialogue
#[async_trait]
pub trait ChatResponder: Send + Sync {
    /// Produce the reply to the latest visitor line
    ///
    /// # Errors
    ///
    /// Returns error if no usable reply could be produced
    async fn respond(&self, ctx: &ChatContext<'_>) -> Result<Reply>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Clean raw responder output into a [`Reply`]
///
/// # Errors
///
/// Returns error if nothing speakable is left
pub fn parse_reply(raw: &str) -> Result<Reply> {
    let close = raw.contains(CLOSE_CUE);
    let text = raw.replace(CLOSE_CUE, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.is_empty() {
        return Err(Error::Chat("empty response".to_string()));
    }

    Ok(Reply {
        text: clip(&text),
        close,
    })
}

/// Trim to the reply limit, preferring a sentence boundary
fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text.to_string();
    }

    let head: String = text.chars().take(MAX_REPLY_CHARS).collect();
    match head.rfind(['.', '!', '?']) {
        Some(end) if end > 0 => head[..=end].to_string(),
        _ => head.trim_end().to_string(),
    }
}

/// Any OpenAI-compatible chat completions endpoint
pub struct OpenAiResponder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiResponder {
    /// Create a responder
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the client cannot be built
    pub fn new(api_key: String, base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    fn messages(ctx: &ChatContext<'_>) -> Vec<Message> {
        let skip = ctx.transcript.len().saturating_sub(CONTEXT_LINES);
        let mut messages = vec![Message {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        }];
        messages.extend(ctx.transcript[skip..].iter().map(|line| Message {
            role: match line.speaker {
                Speaker::Warden => "assistant",
                Speaker::Visitor => "user",
            }
            .to_string(),
            content: line.text.clone(),
        }));
        messages
    }
}

#[async_trait]
impl ChatResponder for OpenAiResponder {
    async fn respond(&self, ctx: &ChatContext<'_>) -> Result<Reply> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::messages(ctx),
            max_tokens: Some(MAX_TOKENS),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Chat(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("API error: {status} - {body}")));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Chat(format!("failed to parse response: {e}")))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        parse_reply(&content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Keyword rules, used when no chat API is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleResponder;

const FIRST_REPLY: &str = "Hello, I've detected your presence. Can you please identify yourself?";

const RULES: &[(&[&str], &str)] = &[
    (
        &["hello", "hi", "hey"],
        "Hello. This is a restricted area. Who are you and why are you here?",
    ),
    (
        &["name is", "i am", "i'm", "my name"],
        "I see. Do you have authorization to be in this area? Can you provide a code or badge number?",
    ),
    (
        &["authorized", "permission", "allowed", "badge"],
        "Please wait here while I verify your credentials. Security has been notified.",
    ),
    (
        &["no", "none", "leave me", "mind your"],
        "I must inform you that this area is under surveillance. Please comply or leave immediately.",
    ),
    (
        &["what", "where", "who", "confused", "lost"],
        "You are in a restricted area. If you are lost, please leave the way you came and contact security.",
    ),
];

const FALLBACKS: &[&str] = &[
    "I need you to identify yourself. Who are you?",
    "This area is under surveillance. Why are you here?",
    "Please state your purpose for being in this location.",
    "Security has been alerted. Please remain where you are.",
    "I'm waiting for your response. Why are you in this restricted area?",
];

impl RuleResponder {
    /// Pick the line for `heard`, given how many visitor lines came before it
    #[must_use]
    pub fn reply_to(heard: &str, earlier_turns: usize) -> &'static str {
        if earlier_turns == 0 {
            return FIRST_REPLY;
        }

        let heard = heard.to_lowercase();
        RULES
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| heard.contains(k)))
            .map_or_else(
                || FALLBACKS[(earlier_turns - 1).min(FALLBACKS.len() - 1)],
                |(_, line)| *line,
            )
    }
}

#[async_trait]
impl ChatResponder for RuleResponder {
    async fn respond(&self, ctx: &ChatContext<'_>) -> Result<Reply> {
        let heard = ctx.last_visitor_line().unwrap_or_default();
        let earlier = ctx
            .transcript
            .iter()
            .filter(|l| l.speaker == Speaker::Visitor)
            .count()
            .saturating_sub(1);

        Ok(Reply {
            text: Self::reply_to(heard, earlier).to_string(),
            close: false,
        })
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

/// Chat responder from config: the API when a key is set, else keyword rules
///
/// # Errors
///
/// Returns error if the HTTP client cannot be built
pub fn from_config(
    config: &ConversationConfig,
    keys: &ApiKeys,
) -> Result<std::sync::Arc<dyn ChatResponder>> {
    match keys.openai.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => Ok(std::sync::Arc::new(OpenAiResponder::new(
            key.to_string(),
            &config.llm_base_url,
            config.llm_model.clone(),
            config.responder_timeout,
        )?)),
        None => {
            tracing::info!("no chat API key, using rule-based responses");
            Ok(std::sync::Arc::new(RuleResponder))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn line(speaker: Speaker, text: &str) -> TranscriptLine {
        TranscriptLine {
            speaker,
            text: text.to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_reply_strips_cue() {
        let reply = parse_reply("  Thank you. Stay where you are. [END]\n").unwrap();
        assert_eq!(reply.text, "Thank you. Stay where you are.");
        assert!(reply.close);

        let reply = parse_reply("Who are you?").unwrap();
        assert!(!reply.close);
    }

    #[test]
    fn test_parse_reply_rejects_empty() {
        assert!(parse_reply("   ").is_err());
        assert!(parse_reply("[END]").is_err());
    }

    #[test]
    fn test_long_reply_clipped_at_sentence() {
        let raw = format!("Stop right there. {}", "x".repeat(300));
        let reply = parse_reply(&raw).unwrap();
        assert_eq!(reply.text, "Stop right there.");
    }

    #[test]
    fn test_rule_replies() {
        assert_eq!(RuleResponder::reply_to("anything", 0), FIRST_REPLY);
        assert!(RuleResponder::reply_to("Hey there", 1).starts_with("Hello. This is a restricted area"));
        assert!(RuleResponder::reply_to("My name is Sam", 1).contains("authorization"));
        assert!(RuleResponder::reply_to("I have a badge", 2).contains("verify your credentials"));
        assert_eq!(RuleResponder::reply_to("mmm", 1), FALLBACKS[0]);
        assert_eq!(RuleResponder::reply_to("mmm", 40), FALLBACKS[4]);
    }

    #[tokio::test]
    async fn test_rule_responder_counts_visitor_turns() {
        let transcript = vec![
            line(Speaker::Warden, "Identify yourself."),
            line(Speaker::Visitor, "uh"),
            line(Speaker::Warden, FIRST_REPLY),
            line(Speaker::Visitor, "hello"),
        ];
        let ctx = ChatContext {
            transcript: &transcript,
            turn: 2,
            max_turns: 5,
        };
        let reply = RuleResponder.respond(&ctx).await.unwrap();
        assert!(reply.text.starts_with("Hello. This is a restricted area"));
    }

    #[test]
    fn test_context_window() {
        let transcript: Vec<_> = (0..10)
            .map(|i| {
                let speaker = if i % 2 == 0 { Speaker::Warden } else { Speaker::Visitor };
                line(speaker, &format!("line {i}"))
            })
            .collect();
        let ctx = ChatContext {
            transcript: &transcript,
            turn: 5,
            max_turns: 5,
        };

        let messages = OpenAiResponder::messages(&ctx);
        assert_eq!(messages.len(), 1 + CONTEXT_LINES);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "line 4");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[6].role, "user");
    }

    #[test]
    fn test_from_config_without_key_uses_rules() {
        let responder = from_config(&ConversationConfig::default(), &ApiKeys::default()).unwrap();
        assert_eq!(responder.name(), "rules");
    }
}
