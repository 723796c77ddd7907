//! Minimal Telegram Bot API surface: the handful of methods the relay and
//! the conversation front-end need, behind a trait so tests can record
//! deliveries instead of hitting the network.

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub type ChatId = i64;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("telegram api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
}

impl SendError {
    /// The Bot API rejection produced by servers without the styled-button
    /// extension. Used once, by the startup capability probe.
    pub fn is_bad_button_style(&self) -> bool {
        matches!(self, SendError::Api { description, .. }
            if description.to_lowercase().contains("invalid button style"))
    }
}

// ---------------- outgoing types ----------------

#[derive(Debug, Clone, Serialize)]
pub struct WebAppInfo {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_app: Option<WebAppInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Forum topic to post into, for manager-group messages.
    pub thread_id: Option<i64>,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

impl SendOptions {
    pub fn in_topic(thread_id: i64) -> Self {
        Self { thread_id: Some(thread_id), keyboard: None }
    }

    pub fn with_keyboard(keyboard: InlineKeyboardMarkup) -> Self {
        Self { thread_id: None, keyboard: Some(keyboard) }
    }
}

// ---------------- incoming types ----------------

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TgUser>,
    pub chat: Chat,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl TgUser {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TgUser,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

// ---------------- trait ----------------

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends an HTML-formatted text message, returns the message id.
    async fn send_message(&self, chat_id: ChatId, text: &str, opts: SendOptions) -> Result<i64, SendError>;
    async fn send_photo(&self, chat_id: ChatId, file_id: &str, caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError>;
    async fn send_video(&self, chat_id: ChatId, file_id: &str, caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError>;
    async fn send_document(&self, chat_id: ChatId, file_id: &str, caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError>;
    /// Creates a forum topic in the manager group, returns its thread id.
    async fn create_forum_topic(&self, chat_id: ChatId, name: &str) -> Result<i64, SendError>;
    async fn edit_message_text(&self, chat_id: ChatId, message_id: i64, text: &str, keyboard: Option<InlineKeyboardMarkup>) -> Result<(), SendError>;
    async fn edit_message_caption(&self, chat_id: ChatId, message_id: i64, caption: &str) -> Result<(), SendError>;
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), SendError>;
    async fn delete_message(&self, chat_id: ChatId, message_id: i64) -> Result<(), SendError>;
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, SendError>;
}

// ---------------- reqwest client ----------------

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Deserialize)]
struct ForumTopic {
    message_thread_id: i64,
}

/// Bot API client. The base URL is configurable so integration tests can
/// point it at a local mock server.
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: serde_json::Value) -> Result<T, SendError> {
        debug!("telegram call: {method}");
        let resp = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(&payload)
            .send()
            .await?;
        let body: ApiResponse<T> = resp.json().await?;
        if !body.ok {
            return Err(SendError::Api {
                code: body.error_code.unwrap_or(0),
                description: body.description.unwrap_or_default(),
            });
        }
        body.result.ok_or(SendError::Api {
            code: 0,
            description: "ok response without result".into(),
        })
    }

    async fn call_long<T: DeserializeOwned>(&self, method: &str, payload: serde_json::Value, timeout_secs: u64) -> Result<T, SendError> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base, method))
            .timeout(std::time::Duration::from_secs(timeout_secs + 10))
            .json(&payload)
            .send()
            .await?;
        let body: ApiResponse<T> = resp.json().await?;
        if !body.ok {
            return Err(SendError::Api {
                code: body.error_code.unwrap_or(0),
                description: body.description.unwrap_or_default(),
            });
        }
        body.result.ok_or(SendError::Api {
            code: 0,
            description: "ok response without result".into(),
        })
    }
}

fn apply_opts(mut payload: serde_json::Value, opts: &SendOptions) -> serde_json::Value {
    if let Some(tid) = opts.thread_id {
        payload["message_thread_id"] = json!(tid);
    }
    if let Some(kb) = &opts.keyboard {
        if let Ok(v) = serde_json::to_value(kb) {
            payload["reply_markup"] = v;
        }
    }
    payload
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(&self, chat_id: ChatId, text: &str, opts: SendOptions) -> Result<i64, SendError> {
        let payload = apply_opts(
            json!({ "chat_id": chat_id, "text": text, "parse_mode": "HTML" }),
            &opts,
        );
        let sent: SentMessage = self.call("sendMessage", payload).await?;
        Ok(sent.message_id)
    }

    async fn send_photo(&self, chat_id: ChatId, file_id: &str, caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError> {
        let mut payload = json!({ "chat_id": chat_id, "photo": file_id, "parse_mode": "HTML" });
        if let Some(c) = caption {
            payload["caption"] = json!(c);
        }
        let sent: SentMessage = self.call("sendPhoto", apply_opts(payload, &opts)).await?;
        Ok(sent.message_id)
    }

    async fn send_video(&self, chat_id: ChatId, file_id: &str, caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError> {
        let mut payload = json!({ "chat_id": chat_id, "video": file_id, "parse_mode": "HTML" });
        if let Some(c) = caption {
            payload["caption"] = json!(c);
        }
        let sent: SentMessage = self.call("sendVideo", apply_opts(payload, &opts)).await?;
        Ok(sent.message_id)
    }

    async fn send_document(&self, chat_id: ChatId, file_id: &str, caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError> {
        let mut payload = json!({ "chat_id": chat_id, "document": file_id, "parse_mode": "HTML" });
        if let Some(c) = caption {
            payload["caption"] = json!(c);
        }
        let sent: SentMessage = self.call("sendDocument", apply_opts(payload, &opts)).await?;
        Ok(sent.message_id)
    }

    async fn create_forum_topic(&self, chat_id: ChatId, name: &str) -> Result<i64, SendError> {
        let topic: ForumTopic = self
            .call("createForumTopic", json!({ "chat_id": chat_id, "name": name }))
            .await?;
        Ok(topic.message_thread_id)
    }

    async fn edit_message_text(&self, chat_id: ChatId, message_id: i64, text: &str, keyboard: Option<InlineKeyboardMarkup>) -> Result<(), SendError> {
        let opts = SendOptions { thread_id: None, keyboard };
        let payload = apply_opts(
            json!({ "chat_id": chat_id, "message_id": message_id, "text": text, "parse_mode": "HTML" }),
            &opts,
        );
        // editMessageText returns the edited message or `true`; either way we only need success
        let _: serde_json::Value = self.call("editMessageText", payload).await?;
        Ok(())
    }

    async fn edit_message_caption(&self, chat_id: ChatId, message_id: i64, caption: &str) -> Result<(), SendError> {
        let _: serde_json::Value = self
            .call(
                "editMessageCaption",
                json!({ "chat_id": chat_id, "message_id": message_id, "caption": caption, "parse_mode": "HTML" }),
            )
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), SendError> {
        let mut payload = json!({ "callback_query_id": callback_id });
        if let Some(t) = text {
            payload["text"] = json!(t);
        }
        let _: serde_json::Value = self.call("answerCallbackQuery", payload).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: i64) -> Result<(), SendError> {
        let _: serde_json::Value = self
            .call("deleteMessage", json!({ "chat_id": chat_id, "message_id": message_id }))
            .await?;
        Ok(())
    }

    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, SendError> {
        self.call_long(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
            timeout_secs,
        )
        .await
    }
}
