#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use orderdesk::config::{default_prices, Config, PaymentDetails};
use orderdesk::telegram::{InlineKeyboardMarkup, Messenger, SendError, SendOptions, Update};

/// One recorded outgoing call.
#[derive(Debug, Clone)]
pub enum Sent {
    Message { chat_id: i64, text: String, thread_id: Option<i64>, has_keyboard: bool },
    Photo { chat_id: i64, file_id: String, caption: Option<String>, thread_id: Option<i64> },
    Video { chat_id: i64, file_id: String, thread_id: Option<i64> },
    Document { chat_id: i64, file_id: String, thread_id: Option<i64> },
    Topic { chat_id: i64, name: String },
    EditText { chat_id: i64, message_id: i64, text: String },
    EditCaption { chat_id: i64, message_id: i64, caption: String },
    Callback { id: String, text: Option<String> },
    Delete { chat_id: i64, message_id: i64 },
}

/// Messenger double that records every call instead of hitting the network.
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    next_topic: AtomicI64,
    next_message: AtomicI64,
    pub fail_sends: AtomicBool,
    pub fail_topics: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            next_topic: AtomicI64::new(500),
            next_message: AtomicI64::new(1),
            fail_sends: AtomicBool::new(false),
            fail_topics: AtomicBool::new(false),
        })
    }

    pub fn log(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Message { chat_id: c, text, .. } if c == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn topics(&self) -> Vec<(i64, String)> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Topic { chat_id, name } => Some((chat_id, name)),
                _ => None,
            })
            .collect()
    }

    pub fn callbacks(&self) -> Vec<(String, Option<String>)> {
        self.log()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Callback { id, text } => Some((id, text)),
                _ => None,
            })
            .collect()
    }

    fn blocked() -> SendError {
        SendError::Api { code: 403, description: "Forbidden: bot was blocked by the user".into() }
    }

    fn record(&self, entry: Sent) -> i64 {
        self.sent.lock().unwrap().push(entry);
        self.next_message.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, chat_id: i64, text: &str, opts: SendOptions) -> Result<i64, SendError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Self::blocked());
        }
        Ok(self.record(Sent::Message {
            chat_id,
            text: text.to_string(),
            thread_id: opts.thread_id,
            has_keyboard: opts.keyboard.is_some(),
        }))
    }

    async fn send_photo(&self, chat_id: i64, file_id: &str, caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Self::blocked());
        }
        Ok(self.record(Sent::Photo {
            chat_id,
            file_id: file_id.to_string(),
            caption: caption.map(str::to_string),
            thread_id: opts.thread_id,
        }))
    }

    async fn send_video(&self, chat_id: i64, file_id: &str, _caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Self::blocked());
        }
        Ok(self.record(Sent::Video { chat_id, file_id: file_id.to_string(), thread_id: opts.thread_id }))
    }

    async fn send_document(&self, chat_id: i64, file_id: &str, _caption: Option<&str>, opts: SendOptions) -> Result<i64, SendError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Self::blocked());
        }
        Ok(self.record(Sent::Document { chat_id, file_id: file_id.to_string(), thread_id: opts.thread_id }))
    }

    async fn create_forum_topic(&self, chat_id: i64, name: &str) -> Result<i64, SendError> {
        if self.fail_topics.load(Ordering::SeqCst) {
            return Err(SendError::Api { code: 400, description: "Bad Request: not enough rights".into() });
        }
        self.record(Sent::Topic { chat_id, name: name.to_string() });
        Ok(self.next_topic.fetch_add(1, Ordering::SeqCst))
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str, _keyboard: Option<InlineKeyboardMarkup>) -> Result<(), SendError> {
        self.record(Sent::EditText { chat_id, message_id, text: text.to_string() });
        Ok(())
    }

    async fn edit_message_caption(&self, chat_id: i64, message_id: i64, caption: &str) -> Result<(), SendError> {
        self.record(Sent::EditCaption { chat_id, message_id, caption: caption.to_string() });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), SendError> {
        self.record(Sent::Callback { id: callback_id.to_string(), text: text.map(str::to_string) });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), SendError> {
        self.record(Sent::Delete { chat_id, message_id });
        Ok(())
    }

    async fn get_updates(&self, _offset: i64, _timeout_secs: u64) -> Result<Vec<Update>, SendError> {
        Ok(Vec::new())
    }
}

pub const MANAGER_GROUP: i64 = -1001234567890;

pub fn test_config() -> Config {
    Config {
        shop_name: "Inside PC".into(),
        bot_token: "TESTTOKEN".into(),
        bot_username: "insidepc_bot".into(),
        manager_group_id: MANAGER_GROUP,
        admin_chat_id: 0,
        webapp_url: Some("https://shop.example/web".into()),
        api_host: "127.0.0.1".into(),
        api_port: 0,
        database_path: ":memory:".into(),
        telegram_api_base: "https://api.telegram.org".into(),
        payment: PaymentDetails {
            card: "1234 5678 9012 3456".into(),
            holder: "IVANOV IVAN".into(),
            bank: "TestBank".into(),
        },
        prices: default_prices(),
    }
}
