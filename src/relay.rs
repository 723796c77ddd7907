//! Relay router: bidirectional forwarding between a customer's private chat
//! and the order's forum topic in the manager group, plus the single,
//! idempotent topic-creation path.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::keyboards::{self, UiCaps};
use crate::models::{OrderId, TopicId, TopicLink};
use crate::repo::{Repo, RepoError};
use crate::telegram::{ChatId, Messenger, SendError, SendOptions};

/// One relayable payload, either direction.
#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    Photo { file_id: String, caption: Option<String> },
    Video { file_id: String, caption: Option<String> },
    Document { file_id: String, caption: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded,
    /// Customer has no order in relay mode; the message is dropped silently.
    NoActiveOrder,
    /// The order has no manager topic yet; the sender got a local notice.
    TopicNotReady,
    /// Operator-side message that is not ours to relay.
    Ignored,
}

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Delivery(#[from] SendError),
}

#[derive(Clone)]
pub struct Relay {
    repo: Arc<dyn Repo>,
    messenger: Arc<dyn Messenger>,
    config: Arc<Config>,
    caps: UiCaps,
}

impl Relay {
    pub fn new(repo: Arc<dyn Repo>, messenger: Arc<dyn Messenger>, config: Arc<Config>, caps: UiCaps) -> Self {
        Self { repo, messenger, config, caps }
    }

    /// Customer -> manager topic. Only called for messages no foreground
    /// workflow has claimed.
    pub async fn relay_from_customer(&self, user_id: ChatId, content: MessageContent) -> Result<RelayOutcome, RelayError> {
        let Some(order_id) = self.repo.active_order(user_id).await? else {
            metrics::counter!("relay_dropped_total", 1, "reason" => "no_active_order");
            return Ok(RelayOutcome::NoActiveOrder);
        };
        self.relay_to_order_topic(user_id, order_id, content).await
    }

    /// Forwards one customer message into the topic of a specific order.
    /// Also used directly while the customer is in a `view`-opened chat.
    pub async fn relay_to_order_topic(&self, user_id: ChatId, order_id: OrderId, content: MessageContent) -> Result<RelayOutcome, RelayError> {
        let Some(link) = self.repo.topic_by_order(order_id).await? else {
            // Standardized: tell the sender rather than dropping silently.
            metrics::counter!("relay_dropped_total", 1, "reason" => "topic_not_ready");
            if let Err(e) = self
                .messenger
                .send_message(user_id, "Менеджер ещё не подключился к заказу. Дождитесь подтверждения оплаты.", SendOptions::default())
                .await
            {
                warn!(user_id, error = %e, "topic-not-ready notice failed");
            }
            return Ok(RelayOutcome::TopicNotReady);
        };
        let opts = SendOptions::in_topic(link.topic_id);
        let group = self.config.manager_group_id;
        match content {
            MessageContent::Text(text) => {
                self.messenger
                    .send_message(group, &format!("<b>Клиент:</b>\n\n{text}"), opts)
                    .await?;
            }
            MessageContent::Photo { file_id, caption } => {
                let caption = format!("<b>Фото от клиента:</b>\n{}", caption.unwrap_or_default());
                self.messenger.send_photo(group, &file_id, Some(&caption), opts).await?;
            }
            MessageContent::Video { file_id, caption } => {
                let caption = format!("<b>Видео от клиента:</b>\n{}", caption.unwrap_or_default());
                self.messenger.send_video(group, &file_id, Some(&caption), opts).await?;
            }
            MessageContent::Document { file_id, caption } => {
                let caption = format!("<b>Файл от клиента:</b>\n{}", caption.unwrap_or_default());
                self.messenger.send_document(group, &file_id, Some(&caption), opts).await?;
            }
        }
        metrics::counter!("relay_messages_total", 1, "direction" => "to_manager");
        Ok(RelayOutcome::Forwarded)
    }

    /// Manager topic -> customer. Messages outside the manager group, without
    /// a thread id, or authored by a bot are ignored (self-loop prevention);
    /// an unregistered topic is a defensive no-op.
    pub async fn relay_from_operator(
        &self,
        chat_id: ChatId,
        topic_id: Option<TopicId>,
        sender_is_bot: bool,
        content: MessageContent,
    ) -> Result<RelayOutcome, RelayError> {
        let Some(topic_id) = topic_id else {
            return Ok(RelayOutcome::Ignored);
        };
        if chat_id != self.config.manager_group_id || sender_is_bot {
            return Ok(RelayOutcome::Ignored);
        }
        let Some(link) = self.repo.topic_link(topic_id).await? else {
            return Ok(RelayOutcome::Ignored);
        };
        let shop = &self.config.shop_name;
        match content {
            MessageContent::Text(text) => {
                self.messenger
                    .send_message(link.user_id, &format!("<b>{shop}:</b>\n\n{text}"), SendOptions::default())
                    .await?;
            }
            MessageContent::Photo { file_id, caption } => {
                let caption = format!("<b>{shop}:</b>\n{}", caption.unwrap_or_default());
                self.messenger
                    .send_photo(link.user_id, &file_id, Some(&caption), SendOptions::default())
                    .await?;
            }
            MessageContent::Video { file_id, caption } => {
                let caption = format!("<b>{shop}:</b>\n{}", caption.unwrap_or_default());
                self.messenger
                    .send_video(link.user_id, &file_id, Some(&caption), SendOptions::default())
                    .await?;
            }
            MessageContent::Document { file_id, caption } => {
                let caption = format!("<b>{shop}:</b>\n{}", caption.unwrap_or_default());
                self.messenger
                    .send_document(link.user_id, &file_id, Some(&caption), SendOptions::default())
                    .await?;
            }
        }
        metrics::counter!("relay_messages_total", 1, "direction" => "to_customer");
        Ok(RelayOutcome::Forwarded)
    }

    /// The single topic-creation path, called from both lifecycle points
    /// (payment-proof upload and the API order notification). Idempotent:
    /// an existing link is returned as-is. Creation failure is logged and
    /// yields None — no retry, relay stays off until a later upload.
    pub async fn ensure_topic_for_order(&self, order_id: OrderId) -> Result<Option<TopicId>, RelayError> {
        if self.config.manager_group_id == 0 {
            return Ok(None);
        }
        if let Some(link) = self.repo.topic_by_order(order_id).await? {
            return Ok(Some(link.topic_id));
        }
        let order = match self.repo.get_order(order_id).await {
            Ok(o) => o,
            Err(RepoError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let user = self.repo.get_user(order.user_id).await?;
        let display = user
            .as_ref()
            .filter(|u| !u.username.is_empty())
            .map(|u| format!("@{}", u.username))
            .unwrap_or_else(|| format!("ID:{}", order.user_id));
        let name = format!("{} | {}", display, self.config.service_name(&order.service_type));

        let topic_id = match self.messenger.create_forum_topic(self.config.manager_group_id, &name).await {
            Ok(id) => id,
            Err(e) => {
                error!(order_id, error = %e, "forum topic creation failed");
                return Ok(None);
            }
        };
        match self
            .repo
            .save_topic(TopicLink { topic_id, order_id, user_id: order.user_id })
            .await
        {
            Ok(()) => {}
            Err(RepoError::Conflict) => {
                // lost a race with a concurrent upload; reuse whichever link won
                if let Some(link) = self.repo.topic_by_order(order_id).await? {
                    return Ok(Some(link.topic_id));
                }
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        info!(order_id, topic_id, "manager topic created");
        self.post_order_summary(topic_id, order_id, &display).await;
        Ok(Some(topic_id))
    }

    /// Order summary and operator controls posted into a fresh topic.
    /// Best-effort: the link is already persisted, a lost summary only costs
    /// the manager a lookup.
    async fn post_order_summary(&self, topic_id: TopicId, order_id: OrderId, display: &str) {
        let order = match self.repo.get_order(order_id).await {
            Ok(o) => o,
            Err(e) => {
                warn!(order_id, error = %e, "order vanished before summary");
                return;
            }
        };
        let service = self.config.service_name(&order.service_type);
        let prefix = self.config.price_prefix(&order.service_type);

        let mut parts_text = String::new();
        if order.has_parts {
            if let Some(serde_json::Value::Object(map)) = order.parts() {
                parts_text.push_str("\n<b>Комплектующие:</b>\n");
                for (k, v) in &map {
                    if v.is_null() {
                        continue;
                    }
                    let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    if v.is_empty() {
                        continue;
                    }
                    parts_text.push_str(&format!("  - {k}: {v}\n"));
                }
            }
        }
        let desc = if order.description.is_empty() {
            String::new()
        } else {
            format!("\n<b>Описание:</b> {}", order.description)
        };
        let text = format!(
            "<b>НОВАЯ ЗАЯВКА #{order_id}</b>\n\n\
             Клиент: {display}\nУслуга: {service}\n\
             Стоимость: {prefix}{byn} BYN / {prefix}{rub} RUB{parts_text}{desc}",
            byn = order.price_byn,
            rub = order.price_rub,
        );

        let group = self.config.manager_group_id;
        if let Err(e) = self.messenger.send_message(group, &text, SendOptions::in_topic(topic_id)).await {
            warn!(order_id, error = %e, "order summary delivery failed");
        }
        let controls = SendOptions {
            thread_id: Some(topic_id),
            keyboard: Some(keyboards::order_controls(self.caps, order_id)),
        };
        if let Err(e) = self.messenger.send_message(group, "Управление:", controls).await {
            warn!(order_id, error = %e, "order controls delivery failed");
        }
        if let Some(kb) = keyboards::order_details_link(&self.config, order_id) {
            let opts = SendOptions { thread_id: Some(topic_id), keyboard: Some(kb) };
            if let Err(e) = self.messenger.send_message(group, "Подробнее:", opts).await {
                warn!(order_id, error = %e, "order details link delivery failed");
            }
        }
    }
}
