//! Conversation front-end: long-polling dispatch, per-user foreground
//! workflow state, customer menus and operator controls.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::keyboards::{self, UiCaps};
use crate::lifecycle::{Lifecycle, OrderError};
use crate::models::{OrderId, OrderStatus, UserId};
use crate::relay::{MessageContent, Relay, RelayOutcome};
use crate::repo::{Repo, RepoError};
use crate::telegram::{
    CallbackQuery, InlineKeyboardMarkup, Message, Messenger, SendOptions, TgUser, Update,
};

/// Foreground workflow state. While set, it owns the user's next message and
/// the relay router stays out of the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvoState {
    AwaitingPaymentPhoto(OrderId),
    AwaitingOrderNumber,
    Chatting(OrderId),
}

pub struct BotContext {
    pub repo: Arc<dyn Repo>,
    pub messenger: Arc<dyn Messenger>,
    pub lifecycle: Lifecycle,
    pub relay: Relay,
    pub config: Arc<Config>,
    pub caps: UiCaps,
    states: DashMap<UserId, ConvoState>,
}

impl BotContext {
    pub fn new(
        repo: Arc<dyn Repo>,
        messenger: Arc<dyn Messenger>,
        lifecycle: Lifecycle,
        relay: Relay,
        config: Arc<Config>,
        caps: UiCaps,
    ) -> Self {
        Self { repo, messenger, lifecycle, relay, config, caps, states: DashMap::new() }
    }

    pub fn state(&self, user_id: UserId) -> Option<ConvoState> {
        self.states.get(&user_id).map(|s| *s)
    }

    pub fn set_state(&self, user_id: UserId, state: ConvoState) {
        self.states.insert(user_id, state);
    }

    pub fn clear_state(&self, user_id: UserId) {
        self.states.remove(&user_id);
    }
}

/// Long-polling loop. Runs until the process exits; transport failures back
/// off and retry.
pub async fn run(ctx: Arc<BotContext>) {
    info!("bot polling loop started");
    let mut offset = 0i64;
    loop {
        match ctx.messenger.get_updates(offset, 30).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if let Err(e) = dispatch(&ctx, update).await {
                        error!(error = %e, "update handling failed");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

pub async fn dispatch(ctx: &BotContext, update: Update) -> anyhow::Result<()> {
    if let Some(cb) = update.callback_query {
        return handle_callback(ctx, cb).await;
    }
    if let Some(msg) = update.message {
        return handle_message(ctx, msg).await;
    }
    Ok(())
}

// ---------------- messages ----------------

async fn handle_message(ctx: &BotContext, msg: Message) -> anyhow::Result<()> {
    // operator side: anything posted inside the manager group
    if ctx.config.manager_group_id != 0 && msg.chat.id == ctx.config.manager_group_id {
        if let Some(content) = content_of(&msg) {
            let sender_is_bot = msg.from.as_ref().map(|u| u.is_bot).unwrap_or(true);
            if let Err(e) = ctx
                .relay
                .relay_from_operator(msg.chat.id, msg.message_thread_id, sender_is_bot, content)
                .await
            {
                warn!(topic = ?msg.message_thread_id, error = %e, "operator relay failed");
            }
        }
        return Ok(());
    }
    if msg.chat.kind != "private" {
        return Ok(());
    }
    let Some(from) = msg.from.clone() else {
        return Ok(());
    };

    if let Some(text) = msg.text.as_deref() {
        let text = text.trim();
        if text == "/start" {
            return cmd_start(ctx, &from, "").await;
        }
        if let Some(payload) = text.strip_prefix("/start ") {
            return cmd_start(ctx, &from, payload.trim()).await;
        }
        if text == "/stop" {
            return cmd_stop(ctx, from.id).await;
        }
    }

    match ctx.state(from.id) {
        Some(ConvoState::AwaitingOrderNumber) => {
            if let Some(text) = msg.text.as_deref() {
                return check_status_by_number(ctx, &from, text).await;
            }
            Ok(())
        }
        Some(ConvoState::AwaitingPaymentPhoto(order_id)) => {
            if let Some(file_id) = photo_file_id(&msg) {
                return accept_payment_photo(ctx, &from, order_id, &file_id).await;
            }
            Ok(())
        }
        Some(ConvoState::Chatting(order_id)) => {
            let Some(content) = content_of(&msg) else {
                return Ok(());
            };
            let ack = ack_for(&content);
            match ctx.relay.relay_to_order_topic(from.id, order_id, content).await {
                Ok(RelayOutcome::Forwarded) => send(ctx, from.id, ack, None).await,
                Ok(_) => {} // topic-not-ready notice already went out
                Err(e) => warn!(user_id = from.id, error = %e, "chat relay failed"),
            }
            Ok(())
        }
        None => {
            let Some(content) = content_of(&msg) else {
                return Ok(());
            };
            // safety net: a bare screenshot with no relay target still counts
            // as payment proof for the newest unpaid order
            if let MessageContent::Photo { file_id, .. } = &content {
                if ctx.repo.active_order(from.id).await?.is_none() {
                    if let Some(pending) = ctx.repo.latest_pending_order(from.id).await? {
                        let file_id = file_id.clone();
                        return accept_payment_photo(ctx, &from, pending.id, &file_id).await;
                    }
                }
            }
            if let Err(e) = ctx.relay.relay_from_customer(from.id, content).await {
                warn!(user_id = from.id, error = %e, "customer relay failed");
            }
            Ok(())
        }
    }
}

async fn cmd_start(ctx: &BotContext, from: &TgUser, payload: &str) -> anyhow::Result<()> {
    ctx.repo
        .upsert_user(from.id, from.username.as_deref().unwrap_or(""), &from.full_name())
        .await?;

    // deep link: /start pay_<order_id>
    if let Some(rest) = payload.strip_prefix("pay_") {
        if let Ok(order_id) = rest.parse::<OrderId>() {
            if let Ok(order) = ctx.repo.get_order(order_id).await {
                if order.user_id == from.id && order.status == OrderStatus::PendingPayment {
                    ctx.set_state(from.id, ConvoState::AwaitingPaymentPhoto(order_id));
                    let text = format!(
                        "<b>{shop} — Заказ #{order_id}</b>\n\n\
                         Отправьте скриншот / фото чека оплаты прямо сюда.\n\n\
                         <b>Реквизиты:</b>\nБанк: {bank}\nКарта: <code>{card}</code>\nПолучатель: {holder}",
                        shop = ctx.config.shop_name,
                        bank = ctx.config.payment.bank,
                        card = ctx.config.payment.card,
                        holder = ctx.config.payment.holder,
                    );
                    send(ctx, from.id, &text, Some(keyboards::cancel(ctx.caps))).await;
                    return Ok(());
                }
            }
        }
    }

    // reset the foreground workflow but keep the active-order pointer
    ctx.clear_state(from.id);

    if let Some(active_id) = ctx.repo.active_order(from.id).await? {
        if let Ok(order) = ctx.repo.get_order(active_id).await {
            if order.status.is_live() {
                let text = format!(
                    "<b>{}</b>\n\nУ вас активный заказ #{active_id}.\n\
                     Все сообщения отправляются менеджеру.\n\n\
                     Используйте /stop чтобы выйти из чата.",
                    ctx.config.shop_name,
                );
                send(ctx, from.id, &text, Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
                return Ok(());
            }
        }
    }

    let text = format!(
        "<b>{}</b>\n\nСборка, апгрейд и консультации по ПК.\n\
         Нажмите <b>Оформить заявку</b> чтобы начать.",
        ctx.config.shop_name,
    );
    send(ctx, from.id, &text, Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
    Ok(())
}

/// Explicit opt-out from relay mode.
async fn cmd_stop(ctx: &BotContext, user_id: UserId) -> anyhow::Result<()> {
    ctx.clear_state(user_id);
    ctx.repo.clear_active_order(user_id).await?;
    let text = format!(
        "<b>{}</b>\n\nВы вышли из чата с менеджером.\nВыберите действие:",
        ctx.config.shop_name,
    );
    send(ctx, user_id, &text, Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
    Ok(())
}

async fn check_status_by_number(ctx: &BotContext, from: &TgUser, text: &str) -> anyhow::Result<()> {
    let raw = text.trim().trim_start_matches('#');
    let Ok(order_id) = raw.parse::<OrderId>() else {
        send(ctx, from.id, "Введите число.", None).await; // state kept, let them retry
        return Ok(());
    };
    ctx.clear_state(from.id);
    match ctx.repo.get_order(order_id).await {
        Ok(order) if order.user_id == from.id => {
            let text = format!(
                "<b>{} — Заказ #{order_id}</b>\nСтатус: {}",
                ctx.config.shop_name,
                order.status.human_text(),
            );
            send(ctx, from.id, &text, Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
        }
        Ok(_) | Err(RepoError::NotFound) => {
            send(ctx, from.id, "Заказ не найден.", Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Records the proof, ensures the manager topic and forwards the screenshot
/// into it with the confirm/reject controls.
async fn accept_payment_photo(ctx: &BotContext, from: &TgUser, order_id: OrderId, file_id: &str) -> anyhow::Result<()> {
    ctx.clear_state(from.id);
    match ctx.lifecycle.record_payment_proof(order_id, file_id).await {
        Ok(_) => {}
        Err(OrderError::NotFound) => {
            send(ctx, from.id, "Заказ не найден.", Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
            return Ok(());
        }
        Err(OrderError::TerminalState) => {
            send(ctx, from.id, "Заказ уже закрыт.", Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let topic = match ctx.relay.ensure_topic_for_order(order_id).await {
        Ok(t) => t,
        Err(e) => {
            warn!(order_id, error = %e, "topic ensure failed");
            None
        }
    };
    if let Some(topic_id) = topic {
        let caption = format!("<b>Фото оплаты — заказ #{order_id}</b>");
        let opts = SendOptions {
            thread_id: Some(topic_id),
            keyboard: Some(keyboards::payment_review(ctx.caps, order_id)),
        };
        if let Err(e) = ctx
            .messenger
            .send_photo(ctx.config.manager_group_id, file_id, Some(&caption), opts)
            .await
        {
            warn!(order_id, error = %e, "payment photo forward failed");
        }
    }

    let text = format!(
        "<b>Скриншот получен!</b>\n\n\
         Заказ #{order_id} — менеджер проверит оплату и свяжется с вами.\n\
         Ожидайте подтверждения.",
    );
    send(ctx, from.id, &text, Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
    Ok(())
}

// ---------------- callbacks ----------------

async fn handle_callback(ctx: &BotContext, cb: CallbackQuery) -> anyhow::Result<()> {
    let data = cb.data.clone().unwrap_or_default();
    match data.as_str() {
        "home" => {
            ctx.clear_state(cb.from.id);
            let text = format!("<b>{}</b>\nВыберите действие:", ctx.config.shop_name);
            edit_or_send(ctx, &cb, &text, Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
            answer(ctx, &cb, None).await;
            Ok(())
        }
        "my_orders" => {
            let orders = ctx.repo.list_user_orders(cb.from.id).await?;
            if orders.is_empty() {
                edit_or_send(ctx, &cb, "У вас пока нет заказов.", Some(keyboards::main_menu(ctx.caps, &ctx.config))).await;
            } else {
                let kb = keyboards::orders_list(ctx.caps, &ctx.config, &orders);
                edit_or_send(ctx, &cb, "<b>Ваши заказы:</b>", Some(kb)).await;
            }
            answer(ctx, &cb, None).await;
            Ok(())
        }
        "check_status" => {
            ctx.set_state(cb.from.id, ConvoState::AwaitingOrderNumber);
            edit_or_send(ctx, &cb, "Введите номер заказа:", None).await;
            answer(ctx, &cb, None).await;
            Ok(())
        }
        _ => {
            if let Some(raw) = data.strip_prefix("view:") {
                view_order(ctx, &cb, raw).await
            } else if let Some(raw) = data.strip_prefix("cpay:") {
                review_payment(ctx, &cb, raw, true).await
            } else if let Some(raw) = data.strip_prefix("rpay:") {
                review_payment(ctx, &cb, raw, false).await
            } else if let Some(raw) = data.strip_prefix("ss:") {
                set_status(ctx, &cb, raw).await
            } else {
                answer(ctx, &cb, None).await;
                Ok(())
            }
        }
    }
}

async fn view_order(ctx: &BotContext, cb: &CallbackQuery, raw: &str) -> anyhow::Result<()> {
    let Ok(order_id) = raw.parse::<OrderId>() else {
        answer(ctx, cb, None).await;
        return Ok(());
    };
    let order = match ctx.repo.get_order(order_id).await {
        Ok(o) if o.user_id == cb.from.id => o,
        Ok(_) | Err(RepoError::NotFound) => {
            answer(ctx, cb, Some("Не найден")).await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let prefix = ctx.config.price_prefix(&order.service_type);
    let mut text = format!(
        "<b>{shop} — Заказ #{order_id}</b>\n\n\
         Услуга: {service}\n\
         Стоимость: {prefix}{byn} BYN / {prefix}{rub} RUB\n\
         Статус: {status}\nДата: {date}",
        shop = ctx.config.shop_name,
        service = ctx.config.service_name(&order.service_type),
        byn = order.price_byn,
        rub = order.price_rub,
        status = order.status.human_text(),
        date = order.created_minute(),
    );
    match order.status {
        OrderStatus::PendingPayment => {
            text.push_str(&format!(
                "\n\n<b>Для оплаты:</b>\n\
                 Банк: {bank}\nКарта: <code>{card}</code>\nПолучатель: {holder}\n\n\
                 Сохраните скриншот оплаты и отправьте его сюда.",
                bank = ctx.config.payment.bank,
                card = ctx.config.payment.card,
                holder = ctx.config.payment.holder,
            ));
            ctx.set_state(cb.from.id, ConvoState::AwaitingPaymentPhoto(order_id));
        }
        s if s.is_live() => {
            text.push_str("\n\nМожете написать менеджеру прямо сюда.");
            ctx.set_state(cb.from.id, ConvoState::Chatting(order_id));
        }
        _ => {}
    }
    edit_or_send(ctx, cb, &text, Some(keyboards::back_to_orders())).await;
    answer(ctx, cb, None).await;
    Ok(())
}

async fn review_payment(ctx: &BotContext, cb: &CallbackQuery, raw: &str, confirm: bool) -> anyhow::Result<()> {
    let Ok(order_id) = raw.parse::<OrderId>() else {
        answer(ctx, cb, None).await;
        return Ok(());
    };
    if !from_manager_group(ctx, cb) {
        answer(ctx, cb, None).await;
        return Ok(());
    }
    let result = if confirm {
        ctx.lifecycle.confirm_payment(order_id).await
    } else {
        ctx.lifecycle.reject_payment(order_id).await
    };
    match result {
        Ok(_) => {
            let verdict = if confirm { "ПОДТВЕРЖДЕНО" } else { "ОТКЛОНЕНО" };
            let caption = format!("<b>Заказ #{order_id} — {verdict}</b>");
            if let Some(msg) = &cb.message {
                if ctx.messenger.edit_message_caption(msg.chat.id, msg.message_id, &caption).await.is_err() {
                    let opts = SendOptions { thread_id: msg.message_thread_id, keyboard: None };
                    if let Err(e) = ctx.messenger.send_message(msg.chat.id, &caption, opts).await {
                        warn!(order_id, error = %e, "payment verdict delivery failed");
                    }
                }
            }
            answer(ctx, cb, Some(if confirm { "Подтверждено" } else { "Отклонено" })).await;
        }
        Err(OrderError::NotFound) => answer(ctx, cb, Some("Заказ не найден")).await,
        Err(OrderError::TerminalState) => answer(ctx, cb, Some("Заказ уже закрыт")).await,
        Err(e) => {
            warn!(order_id, error = %e, "payment review failed");
            answer(ctx, cb, Some("Ошибка")).await;
        }
    }
    Ok(())
}

async fn set_status(ctx: &BotContext, cb: &CallbackQuery, raw: &str) -> anyhow::Result<()> {
    let Some((oid_raw, status_raw)) = raw.split_once(':') else {
        answer(ctx, cb, None).await;
        return Ok(());
    };
    let Ok(order_id) = oid_raw.parse::<OrderId>() else {
        answer(ctx, cb, None).await;
        return Ok(());
    };
    if !from_manager_group(ctx, cb) {
        answer(ctx, cb, None).await;
        return Ok(());
    }
    match ctx.lifecycle.transition_named(order_id, status_raw).await {
        Ok(order) => {
            let status_text = order.status.human_text();
            let thread = cb.message.as_ref().and_then(|m| m.message_thread_id);
            let opts = SendOptions {
                thread_id: thread,
                keyboard: Some(keyboards::order_controls(ctx.caps, order_id)),
            };
            if let Err(e) = ctx
                .messenger
                .send_message(ctx.config.manager_group_id, &format!("Статус #{order_id}: {status_text}"), opts)
                .await
            {
                warn!(order_id, error = %e, "status echo delivery failed");
            }
            answer(ctx, cb, Some(status_text)).await;
        }
        Err(OrderError::InvalidStatus(_)) => answer(ctx, cb, Some("Неизвестный статус")).await,
        Err(OrderError::NotFound) => answer(ctx, cb, Some("Заказ не найден")).await,
        Err(OrderError::TerminalState) => answer(ctx, cb, Some("Заказ уже закрыт")).await,
        Err(e) => {
            warn!(order_id, error = %e, "status transition failed");
            answer(ctx, cb, Some("Ошибка")).await;
        }
    }
    Ok(())
}

// ---------------- helpers ----------------

/// Operator buttons are honored only inside the manager group.
fn from_manager_group(ctx: &BotContext, cb: &CallbackQuery) -> bool {
    ctx.config.manager_group_id != 0
        && cb
            .message
            .as_ref()
            .map(|m| m.chat.id == ctx.config.manager_group_id)
            .unwrap_or(false)
}

fn ack_for(content: &MessageContent) -> &'static str {
    match content {
        MessageContent::Text(_) => "Отправлено менеджеру.",
        MessageContent::Photo { .. } => "Фото отправлено.",
        MessageContent::Video { .. } => "Видео отправлено.",
        MessageContent::Document { .. } => "Файл отправлен.",
    }
}

fn content_of(msg: &Message) -> Option<MessageContent> {
    if let Some(photos) = &msg.photo {
        // largest size comes last
        if let Some(photo) = photos.last() {
            return Some(MessageContent::Photo {
                file_id: photo.file_id.clone(),
                caption: msg.caption.clone(),
            });
        }
    }
    if let Some(video) = &msg.video {
        return Some(MessageContent::Video {
            file_id: video.file_id.clone(),
            caption: msg.caption.clone(),
        });
    }
    if let Some(doc) = &msg.document {
        return Some(MessageContent::Document {
            file_id: doc.file_id.clone(),
            caption: msg.caption.clone(),
        });
    }
    msg.text.clone().map(MessageContent::Text)
}

fn photo_file_id(msg: &Message) -> Option<String> {
    msg.photo.as_ref().and_then(|p| p.last()).map(|p| p.file_id.clone())
}

async fn send(ctx: &BotContext, chat_id: i64, text: &str, keyboard: Option<InlineKeyboardMarkup>) {
    let opts = SendOptions { thread_id: None, keyboard };
    if let Err(e) = ctx.messenger.send_message(chat_id, text, opts).await {
        warn!(chat_id, error = %e, "send failed");
    }
}

async fn answer(ctx: &BotContext, cb: &CallbackQuery, text: Option<&str>) {
    if let Err(e) = ctx.messenger.answer_callback(&cb.id, text).await {
        warn!(error = %e, "callback answer failed");
    }
}

async fn edit_or_send(ctx: &BotContext, cb: &CallbackQuery, text: &str, keyboard: Option<InlineKeyboardMarkup>) {
    let Some(msg) = &cb.message else {
        send(ctx, cb.from.id, text, keyboard).await;
        return;
    };
    if ctx
        .messenger
        .edit_message_text(msg.chat.id, msg.message_id, text, keyboard.clone())
        .await
        .is_err()
    {
        send(ctx, msg.chat.id, text, keyboard).await;
    }
}
