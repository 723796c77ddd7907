//! Inline keyboards for the customer menu and the operator controls, plus the
//! startup negotiation of the styled-button capability.

use crate::config::Config;
use crate::models::{Order, OrderId, OrderStatus};
use crate::telegram::{
    InlineKeyboardButton, InlineKeyboardMarkup, Messenger, SendOptions, WebAppInfo,
};

/// UI capabilities of the Bot API server we talk to, negotiated once at
/// startup and passed to every keyboard builder.
#[derive(Debug, Clone, Copy)]
pub struct UiCaps {
    pub styles: bool,
}

impl UiCaps {
    pub fn plain() -> Self {
        Self { styles: false }
    }

    /// Probes styled-button support by sending a throwaway styled keyboard to
    /// the admin chat and deleting it. `TG_BUTTON_STYLES` overrides the probe;
    /// without an admin chat styles stay off.
    pub async fn negotiate(messenger: &dyn Messenger, admin_chat_id: i64) -> Self {
        if let Ok(v) = std::env::var("TG_BUTTON_STYLES") {
            return Self { styles: v == "1" || v.eq_ignore_ascii_case("true") };
        }
        if admin_chat_id == 0 {
            return Self::plain();
        }
        let probe = InlineKeyboardMarkup {
            inline_keyboard: vec![vec![InlineKeyboardButton {
                text: "probe".into(),
                callback_data: Some("noop".into()),
                url: None,
                web_app: None,
                style: Some("primary"),
            }]],
        };
        match messenger
            .send_message(admin_chat_id, "style probe", SendOptions::with_keyboard(probe))
            .await
        {
            Ok(message_id) => {
                let _ = messenger.delete_message(admin_chat_id, message_id).await;
                tracing::info!("styled buttons supported");
                Self { styles: true }
            }
            Err(e) if e.is_bad_button_style() => {
                tracing::warn!("styled buttons unsupported, rendering plain keyboards");
                Self::plain()
            }
            Err(e) => {
                tracing::warn!(error = %e, "style probe failed, rendering plain keyboards");
                Self::plain()
            }
        }
    }
}

fn btn(text: &str, data: &str) -> InlineKeyboardButton {
    InlineKeyboardButton {
        text: text.into(),
        callback_data: Some(data.into()),
        url: None,
        web_app: None,
        style: None,
    }
}

fn styled(caps: UiCaps, text: &str, data: &str, style: &'static str) -> InlineKeyboardButton {
    InlineKeyboardButton {
        text: text.into(),
        callback_data: Some(data.into()),
        url: None,
        web_app: None,
        style: caps.styles.then_some(style),
    }
}

pub fn main_menu(caps: UiCaps, config: &Config) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if let Some(url) = &config.webapp_url {
        rows.push(vec![InlineKeyboardButton {
            text: "Оформить заявку".into(),
            callback_data: None,
            url: None,
            web_app: Some(WebAppInfo { url: url.clone() }),
            style: None,
        }]);
    }
    rows.push(vec![styled(caps, "Мои заказы", "my_orders", "primary")]);
    rows.push(vec![btn("Проверить статус", "check_status")]);
    InlineKeyboardMarkup { inline_keyboard: rows }
}

/// One button per order (10 most recent), colored by status where supported.
pub fn orders_list(caps: UiCaps, config: &Config, orders: &[Order]) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    for o in orders.iter().take(10) {
        let style = match o.status {
            OrderStatus::PaymentConfirmed | OrderStatus::Completed => Some("success"),
            OrderStatus::Cancelled => Some("danger"),
            OrderStatus::InProgress => Some("primary"),
            _ => None,
        };
        let label = format!("#{} | {} | {}", o.id, config.service_name(&o.service_type), o.status.human_text());
        let button = match style {
            Some(s) => styled(caps, &label, &format!("view:{}", o.id), s),
            None => btn(&label, &format!("view:{}", o.id)),
        };
        rows.push(vec![button]);
    }
    rows.push(vec![btn("Назад", "home")]);
    InlineKeyboardMarkup { inline_keyboard: rows }
}

/// Confirm / reject buttons attached to a payment proof in the manager topic.
pub fn payment_review(caps: UiCaps, order_id: OrderId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![styled(caps, "Подтвердить оплату", &format!("cpay:{order_id}"), "success")],
            vec![styled(caps, "Отклонить", &format!("rpay:{order_id}"), "danger")],
        ],
    }
}

/// Status transition controls posted into a manager topic.
pub fn order_controls(caps: UiCaps, order_id: OrderId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![
                styled(caps, "В работу", &format!("ss:{order_id}:in_progress"), "primary"),
                styled(caps, "Завершить", &format!("ss:{order_id}:completed"), "success"),
            ],
            vec![styled(caps, "Отменить", &format!("ss:{order_id}:cancelled"), "danger")],
        ],
    }
}

/// Mini-app deep link with the admin order view, when a web app is configured.
pub fn order_details_link(config: &Config, order_id: OrderId) -> Option<InlineKeyboardMarkup> {
    let url = config.webapp_url.as_ref()?;
    let info_url = url.replace("/web", &format!("/web/admin.html?order_id={order_id}"));
    Some(InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineKeyboardButton {
            text: "Детали заказа".into(),
            callback_data: None,
            url: None,
            web_app: Some(WebAppInfo { url: info_url }),
            style: None,
        }]],
    })
}

pub fn back_to_orders() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup { inline_keyboard: vec![vec![btn("Назад к заказам", "my_orders")]] }
}

pub fn cancel(caps: UiCaps) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup { inline_keyboard: vec![vec![styled(caps, "Отмена", "home", "danger")]] }
}

/// "Pay now" deep-link button attached to the invoice sent after an API order.
pub fn pay_link(config: &Config, order_id: OrderId) -> Option<InlineKeyboardMarkup> {
    let url = config.pay_link(order_id)?;
    Some(InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineKeyboardButton {
            text: "Оплатить".into(),
            callback_data: None,
            url: Some(url),
            web_app: None,
            style: None,
        }]],
    })
}
