//! Order lifecycle manager: owns the status state machine and its side
//! effects (customer notifications, relay activation/deactivation).

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::models::{NewOrder, Order, OrderId, OrderStatus, UserId};
use crate::repo::{Repo, RepoError};
use crate::telegram::{Messenger, SendOptions};

#[derive(thiserror::Error, Debug)]
pub enum OrderError {
    #[error("order not found")]
    NotFound,
    #[error("unknown service type: {0}")]
    InvalidServiceType(String),
    #[error("unknown status: {0}")]
    InvalidStatus(String),
    #[error("order already closed")]
    TerminalState,
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for OrderError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => OrderError::NotFound,
            other => OrderError::Repo(other),
        }
    }
}

/// Intake payload shared by the HTTP endpoint and any future entry point.
#[derive(Debug, Clone)]
pub struct OrderIntake {
    pub user_id: UserId,
    pub username: String,
    pub full_name: String,
    pub service_type: String,
    pub has_parts: bool,
    pub parts: Option<serde_json::Value>,
    pub description: String,
}

#[derive(Clone)]
pub struct Lifecycle {
    repo: Arc<dyn Repo>,
    messenger: Arc<dyn Messenger>,
    config: Arc<Config>,
}

impl Lifecycle {
    pub fn new(repo: Arc<dyn Repo>, messenger: Arc<dyn Messenger>, config: Arc<Config>) -> Self {
        Self { repo, messenger, config }
    }

    /// Creates an order in `pending_payment` with prices copied from the
    /// table at creation time. Later price-table edits do not touch it.
    pub async fn create_order(&self, intake: OrderIntake) -> Result<Order, OrderError> {
        let price = self
            .config
            .price(&intake.service_type)
            .ok_or_else(|| OrderError::InvalidServiceType(intake.service_type.clone()))?;
        self.repo
            .upsert_user(intake.user_id, &intake.username, &intake.full_name)
            .await?;
        let order = self
            .repo
            .create_order(NewOrder {
                user_id: intake.user_id,
                service_type: intake.service_type,
                has_parts: intake.has_parts,
                parts_data: intake.parts.as_ref().map(|v| v.to_string()),
                description: intake.description,
                price_byn: price.byn,
                price_rub: price.rub,
            })
            .await?;
        metrics::counter!("orders_created_total", 1);
        info!(order_id = order.id, service = %order.service_type, "order created");
        Ok(order)
    }

    /// Stores the payment proof and moves the order to `payment_uploaded`.
    /// Resubmission overwrites the reference; a proof arriving after the
    /// order was closed is rejected. Topic creation stays with the relay
    /// router and is not repeated here.
    pub async fn record_payment_proof(&self, order_id: OrderId, file_id: &str) -> Result<Order, OrderError> {
        let order = self.order(order_id).await?;
        if order.status.is_terminal() {
            return Err(OrderError::TerminalState);
        }
        self.repo.save_payment_photo(order_id, file_id).await?;
        info!(order_id, "payment proof recorded");
        self.order(order_id).await
    }

    pub async fn confirm_payment(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let order = self.order(order_id).await?;
        if order.status.is_terminal() {
            return Err(OrderError::TerminalState);
        }
        self.repo.set_status(order_id, OrderStatus::PaymentConfirmed).await?;
        self.notify_owner(
            order.user_id,
            &format!(
                "<b>{} — Оплата заказа #{} подтверждена!</b>\nМенеджер свяжется с вами в этом чате.",
                self.config.shop_name, order_id
            ),
        )
        .await;
        self.order(order_id).await
    }

    /// Returns the order to `pending_payment`; the proof can be resubmitted.
    pub async fn reject_payment(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let order = self.order(order_id).await?;
        if order.status.is_terminal() {
            return Err(OrderError::TerminalState);
        }
        self.repo.set_status(order_id, OrderStatus::PendingPayment).await?;
        self.notify_owner(
            order.user_id,
            &format!(
                "<b>{} — Оплата #{} не подтверждена.</b>\n\
                 Проверьте реквизиты и отправьте скриншот заново.\n\n\
                 Карта: <code>{}</code>\nПолучатель: {}",
                self.config.shop_name, order_id, self.config.payment.card, self.config.payment.holder
            ),
        )
        .await;
        self.order(order_id).await
    }

    /// Status string from a callback payload; unknown values are rejected
    /// here, at the boundary, and never persisted.
    pub async fn transition_named(&self, order_id: OrderId, status: &str) -> Result<Order, OrderError> {
        let status = status
            .parse::<OrderStatus>()
            .map_err(|_| OrderError::InvalidStatus(status.to_string()))?;
        self.transition(order_id, status).await
    }

    pub async fn transition(&self, order_id: OrderId, new_status: OrderStatus) -> Result<Order, OrderError> {
        let order = self.order(order_id).await?;
        if order.status.is_terminal() {
            return Err(OrderError::TerminalState);
        }
        self.repo.set_status(order_id, new_status).await?;
        metrics::counter!("order_transitions_total", 1, "status" => new_status.as_str());
        info!(order_id, status = %new_status, "order transitioned");

        match new_status {
            OrderStatus::InProgress => {
                self.repo.set_active_order(order.user_id, order_id).await?;
                self.notify_owner(
                    order.user_id,
                    &format!(
                        "<b>{} — Заказ #{} взят в работу!</b>\n\n\
                         <b>Внимание!</b> Все ваши сообщения в этом чате \
                         теперь будут отправляться менеджеру.\n\n\
                         Используйте /stop чтобы выйти из режима чата.",
                        self.config.shop_name, order_id
                    ),
                )
                .await;
            }
            s if s.is_terminal() => {
                // only this order's pointer; a later-activated order stays
                self.repo.clear_active_order_if(order.user_id, order_id).await?;
                self.notify_owner(
                    order.user_id,
                    &format!(
                        "<b>{} — Заказ #{}</b>\nСтатус: {}\n\nЧат с менеджером завершён.",
                        self.config.shop_name,
                        order_id,
                        new_status.human_text()
                    ),
                )
                .await;
            }
            _ => {
                self.notify_owner(
                    order.user_id,
                    &format!(
                        "<b>{} — Заказ #{}</b>\nНовый статус: {}",
                        self.config.shop_name,
                        order_id,
                        new_status.human_text()
                    ),
                )
                .await;
            }
        }
        self.order(order_id).await
    }

    async fn order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        Ok(self.repo.get_order(order_id).await?)
    }

    /// Best-effort: a blocked bot or network failure must not roll back the
    /// persisted status change.
    async fn notify_owner(&self, user_id: UserId, text: &str) {
        if let Err(e) = self.messenger.send_message(user_id, text, SendOptions::default()).await {
            warn!(user_id, error = %e, "owner notification failed");
        }
    }
}
