//! JSON API consumed by the mini-app: order intake, status and history
//! lookups, the public price table, and the Prometheus scrape endpoint.

use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Responder};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::config::Config;
use crate::error::ApiError;
use crate::keyboards;
use crate::lifecycle::{Lifecycle, OrderIntake};
use crate::models::{Order, OrderId, UserId};
use crate::relay::Relay;
use crate::repo::{Repo, RepoError};
use crate::telegram::{Messenger, SendOptions};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub messenger: Arc<dyn Messenger>,
    pub lifecycle: Lifecycle,
    pub relay: Relay,
    pub config: Arc<Config>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(create_order)
        .service(order_status)
        .service(user_orders)
        .service(order_detail)
        .service(prices)
        .service(metrics_endpoint);
}

// ---------------- request / response bodies ----------------

fn default_username() -> String {
    String::new()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderIn {
    pub user_id: UserId,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    pub service_type: String,
    #[serde(default)]
    pub has_parts_list: bool,
    #[serde(default)]
    pub parts_data: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderCreated {
    pub id: OrderId,
    pub status: String,
    pub price_byn: f64,
    pub price_rub: f64,
    pub price_prefix: String,
    pub payment_card: String,
    pub payment_holder: String,
    pub payment_bank: String,
    pub bot_username: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStatusOut {
    pub order_id: OrderId,
    pub status: String,
    pub status_text: String,
    pub service: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderSummary {
    pub id: OrderId,
    pub service_type: String,
    pub service: String,
    pub status: String,
    pub status_text: String,
    pub price_byn: f64,
    pub price_rub: f64,
    pub price_prefix: String,
    pub date: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetail {
    pub id: OrderId,
    pub user_id: UserId,
    pub username: String,
    pub full_name: String,
    pub service_type: String,
    pub service: String,
    pub status: String,
    pub status_text: String,
    pub has_parts_list: bool,
    pub parts_data: Option<serde_json::Value>,
    pub description: String,
    pub price_byn: f64,
    pub price_rub: f64,
    pub price_prefix: String,
    pub date: String,
}

// ---------------- handlers ----------------

/// Creates an order and, best-effort, pings the customer and opens the
/// manager topic. Delivery failures never fail the request.
#[utoipa::path(
    post,
    path = "/api/order",
    request_body = OrderIn,
    responses(
        (status = 200, description = "Order created", body = OrderCreated),
        (status = 400, description = "Unknown service type"),
    ),
    tag = "orders"
)]
#[post("/api/order")]
pub async fn create_order(state: web::Data<AppState>, body: web::Json<OrderIn>) -> Result<impl Responder, ApiError> {
    let body = body.into_inner();
    let order = state
        .lifecycle
        .create_order(OrderIntake {
            user_id: body.user_id,
            username: body.username,
            full_name: body.full_name,
            service_type: body.service_type,
            has_parts: body.has_parts_list,
            parts: body.parts_data,
            description: body.description,
        })
        .await?;

    notify_new_order(&state, &order).await;

    let prefix = state.config.price_prefix(&order.service_type).to_string();
    Ok(HttpResponse::Ok().json(OrderCreated {
        id: order.id,
        status: order.status.as_str().to_string(),
        price_byn: order.price_byn,
        price_rub: order.price_rub,
        price_prefix: prefix,
        payment_card: state.config.payment.card.clone(),
        payment_holder: state.config.payment.holder.clone(),
        payment_bank: state.config.payment.bank.clone(),
        bot_username: state.config.bot_username.clone(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/status/{order_id}",
    params(("order_id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Current status", body = OrderStatusOut),
        (status = 404, description = "No such order"),
    ),
    tag = "orders"
)]
#[get("/api/status/{order_id}")]
pub async fn order_status(state: web::Data<AppState>, path: web::Path<OrderId>) -> Result<impl Responder, ApiError> {
    let order_id = path.into_inner();
    let order = state.repo.get_order(order_id).await?;
    Ok(HttpResponse::Ok().json(OrderStatusOut {
        order_id,
        status: order.status.as_str().to_string(),
        status_text: order.status.human_text().to_string(),
        service: state.config.service_name(&order.service_type).to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/orders/{user_id}",
    params(("user_id" = i64, Path, description = "Telegram user id")),
    responses((status = 200, description = "Orders, newest first", body = [OrderSummary])),
    tag = "orders"
)]
#[get("/api/orders/{user_id}")]
pub async fn user_orders(state: web::Data<AppState>, path: web::Path<UserId>) -> Result<impl Responder, ApiError> {
    let user_id = path.into_inner();
    let orders = state.repo.list_user_orders(user_id).await?;
    let out: Vec<OrderSummary> = orders
        .iter()
        .map(|o| OrderSummary {
            id: o.id,
            service_type: o.service_type.clone(),
            service: state.config.service_name(&o.service_type).to_string(),
            status: o.status.as_str().to_string(),
            status_text: o.status.human_text().to_string(),
            price_byn: o.price_byn,
            price_rub: o.price_rub,
            price_prefix: state.config.price_prefix(&o.service_type).to_string(),
            date: o.created_minute(),
        })
        .collect();
    Ok(HttpResponse::Ok().json(out))
}

#[utoipa::path(
    get,
    path = "/api/order/{order_id}",
    params(("order_id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Full order record", body = OrderDetail),
        (status = 404, description = "No such order"),
    ),
    tag = "orders"
)]
#[get("/api/order/{order_id}")]
pub async fn order_detail(state: web::Data<AppState>, path: web::Path<OrderId>) -> Result<impl Responder, ApiError> {
    let order_id = path.into_inner();
    let order = state.repo.get_order(order_id).await?;
    let user = match state.repo.get_user(order.user_id).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => None,
        Err(e) => return Err(e.into()),
    };
    let (username, full_name) = user
        .map(|u| (u.username, u.full_name))
        .unwrap_or_default();
    Ok(HttpResponse::Ok().json(OrderDetail {
        id: order.id,
        user_id: order.user_id,
        username,
        full_name,
        service_type: order.service_type.clone(),
        service: state.config.service_name(&order.service_type).to_string(),
        status: order.status.as_str().to_string(),
        status_text: order.status.human_text().to_string(),
        has_parts_list: order.has_parts,
        parts_data: order.parts(),
        description: order.description.clone(),
        price_byn: order.price_byn,
        price_rub: order.price_rub,
        price_prefix: state.config.price_prefix(&order.service_type).to_string(),
        date: order.created_minute(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/prices",
    responses((status = 200, description = "Current price table")),
    tag = "prices"
)]
#[get("/api/prices")]
pub async fn prices(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(&state.config.prices)
}

#[get("/metrics")]
pub async fn metrics_endpoint(state: web::Data<AppState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}

/// Invoice message to the customer plus the manager topic, both best-effort.
async fn notify_new_order(state: &AppState, order: &Order) {
    let prefix = state.config.price_prefix(&order.service_type);
    let text = format!(
        "<b>{shop} — Заявка #{id} принята!</b>\n\n\
         Услуга: {service}\n\
         Стоимость: {prefix}{byn} BYN / {prefix}{rub} RUB\n\n\
         <b>Для оплаты:</b>\n\
         Банк: {bank}\nКарта: <code>{card}</code>\nПолучатель: {holder}\n\n\
         После оплаты отправьте скриншот чека боту.",
        shop = state.config.shop_name,
        id = order.id,
        service = state.config.service_name(&order.service_type),
        byn = order.price_byn,
        rub = order.price_rub,
        bank = state.config.payment.bank,
        card = state.config.payment.card,
        holder = state.config.payment.holder,
    );
    let opts = SendOptions { thread_id: None, keyboard: keyboards::pay_link(&state.config, order.id) };
    if let Err(e) = state.messenger.send_message(order.user_id, &text, opts).await {
        warn!(order_id = order.id, error = %e, "invoice delivery failed");
    }
    if let Err(e) = state.relay.ensure_topic_for_order(order.id).await {
        warn!(order_id = order.id, error = %e, "topic ensure failed");
    }
}
