#![cfg(feature = "inmem-store")]

mod common;

use std::sync::Arc;

use serde_json::json;

use orderdesk::bot::{dispatch, BotContext, ConvoState};
use orderdesk::keyboards::UiCaps;
use orderdesk::lifecycle::{Lifecycle, OrderIntake};
use orderdesk::models::{Order, OrderStatus};
use orderdesk::relay::Relay;
use orderdesk::repo::inmem::InMemRepo;
use orderdesk::repo::{OrderRepo, TopicRepo, UserRepo};
use orderdesk::telegram::Update;

use common::{test_config, RecordingMessenger, Sent, MANAGER_GROUP};

struct World {
    repo: Arc<InMemRepo>,
    messenger: Arc<RecordingMessenger>,
    ctx: BotContext,
}

fn world() -> World {
    let repo = Arc::new(InMemRepo::new());
    let messenger = RecordingMessenger::new();
    let config = Arc::new(test_config());
    let lifecycle = Lifecycle::new(repo.clone(), messenger.clone(), config.clone());
    let relay = Relay::new(repo.clone(), messenger.clone(), config.clone(), UiCaps::plain());
    let ctx = BotContext::new(
        repo.clone(),
        messenger.clone(),
        lifecycle,
        relay,
        config,
        UiCaps::plain(),
    );
    World { repo, messenger, ctx }
}

async fn make_order(w: &World, user_id: i64) -> Order {
    w.ctx
        .lifecycle
        .create_order(OrderIntake {
            user_id,
            username: "alice".into(),
            full_name: "Alice A".into(),
            service_type: "build".into(),
            has_parts: false,
            parts: None,
            description: String::new(),
        })
        .await
        .unwrap()
}

fn private_text(user_id: i64, text: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": 1,
        "message": {
            "message_id": 100,
            "from": { "id": user_id, "is_bot": false, "first_name": "Alice", "username": "alice" },
            "chat": { "id": user_id, "type": "private" },
            "text": text
        }
    }))
    .unwrap()
}

fn private_photo(user_id: i64, file_id: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": 1,
        "message": {
            "message_id": 101,
            "from": { "id": user_id, "is_bot": false, "first_name": "Alice", "username": "alice" },
            "chat": { "id": user_id, "type": "private" },
            "photo": [ { "file_id": "small" }, { "file_id": file_id } ]
        }
    }))
    .unwrap()
}

fn group_text(topic_id: i64, text: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": 1,
        "message": {
            "message_id": 102,
            "from": { "id": 555, "is_bot": false, "first_name": "Manager" },
            "chat": { "id": MANAGER_GROUP, "type": "supergroup" },
            "message_thread_id": topic_id,
            "text": text
        }
    }))
    .unwrap()
}

fn callback(user_id: i64, chat_id: i64, thread_id: Option<i64>, data: &str) -> Update {
    let kind = if chat_id < 0 { "supergroup" } else { "private" };
    serde_json::from_value(json!({
        "update_id": 1,
        "callback_query": {
            "id": "cb1",
            "from": { "id": user_id, "is_bot": false, "first_name": "Alice", "username": "alice" },
            "data": data,
            "message": {
                "message_id": 200,
                "chat": { "id": chat_id, "type": kind },
                "message_thread_id": thread_id
            }
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn start_greets_and_registers_the_user() {
    let w = world();
    dispatch(&w.ctx, private_text(10, "/start")).await.unwrap();

    let texts = w.messenger.texts_to(10);
    assert!(texts.iter().any(|t| t.contains("Inside PC")));
    let user = w.repo.get_user(10).await.unwrap().unwrap();
    assert_eq!(user.username, "alice");
}

#[tokio::test]
async fn pay_deep_link_arms_the_upload_state() {
    let w = world();
    let order = make_order(&w, 10).await;

    dispatch(&w.ctx, private_text(10, &format!("/start pay_{}", order.id))).await.unwrap();

    assert_eq!(w.ctx.state(10), Some(ConvoState::AwaitingPaymentPhoto(order.id)));
    let texts = w.messenger.texts_to(10);
    assert!(texts.iter().any(|t| t.contains("Реквизиты") && t.contains("1234 5678 9012 3456")));
}

#[tokio::test]
async fn pay_deep_link_for_someone_elses_order_is_a_plain_start() {
    let w = world();
    let order = make_order(&w, 11).await;

    dispatch(&w.ctx, private_text(10, &format!("/start pay_{}", order.id))).await.unwrap();

    assert_eq!(w.ctx.state(10), None);
    assert!(w.messenger.texts_to(10).iter().all(|t| !t.contains("Реквизиты")));
}

#[tokio::test]
async fn payment_photo_records_opens_topic_and_confirms() {
    let w = world();
    let order = make_order(&w, 10).await;
    dispatch(&w.ctx, private_text(10, &format!("/start pay_{}", order.id))).await.unwrap();

    dispatch(&w.ctx, private_photo(10, "proof_large")).await.unwrap();

    assert_eq!(w.ctx.state(10), None);
    let stored = w.repo.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PaymentUploaded);
    assert_eq!(stored.payment_photo.as_deref(), Some("proof_large"));

    // screenshot forwarded into the fresh topic with the review controls
    let link = w.repo.topic_by_order(order.id).await.unwrap().unwrap();
    let forwarded = w.messenger.log().into_iter().any(|s| matches!(
        s,
        Sent::Photo { chat_id, file_id, thread_id, .. }
            if chat_id == MANAGER_GROUP && file_id == "proof_large" && thread_id == Some(link.topic_id)
    ));
    assert!(forwarded);
    assert!(w.messenger.texts_to(10).iter().any(|t| t.contains("Скриншот получен")));
}

#[tokio::test]
async fn late_screenshot_after_cancellation_is_refused() {
    let w = world();
    let order = make_order(&w, 10).await;
    dispatch(&w.ctx, private_text(10, &format!("/start pay_{}", order.id))).await.unwrap();
    // operator closes the order while the customer is still armed to upload
    w.ctx.lifecycle.transition(order.id, OrderStatus::Cancelled).await.unwrap();

    dispatch(&w.ctx, private_photo(10, "late")).await.unwrap();

    let stored = w.repo.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(stored.payment_photo, None);
    assert!(w.messenger.texts_to(10).iter().any(|t| t == "Заказ уже закрыт."));
}

#[tokio::test]
async fn stray_photo_falls_back_to_the_newest_pending_order() {
    let w = world();
    let order = make_order(&w, 10).await;

    // no deep link, no state: the photo still counts as proof
    dispatch(&w.ctx, private_photo(10, "stray")).await.unwrap();

    let stored = w.repo.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PaymentUploaded);
    assert_eq!(stored.payment_photo.as_deref(), Some("stray"));
}

#[tokio::test]
async fn status_check_keeps_prompting_until_a_number_arrives() {
    let w = world();
    let order = make_order(&w, 10).await;

    dispatch(&w.ctx, callback(10, 10, None, "check_status")).await.unwrap();
    assert_eq!(w.ctx.state(10), Some(ConvoState::AwaitingOrderNumber));

    dispatch(&w.ctx, private_text(10, "завтра")).await.unwrap();
    assert_eq!(w.ctx.state(10), Some(ConvoState::AwaitingOrderNumber));
    assert!(w.messenger.texts_to(10).iter().any(|t| t == "Введите число."));

    dispatch(&w.ctx, private_text(10, &format!("#{}", order.id))).await.unwrap();
    assert_eq!(w.ctx.state(10), None);
    assert!(w.messenger.texts_to(10).iter().any(|t| t.contains("Ожидает оплаты")));
}

#[tokio::test]
async fn status_check_hides_other_peoples_orders() {
    let w = world();
    let order = make_order(&w, 11).await;

    dispatch(&w.ctx, callback(10, 10, None, "check_status")).await.unwrap();
    dispatch(&w.ctx, private_text(10, &order.id.to_string())).await.unwrap();

    assert!(w.messenger.texts_to(10).iter().any(|t| t == "Заказ не найден."));
}

#[tokio::test]
async fn stop_leaves_relay_mode() {
    let w = world();
    let order = make_order(&w, 10).await;
    w.ctx.lifecycle.transition(order.id, OrderStatus::InProgress).await.unwrap();
    assert_eq!(w.repo.active_order(10).await.unwrap(), Some(order.id));

    dispatch(&w.ctx, private_text(10, "/stop")).await.unwrap();

    assert_eq!(w.repo.active_order(10).await.unwrap(), None);
    assert!(w.messenger.texts_to(10).iter().any(|t| t.contains("вышли из чата")));
}

#[tokio::test]
async fn active_chat_relays_and_acks() {
    let w = world();
    let order = make_order(&w, 10).await;
    w.ctx.relay.ensure_topic_for_order(order.id).await.unwrap().unwrap();
    w.ctx.lifecycle.transition(order.id, OrderStatus::InProgress).await.unwrap();

    dispatch(&w.ctx, private_text(10, "есть новости?")).await.unwrap();

    let relayed = w.messenger.log().into_iter().any(|s| matches!(
        s,
        Sent::Message { chat_id, text, .. }
            if chat_id == MANAGER_GROUP && text.contains("есть новости?")
    ));
    assert!(relayed);
}

#[tokio::test]
async fn operator_topic_reply_lands_in_the_private_chat() {
    let w = world();
    let order = make_order(&w, 10).await;
    let topic_id = w.ctx.relay.ensure_topic_for_order(order.id).await.unwrap().unwrap();

    dispatch(&w.ctx, group_text(topic_id, "завтра заберёте")).await.unwrap();

    let texts = w.messenger.texts_to(10);
    assert!(texts.iter().any(|t| t.contains("Inside PC:") && t.contains("завтра заберёте")));
}

#[tokio::test]
async fn payment_confirm_button_moves_the_order_and_answers() {
    let w = world();
    let order = make_order(&w, 10).await;
    let topic_id = w.ctx.relay.ensure_topic_for_order(order.id).await.unwrap().unwrap();

    dispatch(&w.ctx, callback(555, MANAGER_GROUP, Some(topic_id), &format!("cpay:{}", order.id)))
        .await
        .unwrap();

    let stored = w.repo.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PaymentConfirmed);
    assert!(w.messenger.callbacks().iter().any(|(_, t)| t.as_deref() == Some("Подтверждено")));
}

#[tokio::test]
async fn operator_buttons_are_dead_outside_the_manager_group() {
    let w = world();
    let order = make_order(&w, 10).await;

    // confirm attempt from a private chat
    dispatch(&w.ctx, callback(10, 10, None, &format!("cpay:{}", order.id))).await.unwrap();

    let stored = w.repo.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PendingPayment);
}

#[tokio::test]
async fn unknown_status_payload_is_rejected_with_an_answer() {
    let w = world();
    let order = make_order(&w, 10).await;
    let topic_id = w.ctx.relay.ensure_topic_for_order(order.id).await.unwrap().unwrap();

    dispatch(&w.ctx, callback(555, MANAGER_GROUP, Some(topic_id), &format!("ss:{}:refunded", order.id)))
        .await
        .unwrap();

    let stored = w.repo.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PendingPayment);
    assert!(w.messenger.callbacks().iter().any(|(_, t)| t.as_deref() == Some("Неизвестный статус")));
}

#[tokio::test]
async fn status_buttons_drive_the_lifecycle_from_the_topic() {
    let w = world();
    let order = make_order(&w, 10).await;
    let topic_id = w.ctx.relay.ensure_topic_for_order(order.id).await.unwrap().unwrap();

    dispatch(&w.ctx, callback(555, MANAGER_GROUP, Some(topic_id), &format!("ss:{}:in_progress", order.id)))
        .await
        .unwrap();

    let stored = w.repo.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::InProgress);
    assert_eq!(w.repo.active_order(10).await.unwrap(), Some(order.id));
    // customer was told relay mode is on
    assert!(w.messenger.texts_to(10).iter().any(|t| t.contains("взят в работу")));
}

#[tokio::test]
async fn my_orders_lists_or_explains_emptiness() {
    let w = world();

    dispatch(&w.ctx, callback(10, 10, None, "my_orders")).await.unwrap();
    let empty_shown = w.messenger.log().into_iter().any(|s| matches!(
        s,
        Sent::EditText { text, .. } | Sent::Message { text, .. } if text.contains("нет заказов")
    ));
    assert!(empty_shown);

    make_order(&w, 10).await;
    dispatch(&w.ctx, callback(10, 10, None, "my_orders")).await.unwrap();
    let listed = w.messenger.log().into_iter().any(|s| matches!(
        s,
        Sent::EditText { text, .. } | Sent::Message { text, .. } if text.contains("Ваши заказы")
    ));
    assert!(listed);
}
