#![cfg(feature = "inmem-store")]

mod common;

use std::sync::Arc;

use actix_web::{test, web, App};
use serde_json::json;

use orderdesk::keyboards::UiCaps;
use orderdesk::lifecycle::Lifecycle;
use orderdesk::relay::Relay;
use orderdesk::repo::inmem::InMemRepo;
use orderdesk::repo::Repo;
use orderdesk::routes::{configure, AppState};
use orderdesk::telegram::Messenger;

use common::{test_config, RecordingMessenger, MANAGER_GROUP};

fn app_state() -> (AppState, Arc<RecordingMessenger>) {
    let repo: Arc<dyn Repo> = Arc::new(InMemRepo::new());
    let recording = RecordingMessenger::new();
    let messenger: Arc<dyn Messenger> = recording.clone();
    let config = Arc::new(test_config());
    let lifecycle = Lifecycle::new(repo.clone(), messenger.clone(), config.clone());
    let relay = Relay::new(repo.clone(), messenger.clone(), config.clone(), UiCaps::plain());
    (
        AppState { repo, messenger, lifecycle, relay, config, metrics: None },
        recording,
    )
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(configure),
        )
        .await
    };
}

#[actix_rt::test]
async fn order_intake_round_trip() {
    let (state, messenger) = app_state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/order")
        .set_json(json!({
            "user_id": 10,
            "username": "alice",
            "full_name": "Alice A",
            "service_type": "build",
            "description": "нужен тихий корпус"
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["id"], 1);
    assert_eq!(body["status"], "pending_payment");
    assert_eq!(body["price_byn"], 50.0);
    assert_eq!(body["price_rub"], 1500.0);
    assert_eq!(body["payment_card"], "1234 5678 9012 3456");
    assert_eq!(body["bot_username"], "insidepc_bot");

    // invoice went to the customer, topic opened for the manager
    assert!(messenger.texts_to(10).iter().any(|t| t.contains("Заявка #1 принята")));
    assert_eq!(messenger.topics().len(), 1);
    assert_eq!(messenger.topics()[0].0, MANAGER_GROUP);

    let req = test::TestRequest::get().uri("/api/status/1").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "pending_payment");
    assert_eq!(body["status_text"], "Ожидает оплаты");
    assert_eq!(body["service"], "Сборка ПК");
}

#[actix_rt::test]
async fn unknown_service_type_is_a_400_with_no_side_effects() {
    let (state, messenger) = app_state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/order")
        .set_json(json!({ "user_id": 10, "service_type": "overclocking" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // nothing was created and nobody was pinged
    let req = test::TestRequest::get().uri("/api/status/1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    assert!(messenger.log().is_empty());
}

#[actix_rt::test]
async fn parts_data_survives_the_round_trip() {
    let (state, _messenger) = app_state();
    let app = app!(state);

    let parts = json!({"cpu": "Ryzen 7 7700", "gpu": "RTX 4070", "budget": 3000});
    let req = test::TestRequest::post()
        .uri("/api/order")
        .set_json(json!({
            "user_id": 10,
            "service_type": "build",
            "has_parts_list": true,
            "parts_data": parts,
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let id = body["id"].as_i64().unwrap();

    let req = test::TestRequest::get().uri(&format!("/api/order/{id}")).to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["has_parts_list"], true);
    assert_eq!(body["parts_data"], parts);
    assert_eq!(body["username"], "");
    assert_eq!(body["service_type"], "build");
}

#[actix_rt::test]
async fn order_history_is_newest_first() {
    let (state, _messenger) = app_state();
    let app = app!(state);

    for service in ["consultation", "build"] {
        let req = test::TestRequest::post()
            .uri("/api/order")
            .set_json(json!({ "user_id": 10, "service_type": service }))
            .to_request();
        test::call_service(&app, req).await;
    }
    // another customer's order must not leak in
    let req = test::TestRequest::post()
        .uri("/api/order")
        .set_json(json!({ "user_id": 11, "service_type": "upgrade" }))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/api/orders/10").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let items = body.as_array().unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["service_type"], "build");
    assert_eq!(items[1]["service_type"], "consultation");
    // date is minute precision: "YYYY-MM-DD HH:MM"
    assert_eq!(items[0]["date"].as_str().unwrap().len(), 16);
}

#[actix_rt::test]
async fn price_table_is_served_verbatim() {
    let (state, _messenger) = app_state();
    let expected = serde_json::to_value(&state.config.prices).unwrap();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/api/prices").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body, expected);
    assert_eq!(body["build"]["name"], "Сборка ПК");
}

#[actix_rt::test]
async fn lookups_on_missing_orders_are_404() {
    let (state, _messenger) = app_state();
    let app = app!(state);

    for uri in ["/api/status/99", "/api/order/99"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404, "{uri}");
    }
}

#[actix_rt::test]
async fn invoice_failure_does_not_fail_the_request() {
    let (state, messenger) = app_state();
    messenger.fail_sends.store(true, std::sync::atomic::Ordering::SeqCst);
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/order")
        .set_json(json!({ "user_id": 10, "service_type": "build" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // topic was still opened even though the invoice bounced
    assert_eq!(messenger.topics().len(), 1);
}
