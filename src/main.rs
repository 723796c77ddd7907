use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_actix_web::TracingLogger;
use utoipa::OpenApi as _;
use utoipa_swagger_ui::SwaggerUi;

use orderdesk::bot::{self, BotContext};
use orderdesk::config::Config;
use orderdesk::keyboards::UiCaps;
use orderdesk::lifecycle::Lifecycle;
use orderdesk::openapi::ApiDoc;
use orderdesk::relay::Relay;
use orderdesk::repo::Repo;
use orderdesk::routes::{self, AppState};
use orderdesk::telegram::{Messenger, TelegramClient};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(debug_assertions)]
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    #[cfg(feature = "sqlite-store")]
    let repo: Arc<dyn Repo> = {
        let r = orderdesk::repo::sqlite::SqliteRepo::connect(&config.database_path).await?;
        info!(path = %config.database_path, "sqlite store ready");
        Arc::new(r)
    };
    #[cfg(not(feature = "sqlite-store"))]
    let repo: Arc<dyn Repo> = {
        info!("using in-memory store, state is not persisted");
        Arc::new(orderdesk::repo::inmem::InMemRepo::new())
    };

    let messenger: Arc<dyn Messenger> =
        Arc::new(TelegramClient::new(&config.telegram_api_base, &config.bot_token));

    let caps = UiCaps::negotiate(messenger.as_ref(), config.admin_chat_id).await;
    let lifecycle = Lifecycle::new(repo.clone(), messenger.clone(), config.clone());
    let relay = Relay::new(repo.clone(), messenger.clone(), config.clone(), caps);

    let metrics_handle = PrometheusBuilder::new().install_recorder().ok();

    let ctx = Arc::new(BotContext::new(
        repo.clone(),
        messenger.clone(),
        lifecycle.clone(),
        relay.clone(),
        config.clone(),
        caps,
    ));
    actix_web::rt::spawn(bot::run(ctx));

    let state = AppState {
        repo,
        messenger,
        lifecycle,
        relay,
        config: config.clone(),
        metrics: metrics_handle,
    };

    let bind = (config.api_host.clone(), config.api_port);
    info!(host = %bind.0, port = bind.1, "starting http server");
    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Cors::permissive())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
            .service(
                SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind(bind)?
    .run()
    .await?;
    Ok(())
}
