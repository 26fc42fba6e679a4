use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod integrations;
mod jobs;
mod model;
mod models;
mod routes;
mod utils;

use config::Config;
use db::init_db;

use crate::docs::ApiDoc;
use crate::integrations::Integrations;
use crate::routes::Limiters;
use crate::utils::org_code_registry::OrgCodeRegistry;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

/// Org codes streamed per batch into the availability filter at startup.
const WARMUP_BATCH_SIZE: usize = 500;

#[get("/")]
async fn index() -> impl Responder {
    "HRM SaaS API"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let (platform, tenant) = init_db(&config).await?;
    let integrations = Data::new(Integrations::new(&config)?);
    let registry = Data::new(OrgCodeRegistry::new());
    let limiters = Limiters::new(&config)?;

    let warmup_pool = platform.clone();
    let warmup_registry = registry.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = warmup_registry.warmup(&warmup_pool, WARMUP_BATCH_SIZE).await {
            error!(error = %e, "Failed to warm up org code filter");
        }
    });

    jobs::spawn_maintenance(platform.clone(), registry.clone(), &config);

    let server_addr = config.server_addr.clone();
    let config_data = Data::new(config);
    let platform_data = Data::new(platform);
    let tenant_data = Data::new(tenant);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(config_data.clone())
            .app_data(platform_data.clone())
            .app_data(tenant_data.clone())
            .app_data(integrations.clone())
            .app_data(registry.clone())
            .service(index)
            .configure(|cfg| routes::configure(cfg, &config_data, &limiters))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
