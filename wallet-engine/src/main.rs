use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use prometheus::Registry;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wallet_engine::{
    config::{Config, LedgerBackend},
    database::{self, PgLedgerStore},
    handlers,
    ledger::LedgerStore,
    memory_store::MemoryLedgerStore,
    metrics,
    services::WalletService,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .json()
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!("Starting Wallet Engine on port {}", config.server.port);

    let store: Arc<dyn LedgerStore> = match config.ledger.backend {
        LedgerBackend::Postgres => {
            let pool = database::create_pool(&config.database)
                .await
                .context("Failed to connect to database")?;
            let store = PgLedgerStore::new(pool, config.database.lock_timeout());
            store.ensure_schema().await.context("Failed to prepare schema")?;
            Arc::new(store)
        }
        LedgerBackend::Memory => {
            warn!("Using the in-memory ledger; balances are lost on restart");
            Arc::new(MemoryLedgerStore::new(config.database.lock_timeout()))
        }
    };

    store.health_check().await.context("Ledger store not accessible")?;
    info!("Ledger store health check passed");

    let registry = Registry::new();
    metrics::register_metrics(&registry).context("Failed to register metrics")?;

    let wallet_service = Arc::new(WalletService::new(store, &config.ledger));
    let jwt_secret = config.auth.jwt_secret.clone();
    let server_config = config.server.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(wallet_service.clone()))
            .app_data(web::Data::new(registry.clone()))
            .configure(|cfg| handlers::configure_routes(cfg, &jwt_secret))
    })
    .workers(server_config.workers)
    .bind((server_config.host.as_str(), server_config.port))?
    .run()
    .await?;

    Ok(())
}
