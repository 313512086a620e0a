use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use redemption_engine::{
    config::Config,
    database::Database,
    handlers,
    ledger::PgLedger,
    nats::NatsProducer,
    services::RedemptionService,
};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    info!("Starting Redemption Engine on port {}", config.server.port);

    let db = Arc::new(
        Database::new(&config.database.url, config.database.max_connections)
            .await
            .expect("Failed to connect to database"),
    );

    let redis_client =
        redis::Client::open(config.redis.url.clone()).expect("Failed to create Redis client");
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .expect("Failed to connect to Redis");

    let nats_producer = Arc::new(
        NatsProducer::new(&config.nats.url, &config.nats.topic_prefix)
            .await
            .expect("Failed to connect to NATS"),
    );

    let ledger = Arc::new(PgLedger::new(db.pool().clone()));

    let service = Arc::new(RedemptionService::new(
        db,
        ledger,
        nats_producer,
        redis_conn,
        config.tier_policy(),
        config.cross_shop_rate(),
        config.engine.session_ttl_minutes,
    ));

    // GC sweep for stale sessions; expiry is also applied lazily on read,
    // so a slow or stopped sweep never affects correctness
    let sweeper = service.clone();
    let sweep_interval = config.engine.sweep_interval_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.expire_stale_sessions().await {
                error!("Session sweep failed: {}", e);
            }
        }
    });

    let jwt_secret = config.auth.jwt_secret.clone();

    HttpServer::new(move || {
        let cors = Cors::permissive();
        let jwt_secret = jwt_secret.clone();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(service.clone()))
            .configure(move |cfg| handlers::configure_routes(cfg, &jwt_secret))
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .workers(config.server.workers)
    .run()
    .await
}
