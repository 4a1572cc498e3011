use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use dotenv::dotenv;
use service_exchange::auth::jwt::TokenVerifier;
use service_exchange::auth::seats::load_seed_file;
use service_exchange::geo::NominatimGeocoder;
use service_exchange::handlers::{self, GeocoderData};
use service_exchange::matching::MatchingEngine;
use service_exchange::store::{RedisStore, StoreData};
use service_exchange::{ExchangeConfig, classifier, sweeper};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ExchangeConfig::from_env();

    // Initialize the shared store
    let redis_url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
    let redis_store = RedisStore::new(&redis_url, &config.key_prefix)
        .await
        .expect("Failed to connect to Redis");
    let store: StoreData = Arc::new(redis_store);
    tracing::info!("Connected to Redis");

    if let Some(path) = &config.seats_file {
        load_seed_file(store.as_ref(), path)
            .await
            .expect("Failed to load seat registry");
    }

    let verifier = TokenVerifier::from_env()
        .expect("Set SUPABASE_JWT_SECRET, or SUPABASE_URL and SUPABASE_ANON_KEY");
    let verifier_data = web::Data::new(Arc::new(verifier));

    let geocoder: GeocoderData = Arc::new(NominatimGeocoder::new(&config.geocoder_url));
    let geocoder_data = web::Data::new(geocoder);

    let classifier = classifier::from_config(&config.classifier);
    let engine = web::Data::new(MatchingEngine::new(store.clone(), classifier, &config));
    let store_data = web::Data::new(store.clone());

    if let Some(interval) = config.sweep_interval {
        sweeper::spawn(store.clone(), interval);
        tracing::info!("Sweeper running every {interval:?}");
    }

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{port}");
    tracing::info!("Server running at http://{bind_addr}");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::ACCEPT,
            ])
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(store_data.clone())
            .app_data(engine.clone())
            .app_data(geocoder_data.clone())
            .app_data(verifier_data.clone())
            .service(web::scope("/api").configure(handlers::init_routes))
    })
    .bind(&bind_addr)?
    .run()
    .await
}
