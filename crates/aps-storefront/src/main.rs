use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aps::GatewayClient;
use aps_storefront::config::ServiceConfig;
use aps_storefront::orders::InMemoryOrderStore;
use aps_storefront::routes;
use aps_storefront::state::AppState;

fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        // Default: allow localhost on any port
        Cors::default()
            .allowed_origin_fn(|origin, _| {
                origin
                    .to_str()
                    .map(|o| {
                        // Match http://localhost or http://localhost:PORT exactly
                        o == "http://localhost" || o.starts_with("http://localhost:")
                    })
                    .unwrap_or(false)
            })
            .allow_any_method()
            .allowed_headers(vec!["content-type", "authorization"])
            .max_age(3600)
    } else {
        let mut cors = Cors::default();
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
        cors.allow_any_method()
            .allowed_headers(vec!["content-type", "authorization"])
            .max_age(3600)
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env();
    let port = config.port;
    let rate_limit_rpm = config.rate_limit_rpm;
    let cors_origins = config.allowed_origins.clone();

    let gateway = match GatewayClient::new(config.gateway) {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!("failed to build gateway client: {e}");
            std::process::exit(1);
        }
    };

    let state = web::Data::new(AppState {
        gateway,
        orders: Arc::new(InMemoryOrderStore::new()),
        metrics_token: config.metrics_token,
        cart_url: config.cart_url,
        confirmation_url: config.confirmation_url,
    });

    tracing::info!("APS storefront listening on port {port}");
    tracing::info!("Rate limit: {rate_limit_rpm} req/min per IP");
    tracing::info!("  POST http://localhost:{port}/payments/hosted");
    tracing::info!("  POST http://localhost:{port}/payments/card");
    tracing::info!("  POST http://localhost:{port}/payments/notification");

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .service(routes::health)
            .service(routes::metrics_endpoint)
            .service(routes::hosted_form)
            .service(routes::tokenization_form)
            .service(routes::card_purchase)
            .service(routes::apple_pay_purchase)
            .service(routes::handle_return)
            .service(routes::handle_notification)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
