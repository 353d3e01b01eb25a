//! Storefront API
//!
//! Cart, checkout, order and payment backend of a web shop. Customers fill a
//! token-addressed cart (anonymously or signed in), convert it into an order
//! and pay for it through an external gateway.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod models;
pub mod services;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    auth::JwtVerifier,
    events::{Event, EventSender},
    services::{gateway::PaymentGateway, storage::FileStore, AppServices},
};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub jwt: Arc<JwtVerifier>,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

impl AppState {
    /// Wires services over `db`. The returned receiver must be drained
    /// (see [`events::process_events`]) or events are dropped once it fills.
    pub fn build(
        config: config::AppConfig,
        db: DatabaseConnection,
        gateway: Arc<dyn PaymentGateway>,
        files: Arc<dyn FileStore>,
    ) -> (Self, mpsc::Receiver<Event>) {
        let db = Arc::new(db);
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let jwt = Arc::new(JwtVerifier::new(
            &config.jwt_secret,
            config.jwt_issuer.clone(),
        ));
        let services = AppServices::new(
            db.clone(),
            event_sender.clone(),
            gateway,
            files,
            config.payment.description.clone(),
        );

        let state = Self {
            db,
            config,
            jwt,
            event_sender,
            services,
        };
        (state, event_rx)
    }
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

/// Routes mounted under `/api/ecommerce`.
pub fn ecommerce_routes() -> Router<AppState> {
    use handlers::{commerce, orders};

    Router::new()
        .route(
            "/checkout/cart/",
            get(commerce::carts::get_cart)
                .put(commerce::carts::add_to_cart)
                .patch(commerce::carts::update_cart_line)
                .delete(commerce::carts::clear_cart),
        )
        .route("/checkout/payment/", post(commerce::checkout::start_payment))
        .route(
            "/checkout/payment/verification/:authority/:status/",
            get(commerce::checkout::verify_payment),
        )
        .route("/order/", get(orders::list_orders))
        .route("/order/:id/", get(orders::get_order))
        .route("/order/:id/cancel/", post(orders::cancel_order))
        .route("/address/", get(orders::list_addresses))
        .route("/product/", get(commerce::products::list_products))
        .route("/product/:id/", get(commerce::products::get_product))
}

/// Full application router with middleware applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    // Multipart framing on top of the largest accepted file.
    let body_limit = state.config.max_upload_bytes + 64 * 1024;

    Router::new()
        .merge(health::health_routes())
        .nest("/api/ecommerce", ecommerce_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        if config.is_production() {
            info!("No CORS origins configured; cross-origin requests will be refused");
            CorsLayer::new()
        } else {
            CorsLayer::permissive()
        }
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
