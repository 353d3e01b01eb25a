#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    build_router,
    config::AppConfig,
    db,
    entities::{address, catalog::ProductVariant, catalog::ProductVariantModel, user},
    events,
    services::{
        catalog::{CreateProductInput, CreateProductTypeInput},
        gateway::{GatewayError, PaymentGateway, PaymentRequest, VerificationOutcome},
        storage::LocalFileStore,
    },
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "storefront-test-secret-0123456789-abcdef";
pub const GATEWAY_START_URL: &str = "https://gateway.test/StartPay";

/// How the stub answers `verify_payment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyMode {
    Confirm,
    Reject,
    Unreachable,
}

/// In-process payment gateway that counts calls.
pub struct StubGateway {
    pub request_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub fail_requests: Mutex<bool>,
    pub verify_mode: Mutex<VerifyMode>,
    pub requests: Mutex<Vec<PaymentRequest>>,
}

impl Default for StubGateway {
    fn default() -> Self {
        Self {
            request_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            fail_requests: Mutex::new(false),
            verify_mode: Mutex::new(VerifyMode::Confirm),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl StubGateway {
    pub fn set_fail_requests(&self, fail: bool) {
        *self.fail_requests.lock().unwrap() = fail;
    }

    pub fn set_verify_mode(&self, mode: VerifyMode) {
        *self.verify_mode.lock().unwrap() = mode;
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn request_payment(&self, request: &PaymentRequest) -> Result<String, GatewayError> {
        let n = self.request_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        if *self.fail_requests.lock().unwrap() {
            return Err(GatewayError::InvalidResponse("stub gateway is down".into()));
        }
        Ok(format!("A{n:035}"))
    }

    async fn verify_payment(
        &self,
        authority: &str,
        _amount: i64,
    ) -> Result<VerificationOutcome, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        match self.verify_mode.lock().unwrap().clone() {
            VerifyMode::Confirm => Ok(VerificationOutcome::Confirmed {
                ref_id: format!("ref-{authority}"),
            }),
            VerifyMode::Reject => Ok(VerificationOutcome::Rejected { code: -51 }),
            VerifyMode::Unreachable => Err(GatewayError::InvalidResponse("timeout".into())),
        }
    }

    fn redirect_url(&self, authority: &str) -> String {
        format!("{GATEWAY_START_URL}/{authority}")
    }
}

/// Application wired over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.upload_dir = dir.path().join("uploads").display().to_string();
        cfg.max_upload_bytes = 64 * 1024;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let gateway = Arc::new(StubGateway::default());
        let files = Arc::new(LocalFileStore::new(
            cfg.upload_dir.clone(),
            cfg.media_url.clone(),
            cfg.max_upload_bytes,
        ));
        let (state, event_rx) = AppState::build(cfg, pool, gateway.clone(), files);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let router = build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            dir,
            _event_task: event_task,
        }
    }

    pub fn upload_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn token_for(&self, user_id: i32) -> String {
        self.state
            .jwt
            .issue(user_id, chrono::Duration::hours(1))
            .expect("issue test token")
    }

    /// Send a JSON (or empty) request with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
        } else {
            Body::empty()
        };

        self.send(builder.body(body).expect("build request")).await
    }

    /// Send a multipart form. Each part is `(name, file_name, content)`.
    pub async fn multipart(
        &self,
        method: Method,
        uri: &str,
        parts: &[(&str, Option<&str>, &[u8])],
        token: Option<&str>,
    ) -> Response {
        const BOUNDARY: &str = "storefront-test-boundary";
        let mut body = Vec::new();
        for (name, file_name, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        self.send(builder.body(Body::from(body)).expect("build request"))
            .await
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_user(&self, email: &str) -> user::Model {
        user::ActiveModel {
            email: Set(email.to_string()),
            name: Set(Some("Test Customer".to_string())),
            create_time: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_address(&self, user_id: i32) -> address::Model {
        address::ActiveModel {
            user_id: Set(user_id),
            country: Set("IR".to_string()),
            city: Set("Tehran".to_string()),
            phone: Set("+98 21 0000 0000".to_string()),
            postal_code: Set("1234567890".to_string()),
            street_address: Set("1 Test Street".to_string()),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address")
    }

    /// A published single-variant product; returns its synthetic variant.
    pub async fn seed_variant(&self, name: &str, price: i64, quantity: i32) -> ProductVariantModel {
        self.seed_variant_with(name, price, quantity, false).await
    }

    pub async fn seed_variant_with(
        &self,
        name: &str,
        price: i64,
        quantity: i32,
        is_file_required: bool,
    ) -> ProductVariantModel {
        let catalog = &self.state.services.catalog;
        let product_type = catalog
            .create_product_type(CreateProductTypeInput {
                name: format!("{name} type"),
                has_variants: false,
                is_shipping_required: true,
                is_file_required,
            })
            .await
            .expect("seed product type");

        let created = catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                description: Some("Seeded for integration tests".to_string()),
                price,
                weight: 100,
                is_published: true,
                is_featured: false,
                attributes: Default::default(),
                product_type_id: product_type.id,
                sku: Some(format!("SKU-{}", name.to_uppercase().replace(' ', "-"))),
                quantity,
            })
            .await
            .expect("seed product");

        created
            .variants
            .into_iter()
            .next()
            .expect("single-variant product has a variant")
    }

    pub async fn variant(&self, variant_id: i32) -> ProductVariantModel {
        ProductVariant::find_by_id(variant_id)
            .one(&*self.state.db)
            .await
            .expect("load variant")
            .expect("variant exists")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is JSON")
}
