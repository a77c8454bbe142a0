#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Every test builds its own [`TestApp`] over a fresh in-process store, so
//! tests need no database and never share state.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use excursion_kernel::auth::{CredentialHasher, Principal, Role};
use excursion_kernel::config::Config;
use excursion_kernel::content::{EntityKind, TOURS};
use excursion_kernel::routes;
use excursion_kernel::state::AppState;
use excursion_kernel::store::{Document, DocumentPatch, DocumentStore, MemoryStore};
use excursion_test_utils::{TEST_PASSWORD, TestTour, review_body, signup_body, unique_email};

pub const JWT_SECRET: &str = "integration-test-secret-of-32-bytes";

/// Reversible hasher so tests do not pay for argon2.
pub struct ReversedHasher;

impl CredentialHasher for ReversedHasher {
    fn hash(&self, plaintext: &str) -> anyhow::Result<String> {
        Ok(plaintext.chars().rev().collect())
    }

    fn verify(&self, plaintext: &str, digest: &str) -> bool {
        plaintext.chars().rev().collect::<String>() == digest
    }
}

/// Test application over the REAL services and routes.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let config = Config::in_memory(JWT_SECRET);
        let state = AppState::with_store(
            &config,
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(ReversedHasher),
        );
        state
            .documents()
            .ensure_indexes()
            .await
            .expect("unique indexes");
        Self {
            router: routes::app(state.clone()),
            state,
            store,
        }
    }

    /// Send a request and decode the JSON response (Null when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Raw response body as text, for non-JSON endpoints.
    pub async fn text(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Sign up a new account with `role` and return its token and id.
    pub async fn account(&self, role: Role) -> (String, Uuid) {
        let email = unique_email(role.as_str());
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/users/signup",
                None,
                Some(signup_body("Test Account", &email)),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {body}");
        let id: Uuid = body["data"]["user"]["id"].as_str().unwrap().parse().unwrap();
        if role != Role::User {
            self.set_role(id, role).await;
        }
        (body["token"].as_str().unwrap().to_string(), id)
    }

    /// Change an account's role directly in the store.
    pub async fn set_role(&self, id: Uuid, role: Role) {
        self.store
            .update(
                EntityKind::User.collection().name,
                id,
                &DocumentPatch::new().with("role", role.as_str()),
            )
            .await
            .unwrap()
            .expect("user exists");
    }

    /// Log in with the fixture password.
    pub async fn login(&self, email: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(serde_json::json!({ "email": email, "password": TEST_PASSWORD })),
        )
        .await
    }

    /// Create a tour through the service as an administrator.
    pub async fn create_tour(&self, tour: &TestTour) -> Uuid {
        self.state
            .documents()
            .create(EntityKind::Tour, Some(&admin()), tour.body())
            .await
            .unwrap()
            .id
    }

    /// Create a review of `tour` written by `author`.
    pub async fn add_review(&self, author: &Principal, tour: Uuid, rating: f64) -> Uuid {
        self.state
            .documents()
            .create(EntityKind::Review, Some(author), review_body(tour, rating))
            .await
            .unwrap()
            .id
    }

    /// Read a tour straight from the store, hidden or not.
    pub async fn raw_tour(&self, id: Uuid) -> Document {
        self.store
            .get(TOURS.name, id)
            .await
            .unwrap()
            .expect("tour exists")
    }

    /// `(ratingsQuantity, ratingsAverage)` as stored.
    pub async fn summary(&self, tour: Uuid) -> (u64, f64) {
        let doc = self.raw_tour(tour).await;
        (
            doc.get("ratingsQuantity").and_then(Value::as_u64).unwrap(),
            doc.get_f64("ratingsAverage").unwrap(),
        )
    }
}

pub fn admin() -> Principal {
    Principal::new(Uuid::now_v7(), Role::Admin)
}

pub fn lead_guide() -> Principal {
    Principal::new(Uuid::now_v7(), Role::LeadGuide)
}

pub fn reviewer() -> Principal {
    Principal::new(Uuid::now_v7(), Role::User)
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
