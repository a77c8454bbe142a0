//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::aggregate::AggregateMaintainer;
use crate::auth::{Argon2Hasher, CredentialHasher, RoleAuthorizer, TokenService};
use crate::config::Config;
use crate::content::{AccountService, DocumentService};
use crate::db;
use crate::hooks::standard_registry;
use crate::metrics::Metrics;
use crate::store::{DocumentStore, MemoryStore, PgStore};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Persistence engine.
    store: Arc<dyn DocumentStore>,

    /// Tour, review and user operations.
    documents: Arc<DocumentService>,

    /// Signup, login and token authentication.
    accounts: Arc<AccountService>,

    /// Prometheus metrics.
    metrics: Arc<Metrics>,

    /// Whether forgot-password responses carry the reset token.
    expose_reset_tokens: bool,
}

impl AppState {
    /// Connect the configured engine and wire the services.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = if config.uses_memory_store() {
            info!("using the in-process document store");
            Arc::new(MemoryStore::new())
        } else {
            let pool = db::create_pool(config)
                .await
                .context("failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            Arc::new(PgStore::new(pool, config.statement_timeout))
        };

        let state = Self::with_store(config, store, Arc::new(Argon2Hasher));
        state
            .documents()
            .ensure_indexes()
            .await
            .context("failed to create unique indexes")?;
        Ok(state)
    }

    /// Wire the services over an existing engine.
    pub fn with_store(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let hooks = Arc::new(standard_registry(
            Arc::clone(&hasher),
            Arc::clone(&metrics),
        ));
        let maintainer = Arc::new(AggregateMaintainer::new(
            Arc::clone(&store),
            Arc::clone(&metrics),
        ));
        let documents = Arc::new(DocumentService::new(
            Arc::clone(&store),
            hooks,
            Arc::new(RoleAuthorizer),
            maintainer,
        ));
        let tokens = TokenService::new(config.jwt_secret.as_bytes(), config.jwt_expires_in_secs);
        let accounts = Arc::new(AccountService::new(
            Arc::clone(&documents),
            hasher,
            tokens,
        ));

        Self {
            inner: Arc::new(AppStateInner {
                store,
                documents,
                accounts,
                metrics,
                expose_reset_tokens: config.expose_reset_tokens,
            }),
        }
    }

    pub fn documents(&self) -> &Arc<DocumentService> {
        &self.inner.documents
    }

    pub fn accounts(&self) -> &Arc<AccountService> {
        &self.inner.accounts
    }

    pub fn maintainer(&self) -> &Arc<AggregateMaintainer> {
        self.inner.documents.maintainer()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn expose_reset_tokens(&self) -> bool {
        self.inner.expose_reset_tokens
    }

    /// Check if the persistence engine is reachable.
    pub async fn store_healthy(&self) -> bool {
        self.inner.store.is_healthy().await
    }
}
