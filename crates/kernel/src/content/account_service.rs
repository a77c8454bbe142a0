//! Account service: signup, login, token authentication and self-service
//! profile changes.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{
    CredentialHasher, Principal, ResetToken, Role, TokenService, digest_reset_token,
};
use crate::error::{AppError, AppResult, ValidationError};
use crate::hooks::{ACTIVE_FLAG, HookContext, OperationKind};
use crate::models::{
    ChangePasswordInput, LoginInput, ResetPasswordInput, SignupInput, UpdateMe, WriteInput,
};
use crate::query::{FilterClause, FilterOperator, FilterValue};
use crate::store::{Document, DocumentPatch, PipelineStage};

use super::document_service::{present, timestamp};
use super::{DocumentService, EntityKind};

const USER: EntityKind = EntityKind::User;
const RESET_TOKEN_FIELD: &str = "passwordResetToken";
const RESET_EXPIRES_FIELD: &str = "passwordResetExpires";
const PASSWORD_CHANGED_FIELD: &str = "passwordChangedAt";

/// A signed-in user and the token that proves it.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: Document,
}

pub struct AccountService {
    documents: Arc<DocumentService>,
    hasher: Arc<dyn CredentialHasher>,
    tokens: TokenService,
}

impl AccountService {
    pub fn new(
        documents: Arc<DocumentService>,
        hasher: Arc<dyn CredentialHasher>,
        tokens: TokenService,
    ) -> Self {
        Self {
            documents,
            hasher,
            tokens,
        }
    }

    /// Create an account with the `user` role and sign it in.
    pub async fn signup(&self, body: Value) -> AppResult<Session> {
        let mut fields = SignupInput::from_body(body)?;
        fields.insert("role".into(), Value::from(Role::User.as_str()));
        fields.insert(ACTIVE_FLAG.into(), Value::Bool(true));
        fields.insert("createdAt".into(), Value::String(timestamp()));

        let ctx = HookContext::system(OperationKind::Create);
        let user = self.documents.persist_new(USER, &ctx, fields).await?;
        info!(user_id = %user.id, "account created");
        self.session(user)
    }

    /// Exchange email and password for a session.
    ///
    /// Unknown emails, deactivated accounts and wrong passwords all fail the
    /// same way.
    pub async fn login(&self, input: LoginInput) -> AppResult<Session> {
        let (email, password) = input.credentials()?;
        let Some(user) = self.find_by_email(&email).await? else {
            debug!("login for unknown email");
            return Err(AppError::InvalidCredentials);
        };
        let digest = user.get_str("password").unwrap_or_default();
        if !self.hasher.verify(password, digest) {
            debug!(user_id = %user.id, "login with wrong password");
            return Err(AppError::InvalidCredentials);
        }
        self.session(user)
    }

    /// Resolve a bearer token to the principal it was issued for.
    ///
    /// Tokens of deleted or deactivated accounts, and tokens issued before
    /// the last password change, are rejected.
    pub async fn authenticate(&self, token: &str) -> AppResult<Principal> {
        let claims = self.tokens.verify(token).map_err(|e| {
            debug!(error = %e, "bearer token rejected");
            AppError::Unauthorized
        })?;
        let id = claims.user_id().ok_or(AppError::Unauthorized)?;

        let user = self.documents.load(USER, id).await.map_err(|e| match e {
            AppError::NotFound { .. } => AppError::Unauthorized,
            other => other,
        })?;
        if user.get_bool(ACTIVE_FLAG) == Some(false) {
            debug!(user_id = %id, "token of a deactivated account");
            return Err(AppError::Unauthorized);
        }
        if password_changed_after(&user, claims.iat) {
            debug!(user_id = %id, "token issued before password change");
            return Err(AppError::Unauthorized);
        }

        let role = user
            .get_str("role")
            .and_then(Role::parse)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("user {id} has no valid role")))?;
        Ok(Principal::new(id, role))
    }

    /// The caller's own account.
    pub async fn me(&self, principal: &Principal) -> AppResult<Document> {
        Ok(present(USER, self.documents.load(USER, principal.id).await?))
    }

    /// Change the caller's name or email.
    pub async fn update_me(&self, principal: &Principal, body: Value) -> AppResult<Document> {
        let fields = UpdateMe::from_body(body)?;
        if fields.is_empty() {
            return self.me(principal).await;
        }
        let ctx = self
            .documents
            .context(OperationKind::Update, USER, Some(principal));
        let user = self
            .documents
            .persist_patch(USER, &ctx, principal.id, DocumentPatch::from(fields))
            .await?;
        Ok(present(USER, user))
    }

    /// Deactivate the caller's account. The document is kept.
    pub async fn delete_me(&self, principal: &Principal) -> AppResult<()> {
        let ctx = self
            .documents
            .context(OperationKind::Update, USER, Some(principal));
        self.documents
            .persist_patch(
                USER,
                &ctx,
                principal.id,
                DocumentPatch::new().with(ACTIVE_FLAG, false),
            )
            .await?;
        info!(user_id = %principal.id, "account deactivated");
        Ok(())
    }

    /// Change the caller's password after checking the current one.
    pub async fn change_password(&self, principal: &Principal, body: Value) -> AppResult<Session> {
        let fields = ChangePasswordInput::from_body(body.clone())?;
        let input: ChangePasswordInput = serde_json::from_value(body)
            .map_err(|e| ValidationError::InvalidDocument(e.to_string()))?;

        let user = self.documents.load(USER, principal.id).await?;
        let digest = user.get_str("password").unwrap_or_default();
        if !self.hasher.verify(input.current(), digest) {
            return Err(AppError::InvalidCredentials);
        }

        let ctx = HookContext::system(OperationKind::Update);
        let user = self
            .documents
            .persist_patch(USER, &ctx, principal.id, DocumentPatch::from(fields))
            .await?;
        info!(user_id = %principal.id, "password changed");
        self.session(user)
    }

    /// Issue a password-reset token for the account with `email`.
    ///
    /// Only the token's digest and expiry are stored.
    pub async fn forgot_password(&self, email: &str) -> AppResult<ResetToken> {
        let email = email.trim().to_lowercase();
        let user = self
            .find_by_email(&email)
            .await?
            .ok_or_else(|| AppError::not_found(USER.label(), &email))?;

        let reset = ResetToken::generate();
        let patch = DocumentPatch::new()
            .with(RESET_TOKEN_FIELD, reset.digest.clone())
            .with(
                RESET_EXPIRES_FIELD,
                reset.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            );
        let ctx = HookContext::system(OperationKind::Update);
        self.documents
            .persist_patch(USER, &ctx, user.id, patch)
            .await?;
        info!(user_id = %user.id, expires_at = %reset.expires_at, "password reset token issued");
        Ok(reset)
    }

    /// Set a new password using an unexpired reset token, then sign in.
    pub async fn reset_password(&self, token: &str, body: Value) -> AppResult<Session> {
        let fields = ResetPasswordInput::from_body(body)?;
        let user = self
            .find_one(vec![
                FilterClause::eq(RESET_TOKEN_FIELD, digest_reset_token(token).as_str()),
                FilterClause::new(
                    RESET_EXPIRES_FIELD,
                    FilterOperator::Gt,
                    FilterValue::String(timestamp()),
                ),
            ])
            .await?
            .ok_or_else(|| {
                ValidationError::InvalidDocument("token is invalid or has expired".to_string())
            })?;

        let patch = DocumentPatch::from(fields)
            .without(RESET_TOKEN_FIELD)
            .without(RESET_EXPIRES_FIELD);
        let ctx = HookContext::system(OperationKind::Update);
        let user = self
            .documents
            .persist_patch(USER, &ctx, user.id, patch)
            .await?;
        info!(user_id = %user.id, "password reset");
        self.session(user)
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<Document>> {
        self.find_one(vec![FilterClause::eq("email", email)]).await
    }

    /// First active user matching every clause, credentials included.
    async fn find_one(&self, filters: Vec<FilterClause>) -> AppResult<Option<Document>> {
        let ctx = HookContext::system(OperationKind::Find);
        let rows = self
            .documents
            .run_pipeline(
                USER,
                &ctx,
                vec![PipelineStage::Match(filters), PipelineStage::Limit(1)],
            )
            .await?;
        rows.into_iter()
            .next()
            .map(serde_json::from_value::<Document>)
            .transpose()
            .map_err(|e| AppError::Internal(e.into()))
    }

    fn session(&self, user: Document) -> AppResult<Session> {
        let token = self.tokens.issue(user.id).map_err(AppError::Internal)?;
        Ok(Session {
            token,
            user: present(USER, user),
        })
    }
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService").finish_non_exhaustive()
    }
}

/// Whether the password changed after a token issued at `iat` (seconds).
fn password_changed_after(user: &Document, iat: i64) -> bool {
    let Some(changed) = user.get_str(PASSWORD_CHANGED_FIELD) else {
        return false;
    };
    match DateTime::parse_from_rfc3339(changed) {
        Ok(changed) => iat < changed.timestamp(),
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "unparsable passwordChangedAt");
            false
        }
    }
}
