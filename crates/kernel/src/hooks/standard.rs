//! Standing hooks installed at startup.

use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::auth::CredentialHasher;
use crate::content::EntityKind;
use crate::error::AppError;
use crate::metrics::Metrics;
use crate::query::{FilterClause, FilterOperator, FilterValue};
use crate::store::PipelineStage;

use super::registry::{Hook, HookPayload, HookRegistry, Phase};

/// Tours flagged with this field are hidden from ordinary reads.
pub const HIDDEN_FLAG: &str = "secretTour";

/// Deactivated accounts carry `active: false`.
pub const ACTIVE_FLAG: &str = "active";

/// Maximum slug length.
const MAX_SLUG_LEN: usize = 128;

/// Build the registry with every standing hook.
pub fn standard_registry(hasher: Arc<dyn CredentialHasher>, metrics: Arc<Metrics>) -> HookRegistry {
    let mut registry = HookRegistry::new();

    registry.register_pre(EntityKind::Tour, Phase::Retrieve, visibility_filter());
    registry.register_pre(EntityKind::User, Phase::Retrieve, active_only());
    registry.register_pre(EntityKind::Tour, Phase::Persist, derive_slug());
    registry.register_pre(EntityKind::User, Phase::Persist, hash_credentials(hasher));
    registry.register_post(EntityKind::Tour, Phase::Retrieve, duration_weeks());
    for entity in EntityKind::ALL {
        registry.register_post(entity, Phase::Retrieve, record_timing(entity, Arc::clone(&metrics)));
    }

    registry
}

/// AND a clause into a query, or prepend it as a match stage to a pipeline.
fn restrict(payload: HookPayload, clause: FilterClause) -> HookPayload {
    match payload {
        HookPayload::Query(mut query) => {
            query.and_filter(clause);
            HookPayload::Query(query)
        }
        HookPayload::Pipeline(mut stages) => {
            stages.insert(0, PipelineStage::Match(vec![clause]));
            HookPayload::Pipeline(stages)
        }
        other => other,
    }
}

/// Exclude hidden tours unless the context grants bypass.
pub fn visibility_filter() -> Hook {
    Hook::new("visibility_filter", |ctx, payload| {
        if ctx.bypass_visibility() {
            return Ok(payload);
        }
        Ok(restrict(
            payload,
            FilterClause::new(HIDDEN_FLAG, FilterOperator::Ne, FilterValue::Boolean(true)),
        ))
    })
}

/// Exclude deactivated accounts from every read.
pub fn active_only() -> Hook {
    Hook::new("active_only", |_, payload| {
        Ok(restrict(
            payload,
            FilterClause::new(ACTIVE_FLAG, FilterOperator::Ne, FilterValue::Boolean(false)),
        ))
    })
}

/// Set `slug` whenever a write sets `name`.
pub fn derive_slug() -> Hook {
    Hook::new("derive_slug", |_, payload| {
        let mut persist = payload.into_persist()?;
        if let Some(name) = persist.patch.set.get("name").and_then(Value::as_str) {
            let slug = slugify(name);
            persist.patch.set.insert("slug".to_string(), Value::String(slug));
        }
        Ok(HookPayload::Persist(persist))
    })
}

/// Replace a plaintext password with its digest before it reaches the store.
///
/// `passwordConfirm` is dropped from every write. On updates that change
/// the password, `passwordChangedAt` is stamped one second in the past so
/// a token issued in the same second stays valid.
pub fn hash_credentials(hasher: Arc<dyn CredentialHasher>) -> Hook {
    Hook::new("hash_credentials", move |_, payload| {
        let mut persist = payload.into_persist()?;
        persist.patch.set.remove("passwordConfirm");

        let Some(Value::String(plaintext)) = persist.patch.set.get("password") else {
            return Ok(HookPayload::Persist(persist));
        };
        let digest = hasher.hash(plaintext).map_err(AppError::Internal)?;
        persist
            .patch
            .set
            .insert("password".to_string(), Value::String(digest));

        if !persist.is_new {
            let changed_at = Utc::now() - Duration::seconds(1);
            persist.patch.set.insert(
                "passwordChangedAt".to_string(),
                Value::String(changed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        Ok(HookPayload::Persist(persist))
    })
}

/// Add `durationWeeks` to retrieved tours that carry `duration`.
pub fn duration_weeks() -> Hook {
    Hook::new("duration_weeks", |_, payload| {
        let HookPayload::Documents(mut docs) = payload else {
            return Ok(payload);
        };
        for doc in &mut docs {
            if let Some(days) = doc.get_f64("duration") {
                doc.set("durationWeeks", Value::from(days / 7.0));
            }
        }
        Ok(HookPayload::Documents(docs))
    })
}

/// Record retrieval latency. Never alters the payload.
pub fn record_timing(entity: EntityKind, metrics: Arc<Metrics>) -> Hook {
    Hook::new("record_timing", move |ctx, payload| {
        let elapsed = ctx.elapsed();
        metrics.record_retrieval(entity.plural(), elapsed.as_secs_f64());
        debug!(
            %entity,
            operation = ?ctx.operation(),
            elapsed_ms = elapsed.as_millis() as u64,
            "retrieval finished"
        );
        Ok(payload)
    })
}

/// URL-safe slug: lowercase alphanumerics separated by single hyphens.
///
/// Letters outside ASCII are kept, so "Über Alps" becomes "über-alps".
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if slug.len() > MAX_SLUG_LEN {
        // Cut at a word boundary, never inside a multi-byte character.
        let end = (0..=MAX_SLUG_LEN)
            .rev()
            .find(|&at| slug.is_char_boundary(at))
            .unwrap_or(0);
        let truncated = &slug[..end];
        return match truncated.rfind('-') {
            Some(at) => truncated[..at].to_string(),
            None => truncated.to_string(),
        };
    }
    slug
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{Argon2Hasher, Principal, Role, RoleAuthorizer};
    use crate::hooks::{HookContext, OperationKind, PersistPayload};
    use crate::query::{QueryBuilder, RetrievalRequest};
    use crate::store::{Document, DocumentPatch, GroupKey, GroupStage};
    use serde_json::json;
    use uuid::Uuid;

    use crate::hooks::Timing;

    fn registry() -> HookRegistry {
        standard_registry(Arc::new(Argon2Hasher), Arc::new(Metrics::new()))
    }

    fn ctx_for(role: Role) -> HookContext {
        let principal = Principal::new(Uuid::now_v7(), role);
        HookContext::new(OperationKind::Find, EntityKind::Tour, Some(&principal), &RoleAuthorizer)
    }

    fn tour_query() -> HookPayload {
        HookPayload::Query(QueryBuilder::build(
            EntityKind::Tour.collection(),
            RetrievalRequest::default(),
        ))
    }

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  Sea -- Explorer!  "), "sea-explorer");
        assert_eq!(slugify("Über Alps"), "über-alps");
        assert_eq!(slugify("Côte d'Azur"), "côte-d-azur");
        assert_eq!(slugify("!!!"), "");
        let long = "word ".repeat(60);
        let slug = slugify(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));

        let wide = "é".repeat(MAX_SLUG_LEN);
        let slug = slugify(&wide);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(slug.chars().all(|c| c == 'é'));
    }

    #[test]
    fn hidden_tours_filtered_for_unprivileged() {
        let reg = registry();
        let out = reg
            .run(EntityKind::Tour, Timing::Pre, Phase::Retrieve, &ctx_for(Role::User), tour_query())
            .unwrap()
            .into_query()
            .unwrap();
        assert!(out.filters().contains(&FilterClause::new(
            HIDDEN_FLAG,
            FilterOperator::Ne,
            FilterValue::Boolean(true)
        )));
    }

    #[test]
    fn privileged_callers_bypass_visibility() {
        let reg = registry();
        let out = reg
            .run(EntityKind::Tour, Timing::Pre, Phase::Retrieve, &ctx_for(Role::Admin), tour_query())
            .unwrap()
            .into_query()
            .unwrap();
        assert!(!out.filters_on(HIDDEN_FLAG));
    }

    #[test]
    fn visibility_prepends_pipeline_match() {
        let reg = registry();
        let stages = vec![PipelineStage::Group(GroupStage::new(GroupKey::Constant))];
        let out = reg
            .run(
                EntityKind::Tour,
                Timing::Pre,
                Phase::Retrieve,
                &ctx_for(Role::Guide),
                HookPayload::Pipeline(stages),
            )
            .unwrap()
            .into_pipeline()
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], PipelineStage::Match(c) if c[0].field == HIDDEN_FLAG));
    }

    #[test]
    fn slug_follows_name() {
        let reg = registry();
        let ctx = HookContext::system(OperationKind::Update);
        let payload = HookPayload::Persist(PersistPayload {
            id: Some(Uuid::now_v7()),
            patch: DocumentPatch::new().with("name", "Snow Adventurer"),
            is_new: false,
        });
        let out = reg
            .run(EntityKind::Tour, Timing::Pre, Phase::Persist, &ctx, payload)
            .unwrap()
            .into_persist()
            .unwrap();
        assert_eq!(out.patch.set["slug"], json!("snow-adventurer"));

        let untouched = HookPayload::Persist(PersistPayload {
            id: Some(Uuid::now_v7()),
            patch: DocumentPatch::new().with("price", 10),
            is_new: false,
        });
        let out = reg
            .run(EntityKind::Tour, Timing::Pre, Phase::Persist, &ctx, untouched)
            .unwrap()
            .into_persist()
            .unwrap();
        assert!(!out.patch.touches("slug"));
    }

    #[test]
    fn passwords_are_hashed_before_persist() {
        let reg = registry();
        let ctx = HookContext::system(OperationKind::Create);
        let payload = HookPayload::Persist(PersistPayload {
            id: None,
            patch: DocumentPatch::new()
                .with("password", "pass1234")
                .with("passwordConfirm", "pass1234"),
            is_new: true,
        });
        let out = reg
            .run(EntityKind::User, Timing::Pre, Phase::Persist, &ctx, payload)
            .unwrap()
            .into_persist()
            .unwrap();
        let digest = out.patch.set["password"].as_str().unwrap();
        assert_ne!(digest, "pass1234");
        assert!(Argon2Hasher.verify("pass1234", digest));
        assert!(!out.patch.touches("passwordConfirm"));
        assert!(!out.patch.touches("passwordChangedAt"));
    }

    #[test]
    fn password_change_is_stamped_in_the_past() {
        let reg = registry();
        let ctx = HookContext::system(OperationKind::Update);
        let payload = HookPayload::Persist(PersistPayload {
            id: Some(Uuid::now_v7()),
            patch: DocumentPatch::new().with("password", "newpass123"),
            is_new: false,
        });
        let out = reg
            .run(EntityKind::User, Timing::Pre, Phase::Persist, &ctx, payload)
            .unwrap()
            .into_persist()
            .unwrap();
        let stamped = out.patch.set["passwordChangedAt"].as_str().unwrap();
        let stamped = chrono::DateTime::parse_from_rfc3339(stamped).unwrap();
        assert!(stamped < Utc::now());
    }

    #[test]
    fn duration_weeks_is_derived() {
        let reg = registry();
        let ctx = HookContext::system(OperationKind::Find);
        let Value::Object(map) = json!({ "duration": 14 }) else {
            unreachable!()
        };
        let out = reg
            .run(
                EntityKind::Tour,
                Timing::Post,
                Phase::Retrieve,
                &ctx,
                HookPayload::Documents(vec![Document::new(map)]),
            )
            .unwrap()
            .into_documents()
            .unwrap();
        assert_eq!(out[0].get_f64("durationWeeks"), Some(2.0));
    }

    #[test]
    fn inactive_users_are_filtered() {
        let reg = registry();
        let ctx = HookContext::system(OperationKind::Find);
        let query = HookPayload::Query(QueryBuilder::build(
            EntityKind::User.collection(),
            RetrievalRequest::default(),
        ));
        let out = reg
            .run(EntityKind::User, Timing::Pre, Phase::Retrieve, &ctx, query)
            .unwrap()
            .into_query()
            .unwrap();
        assert!(out.filters_on(ACTIVE_FLAG));
    }
}
