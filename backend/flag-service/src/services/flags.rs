//! Flag coordinator: CRUD, evaluation and audit queries behind one façade.
//!
//! This is the sole writer to the flag tables and the sole cache
//! invalidator. Every mutation follows the same sequence: persist, evict the
//! local cache entry, broadcast the invalidation, append an audit entry. A
//! crash after persistence self-heals once the cache TTL expires; a crash
//! before persistence leaves no visible side effect.
//!
//! Collaborators are passed in at construction; there is no ambient lookup.

use sqlx::PgPool;
use tracing::warn;

use cache_invalidation::InvalidationPublisher;

use crate::cache::FlagCache;
use crate::db::flag_repo;
use crate::error::{AppError, Result};
use crate::models::{
    AuditAction, AuditLogEntry, EvaluationContext, EvaluationResult, FlagDefinition, FlagTarget,
    FlagType, FlagVariant, FlagWithRules, RequestMetadata, TargetType,
};
use crate::services::{audit::AuditService, evaluation};
use crate::validators;

/// Input for flag creation
#[derive(Debug, Clone)]
pub struct NewFlag {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub flag_type: FlagType,
    pub rollout_percentage: i32,
}

/// Patch-style flag update; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct FlagPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub rollout_percentage: Option<i32>,
}

/// Input for appending a variant
#[derive(Debug, Clone)]
pub struct NewVariant {
    pub key: String,
    pub value: String,
    pub weight: i32,
}

/// Input for appending a targeting rule
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub target_type: TargetType,
    pub target_value: String,
    pub enabled: bool,
    pub percentage: Option<i32>,
    pub variant_key: Option<String>,
    pub priority: i32,
}

#[derive(Clone)]
pub struct FlagService {
    pool: PgPool,
    cache: FlagCache,
    publisher: InvalidationPublisher,
    audit: AuditService,
}

impl FlagService {
    pub fn new(
        pool: PgPool,
        cache: FlagCache,
        publisher: InvalidationPublisher,
        audit: AuditService,
    ) -> Self {
        Self {
            pool,
            cache,
            publisher,
            audit,
        }
    }

    // ---- read path ----

    /// Cache-first lookup of a flag with its rules.
    pub async fn find_by_key(&self, key: &str) -> Result<FlagWithRules> {
        if let Some(hit) = self.cache.get(key).await {
            return Ok(hit);
        }

        let flag = flag_repo::load_flag_with_rules(&self.pool, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("flag '{}' not found", key)))?;

        self.cache.set(key, &flag).await;
        Ok(flag)
    }

    /// Evaluate a flag for the given context.
    ///
    /// A missing or soft-deleted flag is a `NotFound` error, never a default
    /// decision: callers must distinguish "flag doesn't exist" from "flag
    /// evaluates to false".
    pub async fn evaluate(&self, key: &str, ctx: &EvaluationContext) -> Result<EvaluationResult> {
        let flag = self.find_by_key(key).await?;
        Ok(evaluation::evaluate(&flag, ctx))
    }

    pub async fn list_flags(&self, include_deleted: bool) -> Result<Vec<FlagDefinition>> {
        let flags = flag_repo::list_flags(&self.pool, include_deleted).await?;
        Ok(flags)
    }

    // ---- write path ----

    pub async fn create_flag(
        &self,
        input: NewFlag,
        actor_id: Option<&str>,
        metadata: &RequestMetadata,
    ) -> Result<FlagDefinition> {
        if !validators::validate_key(&input.key) {
            return Err(AppError::Validation(format!(
                "flag key '{}' is not a valid slug",
                input.key
            )));
        }
        if !validators::validate_percentage(input.rollout_percentage) {
            return Err(AppError::Validation(
                "rollout_percentage must be between 0 and 100".to_string(),
            ));
        }
        if flag_repo::find_flag_any_state(&self.pool, &input.key)
            .await?
            .is_some()
        {
            return Err(AppError::Validation(format!(
                "flag key '{}' already exists",
                input.key
            )));
        }

        let flag = flag_repo::create_flag(
            &self.pool,
            &input.key,
            &input.name,
            input.description.as_deref(),
            input.flag_type.as_str(),
            input.rollout_percentage,
            actor_id,
        )
        .await?;

        self.invalidate_and_broadcast(&flag.key, false).await;
        self.audit
            .log(
                flag.id,
                AuditAction::Created,
                actor_id,
                Some(serde_json::json!({
                    "key": flag.key,
                    "flag_type": flag.flag_type,
                    "rollout_percentage": flag.rollout_percentage,
                })),
                metadata,
            )
            .await;

        Ok(flag)
    }

    pub async fn update_flag(
        &self,
        key: &str,
        patch: FlagPatch,
        actor_id: Option<&str>,
        metadata: &RequestMetadata,
    ) -> Result<FlagDefinition> {
        if let Some(pct) = patch.rollout_percentage {
            if !validators::validate_percentage(pct) {
                return Err(AppError::Validation(
                    "rollout_percentage must be between 0 and 100".to_string(),
                ));
            }
        }

        let flag = flag_repo::update_flag(
            &self.pool,
            key,
            patch.name.as_deref(),
            patch.description.as_deref(),
            patch.enabled,
            patch.rollout_percentage,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("flag '{}' not found", key)))?;

        self.invalidate_and_broadcast(key, false).await;

        let action = patch_action(&patch);
        self.audit
            .log(
                flag.id,
                action,
                actor_id,
                Some(serde_json::json!({
                    "name": patch.name,
                    "description": patch.description,
                    "enabled": patch.enabled,
                    "rollout_percentage": patch.rollout_percentage,
                })),
                metadata,
            )
            .await;

        Ok(flag)
    }

    pub async fn toggle_flag(
        &self,
        key: &str,
        actor_id: Option<&str>,
        metadata: &RequestMetadata,
    ) -> Result<FlagDefinition> {
        let current = flag_repo::find_flag_by_key(&self.pool, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("flag '{}' not found", key)))?;

        let flag = flag_repo::set_flag_enabled(&self.pool, key, !current.enabled)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("flag '{}' not found", key)))?;

        self.invalidate_and_broadcast(key, false).await;

        let action = if flag.enabled {
            AuditAction::Enabled
        } else {
            AuditAction::Disabled
        };
        self.audit
            .log(
                flag.id,
                action,
                actor_id,
                Some(serde_json::json!({ "enabled": flag.enabled })),
                metadata,
            )
            .await;

        Ok(flag)
    }

    /// Soft delete: the row stays, children stay, history stays. The flag
    /// disappears from listing and evaluation because reads filter on the
    /// deletion timestamp.
    pub async fn delete_flag(
        &self,
        key: &str,
        actor_id: Option<&str>,
        metadata: &RequestMetadata,
    ) -> Result<FlagDefinition> {
        let flag = flag_repo::soft_delete_flag(&self.pool, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("flag '{}' not found", key)))?;

        self.invalidate_and_broadcast(key, true).await;
        self.audit
            .log(flag.id, AuditAction::Deleted, actor_id, None, metadata)
            .await;

        Ok(flag)
    }

    pub async fn add_variant(
        &self,
        flag_key: &str,
        input: NewVariant,
        actor_id: Option<&str>,
        metadata: &RequestMetadata,
    ) -> Result<FlagVariant> {
        if !validators::validate_key(&input.key) {
            return Err(AppError::Validation(format!(
                "variant key '{}' is not a valid slug",
                input.key
            )));
        }
        if input.weight < 0 {
            return Err(AppError::Validation(
                "variant weight must be >= 0".to_string(),
            ));
        }

        let flag = flag_repo::find_flag_by_key(&self.pool, flag_key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("flag '{}' not found", flag_key)))?;

        if flag_repo::variant_exists(&self.pool, flag.id, &input.key).await? {
            return Err(AppError::Validation(format!(
                "variant key '{}' already exists on flag '{}'",
                input.key, flag_key
            )));
        }

        let variant =
            flag_repo::create_variant(&self.pool, flag.id, &input.key, &input.value, input.weight)
                .await?;

        self.invalidate_and_broadcast(flag_key, false).await;
        self.audit
            .log(
                flag.id,
                AuditAction::VariantAdded,
                actor_id,
                Some(serde_json::json!({
                    "variant_key": variant.key,
                    "weight": variant.weight,
                })),
                metadata,
            )
            .await;

        Ok(variant)
    }

    pub async fn add_target(
        &self,
        flag_key: &str,
        input: NewTarget,
        actor_id: Option<&str>,
        metadata: &RequestMetadata,
    ) -> Result<FlagTarget> {
        if let Some(pct) = input.percentage {
            if !validators::validate_percentage(pct) {
                return Err(AppError::Validation(
                    "target percentage must be between 0 and 100".to_string(),
                ));
            }
        }
        if input.target_value.trim().is_empty() {
            return Err(AppError::Validation(
                "target_value must not be empty".to_string(),
            ));
        }

        let flag = flag_repo::find_flag_by_key(&self.pool, flag_key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("flag '{}' not found", flag_key)))?;

        if let Some(variant_key) = input.variant_key.as_deref() {
            if !flag_repo::variant_exists(&self.pool, flag.id, variant_key).await? {
                return Err(AppError::Validation(format!(
                    "variant '{}' does not exist on flag '{}'",
                    variant_key, flag_key
                )));
            }
        }

        let target = flag_repo::create_target(
            &self.pool,
            flag.id,
            input.target_type.as_str(),
            &input.target_value,
            input.enabled,
            input.percentage,
            input.variant_key.as_deref(),
            input.priority,
        )
        .await?;

        self.invalidate_and_broadcast(flag_key, false).await;
        self.audit
            .log(
                flag.id,
                AuditAction::TargetAdded,
                actor_id,
                Some(serde_json::json!({
                    "target_type": target.target_type,
                    "target_value": target.target_value,
                    "priority": target.priority,
                    "variant_key": target.variant_key,
                })),
                metadata,
            )
            .await;

        Ok(target)
    }

    // ---- audit queries ----

    /// Audit entries for a flag. Works for soft-deleted flags too: history
    /// outlives the flag.
    pub async fn audit_for_flag(
        &self,
        key: &str,
        limit: Option<i64>,
    ) -> Result<Vec<AuditLogEntry>> {
        let flag = flag_repo::find_flag_any_state(&self.pool, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("flag '{}' not found", key)))?;

        self.audit.logs_for_flag(flag.id, limit).await
    }

    pub async fn audit_by_user(
        &self,
        actor_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<AuditLogEntry>> {
        self.audit.logs_by_user(actor_id, limit).await
    }

    pub async fn recent_audit(&self, limit: Option<i64>) -> Result<Vec<AuditLogEntry>> {
        self.audit.recent_logs(limit).await
    }

    // ---- internals ----

    /// Evict the local cache entry, then broadcast so every other instance
    /// does the same. A broadcast failure is logged and skipped: the TTL
    /// still bounds how stale other instances can get.
    async fn invalidate_and_broadcast(&self, key: &str, deleted: bool) {
        self.cache.invalidate(key).await;

        let published = if deleted {
            self.publisher.flag_deleted(key).await
        } else {
            self.publisher.flag_updated(key).await
        };

        if let Err(e) = published {
            warn!(
                flag_key = %key,
                error = %e,
                "Failed to broadcast invalidation; relying on cache TTL"
            );
        }
    }
}

fn patch_action(patch: &FlagPatch) -> AuditAction {
    let rollout_only = patch.rollout_percentage.is_some()
        && patch.name.is_none()
        && patch.description.is_none()
        && patch.enabled.is_none();
    let toggle_only = patch.enabled.is_some()
        && patch.name.is_none()
        && patch.description.is_none()
        && patch.rollout_percentage.is_none();

    if rollout_only {
        AuditAction::RolloutChanged
    } else if toggle_only {
        match patch.enabled {
            Some(true) => AuditAction::Enabled,
            _ => AuditAction::Disabled,
        }
    } else {
        AuditAction::Updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_action_classification() {
        let rollout = FlagPatch {
            rollout_percentage: Some(25),
            ..Default::default()
        };
        assert_eq!(patch_action(&rollout), AuditAction::RolloutChanged);

        let enable = FlagPatch {
            enabled: Some(true),
            ..Default::default()
        };
        assert_eq!(patch_action(&enable), AuditAction::Enabled);

        let disable = FlagPatch {
            enabled: Some(false),
            ..Default::default()
        };
        assert_eq!(patch_action(&disable), AuditAction::Disabled);

        let mixed = FlagPatch {
            name: Some("new name".into()),
            rollout_percentage: Some(25),
            ..Default::default()
        };
        assert_eq!(patch_action(&mixed), AuditAction::Updated);

        let toggle_plus_rollout = FlagPatch {
            enabled: Some(true),
            rollout_percentage: Some(25),
            ..Default::default()
        };
        assert_eq!(patch_action(&toggle_plus_rollout), AuditAction::Updated);
    }
}
