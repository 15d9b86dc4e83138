//! Repository for flag, variant and target rows.
//!
//! Soft-deleted flags are filtered with `deleted_at IS NULL` on every read
//! path except the explicit include-deleted listing. Targets are returned in
//! evaluation order: priority descending, ties broken by creation time then
//! id, so the scan order is stable regardless of insert order.

use crate::models::{FlagDefinition, FlagTarget, FlagVariant, FlagWithRules};
use sqlx::PgPool;
use uuid::Uuid;

const FLAG_COLUMNS: &str = "id, key, name, description, enabled, flag_type, rollout_percentage, \
                            created_by, created_at, updated_at, deleted_at";

/// Create a new flag definition
pub async fn create_flag(
    pool: &PgPool,
    key: &str,
    name: &str,
    description: Option<&str>,
    flag_type: &str,
    rollout_percentage: i32,
    created_by: Option<&str>,
) -> Result<FlagDefinition, sqlx::Error> {
    let flag = sqlx::query_as::<_, FlagDefinition>(&format!(
        r#"
        INSERT INTO feature_flags (key, name, description, flag_type, rollout_percentage, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {FLAG_COLUMNS}
        "#,
    ))
    .bind(key)
    .bind(name)
    .bind(description)
    .bind(flag_type)
    .bind(rollout_percentage)
    .bind(created_by)
    .fetch_one(pool)
    .await?;

    Ok(flag)
}

/// Find a flag by key (excluding soft-deleted flags)
pub async fn find_flag_by_key(
    pool: &PgPool,
    key: &str,
) -> Result<Option<FlagDefinition>, sqlx::Error> {
    let flag = sqlx::query_as::<_, FlagDefinition>(&format!(
        r#"
        SELECT {FLAG_COLUMNS}
        FROM feature_flags
        WHERE key = $1 AND deleted_at IS NULL
        "#,
    ))
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(flag)
}

/// Find a flag by key including soft-deleted rows (for key-uniqueness checks)
pub async fn find_flag_any_state(
    pool: &PgPool,
    key: &str,
) -> Result<Option<FlagDefinition>, sqlx::Error> {
    let flag = sqlx::query_as::<_, FlagDefinition>(&format!(
        r#"
        SELECT {FLAG_COLUMNS}
        FROM feature_flags
        WHERE key = $1
        "#,
    ))
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(flag)
}

/// Load a flag together with its variants and targets, ready for evaluation.
pub async fn load_flag_with_rules(
    pool: &PgPool,
    key: &str,
) -> Result<Option<FlagWithRules>, sqlx::Error> {
    let Some(flag) = find_flag_by_key(pool, key).await? else {
        return Ok(None);
    };

    let variants = list_variants(pool, flag.id).await?;
    let targets = list_targets(pool, flag.id).await?;

    Ok(Some(FlagWithRules {
        flag,
        variants,
        targets,
    }))
}

/// List flags, newest first
pub async fn list_flags(
    pool: &PgPool,
    include_deleted: bool,
) -> Result<Vec<FlagDefinition>, sqlx::Error> {
    let flags = if include_deleted {
        sqlx::query_as::<_, FlagDefinition>(&format!(
            r#"
            SELECT {FLAG_COLUMNS}
            FROM feature_flags
            ORDER BY created_at DESC
            "#,
        ))
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as::<_, FlagDefinition>(&format!(
            r#"
            SELECT {FLAG_COLUMNS}
            FROM feature_flags
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            "#,
        ))
        .fetch_all(pool)
        .await?
    };

    Ok(flags)
}

/// Patch-style update; NULL arguments keep the current value.
pub async fn update_flag(
    pool: &PgPool,
    key: &str,
    name: Option<&str>,
    description: Option<&str>,
    enabled: Option<bool>,
    rollout_percentage: Option<i32>,
) -> Result<Option<FlagDefinition>, sqlx::Error> {
    let flag = sqlx::query_as::<_, FlagDefinition>(&format!(
        r#"
        UPDATE feature_flags
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            enabled = COALESCE($4, enabled),
            rollout_percentage = COALESCE($5, rollout_percentage),
            updated_at = NOW()
        WHERE key = $1 AND deleted_at IS NULL
        RETURNING {FLAG_COLUMNS}
        "#,
    ))
    .bind(key)
    .bind(name)
    .bind(description)
    .bind(enabled)
    .bind(rollout_percentage)
    .fetch_optional(pool)
    .await?;

    Ok(flag)
}

/// Flip the enabled bit
pub async fn set_flag_enabled(
    pool: &PgPool,
    key: &str,
    enabled: bool,
) -> Result<Option<FlagDefinition>, sqlx::Error> {
    let flag = sqlx::query_as::<_, FlagDefinition>(&format!(
        r#"
        UPDATE feature_flags
        SET enabled = $2, updated_at = NOW()
        WHERE key = $1 AND deleted_at IS NULL
        RETURNING {FLAG_COLUMNS}
        "#,
    ))
    .bind(key)
    .bind(enabled)
    .fetch_optional(pool)
    .await?;

    Ok(flag)
}

/// Soft delete: sets the timestamp, never removes the row. Variants and
/// targets stay attached by foreign key; they disappear from evaluation
/// because every read path filters on `deleted_at IS NULL` upstream.
pub async fn soft_delete_flag(
    pool: &PgPool,
    key: &str,
) -> Result<Option<FlagDefinition>, sqlx::Error> {
    let flag = sqlx::query_as::<_, FlagDefinition>(&format!(
        r#"
        UPDATE feature_flags
        SET deleted_at = NOW(), updated_at = NOW()
        WHERE key = $1 AND deleted_at IS NULL
        RETURNING {FLAG_COLUMNS}
        "#,
    ))
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(flag)
}

/// Append a variant to a flag
pub async fn create_variant(
    pool: &PgPool,
    flag_id: Uuid,
    key: &str,
    value: &str,
    weight: i32,
) -> Result<FlagVariant, sqlx::Error> {
    let variant = sqlx::query_as::<_, FlagVariant>(
        r#"
        INSERT INTO flag_variants (flag_id, key, value, weight)
        VALUES ($1, $2, $3, $4)
        RETURNING id, flag_id, key, value, weight, created_at
        "#,
    )
    .bind(flag_id)
    .bind(key)
    .bind(value)
    .bind(weight)
    .fetch_one(pool)
    .await?;

    Ok(variant)
}

/// Variants in their stored (creation) order — the order weighted
/// selection accumulates over.
pub async fn list_variants(pool: &PgPool, flag_id: Uuid) -> Result<Vec<FlagVariant>, sqlx::Error> {
    let variants = sqlx::query_as::<_, FlagVariant>(
        r#"
        SELECT id, flag_id, key, value, weight, created_at
        FROM flag_variants
        WHERE flag_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(flag_id)
    .fetch_all(pool)
    .await?;

    Ok(variants)
}

/// Append a targeting rule to a flag
#[allow(clippy::too_many_arguments)]
pub async fn create_target(
    pool: &PgPool,
    flag_id: Uuid,
    target_type: &str,
    target_value: &str,
    enabled: bool,
    percentage: Option<i32>,
    variant_key: Option<&str>,
    priority: i32,
) -> Result<FlagTarget, sqlx::Error> {
    let target = sqlx::query_as::<_, FlagTarget>(
        r#"
        INSERT INTO flag_targets
            (flag_id, target_type, target_value, enabled, percentage, variant_key, priority)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, flag_id, target_type, target_value, enabled, percentage, variant_key,
                  priority, created_at
        "#,
    )
    .bind(flag_id)
    .bind(target_type)
    .bind(target_value)
    .bind(enabled)
    .bind(percentage)
    .bind(variant_key)
    .bind(priority)
    .fetch_one(pool)
    .await?;

    Ok(target)
}

/// Targets in evaluation order
pub async fn list_targets(pool: &PgPool, flag_id: Uuid) -> Result<Vec<FlagTarget>, sqlx::Error> {
    let targets = sqlx::query_as::<_, FlagTarget>(
        r#"
        SELECT id, flag_id, target_type, target_value, enabled, percentage, variant_key,
               priority, created_at
        FROM flag_targets
        WHERE flag_id = $1
        ORDER BY priority DESC, created_at ASC, id ASC
        "#,
    )
    .bind(flag_id)
    .fetch_all(pool)
    .await?;

    Ok(targets)
}

/// Whether a variant key exists on a flag (referential check before pinning)
pub async fn variant_exists(
    pool: &PgPool,
    flag_id: Uuid,
    variant_key: &str,
) -> Result<bool, sqlx::Error> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM flag_variants WHERE flag_id = $1 AND key = $2",
    )
    .bind(flag_id)
    .bind(variant_key)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}
