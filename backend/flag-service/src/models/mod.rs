//! Data models for flag-service
//!
//! Rows mirror the PostgreSQL schema in `migrations/`; enum-like columns are
//! stored as TEXT with CHECK constraints and parsed at the evaluation
//! boundary. `FlagWithRules` is the unit cached in Redis and handed to the
//! evaluation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Value type a flag resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
    Multivariate,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Boolean => "BOOLEAN",
            FlagType::String => "STRING",
            FlagType::Number => "NUMBER",
            FlagType::Json => "JSON",
            FlagType::Multivariate => "MULTIVARIATE",
        }
    }
}

impl FromStr for FlagType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOOLEAN" => Ok(FlagType::Boolean),
            "STRING" => Ok(FlagType::String),
            "NUMBER" => Ok(FlagType::Number),
            "JSON" => Ok(FlagType::Json),
            "MULTIVARIATE" => Ok(FlagType::Multivariate),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for FlagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dimension a targeting rule matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    User,
    Role,
    Email,
    Organization,
    Group,
    Custom,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::User => "USER",
            TargetType::Role => "ROLE",
            TargetType::Email => "EMAIL",
            TargetType::Organization => "ORGANIZATION",
            TargetType::Group => "GROUP",
            TargetType::Custom => "CUSTOM",
        }
    }
}

impl FromStr for TargetType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(TargetType::User),
            "ROLE" => Ok(TargetType::Role),
            "EMAIL" => Ok(TargetType::Email),
            "ORGANIZATION" => Ok(TargetType::Organization),
            "GROUP" => Ok(TargetType::Group),
            "CUSTOM" => Ok(TargetType::Custom),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of change recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Enabled,
    Disabled,
    VariantAdded,
    VariantUpdated,
    VariantRemoved,
    TargetAdded,
    TargetUpdated,
    TargetRemoved,
    RolloutChanged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "CREATED",
            AuditAction::Updated => "UPDATED",
            AuditAction::Deleted => "DELETED",
            AuditAction::Enabled => "ENABLED",
            AuditAction::Disabled => "DISABLED",
            AuditAction::VariantAdded => "VARIANT_ADDED",
            AuditAction::VariantUpdated => "VARIANT_UPDATED",
            AuditAction::VariantRemoved => "VARIANT_REMOVED",
            AuditAction::TargetAdded => "TARGET_ADDED",
            AuditAction::TargetUpdated => "TARGET_UPDATED",
            AuditAction::TargetRemoved => "TARGET_REMOVED",
            AuditAction::RolloutChanged => "ROLLOUT_CHANGED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feature flag definition row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlagDefinition {
    pub id: Uuid,
    /// Immutable URL-safe slug, unique across the platform
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub flag_type: String,
    /// Fraction of the population enabled absent a matching target, 0..=100
    pub rollout_percentage: i32,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FlagDefinition {
    /// Parsed flag type; unknown values behave as BOOLEAN
    pub fn flag_type(&self) -> FlagType {
        FlagType::from_str(&self.flag_type).unwrap_or(FlagType::Boolean)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One named payload of a multivariate flag
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlagVariant {
    pub id: Uuid,
    pub flag_id: Uuid,
    /// Unique within the flag
    pub key: String,
    /// Opaque payload; interpretation depends on the flag type
    pub value: String,
    pub weight: i32,
    pub created_at: DateTime<Utc>,
}

/// One targeting rule attached to a flag
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlagTarget {
    pub id: Uuid,
    pub flag_id: Uuid,
    pub target_type: String,
    /// Semantics depend on target_type; `key=value` for CUSTOM
    pub target_value: String,
    pub enabled: bool,
    /// Optional sub-percentage gating the match, 0..=100
    pub percentage: Option<i32>,
    /// Pins a specific variant when the rule matches
    pub variant_key: Option<String>,
    /// Higher priority is evaluated first
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl FlagTarget {
    /// Parsed target type; `None` for unknown values (rule is skipped)
    pub fn target_type(&self) -> Option<TargetType> {
        TargetType::from_str(&self.target_type).ok()
    }
}

/// A flag definition together with its variants and targets.
///
/// This is the read model the evaluation engine consumes and the unit the
/// cache layer stores. Targets are kept in evaluation order (priority
/// descending, creation ascending) as returned by the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagWithRules {
    pub flag: FlagDefinition,
    pub variants: Vec<FlagVariant>,
    pub targets: Vec<FlagTarget>,
}

/// Immutable audit trail row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub flag_id: Uuid,
    pub action: String,
    pub actor_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request metadata recorded with audit entries
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Caller-supplied facts a decision is made against. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub user_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub email: Option<String>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Open map matched by CUSTOM targets
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl EvaluationContext {
    /// Fixed identity substituted when the caller supplies none.
    ///
    /// Using a literal rather than a random value keeps bucketing sticky
    /// for anonymous traffic.
    pub const ANONYMOUS: &'static str = "anonymous";

    /// Bucketing identity: user id, then email, then the anonymous literal.
    pub fn subject_id(&self) -> &str {
        self.user_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.email.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(Self::ANONYMOUS)
    }
}

/// Outcome of one evaluation. Ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Human-readable explanation of which rule produced the decision
    pub reason: String,
}

impl EvaluationResult {
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            enabled: false,
            value: None,
            variant: None,
            reason: reason.into(),
        }
    }

    pub fn enabled(reason: impl Into<String>) -> Self {
        Self {
            enabled: true,
            value: None,
            variant: None,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_type_roundtrip() {
        for t in [
            FlagType::Boolean,
            FlagType::String,
            FlagType::Number,
            FlagType::Json,
            FlagType::Multivariate,
        ] {
            assert_eq!(FlagType::from_str(t.as_str()), Ok(t));
        }
        assert!(FlagType::from_str("boolean").is_err());
    }

    #[test]
    fn test_target_type_roundtrip() {
        for t in [
            TargetType::User,
            TargetType::Role,
            TargetType::Email,
            TargetType::Organization,
            TargetType::Group,
            TargetType::Custom,
        ] {
            assert_eq!(TargetType::from_str(t.as_str()), Ok(t));
        }
    }

    #[test]
    fn test_subject_id_priority() {
        let ctx = EvaluationContext {
            user_id: Some("user-1".into()),
            email: Some("a@b.c".into()),
            ..Default::default()
        };
        assert_eq!(ctx.subject_id(), "user-1");

        let ctx = EvaluationContext {
            email: Some("a@b.c".into()),
            ..Default::default()
        };
        assert_eq!(ctx.subject_id(), "a@b.c");

        let ctx = EvaluationContext::default();
        assert_eq!(ctx.subject_id(), EvaluationContext::ANONYMOUS);
    }

    #[test]
    fn test_subject_id_ignores_empty_strings() {
        let ctx = EvaluationContext {
            user_id: Some(String::new()),
            email: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(ctx.subject_id(), EvaluationContext::ANONYMOUS);
    }

    #[test]
    fn test_context_deserializes_with_defaults() {
        let ctx: EvaluationContext = serde_json::from_str(r#"{"user_id":"u1"}"#).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert!(ctx.roles.is_empty());
        assert!(ctx.attributes.is_empty());
    }
}
