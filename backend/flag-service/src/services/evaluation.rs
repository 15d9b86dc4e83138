//! Flag evaluation engine
//!
//! Pure decision logic: bucketing, targeting, rollout and variant selection.
//! Everything here is stateless and performs no I/O, so it is safe to call
//! concurrently from any number of request handlers without locking.

use tracing::warn;

use crate::models::{
    EvaluationContext, EvaluationResult, FlagDefinition, FlagTarget, FlagType, FlagWithRules,
    TargetType,
};
use sha2::{Digest, Sha256};

/// Deterministic bucket in [0,100] for a (subject, flag) pair.
///
/// Hashes `"{identifier}:{flag_key}"` with the house digest and reduces the
/// first 32 bits modulo 101. Identical inputs always produce identical
/// output across processes and over time, which is what keeps rollout and
/// variant assignment sticky for a given subject. Callers with no identity
/// must pass [`EvaluationContext::ANONYMOUS`], never a random value.
pub fn bucket(identifier: &str, flag_key: &str) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hasher.update(b":");
    hasher.update(flag_key.as_bytes());
    let digest = hasher.finalize();

    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (head % 101) as u8
}

/// Evaluate the flag's targeting rules against a context.
///
/// Targets are scanned by priority descending (ties broken by creation time,
/// then id, so the order is stable regardless of storage order). A target
/// that matches type/value but fails its own percentage gate is skipped and
/// the scan continues with lower-priority rules; it does not fall through to
/// global rollout on its own. Returns `None` when no rule decides.
pub fn resolve_targets(
    flag: &FlagWithRules,
    ctx: &EvaluationContext,
) -> Option<EvaluationResult> {
    let mut ordered: Vec<&FlagTarget> = flag.targets.iter().collect();
    ordered.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    for target in ordered {
        if !target.enabled {
            continue;
        }

        let Some(kind) = target.target_type() else {
            warn!(
                flag_key = %flag.flag.key,
                target_type = %target.target_type,
                "Skipping target with unknown type"
            );
            continue;
        };

        if !matches_target(kind, &target.target_value, ctx) {
            continue;
        }

        if let Some(pct) = target.percentage {
            if i32::from(bucket(ctx.subject_id(), &flag.flag.key)) > pct {
                // Matched but lost its percentage gate: skip this rule only.
                continue;
            }
        }

        let mut result = EvaluationResult::enabled(format!(
            "target match: {} {}",
            target.target_type, target.target_value
        ));
        result.variant = target.variant_key.clone();
        return Some(result);
    }

    None
}

fn matches_target(kind: TargetType, target_value: &str, ctx: &EvaluationContext) -> bool {
    match kind {
        TargetType::User => ctx.user_id.as_deref() == Some(target_value),
        TargetType::Role => ctx.roles.iter().any(|r| r == target_value),
        TargetType::Email => ctx.email.as_deref() == Some(target_value),
        TargetType::Organization => ctx.organization_id.as_deref() == Some(target_value),
        TargetType::Group => ctx.groups.iter().any(|g| g == target_value),
        TargetType::Custom => match target_value.split_once('=') {
            Some((key, value)) => ctx.attributes.get(key).map(String::as_str) == Some(value),
            None => false,
        },
    }
}

/// Apply the flag's global rollout percentage.
///
/// Only meaningful after [`resolve_targets`] returned `None`.
pub fn resolve_rollout(flag: &FlagDefinition, ctx: &EvaluationContext) -> EvaluationResult {
    let pct = flag.rollout_percentage;

    if pct >= 100 {
        return EvaluationResult::enabled("full rollout (100%)");
    }
    if pct <= 0 {
        return EvaluationResult::disabled("zero rollout (0%)");
    }

    let b = bucket(ctx.subject_id(), &flag.key);
    if i32::from(b) <= pct {
        EvaluationResult::enabled(format!("rollout: bucket {} <= {}%", b, pct))
    } else {
        EvaluationResult::disabled(format!("rollout: bucket {} > {}%", b, pct))
    }
}

/// Weighted (or equal) variant selection for multivariate flags.
///
/// With all weights zero the bucket range is split equally across variants;
/// otherwise selection is proportional to weight. The same bucket drives
/// both modes, so a subject's variant is stable until weights change.
pub fn select_variant(flag: &FlagWithRules, ctx: &EvaluationContext) -> EvaluationResult {
    let variants = &flag.variants;
    if variants.is_empty() {
        return EvaluationResult::enabled("multivariate flag with no variants");
    }

    let b = f64::from(bucket(ctx.subject_id(), &flag.flag.key));
    let total_weight: i64 = variants.iter().map(|v| i64::from(v.weight.max(0))).sum();

    let (variant, mode) = if total_weight == 0 {
        let idx = ((b / 100.0) * variants.len() as f64).floor() as usize;
        (&variants[idx.min(variants.len() - 1)], "equal")
    } else {
        let threshold = b / 100.0 * total_weight as f64;
        let mut cumulative = 0i64;
        let mut chosen = None;
        for v in variants.iter() {
            cumulative += i64::from(v.weight.max(0));
            if cumulative as f64 >= threshold {
                chosen = Some(v);
                break;
            }
        }
        // Floating rounding can leave the threshold above the final
        // cumulative weight; fall back to the first variant.
        (chosen.unwrap_or(&variants[0]), "weighted")
    };

    EvaluationResult {
        enabled: true,
        value: Some(parse_variant_value(&variant.value)),
        variant: Some(variant.key.clone()),
        reason: format!("{} variant selection: {}", mode, variant.key),
    }
}

/// Variant payloads are stored as text; structured payloads are surfaced as
/// JSON, anything unparseable as the raw string.
fn parse_variant_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Full evaluation decision for one flag and context.
///
/// Order: globally-disabled short circuit, targeting, rollout, then
/// type-specific resolution. Every branch sets `reason`; operators debug
/// rollouts from that string, so it is part of the contract.
pub fn evaluate(flag: &FlagWithRules, ctx: &EvaluationContext) -> EvaluationResult {
    if !flag.flag.enabled {
        return EvaluationResult::disabled("flag globally disabled");
    }

    if let Some(result) = resolve_targets(flag, ctx) {
        return with_pinned_value(flag, result);
    }

    let rollout = resolve_rollout(&flag.flag, ctx);
    if !rollout.enabled {
        return rollout;
    }

    match flag.flag.flag_type() {
        FlagType::Boolean => rollout,
        FlagType::Multivariate => select_variant(flag, ctx),
        FlagType::String | FlagType::Number | FlagType::Json => {
            match flag.variants.first() {
                Some(first) => EvaluationResult {
                    enabled: true,
                    value: Some(parse_variant_value(&first.value)),
                    variant: Some(first.key.clone()),
                    reason: format!("default variant: {}", first.key),
                },
                None => rollout,
            }
        }
    }
}

/// Resolve the payload of a variant pinned by a targeting rule.
fn with_pinned_value(flag: &FlagWithRules, mut result: EvaluationResult) -> EvaluationResult {
    if let Some(key) = result.variant.as_deref() {
        if let Some(variant) = flag.variants.iter().find(|v| v.key == key) {
            result.value = Some(parse_variant_value(&variant.value));
        }
    }
    result
}
