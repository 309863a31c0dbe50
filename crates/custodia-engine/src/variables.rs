//! `{{ … }}` expression substitution and condition evaluation.
//!
//! Expressions are dotted paths (with `[index]` steps) resolved against
//! the evaluation context. A string that is exactly one expression
//! substitutes to the referenced JSON value — so a condition key can
//! become a number or list — while embedded expressions interpolate as
//! text. Rule substitution deliberately skips attestation clauses: their
//! conditions reference statement fields that only enter the context
//! later, per statement.

use serde_json::Value;

use custodia_policy::attestation::{AnyAllConditions, Condition, ConditionOperator};
use custodia_policy::rule::Rule;

use crate::context::EvalContext;
use crate::error::EngineError;
use crate::verifier::Statement;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Substitute every expression in a JSON tree.
pub fn substitute_all(ctx: &EvalContext, value: &Value) -> Result<Value, EngineError> {
    match value {
        Value::String(s) => substitute_string(ctx, s),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute_all(ctx, item))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), substitute_all(ctx, item)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Substitute a rule, leaving attestation clauses untouched.
///
/// The input rule is never mutated: a clone is substituted with its
/// attestations removed, then the original attestations are placed back
/// onto the copy. Their conditions are substituted later, per statement,
/// once the statement's predicate is in context.
pub fn substitute_rule(ctx: &EvalContext, rule: &Rule) -> Result<Rule, EngineError> {
    let mut stripped = rule.clone();
    for clause in &mut stripped.verify_images {
        clause.attestations = Vec::new();
    }

    let substituted = substitute_all(ctx, &serde_json::to_value(&stripped)?)?;
    let mut out: Rule = serde_json::from_value(substituted)?;

    for (clause, original) in out.verify_images.iter_mut().zip(&rule.verify_images) {
        clause.attestations = original.attestations.clone();
    }

    Ok(out)
}

/// Substitute expressions across condition blocks.
pub fn substitute_conditions(
    ctx: &EvalContext,
    conditions: &[AnyAllConditions],
) -> Result<Vec<AnyAllConditions>, EngineError> {
    let substituted = substitute_all(ctx, &serde_json::to_value(conditions)?)?;
    Ok(serde_json::from_value(substituted)?)
}

/// Evaluate condition blocks; the list is conjunctive, `any` needs one
/// inner condition to hold (vacuously true when empty), `all` needs every
/// one. Conditions must already be substituted.
#[must_use]
pub fn evaluate_any_all_conditions(conditions: &[AnyAllConditions]) -> bool {
    conditions.iter().all(|block| {
        let any_ok = block.any.is_empty() || block.any.iter().any(check_condition);
        let all_ok = block.all.iter().all(check_condition);
        any_ok && all_ok
    })
}

/// Evaluate an attestation's conditions against one in-toto statement.
///
/// Adds the statement's `predicate` object to the context, substitutes
/// the conditions with it in scope, and evaluates them. The caller is
/// responsible for checkpointing the context around this call so the
/// statement bindings do not leak.
pub fn evaluate_statement_conditions(
    ctx: &mut EvalContext,
    conditions: &[AnyAllConditions],
    statement: &Statement,
) -> Result<bool, EngineError> {
    if conditions.is_empty() {
        return Ok(true);
    }

    if !statement.predicate.is_object() {
        return Err(EngineError::ConditionEval(format!(
            "failed to extract predicate from statement with predicate type `{}`",
            statement.predicate_type
        )));
    }
    ctx.add_json_object(&statement.predicate)?;

    let substituted = substitute_conditions(ctx, conditions)?;
    Ok(evaluate_any_all_conditions(&substituted))
}

/// Substitute expressions in one string.
fn substitute_string(ctx: &EvalContext, s: &str) -> Result<Value, EngineError> {
    if !s.contains(OPEN) {
        return Ok(Value::String(s.to_owned()));
    }

    // A string that is exactly one expression becomes the referenced
    // value, preserving its JSON type.
    let trimmed = s.trim();
    if trimmed.starts_with(OPEN) && trimmed.ends_with(CLOSE) && trimmed.matches(OPEN).count() == 1
    {
        let expr = trimmed[OPEN.len()..trimmed.len() - CLOSE.len()].trim();
        return resolve(ctx, expr);
    }

    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            return Err(EngineError::UnresolvedVariable(format!(
                "unterminated expression in `{s}`"
            )));
        };
        let expr = after[..end].trim();
        match resolve(ctx, expr)? {
            Value::String(text) => out.push_str(&text),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn resolve(ctx: &EvalContext, expr: &str) -> Result<Value, EngineError> {
    ctx.query(expr)
        .ok_or_else(|| EngineError::UnresolvedVariable(expr.to_owned()))
}

/// Evaluate one substituted condition.
fn check_condition(condition: &Condition) -> bool {
    let key = &condition.key;
    let value = &condition.value;
    match condition.operator {
        ConditionOperator::Equals => json_equals(key, value),
        ConditionOperator::NotEquals => !json_equals(key, value),
        ConditionOperator::In | ConditionOperator::AllIn => all_in(key, value),
        ConditionOperator::AnyIn => any_in(key, value),
        ConditionOperator::NotIn => !all_in(key, value),
        ConditionOperator::GreaterThan => compare(key, value, |ordering| ordering.is_gt()),
        ConditionOperator::GreaterThanOrEquals => compare(key, value, |ordering| ordering.is_ge()),
        ConditionOperator::LessThan => compare(key, value, |ordering| ordering.is_lt()),
        ConditionOperator::LessThanOrEquals => compare(key, value, |ordering| ordering.is_le()),
    }
}

/// JSON equality with numeric coercion across integer/float forms.
fn json_equals(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn member_of(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| json_equals(needle, item)),
        _ => json_equals(needle, haystack),
    }
}

/// Scalar key: membership. List key: every element is a member.
fn all_in(key: &Value, value: &Value) -> bool {
    match key {
        Value::Array(items) => items.iter().all(|item| member_of(item, value)),
        scalar => member_of(scalar, value),
    }
}

/// Scalar key: membership. List key: at least one element is a member.
fn any_in(key: &Value, value: &Value) -> bool {
    match key {
        Value::Array(items) => items.iter().any(|item| member_of(item, value)),
        scalar => member_of(scalar, value),
    }
}

fn compare(key: &Value, value: &Value, test: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match (as_number(key), as_number(value)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).is_some_and(test),
        _ => false,
    }
}
