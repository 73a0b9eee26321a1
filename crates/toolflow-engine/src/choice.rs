use serde_json::Value;
use tracing::{error, warn};

use toolflow_core::workflow::{ChoiceRule, ChoiceType, ComparisonOperator};

use crate::context::type_name;

/// Evaluate a choice rule against an already-resolved field value.
///
/// Never fails: a missing or unknown operator, a type mismatch, or an
/// unknown rule type all evaluate to `false` with a diagnostic.
pub fn evaluate(rule: &ChoiceRule, field_value: &Value) -> bool {
    if matches!(
        rule.choice_type,
        ChoiceType::StringLength | ChoiceType::NumberCompare
    ) {
        match &rule.operator {
            None => {
                warn!("Missing operator for {} comparison", rule.choice_type);
                return false;
            }
            Some(ComparisonOperator::Unknown(op)) => {
                warn!("Invalid operator: {}", op);
                return false;
            }
            Some(_) => {}
        }
    }

    match &rule.choice_type {
        ChoiceType::StringLength => {
            let Some(text) = expect_string(rule, field_value) else {
                return false;
            };
            let Some(limit) = expect_number(rule) else {
                return false;
            };
            compare(text.chars().count() as f64, limit, rule.operator.as_ref())
        }
        ChoiceType::NumberCompare => {
            let Some(number) = field_value.as_f64() else {
                warn!(
                    "Expected number value for number comparison, got {}",
                    type_name(field_value)
                );
                return false;
            };
            let Some(limit) = expect_number(rule) else {
                return false;
            };
            compare(number, limit, rule.operator.as_ref())
        }
        ChoiceType::StringContains => match string_operands(rule, field_value) {
            Some((haystack, needle)) => haystack.contains(needle),
            None => false,
        },
        ChoiceType::StringEquals => match string_operands(rule, field_value) {
            Some((left, right)) => left == right,
            None => false,
        },
        ChoiceType::ValueExists => !field_value.is_null(),
        ChoiceType::Unknown(name) => {
            error!("Unsupported choice type: {:?}", name);
            false
        }
    }
}

fn compare(a: f64, b: f64, operator: Option<&ComparisonOperator>) -> bool {
    match operator {
        Some(ComparisonOperator::Gt) => a > b,
        Some(ComparisonOperator::Gte) => a >= b,
        Some(ComparisonOperator::Lt) => a < b,
        Some(ComparisonOperator::Lte) => a <= b,
        Some(ComparisonOperator::Eq) => a == b,
        Some(ComparisonOperator::Neq) => a != b,
        Some(ComparisonOperator::Unknown(_)) | None => false,
    }
}

fn expect_string<'a>(rule: &ChoiceRule, field_value: &'a Value) -> Option<&'a str> {
    let text = field_value.as_str();
    if text.is_none() {
        warn!(
            "Expected string value for {} comparison, got {}",
            rule.choice_type,
            type_name(field_value)
        );
    }
    text
}

fn expect_number(rule: &ChoiceRule) -> Option<f64> {
    let number = rule.value.as_ref().and_then(Value::as_f64);
    if number.is_none() {
        warn!(
            "Expected number value for {} comparison, got {}",
            rule.choice_type,
            rule.value.as_ref().map(type_name).unwrap_or("nothing")
        );
    }
    number
}

fn string_operands<'a>(rule: &'a ChoiceRule, field_value: &'a Value) -> Option<(&'a str, &'a str)> {
    let field = expect_string(rule, field_value)?;
    match rule.value.as_ref().and_then(Value::as_str) {
        Some(value) => Some((field, value)),
        None => {
            warn!(
                "Expected string value for {} comparison, got {}",
                rule.choice_type,
                rule.value.as_ref().map(type_name).unwrap_or("nothing")
            );
            None
        }
    }
}
