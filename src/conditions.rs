//! Declarative predicates over request context
//!
//! Prompt modifiers are selected by evaluating a `Condition` tree against the
//! generation context. Conditions are plain data (TOML/JSON), never compiled code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Exists { field: String },
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: f64 },
    Gte { field: String, value: f64 },
    Lt { field: String, value: f64 },
    Lte { field: String, value: f64 },
    /// Substring for strings, membership for arrays
    Contains { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Condition::Always => true,
            Condition::Exists { field } => lookup(context, field).is_some_and(|v| !v.is_null()),
            Condition::Eq { field, value } => {
                lookup(context, field).is_some_and(|v| values_equal(v, value))
            }
            Condition::Ne { field, value } => {
                lookup(context, field).is_some_and(|v| !values_equal(v, value))
            }
            Condition::Gt { field, value } => compare(context, field, |n| n > *value),
            Condition::Gte { field, value } => compare(context, field, |n| n >= *value),
            Condition::Lt { field, value } => compare(context, field, |n| n < *value),
            Condition::Lte { field, value } => compare(context, field, |n| n <= *value),
            Condition::Contains { field, value } => match lookup(context, field) {
                Some(Value::String(s)) => value.as_str().is_some_and(|needle| s.contains(needle)),
                Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, value)),
                _ => false,
            },
            Condition::In { field, values } => lookup(context, field)
                .is_some_and(|v| values.iter().any(|candidate| values_equal(v, candidate))),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(context)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(context)),
            Condition::Not { condition } => !condition.evaluate(context),
        }
    }
}

/// An instruction appended to a generation prompt when its condition holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptModifier {
    pub name: String,
    pub condition: Condition,
    pub instruction: String,
}

/// Modifiers whose condition matches `context`, in declaration order
pub fn matching_modifiers<'a>(
    modifiers: &'a [PromptModifier],
    context: &Value,
) -> Vec<&'a PromptModifier> {
    modifiers
        .iter()
        .filter(|m| m.condition.evaluate(context))
        .collect()
}

/// Resolve a dotted path (`learner.profile.level`); numeric segments index arrays
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(context, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_number(a) == as_number(b),
        _ => a == b,
    }
}

fn compare(context: &Value, field: &str, pred: impl Fn(f64) -> bool) -> bool {
    lookup(context, field).and_then(as_number).is_some_and(pred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "audience": "executive",
            "score": 72,
            "tags": ["finance", "quarterly"],
            "learner": { "level": "senior", "years": "7" },
            "notes": "needs a concise summary"
        })
    }

    fn holds(condition: Value) -> bool {
        serde_json::from_value::<Condition>(condition)
            .unwrap()
            .evaluate(&ctx())
    }

    #[test]
    fn simple_comparisons() {
        assert!(holds(json!({"op": "eq", "field": "audience", "value": "executive"})));
        assert!(!holds(json!({"op": "eq", "field": "audience", "value": "staff"})));
        assert!(holds(json!({"op": "gt", "field": "score", "value": 70})));
        assert!(holds(json!({"op": "lte", "field": "score", "value": 72})));
        assert!(holds(json!({"op": "gte", "field": "learner.years", "value": 5})));
        assert!(holds(json!({"op": "ne", "field": "audience", "value": "staff"})));
    }

    #[test]
    fn missing_fields_are_false() {
        assert!(!holds(json!({"op": "exists", "field": "nope"})));
        assert!(!holds(json!({"op": "gt", "field": "nope", "value": 0})));
        assert!(!holds(json!({"op": "ne", "field": "nope", "value": 1})));
        let negated = Condition::Not {
            condition: Box::new(Condition::Exists {
                field: "nope".into(),
            }),
        };
        assert!(negated.evaluate(&ctx()));
    }

    #[test]
    fn contains_and_membership() {
        assert!(holds(json!({"op": "contains", "field": "tags", "value": "finance"})));
        assert!(holds(json!({"op": "contains", "field": "notes", "value": "concise"})));
        assert!(holds(json!({
            "op": "in",
            "field": "learner.level",
            "values": ["junior", "senior"]
        })));
        assert!(holds(json!({"op": "eq", "field": "tags.1", "value": "quarterly"})));
    }

    #[test]
    fn combinators_and_serde_shape() {
        let cond: Condition = serde_json::from_value(json!({
            "op": "all",
            "conditions": [
                { "op": "eq", "field": "audience", "value": "executive" },
                { "op": "any", "conditions": [
                    { "op": "lt", "field": "score", "value": 50 },
                    { "op": "exists", "field": "learner.level" }
                ]}
            ]
        }))
        .unwrap();
        assert!(cond.evaluate(&ctx()));
        assert!(!cond.evaluate(&json!({ "audience": "executive" })));
    }

    #[test]
    fn matching_modifiers_keeps_order() {
        let modifiers = vec![
            PromptModifier {
                name: "always".into(),
                condition: Condition::Always,
                instruction: "Be accurate.".into(),
            },
            PromptModifier {
                name: "staff".into(),
                condition: Condition::Eq {
                    field: "audience".into(),
                    value: json!("staff"),
                },
                instruction: "Use plain language.".into(),
            },
            PromptModifier {
                name: "exec".into(),
                condition: Condition::Eq {
                    field: "audience".into(),
                    value: json!("executive"),
                },
                instruction: "Lead with the conclusion.".into(),
            },
        ];
        let names: Vec<_> = matching_modifiers(&modifiers, &ctx())
            .into_iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["always", "exec"]);
    }
}
