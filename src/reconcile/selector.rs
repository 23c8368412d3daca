//! Node Selector
//!
//! Label predicate deciding whether a rule applies to this node.

use crate::model::{ResourceRule, SelectorOperator};
use std::collections::BTreeMap;
use tracing::warn;

/// Evaluate one selector against the node's labels
pub fn matches(
    operator: &SelectorOperator,
    key: &str,
    value: &str,
    labels: &BTreeMap<String, String>,
) -> bool {
    match operator {
        SelectorOperator::In => labels.get(key).is_some_and(|v| v == value),
        SelectorOperator::NotIn => !labels.get(key).is_some_and(|v| v == value),
        SelectorOperator::Exists => labels.contains_key(key),
        SelectorOperator::DoesNotExist => !labels.contains_key(key),
        SelectorOperator::Unknown(op) => {
            warn!("Unsupported selector operator '{}' for key {}", op, key);
            false
        }
    }
}

pub fn rule_matches(rule: &ResourceRule, labels: &BTreeMap<String, String>) -> bool {
    let s = &rule.selector;
    matches(&s.operator, &s.key, &s.value, labels)
}
