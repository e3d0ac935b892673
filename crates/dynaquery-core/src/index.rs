//! Index selection over resolved conditions.
//!
//! Candidates are walked primary-first in declaration order. An index is
//! eligible only when the conditions carry an equality on its partition
//! key; full coverage additionally matches the sort key with a
//! key-eligible operator. The first fully covered candidate wins
//! outright, otherwise the first partition-covered one, otherwise `None`
//! and the caller falls back to a scan. Selection never errors.

use dynaquery_model::{ConditionOperator, IndexSchema, KeySchema};
use tracing::debug;

use crate::expression::ResolvedCondition;
use crate::schema::SchemaDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    None,
    PartitionOnly,
    Full,
}

/// Picks the best index for the given conditions, or `None` for a scan.
#[must_use]
pub fn select_index<'a>(
    conditions: &[ResolvedCondition],
    schema: &'a SchemaDescriptor,
) -> Option<&'a IndexSchema> {
    let mut fallback: Option<&IndexSchema> = None;
    for candidate in schema.candidate_indexes() {
        match coverage(conditions, &candidate.key_schema) {
            Coverage::Full => {
                debug!(
                    index = candidate.name.as_str(),
                    "selected index with full key coverage"
                );
                return Some(candidate);
            }
            Coverage::PartitionOnly => {
                if fallback.is_none() {
                    fallback = Some(candidate);
                }
            }
            Coverage::None => {}
        }
    }
    match fallback {
        Some(candidate) => {
            debug!(
                index = candidate.name.as_str(),
                "selected index on partition key only"
            );
            Some(candidate)
        }
        None => {
            debug!("no index covers the conditions, falling back to scan");
            None
        }
    }
}

fn coverage(conditions: &[ResolvedCondition], key_schema: &KeySchema) -> Coverage {
    let partition_matched = conditions.iter().any(|c| {
        c.operator == ConditionOperator::Eq && c.wire_name == key_schema.partition_key
    });
    if !partition_matched {
        return Coverage::None;
    }
    match &key_schema.sort_key {
        None => Coverage::Full,
        Some(sort_key) => {
            let sort_matched = conditions
                .iter()
                .any(|c| c.operator.key_eligible() && &c.wire_name == sort_key);
            if sort_matched {
                Coverage::Full
            } else {
                Coverage::PartitionOnly
            }
        }
    }
}
