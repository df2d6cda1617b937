//! Pure merge functions for combining a `GraphState` with a `GraphStateDelta`.
//!
//! Each node in the graph returns a delta rather than mutating shared state
//! in place; the engine applies the delta through these reducers. Keeping
//! the merge functions free-standing (rather than inlined into
//! `GraphState::merge`) makes each one independently testable and documents
//! which merge strategy backs which kind of field.

use serde_json::{Map, Value};

/// Concatenates two append-only sequences, left before right. Used for
/// `messages`, `agent_history`, and the routing/intent history logs.
#[must_use]
pub fn concat_append<T>(mut left: Vec<T>, right: Vec<T>) -> Vec<T> {
    left.extend(right);
    left
}

/// Shallow union of two JSON objects with right-hand precedence, used for
/// `retrieved_data` and the merged conversation-context mapping. Non-object
/// inputs are treated as empty objects rather than panicking, since a
/// worker emitting a non-object delta for one of these fields is a worker
/// bug the engine should tolerate, not crash on.
#[must_use]
pub fn shallow_union_right_wins(left: Value, right: Value) -> Value {
    let mut merged = left.as_object().cloned().unwrap_or_default();
    if let Some(right_obj) = right.as_object() {
        for (key, value) in right_obj {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Keeps the right value if present, otherwise the left. Used for
/// `next_agent` and the generic `response_type` interactive-response
/// extension point, so a node that doesn't set the field never erases a
/// value set by an earlier node in the same turn.
#[must_use]
pub fn last_non_null_wins<T>(left: Option<T>, right: Option<T>) -> Option<T> {
    right.or(left)
}

/// Plain last-write-wins for scalars with no special merge semantics.
#[must_use]
pub fn last_write_wins<T>(left: T, right: Option<T>) -> T {
    right.unwrap_or(left)
}

/// Deduplicating union of two key sets, used for the intent cache's
/// per-turn `cache_keys` bookkeeping.
#[must_use]
pub fn union_dedup(left: Vec<String>, right: Vec<String>) -> Vec<String> {
    let mut set: std::collections::BTreeSet<String> = left.into_iter().collect();
    set.extend(right);
    set.into_iter().collect()
}

/// Merges two JSON objects with right-hand precedence only when `right` is
/// non-empty, matching `update_conversation_context`'s "merge if truthy
/// else left" rule rather than the plain shallow union above.
#[must_use]
pub fn merge_if_present(left: Map<String, Value>, right: Map<String, Value>) -> Map<String, Value> {
    if right.is_empty() {
        return left;
    }
    let mut merged = left;
    for (key, value) in right {
        merged.insert(key, value);
    }
    merged
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::collection::{hash_map, vec};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn concat_append_length_is_additive(left in vec(any::<i32>(), 0..10), right in vec(any::<i32>(), 0..10)) {
            let left_len = left.len();
            let right_len = right.len();
            let result = concat_append(left, right);
            prop_assert_eq!(result.len(), left_len + right_len);
        }

        #[test]
        fn concat_append_preserves_left_then_right_order(left in vec(any::<i32>(), 0..10), right in vec(any::<i32>(), 0..10)) {
            let expected: Vec<i32> = left.iter().copied().chain(right.iter().copied()).collect();
            prop_assert_eq!(concat_append(left, right), expected);
        }

        #[test]
        fn last_non_null_wins_is_right_when_right_present(left in any::<Option<i32>>(), right in any::<i32>()) {
            prop_assert_eq!(last_non_null_wins(left, Some(right)), Some(right));
        }

        #[test]
        fn last_non_null_wins_falls_back_to_left_when_right_absent(left in any::<Option<i32>>()) {
            prop_assert_eq!(last_non_null_wins(left, None), left);
        }

        #[test]
        fn union_dedup_contains_every_distinct_element(
            left in vec("[a-c]", 0..6),
            right in vec("[a-c]", 0..6),
        ) {
            let mut expected: std::collections::BTreeSet<String> = left.iter().cloned().collect();
            expected.extend(right.iter().cloned());
            let result = union_dedup(left, right);
            let result_set: std::collections::BTreeSet<String> = result.iter().cloned().collect();
            prop_assert_eq!(result.len(), result_set.len());
            prop_assert_eq!(result_set, expected);
        }

        #[test]
        fn shallow_union_right_wins_keeps_every_right_key_with_rights_value(
            left in hash_map("[a-c]", any::<i32>(), 0..4),
            right in hash_map("[a-c]", any::<i32>(), 0..4),
        ) {
            let left_value = Value::Object(left.into_iter().map(|(k, v)| (k, Value::from(v))).collect());
            let right_map: Map<String, Value> = right.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
            let merged = shallow_union_right_wins(left_value, Value::Object(right_map.clone()));
            let merged_obj = merged.as_object().expect("result is always an object");
            for (key, value) in &right_map {
                prop_assert_eq!(merged_obj.get(key), Some(value));
            }
        }

        #[test]
        fn merge_if_present_is_identity_when_right_empty(left in hash_map("[a-c]", any::<i32>(), 0..4)) {
            let left_map: Map<String, Value> = left.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
            let merged = merge_if_present(left_map.clone(), Map::new());
            prop_assert_eq!(merged, left_map);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concat_append_preserves_order() {
        assert_eq!(concat_append(vec![1, 2], vec![3, 4]), vec![1, 2, 3, 4]);
    }

    #[test]
    fn shallow_union_right_wins_overrides_shared_keys() {
        let left = json!({"a": 1, "b": 2});
        let right = json!({"b": 3, "c": 4});
        assert_eq!(
            shallow_union_right_wins(left, right),
            json!({"a": 1, "b": 3, "c": 4})
        );
    }

    #[test]
    fn shallow_union_right_wins_tolerates_non_object_input() {
        assert_eq!(
            shallow_union_right_wins(Value::Null, json!({"a": 1})),
            json!({"a": 1})
        );
    }

    #[test]
    fn last_non_null_wins_prefers_right() {
        assert_eq!(last_non_null_wins(Some("orchestrator"), Some("worker")), Some("worker"));
        assert_eq!(last_non_null_wins(Some("orchestrator"), None), Some("orchestrator"));
        assert_eq!(last_non_null_wins::<&str>(None, None), None);
    }

    #[test]
    fn union_dedup_removes_duplicates() {
        let mut result = union_dedup(
            vec!["a".to_string(), "b".to_string()],
            vec!["b".to_string(), "c".to_string()],
        );
        result.sort();
        assert_eq!(result, vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_if_present_keeps_left_when_right_empty() {
        let left: Map<String, Value> = json!({"a": 1}).as_object().unwrap().clone();
        let right: Map<String, Value> = Map::new();
        assert_eq!(merge_if_present(left.clone(), right), left);
    }
}
