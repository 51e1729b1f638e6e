//! Flatten projection: a single space-joined string of a node's leaf
//! scalar values, used for full-text containment matching (`=~` against
//! the synthetic `flat` field).
//!
//! Walks object keys and array indices in **source order** — the order
//! `serde_json::Map` iterates them in (this workspace enables
//! `serde_json`'s `preserve_order` feature for exactly this reason).
//! This is deliberately not the sorted order [`crate::hash::content_hash`]
//! uses for canonicalization.

use serde_json::Value as Json;

/// Produce the flatten string for a JSON value.
pub fn flatten(value: &Json) -> String {
    let mut leaves = Vec::new();
    collect_leaves(value, &mut leaves);
    leaves.join(" ")
}

fn collect_leaves(value: &Json, out: &mut Vec<String>) {
    match value {
        Json::Null => {}
        Json::Bool(b) => out.push(b.to_string()),
        Json::Number(n) => out.push(n.to_string()),
        Json::String(s) => out.push(s.clone()),
        Json::Array(items) => {
            for item in items {
                collect_leaves(item, out);
            }
        }
        Json::Object(map) => {
            for value in map.values() {
                collect_leaves(value, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mirrors the source's `test_flatten`: leaves appear in
    /// field-declaration order, not alphabetical order.
    #[test]
    fn flattens_in_insertion_order() {
        let value = serde_json::json!({
            "z_first": "alpha",
            "a_second": "beta",
            "nested": {"m_inner": "gamma"},
            "list": [1, 2]
        });
        assert_eq!(flatten(&value), "alpha beta gamma 1 2");
    }

    #[test]
    fn nulls_are_skipped() {
        let value = serde_json::json!({"a": null, "b": "x"});
        assert_eq!(flatten(&value), "x");
    }
}
