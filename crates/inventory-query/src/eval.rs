//! Term evaluation against a single node's fields.
//!
//! This is the minimal interpreter the deferred-edge resolver
//! needs to turn a `BySearchCriteria` selector into a set of matching
//! node ids: it evaluates a [`Term`] (no navigation, no aggregation —
//! those are handled by the graph layer that walks edges) against one
//! node's `kind`/`reported`/`flat` fields at a time.
//!
//! Kept dependency-free of the graph crate: callers adapt their own node
//! representation into [`NodeFields`] rather than this crate depending on
//! `inventory-graph` (which already depends on this crate for the AST).

use regex::Regex;
use serde_json::Value as Json;

use crate::ast::{ArrayMode, BoolOp, PredicateOp, Term};

/// The subset of a node's data a [`Term`] can be evaluated against.
pub struct NodeFields<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub reported: &'a Json,
    pub flat: &'a str,
}

/// Evaluate `term` against `node`, returning whether it matches.
///
/// `FunctionTerm`s outside the fixed registry (`in_subnet`,
/// `has_desired_change`) never match — they are accepted by the parser
/// but only meaningful against richer node state than this minimal
/// evaluator has (e.g. `has_desired_change` needs the node's `desired`
/// section, not modeled here).
pub fn evaluate_term(term: &Term, node: &NodeFields) -> bool {
    match term {
        Term::AllTerm => true,
        Term::IsTerm { kinds } => kinds.iter().any(|k| k == node.kind),
        Term::IdTerm { id } => id == node.id,
        Term::Predicate {
            name,
            op,
            value,
            array_mode,
            ..
        } => evaluate_predicate(name, *op, value, *array_mode, node),
        Term::FunctionTerm { func, arg, args } => evaluate_function(func, arg, args, node),
        Term::CombinedTerm { left, op, right } => match op {
            BoolOp::And => evaluate_term(left, node) && evaluate_term(right, node),
            BoolOp::Or => evaluate_term(left, node) || evaluate_term(right, node),
        },
    }
}

fn lookup_path<'a>(path: &str, reported: &'a Json) -> Option<&'a Json> {
    // Paths are scoped with a leading section (`reported.foo`); an
    // unscoped path is looked up directly against the value passed in.
    let trimmed = path
        .strip_prefix("reported.")
        .or_else(|| path.strip_prefix("desired."))
        .or_else(|| path.strip_prefix("metadata."))
        .unwrap_or(path);
    let mut current = reported;
    for segment in trimmed.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn evaluate_predicate(
    name: &str,
    op: PredicateOp,
    value: &Json,
    array_mode: Option<ArrayMode>,
    node: &NodeFields,
) -> bool {
    let Some(found) = lookup_path(name, node.reported) else {
        return false;
    };
    match (array_mode, found.as_array()) {
        (Some(mode), Some(items)) => {
            let results: Vec<bool> = items.iter().map(|v| compare(v, op, value)).collect();
            match mode {
                ArrayMode::ForAll => !results.is_empty() && results.iter().all(|b| *b),
                ArrayMode::ForAny => results.iter().any(|b| *b),
                ArrayMode::ForNone => results.iter().all(|b| !*b),
            }
        }
        _ => compare(found, op, value),
    }
}

fn compare(found: &Json, op: PredicateOp, value: &Json) -> bool {
    match op {
        PredicateOp::Eq => found == value,
        PredicateOp::Ne => found != value,
        PredicateOp::Le | PredicateOp::Ge | PredicateOp::Gt | PredicateOp::Lt => {
            match (found.as_f64(), value.as_f64()) {
                (Some(a), Some(b)) => match op {
                    PredicateOp::Le => a <= b,
                    PredicateOp::Ge => a >= b,
                    PredicateOp::Gt => a > b,
                    PredicateOp::Lt => a < b,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
        PredicateOp::Regex | PredicateOp::NotRegex => {
            let (Some(hay), Some(pat)) = (found.as_str(), value.as_str()) else {
                return false;
            };
            let matched = Regex::new(pat).map(|re| re.is_match(hay)).unwrap_or(false);
            if op == PredicateOp::Regex {
                matched
            } else {
                !matched
            }
        }
        PredicateOp::In | PredicateOp::NotIn => {
            let contained = value.as_array().map(|items| items.contains(found)).unwrap_or(false);
            if op == PredicateOp::In {
                contained
            } else {
                !contained
            }
        }
    }
}

fn evaluate_function(func: &str, arg: &str, args: &[Json], node: &NodeFields) -> bool {
    match func {
        "has_desired_change" => false,
        "in_subnet" => {
            let Some(Json::String(cidr)) = args.first() else {
                return false;
            };
            let Some(found) = lookup_path(arg, node.reported).and_then(Json::as_str) else {
                return false;
            };
            in_subnet(found, cidr)
        }
        _ => false,
    }
}

/// Minimal IPv4 CIDR containment check (`a.b.c.d` in `a.b.c.d/n`).
fn in_subnet(ip: &str, cidr: &str) -> bool {
    let Some((base, prefix_len)) = cidr.split_once('/') else {
        return false;
    };
    let (Some(ip), Some(base), Ok(prefix_len)) = (
        parse_ipv4(ip),
        parse_ipv4(base),
        prefix_len.parse::<u32>(),
    ) else {
        return false;
    };
    if prefix_len > 32 {
        return false;
    }
    let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
    (ip & mask) == (base & mask)
}

fn parse_ipv4(s: &str) -> Option<u32> {
    let mut octets = [0u8; 4];
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    for (i, part) in parts.iter().enumerate() {
        octets[i] = part.parse().ok()?;
    }
    Some(u32::from_be_bytes(octets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;

    fn fields<'a>(kind: &'a str, reported: &'a Json) -> NodeFields<'a> {
        NodeFields {
            id: "n1",
            kind,
            reported,
            flat: "",
        }
    }

    #[test]
    fn is_term_matches_kind() {
        let q = parse_query("is(bla)").unwrap();
        let reported = serde_json::json!({});
        assert!(evaluate_term(&q.first_part().unwrap().term, &fields("bla", &reported)));
        assert!(!evaluate_term(&q.first_part().unwrap().term, &fields("foo", &reported)));
    }

    #[test]
    fn predicate_compares_nested_path() {
        let q = parse_query("reported.cores > 2").unwrap();
        let reported = serde_json::json!({"cores": 4});
        assert!(evaluate_term(&q.first_part().unwrap().term, &fields("k", &reported)));
        let reported = serde_json::json!({"cores": 1});
        assert!(!evaluate_term(&q.first_part().unwrap().term, &fields("k", &reported)));
    }

    #[test]
    fn combined_and_or_short_circuit_correctly() {
        let q = parse_query("is(k) and reported.a == 1").unwrap();
        let reported = serde_json::json!({"a": 1});
        assert!(evaluate_term(&q.first_part().unwrap().term, &fields("k", &reported)));
        let reported = serde_json::json!({"a": 2});
        assert!(!evaluate_term(&q.first_part().unwrap().term, &fields("k", &reported)));
    }

    #[test]
    fn in_subnet_matches_cidr_containment() {
        assert!(in_subnet("10.1.2.3", "10.0.0.0/8"));
        assert!(!in_subnet("11.1.2.3", "10.0.0.0/8"));
    }
}
