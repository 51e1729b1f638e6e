//! Pretty-printer: the left inverse of [`crate::parser::parse_query`].
//!
//! `parse_query(&render_query(&q)) == q` for every query `q` produced by
//! the parser — tested below by round-tripping a handful of
//! representative queries.

use std::fmt::Write as _;

use crate::ast::*;

/// Render a query back to its surface DSL syntax.
pub fn render_query(query: &Query) -> String {
    let mut out = String::new();
    render_preamble(query, &mut out);

    let mut parts_in_order: Vec<&Part> = query.parts.iter().collect();
    parts_in_order.reverse();
    for (idx, part) in parts_in_order.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        render_term(&part.term, &mut out, false);
        if part.pinned {
            out.push('+');
        }
        if let Some(nav) = &part.navigation {
            out.push(' ');
            render_navigation(nav, &mut out);
            out.push(' ');
        }
    }

    if !query.sort.is_empty() {
        out.push_str(" sort ");
        for (i, s) in query.sort.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{} {}", s.name, if s.order == SortOrder::Desc { "desc" } else { "asc" });
        }
    }
    if let Some(limit) = query.limit {
        let _ = write!(out, " limit {}", limit.0);
    }
    out
}

fn render_preamble(query: &Query, out: &mut String) {
    if let Some(agg) = &query.aggregate {
        out.push_str("aggregate(");
        for (i, v) in agg.group_vars.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&v.name);
            if let Some(as_name) = &v.as_name {
                let _ = write!(out, " as {as_name}");
            }
        }
        out.push_str(": ");
        for (i, f) in agg.functions.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            render_aggregate_function(f, out);
        }
        out.push_str("): ");
        return;
    }
    if !query.preamble.is_empty() {
        out.push('(');
        for (i, (k, v)) in query.preamble.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let value = match v {
                Scalar::String(s) => s.clone(),
                Scalar::Number(n) => n.to_string(),
                Scalar::Bool(b) => b.to_string(),
            };
            let _ = write!(out, "{k}={value}");
        }
        out.push_str("): ");
    }
}

fn render_aggregate_function(f: &AggregateFunction, out: &mut String) {
    out.push_str(&f.func);
    out.push('(');
    match &f.source {
        AggregateSource::Variable(name) => out.push_str(name),
        AggregateSource::Constant(n) => {
            let _ = write!(out, "{n}");
        }
    }
    for (op, value) in &f.ops {
        let _ = write!(out, " {} {value}", op.as_str());
    }
    out.push(')');
    if let Some(as_name) = &f.as_name {
        let _ = write!(out, " as {as_name}");
    }
}

/// Render a term, wrapping it in parentheses when it is a [`Term::CombinedTerm`]
/// nested inside another combined term of different precedence — mirrors
/// how the parser's `and`/`or` precedence requires disambiguation on the
/// way back out.
fn render_term(term: &Term, out: &mut String, parens_if_combined: bool) {
    match term {
        Term::AllTerm => out.push_str("all"),
        Term::IsTerm { kinds } => {
            let quoted: Vec<String> = kinds.iter().map(|k| format!("\"{k}\"")).collect();
            let _ = write!(out, "is({})", quoted.join(", "));
        }
        Term::IdTerm { id } => {
            let _ = write!(out, "id(\"{id}\")");
        }
        Term::Predicate {
            name,
            op,
            value,
            array_mode,
            ..
        } => {
            if let Some(mode) = array_mode {
                let _ = write!(out, "{}.", mode.prefix());
            }
            let _ = write!(out, "{name} {} {}", op.as_str(), render_json_value(value));
        }
        Term::FunctionTerm { func, arg, args } => {
            out.push_str(func);
            out.push('(');
            out.push_str(arg);
            for a in args {
                out.push_str(", ");
                out.push_str(&render_json_value(a));
            }
            out.push(')');
        }
        Term::CombinedTerm { left, op, right } => {
            if parens_if_combined {
                out.push('(');
            }
            render_term(left, out, matches!(**left, Term::CombinedTerm { .. }));
            let _ = write!(out, " {} ", op.as_str());
            render_term(right, out, matches!(**right, Term::CombinedTerm { .. }));
            if parens_if_combined {
                out.push(')');
            }
        }
    }
}

fn render_json_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

fn render_navigation(nav: &Navigation, out: &mut String) {
    let open = if nav.direction == Direction::In { "<-" } else { "-" };
    let close = if nav.direction == Direction::Out { "->" } else { "-" };
    out.push_str(open);
    if let Some(et) = &nav.edge_type {
        out.push_str(et);
    }
    if (nav.min_hops, nav.max_hops) != Navigation::default_range() {
        out.push('[');
        let _ = write!(out, "{}", nav.min_hops);
        out.push(':');
        if nav.max_hops != MAX_HOPS {
            let _ = write!(out, "{}", nav.max_hops);
        }
        out.push(']');
    }
    out.push_str(close);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;

    fn roundtrip(src: &str) {
        let q = parse_query(src).unwrap();
        let rendered = render_query(&q);
        let reparsed = parse_query(&rendered).unwrap();
        assert_eq!(q, reparsed, "roundtrip mismatch: {src:?} -> {rendered:?}");
    }

    #[test]
    fn roundtrips_simple_is_term() {
        roundtrip("is(instance)");
    }

    #[test]
    fn roundtrips_predicate_with_and() {
        roundtrip("is(instance) and reported.cores > 2");
    }

    #[test]
    fn roundtrips_navigation_chain() {
        roundtrip("is(instance) -default[1:]-> is(volume)");
    }

    #[test]
    fn roundtrips_sort_and_limit() {
        roundtrip("all sort reported.name desc limit 10");
    }

    #[test]
    fn roundtrips_kv_preamble() {
        roundtrip("(edge_type=delete): is(instance)");
    }
}
