//! `Query::combine` — stitching two independently parsed queries into one
//! — and `on_section`, which rewrites a query's property paths onto a
//! named section of a node (`reported`, `desired`, `metadata`).

use inventory_core::Error;

use crate::ast::*;

impl Query {
    /// Combine this query with `other`, as if `other`'s parts came right
    /// after this query's in one larger navigation chain.
    ///
    /// When this query's last part (textually) has no navigation, the two
    /// queries are joined at that point by `and`-ing the terms together
    /// rather than introducing an implicit hop. Sorts are concatenated,
    /// limits take the smaller of the two (the tighter bound), and two
    /// incompatible aggregate clauses are rejected.
    pub fn combine(self, other: Query) -> Result<Query, Error> {
        if self.aggregate.is_some() || other.aggregate.is_some() {
            return Err(Error::InvalidQuery(
                "cannot combine a query that defines an aggregate clause".into(),
            ));
        }

        let mut self_parts = self.parts;
        let other_parts = other.parts;

        let join_by_and = self_parts
            .first()
            .map(|p| p.navigation.is_none())
            .unwrap_or(false);

        if join_by_and && !other_parts.is_empty() {
            // self_parts[0] is the last-evaluated (right-most) part of
            // `self`; other_parts.last() is the first-evaluated
            // (left-most) part of `other`. Fuse them into a single part.
            let mut other_parts = other_parts;
            let joined_tail = other_parts.remove(other_parts.len() - 1);
            let head = self_parts.remove(0);
            let fused_term = head.term.and(joined_tail.term);
            let fused = Part {
                term: fused_term,
                pinned: head.pinned || joined_tail.pinned,
                navigation: joined_tail.navigation,
            };
            self_parts.insert(0, fused);
            self_parts.splice(0..0, other_parts);
        } else {
            self_parts.splice(0..0, other_parts);
        }

        let mut sort = self.sort;
        sort.extend(other.sort);

        let limit = match (self.limit, other.limit) {
            (Some(a), Some(b)) => Some(Limit(a.0.min(b.0))),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        let mut preamble = self.preamble;
        preamble.extend(other.preamble);

        Ok(Query {
            parts: self_parts,
            preamble,
            aggregate: self.aggregate.or(other.aggregate),
            sort,
            limit,
        })
    }

    /// Rewrite every property path in this query onto `section`, e.g.
    /// turning `instance_type` into `reported.instance_type`. A path that
    /// is already absolute (starts with `/`) is left untouched.
    pub fn on_section(mut self, section: &str) -> Query {
        for part in &mut self.parts {
            part.term = rewrite_term(std::mem::replace(&mut part.term, Term::AllTerm), section);
        }
        for sort in &mut self.sort {
            sort.name = rewrite_path(&sort.name, section);
        }
        if let Some(agg) = &mut self.aggregate {
            for var in &mut agg.group_vars {
                var.name = rewrite_path(&var.name, section);
            }
            for func in &mut agg.functions {
                if let AggregateSource::Variable(name) = &mut func.source {
                    *name = rewrite_path(name, section);
                }
            }
        }
        self
    }
}

fn rewrite_term(term: Term, section: &str) -> Term {
    match term {
        Term::Predicate {
            name,
            op,
            value,
            array_mode,
            args,
        } => Term::Predicate {
            name: rewrite_path(&name, section),
            op,
            value,
            array_mode,
            args,
        },
        Term::FunctionTerm { func, arg, args } => Term::FunctionTerm {
            func,
            arg: rewrite_path(&arg, section),
            args,
        },
        Term::CombinedTerm { left, op, right } => Term::CombinedTerm {
            left: Box::new(rewrite_term(*left, section)),
            op,
            right: Box::new(rewrite_term(*right, section)),
        },
        other => other,
    }
}

fn rewrite_path(path: &str, section: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{section}.{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;

    #[test]
    fn combine_ands_terms_when_no_navigation() {
        let a = parse_query("is(instance)").unwrap();
        let b = parse_query("reported.cores > 2").unwrap();
        let combined = a.combine(b).unwrap();
        assert_eq!(combined.parts.len(), 1);
        assert!(matches!(
            combined.first_part().unwrap().term,
            Term::CombinedTerm { op: BoolOp::And, .. }
        ));
    }

    #[test]
    fn combine_chains_through_navigation() {
        let a = parse_query("is(instance) -default-> is(volume)").unwrap();
        let b = parse_query("is(volume_type)").unwrap();
        let combined = a.combine(b).unwrap();
        assert_eq!(combined.parts.len(), 2);
    }

    #[test]
    fn combine_takes_tighter_limit() {
        let a = parse_query("all limit 50").unwrap();
        let b = parse_query("all limit 5").unwrap();
        let combined = a.combine(b).unwrap();
        assert_eq!(combined.limit, Some(Limit(5)));
    }

    #[test]
    fn combine_rejects_two_aggregates() {
        let a = parse_query("aggregate(reported.kind: sum(1)): all").unwrap();
        let b = parse_query("aggregate(reported.kind: count(1)): all").unwrap();
        assert!(a.combine(b).is_err());
    }

    #[test]
    fn on_section_prefixes_bare_paths() {
        let q = parse_query("cores > 2").unwrap();
        let scoped = q.on_section("reported");
        match &scoped.first_part().unwrap().term {
            Term::Predicate { name, .. } => assert_eq!(name, "reported.cores"),
            other => panic!("expected predicate, got {other:?}"),
        }
    }

    #[test]
    fn on_section_prefixes_a_path_already_under_a_section_name() {
        // `on_section` only special-cases a leading `/`, not the literal
        // section names — a path that happens to start with `reported.`
        // still gets re-prefixed, matching the source behavior.
        let q = parse_query("reported.cores > 2").unwrap();
        let scoped = q.on_section("r");
        match &scoped.first_part().unwrap().term {
            Term::Predicate { name, .. } => assert_eq!(name, "r.reported.cores"),
            other => panic!("expected predicate, got {other:?}"),
        }
    }

    #[test]
    fn on_section_leaves_absolute_paths_untouched() {
        let q = Query::new(vec![Part::new(Term::Predicate {
            name: "/reported.cores".to_string(),
            op: PredicateOp::Gt,
            value: serde_json::json!(2),
            array_mode: None,
            args: Vec::new(),
        })]);
        let scoped = q.on_section("r");
        match &scoped.first_part().unwrap().term {
            Term::Predicate { name, .. } => assert_eq!(name, "/reported.cores"),
            other => panic!("expected predicate, got {other:?}"),
        }
    }
}
