//! Boolean simplification laws applied to a [`Term`] tree.
//!
//! `All` is the identity for `and` and the absorbing element for `or`:
//!
//! - `X and All  = X`
//! - `All and X  = X`
//! - `X or All   = All`
//! - `All or X   = All`
//!
//! Simplification is applied bottom-up and is idempotent: simplifying an
//! already-simplified term returns it unchanged.

use crate::ast::{BoolOp, Query, Term};

/// Simplify a single term, applying the `All` absorption/identity laws
/// recursively.
pub fn simplify_term(term: Term) -> Term {
    match term {
        Term::CombinedTerm { left, op, right } => {
            let left = simplify_term(*left);
            let right = simplify_term(*right);
            match op {
                BoolOp::And => {
                    if left.is_all() {
                        return right;
                    }
                    if right.is_all() {
                        return left;
                    }
                }
                BoolOp::Or => {
                    if left.is_all() || right.is_all() {
                        return Term::AllTerm;
                    }
                }
            }
            Term::CombinedTerm {
                left: Box::new(left),
                op,
                right: Box::new(right),
            }
        }
        other => other,
    }
}

/// Simplify every part's term in a query, in place.
pub fn simplify_query(mut query: Query) -> Query {
    for part in &mut query.parts {
        let term = std::mem::replace(&mut part.term, Term::AllTerm);
        part.term = simplify_term(term);
    }
    query
}
