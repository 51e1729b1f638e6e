//! The query DSL's abstract syntax tree.
//!
//! Variants are a closed, tagged sum rather than an open trait hierarchy —
//! `Term` and `Part` are finite in shape, so a pattern-matching evaluator
//! is the right fit (see the "Dynamic dispatch over tagged AST" design
//! note).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Comparison / membership operator of a [`Predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateOp {
    Le,
    Ge,
    Gt,
    Lt,
    Eq,
    Ne,
    Regex,
    NotRegex,
    In,
    NotIn,
}

impl PredicateOp {
    /// The operator's surface syntax, as it appears in the DSL.
    pub fn as_str(self) -> &'static str {
        match self {
            PredicateOp::Le => "<=",
            PredicateOp::Ge => ">=",
            PredicateOp::Gt => ">",
            PredicateOp::Lt => "<",
            PredicateOp::Eq => "==",
            PredicateOp::Ne => "!=",
            PredicateOp::Regex => "=~",
            PredicateOp::NotRegex => "!~",
            PredicateOp::In => "in",
            PredicateOp::NotIn => "not in",
        }
    }

    /// Parse an operator from its surface syntax.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "<=" => PredicateOp::Le,
            ">=" => PredicateOp::Ge,
            ">" => PredicateOp::Gt,
            "<" => PredicateOp::Lt,
            "==" => PredicateOp::Eq,
            "!=" => PredicateOp::Ne,
            "=~" => PredicateOp::Regex,
            "!~" => PredicateOp::NotRegex,
            "in" => PredicateOp::In,
            "not in" => PredicateOp::NotIn,
            _ => return None,
        })
    }
}

/// Quantifier applied to a predicate evaluated against an array-valued
/// property: match if all / any / none of the elements satisfy the
/// predicate. Absent means the property is scalar (or, for arrays,
/// equivalent to `ForAny`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayMode {
    ForAll,
    ForAny,
    ForNone,
}

impl ArrayMode {
    pub fn prefix(self) -> &'static str {
        match self {
            ArrayMode::ForAll => "for_all",
            ArrayMode::ForAny => "for_any",
            ArrayMode::ForNone => "for_none",
        }
    }

    pub fn parse_prefix(s: &str) -> Option<Self> {
        Some(match s {
            "for_all" => ArrayMode::ForAll,
            "for_any" => ArrayMode::ForAny,
            "for_none" => ArrayMode::ForNone,
            _ => return None,
        })
    }
}

/// Boolean combinator joining two terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }
}

/// Navigation direction relative to the current node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
    InOut,
}

/// The unbounded end of a hop range (`[n:]`).
pub const MAX_HOPS: u32 = u32::MAX;

/// A navigation hop: `-[min:max]edge_type->`, `<-...-`, or `-...-`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    pub min_hops: u32,
    pub max_hops: u32,
    pub edge_type: Option<String>,
    pub direction: Direction,
}

impl Navigation {
    pub fn new(min_hops: u32, max_hops: u32, edge_type: Option<String>, direction: Direction) -> Self {
        Self {
            min_hops,
            max_hops,
            edge_type,
            direction,
        }
    }

    /// The default range when none is given in the DSL: exactly one hop.
    pub fn default_range() -> (u32, u32) {
        (1, 1)
    }
}

/// A single term of the query language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    /// Matches every node.
    AllTerm,
    /// Matches nodes whose `kind` is one of the given names.
    IsTerm { kinds: Vec<String> },
    /// Matches the node with the given id.
    IdTerm { id: String },
    /// A property comparison.
    Predicate {
        name: String,
        op: PredicateOp,
        value: Json,
        array_mode: Option<ArrayMode>,
        #[serde(default)]
        args: Vec<Json>,
    },
    /// A named function applied to a variable plus positional args.
    FunctionTerm {
        func: String,
        arg: String,
        args: Vec<Json>,
    },
    /// `left <and|or> right`.
    CombinedTerm {
        left: Box<Term>,
        op: BoolOp,
        right: Box<Term>,
    },
}

impl Term {
    pub fn and(self, other: Term) -> Term {
        Term::CombinedTerm {
            left: Box::new(self),
            op: BoolOp::And,
            right: Box::new(other),
        }
    }

    pub fn or(self, other: Term) -> Term {
        Term::CombinedTerm {
            left: Box::new(self),
            op: BoolOp::Or,
            right: Box::new(other),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Term::AllTerm)
    }
}

/// One segment of a query: a filtering term, optionally followed by a
/// navigation hop and a "pin" marker (`+`) that keeps the current node in
/// the result set alongside navigated-to nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub term: Term,
    pub pinned: bool,
    pub navigation: Option<Navigation>,
}

impl Part {
    pub fn new(term: Term) -> Self {
        Self {
            term,
            pinned: false,
            navigation: None,
        }
    }
}

/// Sort order for a [`Sort`] clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// `sort name1 [asc|desc], name2 [asc|desc], ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub name: String,
    pub order: SortOrder,
}

/// `limit n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit(pub u64);

/// One group-by variable of an `aggregate(...)` preamble, with an optional
/// `as` rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateVariable {
    pub name: String,
    pub as_name: Option<String>,
}

/// Arithmetic operator applied after an aggregate function, e.g.
/// `sum(mem) / 1024`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl MathOp {
    pub fn as_str(self) -> &'static str {
        match self {
            MathOp::Add => "+",
            MathOp::Sub => "-",
            MathOp::Mul => "*",
            MathOp::Div => "/",
            MathOp::Mod => "%",
        }
    }
}

/// A value fed into an aggregate function: either a property path or a
/// numeric constant (`sum(1)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateSource {
    Variable(String),
    Constant(f64),
}

/// `sum|count|min|max|avg(source [op value]*) [as name]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateFunction {
    pub func: String,
    pub source: AggregateSource,
    pub ops: Vec<(MathOp, f64)>,
    pub as_name: Option<String>,
}

/// `aggregate(group_vars: functions)` preamble clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub group_vars: Vec<AggregateVariable>,
    pub functions: Vec<AggregateFunction>,
}

/// A preamble scalar value: string, number, or boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Number(f64),
    Bool(bool),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A complete parsed query.
///
/// `parts` is stored **reversed** relative to textual order: the first
/// part evaluated (the left-most term in the source text) is
/// `parts[parts.len() - 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub parts: Vec<Part>,
    pub preamble: BTreeMap<String, Scalar>,
    pub aggregate: Option<Aggregate>,
    pub sort: Vec<Sort>,
    pub limit: Option<Limit>,
}

impl Query {
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            parts,
            preamble: BTreeMap::new(),
            aggregate: None,
            sort: Vec::new(),
            limit: None,
        }
    }

    /// The part evaluated first (left-most in the source text).
    pub fn first_part(&self) -> Option<&Part> {
        self.parts.last()
    }

    /// The part evaluated last (right-most in the source text).
    pub fn last_part(&self) -> Option<&Part> {
        self.parts.first()
    }

    pub fn with_limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }
}
