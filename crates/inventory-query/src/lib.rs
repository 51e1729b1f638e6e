//! The graph query DSL: abstract syntax tree, recursive-descent parser,
//! pretty-printer, simplifier, and combinator.

pub mod ast;
pub mod combine;
pub mod eval;
pub mod parser;
pub mod render;
pub mod simplify;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::eval::{evaluate_term, NodeFields};
    pub use crate::parser::parse_query;
    pub use crate::render::render_query;
}
