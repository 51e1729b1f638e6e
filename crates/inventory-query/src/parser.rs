//! Recursive-descent parser for the graph query DSL.
//!
//! The grammar mirrors the original Python grammar almost clause for
//! clause: an optional preamble (`aggregate(...)` or a parenthesized
//! `key=value` list) terminated by `:`, one or more parts chained by
//! navigation hops, then an optional `sort` clause and an optional
//! `limit` clause.
//!
//! ```text
//! query      := preamble? part (navigation part)* sort? limit?
//! preamble   := ( aggregate "(" agg_vars ":" agg_fns ")" | "(" kv ("," kv)* ")" ) ":"
//! part       := term "+"?
//! term       := and_term ("or" and_term)*
//! and_term   := primary ("and" primary)*
//! primary    := "(" term ")" | predicate | function_term | is_term | id_term | all_term
//! navigation := "-" edge_type? range? "->" | "<-" edge_type? range? "-" | "-" edge_type? range? "-"
//! ```

use inventory_core::Error;

use crate::ast::*;

/// Parse a full query string into a [`Query`] AST.
pub fn parse_query(input: &str) -> Result<Query, Error> {
    let mut parser = Parser::new(input);
    let query = parser.parse_query()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error(format!(
            "unexpected trailing input: {:?}",
            parser.rest()
        )));
    }
    Ok(query)
}

const VALID_EDGE_TYPES: &[&str] = &["default", "delete"];

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::ParseError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn rest(&self) -> String {
        self.chars[self.pos..].iter().collect()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn starts_with(&self, lit: &str) -> bool {
        let lit_chars: Vec<char> = lit.chars().collect();
        if self.pos + lit_chars.len() > self.chars.len() {
            return false;
        }
        self.chars[self.pos..self.pos + lit_chars.len()] == lit_chars[..]
    }

    fn consume_str(&mut self, lit: &str) -> bool {
        self.skip_ws();
        if self.starts_with(lit) {
            self.pos += lit.chars().count();
            true
        } else {
            false
        }
    }

    /// Consume a literal only if it is not immediately followed by another
    /// identifier character — so `in` does not also match the start of
    /// `instance`.
    fn consume_keyword(&mut self, kw: &str) -> bool {
        self.skip_ws();
        if !self.starts_with(kw) {
            return false;
        }
        let after = self.pos + kw.chars().count();
        let boundary_ok = match self.chars.get(after) {
            Some(c) => !is_ident_char(*c),
            None => true,
        };
        if boundary_ok {
            self.pos = after;
            true
        } else {
            false
        }
    }

    fn parse_ident(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(self.chars[start..self.pos].iter().collect())
        }
    }

    /// A dotted property path, e.g. `reported.instance_type` or an
    /// array-mode prefixed path `for_all.reported.tags.foo`.
    fn parse_path(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c) || c == '.' || c == '[' || c == ']') {
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(self.chars[start..self.pos].iter().collect())
        }
    }

    fn parse_quoted_string(&mut self) -> Result<String, Error> {
        self.skip_ws();
        let quote = match self.peek() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Err(self.error("expected quoted string")),
        };
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string literal")),
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape in string literal")),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    fn parse_number(&mut self) -> Option<f64> {
        self.skip_ws();
        let start = self.pos;
        if matches!(self.peek(), Some('-')) {
            self.pos += 1;
        }
        let mut saw_digit = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
            saw_digit = true;
        }
        if matches!(self.peek(), Some('.')) {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
                saw_digit = true;
            }
        }
        if !saw_digit {
            self.pos = start;
            return None;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse().ok()
    }

    /// A scalar literal: quoted string, bare word, number, or boolean.
    fn parse_json_value(&mut self) -> Result<serde_json::Value, Error> {
        self.skip_ws();
        match self.peek() {
            Some('"') | Some('\'') => Ok(serde_json::Value::String(self.parse_quoted_string()?)),
            Some('[') => self.parse_array_value(),
            _ => {
                if self.consume_keyword("true") {
                    return Ok(serde_json::Value::Bool(true));
                }
                if self.consume_keyword("false") {
                    return Ok(serde_json::Value::Bool(false));
                }
                if self.consume_keyword("null") {
                    return Ok(serde_json::Value::Null);
                }
                if let Some(n) = self.parse_number() {
                    return Ok(serde_json::json!(n));
                }
                match self.parse_bare_word() {
                    Some(w) => Ok(serde_json::Value::String(w)),
                    None => Err(self.error("expected a value")),
                }
            }
        }
    }

    fn parse_array_value(&mut self) -> Result<serde_json::Value, Error> {
        if !self.consume_str("[") {
            return Err(self.error("expected '['"));
        }
        let mut values = Vec::new();
        self.skip_ws();
        if !self.starts_with("]") {
            loop {
                values.push(self.parse_json_value()?);
                self.skip_ws();
                if self.consume_str(",") {
                    continue;
                }
                break;
            }
        }
        if !self.consume_str("]") {
            return Err(self.error("expected ']'"));
        }
        Ok(serde_json::Value::Array(values))
    }

    fn parse_bare_word(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c) || c == '-' || c == ':' || c == '/') {
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(self.chars[start..self.pos].iter().collect())
        }
    }

    // ---- top level ----------------------------------------------------

    fn parse_query(&mut self) -> Result<Query, Error> {
        let (preamble, aggregate) = self.parse_preamble()?;
        let mut parts = Vec::new();
        loop {
            let term = self.parse_or_term()?;
            self.skip_ws();
            let pinned = self.consume_str("+");
            self.skip_ws();
            let navigation = self.try_parse_navigation()?;
            parts.push(Part {
                term,
                pinned,
                navigation,
            });
            if navigation_is_none(parts.last()) {
                break;
            }
        }
        // Stored reversed: first textual part last in the vec.
        parts.reverse();
        let mut query = Query::new(parts);
        query.preamble = preamble;
        query.aggregate = aggregate;
        query.sort = self.parse_sort()?;
        query.limit = self.parse_limit()?;
        Ok(query)
    }

    fn parse_preamble(
        &mut self,
    ) -> Result<(std::collections::BTreeMap<String, Scalar>, Option<Aggregate>), Error> {
        self.skip_ws();
        if self.starts_with("aggregate") && self.peek_at("aggregate".chars().count()) == Some('(') {
            let aggregate = self.parse_aggregate_clause()?;
            if !self.consume_str(":") {
                return Err(self.error("expected ':' after aggregate(...) preamble"));
            }
            return Ok((std::collections::BTreeMap::new(), Some(aggregate)));
        }
        if self.starts_with("(") {
            // Disambiguate a key=value preamble from a parenthesized term:
            // only treat `(` as a preamble if it is followed eventually by
            // `):` with `=` inside before any navigation/combinator token.
            let save = self.pos;
            if let Some(kv) = self.try_parse_kv_preamble()? {
                return Ok((kv, None));
            }
            self.pos = save;
        }
        Ok((std::collections::BTreeMap::new(), None))
    }

    fn try_parse_kv_preamble(
        &mut self,
    ) -> Result<Option<std::collections::BTreeMap<String, Scalar>>, Error> {
        let save = self.pos;
        self.pos += 1; // consume '('
        let mut map = std::collections::BTreeMap::new();
        loop {
            self.skip_ws();
            let key = match self.parse_ident() {
                Some(k) => k,
                None => {
                    self.pos = save;
                    return Ok(None);
                }
            };
            self.skip_ws();
            if !self.consume_str("=") {
                self.pos = save;
                return Ok(None);
            }
            let value = self.parse_preamble_scalar()?;
            map.insert(key, value);
            self.skip_ws();
            if self.consume_str(",") {
                continue;
            }
            break;
        }
        if !self.consume_str(")") {
            self.pos = save;
            return Ok(None);
        }
        if !self.consume_str(":") {
            self.pos = save;
            return Ok(None);
        }
        Ok(Some(map))
    }

    fn parse_preamble_scalar(&mut self) -> Result<Scalar, Error> {
        self.skip_ws();
        if matches!(self.peek(), Some('"') | Some('\'')) {
            return Ok(Scalar::String(self.parse_quoted_string()?));
        }
        if self.consume_keyword("true") {
            return Ok(Scalar::Bool(true));
        }
        if self.consume_keyword("false") {
            return Ok(Scalar::Bool(false));
        }
        if let Some(n) = self.parse_number() {
            return Ok(Scalar::Number(n));
        }
        match self.parse_bare_word() {
            Some(w) => Ok(Scalar::String(w)),
            None => Err(self.error("expected a preamble value")),
        }
    }

    fn parse_aggregate_clause(&mut self) -> Result<Aggregate, Error> {
        self.consume_str("aggregate");
        if !self.consume_str("(") {
            return Err(self.error("expected '(' after aggregate"));
        }
        let mut group_vars = Vec::new();
        self.skip_ws();
        if !self.starts_with(":") {
            loop {
                let name = self
                    .parse_path()
                    .ok_or_else(|| self.error("expected a group-by variable"))?;
                self.skip_ws();
                let as_name = if self.consume_keyword("as") {
                    Some(
                        self.parse_ident()
                            .ok_or_else(|| self.error("expected name after 'as'"))?,
                    )
                } else {
                    None
                };
                group_vars.push(AggregateVariable { name, as_name });
                self.skip_ws();
                if self.consume_str(",") {
                    continue;
                }
                break;
            }
        }
        if !self.consume_str(":") {
            return Err(self.error("expected ':' between group vars and aggregate functions"));
        }
        let mut functions = Vec::new();
        loop {
            functions.push(self.parse_aggregate_function()?);
            self.skip_ws();
            if self.consume_str(",") {
                continue;
            }
            break;
        }
        if !self.consume_str(")") {
            return Err(self.error("expected ')' to close aggregate(...)"));
        }
        Ok(Aggregate {
            group_vars,
            functions,
        })
    }

    fn parse_aggregate_function(&mut self) -> Result<AggregateFunction, Error> {
        self.skip_ws();
        let func = self
            .parse_ident()
            .ok_or_else(|| self.error("expected an aggregate function name"))?;
        if !self.consume_str("(") {
            return Err(self.error("expected '(' after aggregate function name"));
        }
        self.skip_ws();
        let source = if let Some(n) = self.parse_number() {
            AggregateSource::Constant(n)
        } else {
            let name = self
                .parse_path()
                .ok_or_else(|| self.error("expected an aggregate source"))?;
            AggregateSource::Variable(name)
        };
        let mut ops = Vec::new();
        loop {
            self.skip_ws();
            let op = if self.consume_str("+") {
                MathOp::Add
            } else if self.consume_str("-") {
                MathOp::Sub
            } else if self.consume_str("*") {
                MathOp::Mul
            } else if self.consume_str("/") {
                MathOp::Div
            } else if self.consume_str("%") {
                MathOp::Mod
            } else {
                break;
            };
            let value = self
                .parse_number()
                .ok_or_else(|| self.error("expected a number after math operator"))?;
            ops.push((op, value));
        }
        if !self.consume_str(")") {
            return Err(self.error("expected ')' to close aggregate function"));
        }
        self.skip_ws();
        let as_name = if self.consume_keyword("as") {
            Some(
                self.parse_ident()
                    .ok_or_else(|| self.error("expected name after 'as'"))?,
            )
        } else {
            None
        };
        Ok(AggregateFunction {
            func,
            source,
            ops,
            as_name,
        })
    }

    // ---- terms ----------------------------------------------------------

    fn parse_or_term(&mut self) -> Result<Term, Error> {
        let mut left = self.parse_and_term()?;
        loop {
            self.skip_ws();
            if self.consume_keyword("or") {
                let right = self.parse_and_term()?;
                left = left.or(right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_and_term(&mut self) -> Result<Term, Error> {
        let mut left = self.parse_primary_term()?;
        loop {
            self.skip_ws();
            if self.consume_keyword("and") {
                let right = self.parse_primary_term()?;
                left = left.and(right);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_primary_term(&mut self) -> Result<Term, Error> {
        self.skip_ws();
        if self.consume_str("(") {
            let inner = self.parse_or_term()?;
            if !self.consume_str(")") {
                return Err(self.error("expected ')' to close parenthesized term"));
            }
            return Ok(inner);
        }
        if self.consume_keyword("all") {
            return Ok(Term::AllTerm);
        }
        if self.consume_keyword("is") {
            return self.parse_is_term();
        }
        if self.consume_keyword("id") {
            if !self.consume_str("(") {
                return Err(self.error("expected '(' after 'id'"));
            }
            let id = self.parse_quoted_string().or_else(|_| {
                self.parse_bare_word()
                    .ok_or_else(|| self.error("expected an id"))
            })?;
            if !self.consume_str(")") {
                return Err(self.error("expected ')' to close id(...)"));
            }
            return Ok(Term::IdTerm { id });
        }
        self.parse_predicate_or_function()
    }

    fn parse_is_term(&mut self) -> Result<Term, Error> {
        if !self.consume_str("(") {
            return Err(self.error("expected '(' after 'is'"));
        }
        let mut kinds = Vec::new();
        loop {
            let kind = self.parse_quoted_string().or_else(|_| {
                self.parse_ident()
                    .ok_or_else(|| self.error("expected a kind name"))
            })?;
            kinds.push(kind);
            self.skip_ws();
            if self.consume_str(",") {
                continue;
            }
            break;
        }
        if !self.consume_str(")") {
            return Err(self.error("expected ')' to close is(...)"));
        }
        Ok(Term::IsTerm { kinds })
    }

    /// Parses both predicates (`path op value`) and function terms
    /// (`fn_name(arg, ...)`), since both start with an identifier path and
    /// are only disambiguated by what follows.
    fn parse_predicate_or_function(&mut self) -> Result<Term, Error> {
        self.skip_ws();
        let array_mode = self.try_parse_array_mode_prefix();
        let path = self
            .parse_path()
            .ok_or_else(|| self.error("expected a property path, function, or term"))?;

        self.skip_ws();
        if self.starts_with("(") && array_mode.is_none() {
            return self.parse_function_term(path);
        }

        let op = self.parse_predicate_op()?;
        let value = self.parse_json_value()?;
        Ok(Term::Predicate {
            name: path,
            op,
            value,
            array_mode,
            args: Vec::new(),
        })
    }

    fn try_parse_array_mode_prefix(&mut self) -> Option<ArrayMode> {
        for prefix in ["for_all", "for_any", "for_none"] {
            let save = self.pos;
            if self.consume_keyword(prefix) {
                self.skip_ws();
                if self.consume_str(".") {
                    return ArrayMode::parse_prefix(prefix);
                }
            }
            self.pos = save;
        }
        None
    }

    fn parse_function_term(&mut self, func: String) -> Result<Term, Error> {
        self.consume_str("(");
        self.skip_ws();
        let arg = self
            .parse_path()
            .ok_or_else(|| self.error("expected a variable as the first function argument"))?;
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            if self.consume_str(",") {
                args.push(self.parse_json_value()?);
                continue;
            }
            break;
        }
        if !self.consume_str(")") {
            return Err(self.error("expected ')' to close function call"));
        }
        Ok(Term::FunctionTerm { func, arg, args })
    }

    fn parse_predicate_op(&mut self) -> Result<PredicateOp, Error> {
        self.skip_ws();
        for lit in ["<=", ">=", "==", "!=", "=~", "!~", "<", ">"] {
            if self.consume_str(lit) {
                return Ok(PredicateOp::parse(lit).unwrap());
            }
        }
        if self.consume_keyword("not") {
            if !self.consume_keyword("in") {
                return Err(self.error("expected 'in' after 'not'"));
            }
            return Ok(PredicateOp::NotIn);
        }
        if self.consume_keyword("in") {
            return Ok(PredicateOp::In);
        }
        Err(self.error("expected a comparison operator"))
    }

    // ---- navigation -------------------------------------------------------

    fn try_parse_navigation(&mut self) -> Result<Option<Navigation>, Error> {
        self.skip_ws();
        let direction_in = self.starts_with("<-");
        if direction_in {
            self.pos += 2;
        } else if self.starts_with("-") {
            self.pos += 1;
        } else {
            return Ok(None);
        }

        let edge_type = self.parse_ident().filter(|s| !s.is_empty());
        let (min_hops, max_hops) = self.try_parse_hop_range()?;

        let (direction, closing_len) = if self.starts_with("->") {
            (Direction::Out, 2)
        } else if direction_in && self.starts_with("-") {
            (Direction::In, 1)
        } else if self.starts_with("-") {
            (Direction::InOut, 1)
        } else {
            return Err(self.error("unterminated navigation, expected '-' or '->'"));
        };
        self.pos += closing_len;

        if let Some(ref et) = edge_type {
            if !VALID_EDGE_TYPES.contains(&et.as_str()) {
                return Err(Error::InvalidQuery(format!(
                    "unknown edge type '{et}', expected one of {VALID_EDGE_TYPES:?}"
                )));
            }
        }

        Ok(Some(Navigation::new(min_hops, max_hops, edge_type, direction)))
    }

    fn try_parse_hop_range(&mut self) -> Result<(u32, u32), Error> {
        if !self.consume_str("[") {
            return Ok(Navigation::default_range());
        }
        let min_hops = self
            .parse_number()
            .map(|n| n as u32)
            .ok_or_else(|| self.error("expected minimum hop count"))?;
        if !self.consume_str(":") {
            return Err(self.error("expected ':' in hop range"));
        }
        self.skip_ws();
        let max_hops = if self.starts_with("]") {
            MAX_HOPS
        } else {
            self.parse_number()
                .map(|n| n as u32)
                .ok_or_else(|| self.error("expected maximum hop count"))?
        };
        if !self.consume_str("]") {
            return Err(self.error("expected ']' to close hop range"));
        }
        Ok((min_hops, max_hops))
    }

    // ---- sort / limit -----------------------------------------------------

    fn parse_sort(&mut self) -> Result<Vec<Sort>, Error> {
        self.skip_ws();
        if !self.consume_keyword("sort") {
            return Ok(Vec::new());
        }
        let mut sorts = Vec::new();
        loop {
            let name = self
                .parse_path()
                .ok_or_else(|| self.error("expected a property name in sort clause"))?;
            self.skip_ws();
            let order = if self.consume_keyword("desc") {
                SortOrder::Desc
            } else {
                self.consume_keyword("asc");
                SortOrder::Asc
            };
            sorts.push(Sort { name, order });
            self.skip_ws();
            if self.consume_str(",") {
                continue;
            }
            break;
        }
        Ok(sorts)
    }

    fn parse_limit(&mut self) -> Result<Option<Limit>, Error> {
        self.skip_ws();
        if !self.consume_keyword("limit") {
            return Ok(None);
        }
        let n = self
            .parse_number()
            .ok_or_else(|| self.error("expected a number after 'limit'"))?;
        if n < 0.0 {
            return Err(Error::InvalidQuery("limit must not be negative".into()));
        }
        Ok(Some(Limit(n as u64)))
    }
}

fn navigation_is_none(part: Option<&Part>) -> bool {
    matches!(part, Some(p) if p.navigation.is_none())
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_is_term() {
        let q = parse_query("is(instance)").unwrap();
        assert_eq!(q.parts.len(), 1);
        assert_eq!(
            q.first_part().unwrap().term,
            Term::IsTerm {
                kinds: vec!["instance".to_string()]
            }
        );
    }

    #[test]
    fn parses_predicate_with_and() {
        let q = parse_query("is(instance) and reported.cores > 2").unwrap();
        match &q.first_part().unwrap().term {
            Term::CombinedTerm { op, .. } => assert_eq!(*op, BoolOp::And),
            other => panic!("expected combined term, got {other:?}"),
        }
    }

    #[test]
    fn parses_navigation_chain() {
        let q = parse_query("is(instance) -default[1:]-> is(volume)").unwrap();
        assert_eq!(q.parts.len(), 2);
        let first = q.first_part().unwrap();
        let nav = first.navigation.as_ref().unwrap();
        assert_eq!(nav.min_hops, 1);
        assert_eq!(nav.max_hops, MAX_HOPS);
        assert_eq!(nav.direction, Direction::Out);
        assert_eq!(nav.edge_type.as_deref(), Some("default"));
    }

    #[test]
    fn rejects_unknown_edge_type() {
        let err = parse_query("is(instance) -bogus-> is(volume)").unwrap_err();
        match err {
            Error::InvalidQuery(_) => {}
            other => panic!("expected InvalidQuery, got {other:?}"),
        }
    }

    #[test]
    fn parses_sort_and_limit() {
        let q = parse_query("all sort reported.name desc limit 10").unwrap();
        assert_eq!(q.sort.len(), 1);
        assert_eq!(q.sort[0].order, SortOrder::Desc);
        assert_eq!(q.limit, Some(Limit(10)));
    }

    #[test]
    fn parses_kv_preamble() {
        let q = parse_query("(edge_type=delete): is(instance)").unwrap();
        assert_eq!(
            q.preamble.get("edge_type").and_then(Scalar::as_str),
            Some("delete")
        );
    }

    #[test]
    fn parses_aggregate_preamble() {
        let q = parse_query("aggregate(reported.kind: sum(1) as count): all").unwrap();
        let agg = q.aggregate.expect("aggregate preamble");
        assert_eq!(agg.group_vars[0].name, "reported.kind");
        assert_eq!(agg.functions[0].func, "sum");
        assert_eq!(agg.functions[0].as_name.as_deref(), Some("count"));
    }

    #[test]
    fn parses_function_term() {
        let q = parse_query("in_subnet(reported.ip, \"10.0.0.0/8\")").unwrap();
        match &q.first_part().unwrap().term {
            Term::FunctionTerm { func, arg, args } => {
                assert_eq!(func, "in_subnet");
                assert_eq!(arg, "reported.ip");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected function term, got {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = parse_query("all foo(").unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }
}
