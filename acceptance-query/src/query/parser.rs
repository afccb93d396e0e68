//! Acceptance query parser
//!
//! Parsing runs over the token stream produced by [`tokenize`]:
//!
//! 1. the aggregate header `<reduction>(<column> |` is read, where the column
//!    is taken verbatim up to the `|` unless it is an event reference,
//! 2. event references (`#(name)`, `#(name):key`) and time shifts (`col-N`)
//!    in the rest of the query are replaced by single identifier tokens and
//!    recorded as text rewrites,
//! 3. the filter is compiled by recursive descent, followed by the closing
//!    `)`, the comparison operator and the threshold.
//!
//! Rewrites are spliced into the original text by byte span, so string
//! literals are reproduced exactly as written.

use std::collections::{BTreeMap, BTreeSet};

use super::expr::{BinaryOp, Expr};
use super::lexer::{tokenize, SpannedToken, Token};
use super::{Aggregate, ComparisonOperator, Query, Reduction, ShiftedColumn};
use crate::normalize::{event_column, event_key_column};
use crate::types::{QueryError, Result, Value};

/// Parse a raw query string into a [`Query`]
pub fn parse(raw: &str) -> Result<Query> {
    let tokens = tokenize(raw)?;
    let mut parser = Parser::new(raw, tokens);
    let query = parser.parse_query()?;

    log::debug!("Parsed query '{}' as '{}'", raw, query.rewritten_text);
    Ok(query)
}

/// Replacement of `source[start..end]`
#[derive(Debug, Clone)]
struct Rewrite {
    start: usize,
    end: usize,
    replacement: String,
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<SpannedToken>,
    pos: usize,
    rewrites: Vec<Rewrite>,
    events: BTreeMap<String, BTreeSet<String>>,
    shifts: Vec<ShiftedColumn>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<SpannedToken>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            rewrites: Vec::new(),
            events: BTreeMap::new(),
            shifts: Vec::new(),
        }
    }

    fn parse_query(&mut self) -> Result<Query> {
        // <reduction> (
        let function_token = self.advance();
        let function = match &function_token.token {
            Token::Ident(name) => Aggregate::from_name(name).ok_or_else(|| {
                QueryError::malformed(
                    function_token.start,
                    format!("unknown reduction '{}'", name),
                )
            })?,
            other => {
                return Err(QueryError::malformed(
                    function_token.start,
                    format!("expected a reduction name, found '{}'", other),
                ))
            }
        };
        self.expect(Token::LParen)?;

        // <column> [ | <filter> ]
        let column = self.parse_group_column()?;
        let has_filter = self.check(&Token::Pipe);
        let filter_start = if has_filter {
            self.advance().end
        } else {
            self.peek().start
        };

        self.rewrite_references(self.pos)?;

        let filter = if has_filter {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let close = self.expect(Token::RParen)?;

        // <op> <threshold>
        let operator = self.parse_operator()?;
        let value = self.parse_threshold()?;
        let end = self.peek().clone();
        if end.token != Token::Eof {
            return Err(QueryError::malformed(
                end.start,
                format!("unexpected '{}' after threshold", end.token),
            ));
        }

        let residual_filter = self.splice(filter_start, close.start).trim().to_string();
        if has_filter && residual_filter.is_empty() {
            return Err(QueryError::malformed(filter_start, "empty filter expression"));
        }

        Ok(Query {
            raw_text: self.source.to_string(),
            rewritten_text: self.splice(0, self.source.len()),
            residual_filter,
            filter,
            referenced_events: std::mem::take(&mut self.events),
            shifted_columns: std::mem::take(&mut self.shifts),
            reduction: Reduction { function, column },
            operator,
            value,
        })
    }

    /// Column between `(` and `|`, taken greedily and never shift-interpreted.
    ///
    /// An event reference (`#(name)` or `#(name):key`) spanning the whole
    /// column is rewritten to its event column like in the filter.
    fn parse_group_column(&mut self) -> Result<String> {
        let first = self.pos;
        let start = self.peek().start;
        let mut end = start;
        let mut depth = 0usize;

        loop {
            let token = self.peek().clone();
            match token.token {
                Token::Pipe if depth == 0 => break,
                Token::RParen if depth == 0 => break,
                Token::Eof => break,
                Token::LParen => depth += 1,
                Token::RParen => depth -= 1,
                _ => {}
            }
            end = token.end;
            self.advance();
        }

        if let Some(column) = self.group_event_column(first, self.pos, end)? {
            return Ok(column);
        }

        let text = self.source[start..end].trim();
        let column = text
            .strip_prefix('`')
            .and_then(|t| t.strip_suffix('`'))
            .unwrap_or(text);
        if column.is_empty() {
            return Err(QueryError::malformed(start, "missing reduction column"));
        }
        Ok(column.to_string())
    }

    /// Event column for a group span of tokens `first..last` ending at byte `end`
    fn group_event_column(
        &mut self,
        first: usize,
        last: usize,
        end: usize,
    ) -> Result<Option<String>> {
        let span = &self.tokens[first..last];
        let stray = span
            .iter()
            .skip(1)
            .find(|t| matches!(t.token, Token::EventRef(_)));
        if let Some(stray) = stray {
            return Err(QueryError::malformed(
                stray.start,
                "event reference must be the whole reduction column",
            ));
        }
        let Some(SpannedToken {
            token: Token::EventRef(event),
            start,
            end: event_end,
        }) = span.first().cloned()
        else {
            return Ok(None);
        };
        let event = event.trim().to_string();

        if span.len() == 1 {
            let column = event_column(&event);
            self.events.entry(event).or_default();
            self.replace(start, event_end, column.clone());
            return Ok(Some(column));
        }
        if span[1].token != Token::Colon {
            return Err(QueryError::malformed(
                span[1].start,
                format!(
                    "unexpected '{}' after '#({})' in reduction column",
                    span[1].token, event
                ),
            ));
        }
        if span.len() == 2 {
            return Err(QueryError::malformed(
                span[1].end,
                format!("missing property key after '#({})'", event),
            ));
        }

        let key = self.source[span[2].start..end].trim().to_string();
        let column = event_key_column(&key, &event);
        self.events.entry(event).or_default().insert(key);
        self.replace(start, end, column.clone());
        Ok(Some(column))
    }

    /// Replace event references and time shifts from token `from` onwards
    fn rewrite_references(&mut self, from: usize) -> Result<()> {
        let mut compacted = self.tokens[..from].to_vec();
        let mut i = from;

        while i < self.tokens.len() {
            let current = self.tokens[i].clone();
            match &current.token {
                Token::EventRef(event) => {
                    let event = event.trim().to_string();
                    let has_key = matches!(
                        self.tokens.get(i + 1),
                        Some(SpannedToken { token: Token::Colon, .. })
                    );

                    if has_key {
                        let key_start = i + 2;
                        let mut key_end = key_start;
                        while key_end < self.tokens.len()
                            && !self.tokens[key_end].token.ends_property_key()
                        {
                            key_end += 1;
                        }
                        if key_end == key_start {
                            return Err(QueryError::malformed(
                                self.tokens[i + 1].end,
                                format!("missing property key after '#({})'", event),
                            ));
                        }
                        let span_end = self.tokens[key_end - 1].end;
                        let key = self.source[self.tokens[key_start].start..span_end]
                            .trim()
                            .to_string();
                        let column = event_key_column(&key, &event);
                        self.events.entry(event).or_default().insert(key);
                        compacted.push(self.replace(current.start, span_end, column));
                        i = key_end;
                    } else {
                        let column = event_column(&event);
                        self.events.entry(event).or_default();
                        compacted.push(self.replace(current.start, current.end, column));
                        i += 1;
                    }
                }
                Token::Shifted(shift) => {
                    let name = format!("{}_prev{}", shift.column, shift.digits);
                    if !self.shifts.iter().any(|s| s.name == name) {
                        self.shifts.push(ShiftedColumn {
                            name: name.clone(),
                            source: shift.column.clone(),
                            shift: shift.amount,
                        });
                    }
                    compacted.push(self.replace(current.start, current.end, name));
                    i += 1;
                }
                _ => {
                    compacted.push(current);
                    i += 1;
                }
            }
        }

        self.tokens = compacted;
        Ok(())
    }

    /// Record a rewrite and return the identifier token standing in for it
    fn replace(&mut self, start: usize, end: usize, column: String) -> SpannedToken {
        self.rewrites.push(Rewrite {
            start,
            end,
            replacement: column.clone(),
        });
        SpannedToken {
            token: Token::Ident(column),
            start,
            end,
        }
    }

    /// Source text of `start..end` with all rewrites inside it applied
    fn splice(&self, start: usize, end: usize) -> String {
        let mut out = String::with_capacity(end.saturating_sub(start));
        let mut cursor = start;
        for rewrite in self
            .rewrites
            .iter()
            .filter(|r| r.start >= start && r.end <= end)
        {
            out.push_str(&self.source[cursor..rewrite.start]);
            out.push_str(&rewrite.replacement);
            cursor = rewrite.end;
        }
        out.push_str(&self.source[cursor..end]);
        out
    }

    // === Filter expression ===

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.check(&Token::Or) || self.check(&Token::Pipe) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.check(&Token::And) || self.check(&Token::Amp) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.check(&Token::Not) || self.check(&Token::Tilde) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        let next = self.peek().token.clone();
        let op = match next {
            Token::EqEq | Token::Eq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::NotEq,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::In => BinaryOp::In,
            Token::Not if matches!(self.peek_at(1).token, Token::In) => {
                self.advance();
                BinaryOp::NotIn
            }
            Token::Is | Token::Contains => {
                let token = self.peek();
                return Err(QueryError::malformed(
                    token.start,
                    format!("operator '{}' is not supported in filters", token.token),
                ));
            }
            _ => return Ok(left),
        };
        self.advance();

        let right = self.parse_additive()?;
        Ok(Expr::binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.check(&Token::Minus) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        let expr = match token.token {
            Token::Integer(v) => Expr::Literal(Value::Int(v)),
            Token::Float(v) => Expr::Literal(Value::Float(v)),
            Token::String(s) => Expr::Literal(Value::Text(s)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Ident(name) => Expr::Column(name),
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                inner
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.check(&Token::RBracket) {
                    loop {
                        items.push(self.parse_additive()?);
                        if !self.check(&Token::Comma) {
                            break;
                        }
                        self.advance();
                    }
                }
                self.expect(Token::RBracket)?;
                Expr::List(items)
            }
            other => {
                return Err(QueryError::malformed(
                    token.start,
                    format!("expected a value or column, found '{}'", other),
                ))
            }
        };
        Ok(expr)
    }

    // === Comparison clause ===

    fn parse_operator(&mut self) -> Result<ComparisonOperator> {
        let token = self.advance();
        let op = match token.token {
            Token::Eq | Token::EqEq => ComparisonOperator::Eq,
            Token::NotEq => ComparisonOperator::NotEq,
            Token::Lt => ComparisonOperator::Lt,
            Token::Le => ComparisonOperator::Le,
            Token::Gt => ComparisonOperator::Gt,
            Token::Ge => ComparisonOperator::Ge,
            Token::ApproxEq => ComparisonOperator::Approx,
            other => {
                return Err(QueryError::malformed(
                    token.start,
                    format!("expected a comparison operator, found '{}'", other),
                ))
            }
        };
        Ok(op)
    }

    fn parse_threshold(&mut self) -> Result<f64> {
        let negative = self.check(&Token::Minus);
        if negative {
            self.advance();
        }
        let token = self.advance();
        let value = match token.token {
            Token::Integer(v) => v as f64,
            Token::Float(v) => v,
            other => {
                return Err(QueryError::malformed(
                    token.start,
                    format!("expected a numeric threshold, found '{}'", other),
                ))
            }
        };
        Ok(if negative { -value } else { value })
    }

    // === Token helpers ===

    fn peek(&self) -> &SpannedToken {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &SpannedToken {
        // the stream always ends with Eof
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)]
    }

    fn check(&self, token: &Token) -> bool {
        &self.peek().token == token
    }

    fn advance(&mut self) -> SpannedToken {
        let token = self.peek().clone();
        if token.token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<SpannedToken> {
        let token = self.advance();
        if token.token == expected {
            Ok(token)
        } else {
            Err(QueryError::malformed(
                token.start,
                format!("expected '{}', found '{}'", expected, token.token),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_presence_query() {
        let query = parse("count(aggregate | some > 1 and #(event) == True) = 0").unwrap();
        assert_eq!(
            query.rewritten_text,
            "count(aggregate | some > 1 and Event_event == True) = 0"
        );
        assert_eq!(query.residual_filter, "some > 1 and Event_event == True");
        assert_eq!(query.referenced_events.len(), 1);
        assert!(query.referenced_events["event"].is_empty());
        assert!(query.shifted_columns.is_empty());
        assert_eq!(query.reduction.function, Aggregate::Count);
        assert_eq!(query.reduction.column, "aggregate");
        assert_eq!(query.operator, ComparisonOperator::Eq);
        assert_eq!(query.value, 0.0);
    }

    #[test]
    fn test_time_shift_query() {
        let query = parse("count(aggregate | some == 0 and some-2 == 1) > 0").unwrap();
        assert_eq!(
            query.rewritten_text,
            "count(aggregate | some == 0 and some_prev2 == 1) > 0"
        );
        assert_eq!(
            query.shifted_columns,
            vec![ShiftedColumn {
                name: "some_prev2".to_string(),
                source: "some".to_string(),
                shift: 2,
            }]
        );
        assert_eq!(query.operator, ComparisonOperator::Gt);
    }

    #[test]
    fn test_repeated_shift_is_recorded_once() {
        let query = parse("count(x | a-1 > 0 or a-1 < -5 or b-10 == 2) = 0").unwrap();
        let names: Vec<_> = query.shifted_columns.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a_prev1", "b_prev10"]);
        assert_eq!(query.residual_filter, "a_prev1 > 0 or a_prev1 < -5 or b_prev10 == 2");
    }

    #[test]
    fn test_quoted_dash_digits_are_not_shifts() {
        let query = parse("count(aggregate | name == 'some-2' and x == 1) = 1").unwrap();
        assert!(query.shifted_columns.is_empty());
        assert!(query.rewritten_text.contains("'some-2'"));
    }

    #[test]
    fn test_event_property_key() {
        let query =
            parse("count(AgentId | #(Collision):CollisionWithAgent == 'True') > 0").unwrap();
        assert_eq!(
            query.residual_filter,
            "Event_Collision__CollisionWithAgent == 'True'"
        );
        let keys: Vec<_> = query.referenced_events["Collision"].iter().cloned().collect();
        assert_eq!(keys, vec!["CollisionWithAgent".to_string()]);
    }

    #[test]
    fn test_event_names_with_spaces_and_keys_with_spaces() {
        let query = parse(
            "sum(x | #(Lane Change / Left) and #(Lane Change / Left):Target Lane != '2') >= 1",
        )
        .unwrap();
        let keys: Vec<_> = query.referenced_events["Lane Change / Left"]
            .iter()
            .cloned()
            .collect();
        assert_eq!(keys, vec!["Target Lane".to_string()]);
        assert!(!query.residual_filter.contains("#("));
        assert!(query
            .residual_filter
            .starts_with("Event_Lane_sChange_s_l_sLeft and Event_Lane_sChange_s_l_sLeft__Target_sLane"));
    }

    #[test]
    fn test_dashed_group_column_is_verbatim() {
        let query = parse("mean(aggregate-0 | x > 1) ~= 2.5").unwrap();
        assert_eq!(query.reduction.column, "aggregate-0");
        assert!(query.shifted_columns.is_empty());
        assert_eq!(query.operator, ComparisonOperator::Approx);
        assert_eq!(query.value, 2.5);
    }

    #[test]
    fn test_event_property_as_group_column() {
        let query = parse("max(#(Brake):Level | #(Brake) == True) > 1").unwrap();
        assert_eq!(query.reduction.column, "Event_Brake__Level");
        assert_eq!(
            query.rewritten_text,
            "max(Event_Brake__Level | Event_Brake == True) > 1"
        );
        assert_eq!(query.residual_filter, "Event_Brake == True");
        let keys: Vec<_> = query.referenced_events["Brake"].iter().cloned().collect();
        assert_eq!(keys, vec!["Level".to_string()]);
    }

    #[test]
    fn test_event_as_group_column() {
        let query = parse("count(#(Lane Change) | v > 1) > 0").unwrap();
        assert_eq!(query.reduction.column, "Event_Lane_sChange");
        assert!(query.referenced_events["Lane Change"].is_empty());
        assert!(!query.rewritten_text.contains("#("));

        let query = parse("sum(#(Lane Change):Target Lane) > 0").unwrap();
        assert_eq!(query.reduction.column, "Event_Lane_sChange__Target_sLane");
        assert_eq!(query.rewritten_text, "sum(Event_Lane_sChange__Target_sLane) > 0");
    }

    #[test]
    fn test_malformed_event_group_columns() {
        for input in [
            "max(#(Brake): | x > 1) > 0",
            "max(#(Brake) + 1 | x > 1) > 0",
            "max(x #(Brake) | x > 1) > 0",
        ] {
            assert!(
                matches!(parse(input), Err(QueryError::MalformedQuery { .. })),
                "should reject {:?}",
                input
            );
        }
    }

    #[test]
    fn test_unspaced_float_subtraction_in_filter() {
        let query = parse("count(x | speed-1.5 > 0) = 0").unwrap();
        assert!(query.shifted_columns.is_empty());
        assert_eq!(query.residual_filter, "speed-1.5 > 0");
        match query.filter.unwrap() {
            Expr::Binary { op, left, .. } => {
                assert_eq!(op, BinaryOp::Gt);
                assert!(matches!(*left, Expr::Binary { op: BinaryOp::Sub, .. }));
            }
            other => panic!("unexpected filter {:?}", other),
        }
        assert!(parse("count(x | some-2x == 1) = 0").is_err());
    }

    #[test]
    fn test_backtick_group_column() {
        let query = parse("max(`speed-1` | `speed-1` > 1) < 100").unwrap();
        assert_eq!(query.reduction.column, "speed-1");
        assert!(query.shifted_columns.is_empty());
    }

    #[test]
    fn test_query_without_filter() {
        let query = parse("count(AgentId) > -1").unwrap();
        assert!(query.filter.is_none());
        assert_eq!(query.residual_filter, "");
        assert_eq!(query.value, -1.0);
    }

    #[test]
    fn test_filter_precedence() {
        let query = parse("count(x | a == 1 or b == 2 and not c) = 0").unwrap();
        match query.filter.unwrap() {
            Expr::Binary { op, right, .. } => {
                assert_eq!(op, BinaryOp::Or);
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_pipe_inside_filter_is_or() {
        let query = parse("count(x | (a == 1) | (b == 2)) = 0").unwrap();
        assert!(matches!(
            query.filter,
            Some(Expr::Binary { op: BinaryOp::Or, .. })
        ));
    }

    #[test]
    fn test_membership_filter() {
        let query = parse("count(x | lane not in ['a', 'b']) = 0").unwrap();
        assert!(matches!(
            query.filter,
            Some(Expr::Binary { op: BinaryOp::NotIn, .. })
        ));
    }

    #[test]
    fn test_malformed_queries() {
        let invalid = [
            "",
            "count aggregate | x > 1 = 0",
            "avg(x | y > 1) = 0",
            "count(x | y > 1) 0",
            "count(x | y > 1) = abc",
            "count(x | y > ) = 0",
            "count(x | ) = 0",
            "count( | y > 1) = 0",
            "count(x | y > 1 = 0",
            "count(x | y > 1) = 0 extra",
            "count(x | #(e): == 1) = 0",
            "count(x | y is 1) = 0",
        ];
        for input in invalid {
            let result = parse(input);
            assert!(
                matches!(result, Err(QueryError::MalformedQuery { .. })),
                "should reject {:?}, got {:?}",
                input,
                result
            );
        }
    }

    #[test]
    fn test_reparsing_is_deterministic() {
        let raw = "count(a | x-3 > 0 and #(E):k == 1 and y-1 < x-3) = 0";
        let first = parse(raw).unwrap();
        let second = parse(raw).unwrap();
        assert_eq!(first.shifted_columns, second.shifted_columns);
        assert_eq!(first, second);
    }
}
