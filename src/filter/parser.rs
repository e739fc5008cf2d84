use crate::error::{CoreError, CoreResult};
use crate::filter::ast::{Expr, FilterValue, LogicOp, Operator};
use crate::filter::lexer::Lexer;
use crate::filter::token::{PositionedToken, Token};

pub const DEFAULT_MAX_FILTER_LEN: usize = 4000;
pub const DEFAULT_MAX_CLAUSES: usize = 40;

/// Recursive-descent parser over the filter DSL grammar. Holds per-parse
/// mutable state (`pos`, clause counter) — NOT safe for concurrent reuse;
/// callers must construct a fresh [`FilterParser`] per parse.
pub struct FilterParser {
    tokens: Vec<PositionedToken>,
    pos: usize,
    clause_count: usize,
    max_clauses: usize,
}

impl FilterParser {
    pub fn parse(input: &str, max_len: usize, max_clauses: usize) -> CoreResult<Expr> {
        if input.len() > max_len {
            return Err(CoreError::FilterTooLong {
                len: input.len(),
                max: max_len,
            });
        }
        if input.trim().is_empty() {
            return Err(CoreError::EmptyFilter);
        }

        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = FilterParser {
            tokens,
            pos: 0,
            clause_count: 0,
            max_clauses,
        };
        let expr = parser.parse_expression()?;
        parser.expect_eof()?;
        Ok(expr)
    }

    pub fn parse_default(input: &str) -> CoreResult<Expr> {
        Self::parse(input, DEFAULT_MAX_FILTER_LEN, DEFAULT_MAX_CLAUSES)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_eof(&self) -> CoreResult<()> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(CoreError::UnexpectedToken {
                pos: self.peek_pos(),
                found: format!("{other:?}"),
            }),
        }
    }

    // expression = or_expr
    fn parse_expression(&mut self) -> CoreResult<Expr> {
        self.parse_or()
    }

    // or_expr = and_expr ("OR" and_expr)*
    fn parse_or(&mut self) -> CoreResult<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: LogicOp::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    // and_expr = primary ("AND" primary)*
    fn parse_and(&mut self) -> CoreResult<Expr> {
        let mut left = self.parse_primary()?;
        while matches!(self.peek(), Token::And) {
            self.advance();
            let right = self.parse_primary()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: LogicOp::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    // primary = "(" expression ")" | condition
    fn parse_primary(&mut self) -> CoreResult<Expr> {
        if matches!(self.peek(), Token::LParen) {
            let open_pos = self.peek_pos();
            self.advance();
            let expr = self.parse_expression()?;
            match self.peek() {
                Token::RParen => {
                    self.advance();
                    Ok(expr)
                }
                _ => Err(CoreError::UnclosedParenthesis(open_pos)),
            }
        } else {
            self.parse_condition()
        }
    }

    // condition = field op value | field "EXISTS" | field "NOT" "EXISTS"
    fn parse_condition(&mut self) -> CoreResult<Expr> {
        let field = match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                name
            }
            Token::Eof => return Err(CoreError::UnexpectedEndOfInput),
            other => {
                return Err(CoreError::UnexpectedToken {
                    pos: self.peek_pos(),
                    found: format!("{other:?}"),
                })
            }
        };

        self.clause_count += 1;
        if self.clause_count > self.max_clauses {
            return Err(CoreError::FilterTooComplex {
                clauses: self.clause_count,
                max: self.max_clauses,
            });
        }

        let negated = if matches!(self.peek(), Token::Not) {
            self.advance();
            true
        } else {
            false
        };

        match self.peek().clone() {
            Token::Exists => {
                self.advance();
                Ok(Expr::Condition {
                    field,
                    operator: Operator::Exists,
                    value: None,
                    negated,
                })
            }
            Token::Contains => {
                self.advance();
                let value = self.parse_value()?;
                Ok(Expr::Condition {
                    field,
                    operator: Operator::Contains,
                    value: Some(value),
                    negated,
                })
            }
            Token::In => {
                self.advance();
                let value = self.parse_value()?;
                Ok(Expr::Condition {
                    field,
                    operator: Operator::In,
                    value: Some(value),
                    negated,
                })
            }
            op if op.is_comparison_op() => {
                if negated {
                    return Err(CoreError::InvalidFilterSyntax(format!(
                        "NOT is not a valid prefix to {op:?} at position {}",
                        self.peek_pos()
                    )));
                }
                self.advance();
                let operator = match op {
                    Token::Eq => Operator::Eq,
                    Token::Ne => Operator::Ne,
                    Token::Gt => Operator::Gt,
                    Token::Lt => Operator::Lt,
                    Token::Ge => Operator::Ge,
                    Token::Le => Operator::Le,
                    _ => unreachable!(),
                };
                let value = self.parse_value()?;
                Ok(Expr::Condition {
                    field,
                    operator,
                    value: Some(value),
                    negated: false,
                })
            }
            Token::Eof => Err(CoreError::MissingOperator(self.peek_pos())),
            _ => Err(CoreError::MissingOperator(self.peek_pos())),
        }
    }

    // value = string | number | "(" value ("," value)* ")"
    fn parse_value(&mut self) -> CoreResult<FilterValue> {
        match self.peek().clone() {
            Token::String(s) => {
                self.advance();
                Ok(FilterValue::String(s))
            }
            Token::Number(n) => {
                self.advance();
                Ok(FilterValue::Number(n))
            }
            Token::LParen => {
                self.advance();
                let mut values = Vec::new();
                if !matches!(self.peek(), Token::RParen) {
                    loop {
                        values.push(self.parse_value()?);
                        if matches!(self.peek(), Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                match self.peek() {
                    Token::RParen => {
                        self.advance();
                        Ok(FilterValue::List(values))
                    }
                    _ => Err(CoreError::InvalidInClause(format!(
                        "unterminated list at position {}",
                        self.peek_pos()
                    ))),
                }
            }
            Token::Eof => Err(CoreError::MissingValue(self.peek_pos())),
            other => Err(CoreError::UnexpectedToken {
                pos: self.peek_pos(),
                found: format!("{other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        FilterParser::parse_default(input).unwrap()
    }

    #[test]
    fn seed_scenario_precedence() {
        // a=1 OR b=2 AND c=3  =>  Or(Cond(a), And(Cond(b), Cond(c)))
        let expr = parse("a=1 OR b=2 AND c=3");
        match expr {
            Expr::Binary { left, operator: LogicOp::Or, right } => {
                assert!(matches!(*left, Expr::Condition { .. }));
                match *right {
                    Expr::Binary { operator: LogicOp::And, .. } => {}
                    _ => panic!("expected AND on the right of OR"),
                }
            }
            _ => panic!("expected top-level OR"),
        }
    }

    #[test]
    fn parenthesized_expression_overrides_precedence() {
        let expr = parse("(a=1 OR b=2) AND c=3");
        match expr {
            Expr::Binary { left, operator: LogicOp::And, .. } => {
                assert!(matches!(*left, Expr::Binary { operator: LogicOp::Or, .. }));
            }
            _ => panic!("expected top-level AND"),
        }
    }

    #[test]
    fn empty_filter_errors() {
        assert!(matches!(FilterParser::parse_default(""), Err(CoreError::EmptyFilter)));
        assert!(matches!(FilterParser::parse_default("   "), Err(CoreError::EmptyFilter)));
    }

    #[test]
    fn missing_value_errors() {
        assert!(matches!(
            FilterParser::parse_default("a="),
            Err(CoreError::MissingValue(_))
        ));
    }

    #[test]
    fn missing_operator_errors() {
        assert!(matches!(
            FilterParser::parse_default("a"),
            Err(CoreError::MissingOperator(_))
        ));
    }

    #[test]
    fn unclosed_parenthesis_errors() {
        assert!(matches!(
            FilterParser::parse_default("(a=1"),
            Err(CoreError::UnclosedParenthesis(_))
        ));
    }

    #[test]
    fn exists_and_not_exists() {
        let expr = parse("a EXISTS");
        assert!(matches!(
            expr,
            Expr::Condition { operator: Operator::Exists, negated: false, .. }
        ));
        let expr = parse("a NOT EXISTS");
        assert!(matches!(
            expr,
            Expr::Condition { operator: Operator::Exists, negated: true, .. }
        ));
    }

    #[test]
    fn in_with_empty_list() {
        let expr = parse("service.name IN ()");
        match expr {
            Expr::Condition { operator: Operator::In, value: Some(FilterValue::List(v)), .. } => {
                assert!(v.is_empty());
            }
            _ => panic!("expected empty IN list"),
        }
    }

    #[test]
    fn in_with_values() {
        let expr = parse(r#"service.name IN ("a", "b", 3)"#);
        match expr {
            Expr::Condition { operator: Operator::In, value: Some(FilterValue::List(v)), .. } => {
                assert_eq!(v.len(), 3);
            }
            _ => panic!("expected 3-element IN list"),
        }
    }

    #[test]
    fn not_contains() {
        let expr = parse(r#"span.name NOT CONTAINS "err""#);
        assert!(matches!(
            expr,
            Expr::Condition { operator: Operator::Contains, negated: true, .. }
        ));
    }

    #[test]
    fn not_before_comparison_is_invalid() {
        assert!(FilterParser::parse("a NOT = 1", 4000, 40).is_err());
    }

    #[test]
    fn too_long_filter_rejected_before_lexing() {
        let long = "a=1 AND ".repeat(2000);
        assert!(matches!(
            FilterParser::parse(&long, 100, 40),
            Err(CoreError::FilterTooLong { .. })
        ));
    }

    #[test]
    fn too_complex_filter_rejected() {
        let many = (0..10).map(|i| format!("f{i}=1")).collect::<Vec<_>>().join(" AND ");
        assert!(matches!(
            FilterParser::parse(&many, 4000, 3),
            Err(CoreError::FilterTooComplex { .. })
        ));
    }

    #[test]
    fn malformed_input_never_panics() {
        let inputs = ["", "(((", ")))", "a AND", "OR OR", "IN IN IN", "a = = 1"];
        for input in inputs {
            let _ = FilterParser::parse_default(input);
        }
    }
}
