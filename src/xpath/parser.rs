//! Pratt parser for the XPath subset.
//!
//! Word operators are resolved here: a `Name` token in operator position is
//! one of `and`/`or`/`div`/`mod`, in operand position it starts a location
//! path or a function call.

use super::ast::{Axis, BinaryOp, Expr, LocationPath, NameTest, Step};
use super::tokenizer::{tokenize, SpannedToken, Token};
use crate::error::ParseError;

/// Operator precedence levels (higher binds tighter)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest = 0,
    Or = 1,
    And = 2,
    Equality = 3,
    Relational = 4,
    Additive = 5,
    Multiplicative = 6,
    Union = 7,
}

/// Parse one expression; trailing tokens are an error.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: input.len(),
    };
    let expr = parser.parse_expr(Precedence::Lowest)?;
    if let Some(t) = parser.peek() {
        return Err(ParseError::Expression {
            position: t.offset,
            message: "unexpected trailing tokens".into(),
        });
    }
    Ok(expr)
}

/// Parse a path-only expression (a binding nodeset or control `ref`).
pub fn parse_path(input: &str) -> Result<LocationPath, ParseError> {
    match parse_expression(input)? {
        Expr::Path(path) => Ok(path),
        _ => Err(ParseError::Expression {
            position: 0,
            message: format!("'{input}' is not a location path"),
        }),
    }
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.len)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Expression {
            position: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(t) if &t.token == token => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn parse_expr(&mut self, min: Precedence) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_operand()?;
        loop {
            let Some(next) = self.peek() else { break };
            // `|` binds tighter than everything else and joins node-sets.
            if next.token == Token::Pipe {
                if min >= Precedence::Union {
                    break;
                }
                self.pos += 1;
                let rhs = self.parse_expr(Precedence::Union)?;
                lhs = Expr::Union(Box::new(lhs), Box::new(rhs));
                continue;
            }
            let Some((op, prec)) = binary_op(&next.token) else {
                break;
            };
            if prec <= min {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(prec)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_operand(&mut self) -> Result<Expr, ParseError> {
        let Some(t) = self.peek().cloned() else {
            return Err(self.error("expected expression"));
        };
        match t.token {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Token::Literal(s) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Token::Minus => {
                self.pos += 1;
                let inner = self.parse_operand()?;
                Ok(Expr::Negate(Box::new(inner)))
            }
            Token::LeftParen => {
                self.pos += 1;
                let inner = self.parse_expr(Precedence::Lowest)?;
                self.expect(&Token::RightParen, "')'")?;
                Ok(inner)
            }
            Token::Name(ref name) => {
                // Function call when directly followed by '('.
                if self
                    .tokens
                    .get(self.pos + 1)
                    .is_some_and(|t| t.token == Token::LeftParen)
                {
                    let name = name.clone();
                    self.pos += 2;
                    let args = self.parse_arguments()?;
                    Ok(Expr::FunctionCall { name, args })
                } else {
                    self.parse_location_path(false)
                }
            }
            Token::Slash | Token::Dot | Token::DotDot | Token::Star => {
                let absolute = t.token == Token::Slash;
                if absolute {
                    self.pos += 1;
                }
                self.parse_location_path(absolute)
            }
            Token::DoubleSlash => Err(ParseError::Expression {
                position: t.offset,
                message: "'//' descendant steps are not supported".into(),
            }),
            Token::At => Err(ParseError::Expression {
                position: t.offset,
                message: "attribute steps are not supported".into(),
            }),
            _ => Err(self.error("expected expression")),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek().is_some_and(|t| t.token == Token::RightParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(Precedence::Lowest)?);
            match self.advance() {
                Some(SpannedToken {
                    token: Token::Comma,
                    ..
                }) => continue,
                Some(SpannedToken {
                    token: Token::RightParen,
                    ..
                }) => break,
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
        Ok(args)
    }

    fn parse_location_path(&mut self, absolute: bool) -> Result<Expr, ParseError> {
        let mut steps = Vec::new();
        loop {
            let step = match self.peek().map(|t| t.token.clone()) {
                Some(Token::Name(name)) => {
                    self.pos += 1;
                    Step {
                        axis: Axis::Child,
                        name: NameTest::Named(name),
                        predicates: Vec::new(),
                    }
                }
                Some(Token::Star) => {
                    self.pos += 1;
                    Step {
                        axis: Axis::Child,
                        name: NameTest::Any,
                        predicates: Vec::new(),
                    }
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    Step {
                        axis: Axis::SelfNode,
                        name: NameTest::Any,
                        predicates: Vec::new(),
                    }
                }
                Some(Token::DotDot) => {
                    self.pos += 1;
                    Step {
                        axis: Axis::Parent,
                        name: NameTest::Any,
                        predicates: Vec::new(),
                    }
                }
                Some(Token::At) => {
                    return Err(self.error("attribute steps are not supported"));
                }
                _ => return Err(self.error("expected path step")),
            };
            let mut step = step;
            while self.peek().is_some_and(|t| t.token == Token::LeftBracket) {
                self.pos += 1;
                let pred = self.parse_expr(Precedence::Lowest)?;
                self.expect(&Token::RightBracket, "']'")?;
                step.predicates.push(pred);
            }
            steps.push(step);
            match self.peek().map(|t| &t.token) {
                Some(Token::Slash) => {
                    self.pos += 1;
                }
                Some(Token::DoubleSlash) => {
                    return Err(self.error("'//' descendant steps are not supported"));
                }
                _ => break,
            }
        }
        Ok(Expr::Path(LocationPath { absolute, steps }))
    }
}

/// Operator table. `Name` tokens map to the word operators; everything else
/// in operand position is handled by `parse_operand`.
fn binary_op(token: &Token) -> Option<(BinaryOp, Precedence)> {
    let pair = match token {
        Token::Name(name) => match name.as_str() {
            "or" => (BinaryOp::Or, Precedence::Or),
            "and" => (BinaryOp::And, Precedence::And),
            "div" => (BinaryOp::Div, Precedence::Multiplicative),
            "mod" => (BinaryOp::Mod, Precedence::Multiplicative),
            _ => return None,
        },
        Token::Equal => (BinaryOp::Eq, Precedence::Equality),
        Token::NotEqual => (BinaryOp::Neq, Precedence::Equality),
        Token::LessThan => (BinaryOp::Lt, Precedence::Relational),
        Token::LessThanOrEqual => (BinaryOp::Le, Precedence::Relational),
        Token::GreaterThan => (BinaryOp::Gt, Precedence::Relational),
        Token::GreaterThanOrEqual => (BinaryOp::Ge, Precedence::Relational),
        Token::Plus => (BinaryOp::Add, Precedence::Additive),
        Token::Minus => (BinaryOp::Sub, Precedence::Additive),
        Token::Star => (BinaryOp::Mul, Precedence::Multiplicative),
        _ => return None,
    };
    Some(pair)
}
