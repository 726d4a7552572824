//! Recursive-descent parser producing the expression tree.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := not_expr ("and" not_expr)*
//! not_expr   := "not" not_expr | comparison
//! comparison := operand [op operand]
//! op         := "==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "not" "in"
//! operand    := STRING | NUMBER | "True" | "False" | NAME "." NAME
//!             | "(" or_expr ("," or_expr)* ")" | "[" [or_expr ("," or_expr)*] "]"
//! ```

use crate::lexer::{tokenize, Token, TokenKind};
use crate::ResourceEvaluationError;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Literal values that may appear in an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// `job.attribute`
    Ref { job: String, attribute: String },
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Collect referenced job names in first-seen order, without duplicates.
    pub fn collect_jobs(&self, out: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ref { job, .. } => {
                if !out.iter().any(|seen| seen == job) {
                    out.push(job.clone());
                }
            }
            Expr::List(items) => items.iter().for_each(|item| item.collect_jobs(out)),
            Expr::Not(inner) => inner.collect_jobs(out),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_jobs(out);
                right.collect_jobs(out);
            }
            Expr::Compare { left, right, .. } => {
                left.collect_jobs(out);
                right.collect_jobs(out);
            }
        }
    }
}

/// Parse a single-line expression.
pub fn parse_expression(text: &str) -> Result<Expr, ResourceEvaluationError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };

    if parser.peek() == &TokenKind::End {
        return Err(ResourceEvaluationError::new(0, "empty expression"));
    }

    let expr = parser.or_expr()?;
    let trailing = parser.current();
    if trailing.kind != TokenKind::End {
        return Err(ResourceEvaluationError::new(
            trailing.offset,
            format!("unexpected {} after expression", trailing.kind.describe()),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // tokenize() guarantees a trailing End token
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_second(&self) -> &TokenKind {
        let idx = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::End {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ResourceEvaluationError> {
        let token = self.advance();
        if token.kind == kind {
            Ok(())
        } else {
            Err(ResourceEvaluationError::new(
                token.offset,
                format!("expected {}, found {}", kind.describe(), token.kind.describe()),
            ))
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ResourceEvaluationError> {
        let mut left = self.and_expr()?;
        while self.peek() == &TokenKind::Or {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ResourceEvaluationError> {
        let mut left = self.not_expr()?;
        while self.peek() == &TokenKind::And {
            self.advance();
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ResourceEvaluationError> {
        if self.peek() == &TokenKind::Not {
            self.advance();
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ResourceEvaluationError> {
        let left = self.operand()?;

        let op = match self.peek() {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            TokenKind::In => CompareOp::In,
            TokenKind::Not if self.peek_second() == &TokenKind::In => {
                self.advance();
                CompareOp::NotIn
            }
            _ => return Ok(left),
        };
        self.advance();

        let right = self.operand()?;
        if matches!(
            self.peek(),
            TokenKind::Eq
                | TokenKind::Ne
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
                | TokenKind::In
        ) {
            let token = self.current();
            return Err(ResourceEvaluationError::new(
                token.offset,
                "chained comparisons are not supported, combine them with 'and'",
            ));
        }

        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn operand(&mut self) -> Result<Expr, ResourceEvaluationError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            TokenKind::Num(n) => Ok(Expr::Literal(Literal::Num(n))),
            TokenKind::True => Ok(Expr::Literal(Literal::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Literal::Bool(false))),
            TokenKind::Ident(job) => {
                if self.peek() != &TokenKind::Dot {
                    return Err(ResourceEvaluationError::new(
                        token.offset,
                        format!(
                            "bare name '{}', resources are referenced as job.attribute",
                            job
                        ),
                    ));
                }
                self.advance();
                let attr_token = self.advance();
                match attr_token.kind {
                    TokenKind::Ident(attribute) if !attribute.contains(['-', '/']) => {
                        Ok(Expr::Ref { job, attribute })
                    }
                    other => Err(ResourceEvaluationError::new(
                        attr_token.offset,
                        format!("expected attribute name after '{}.', found {}", job, other.describe()),
                    )),
                }
            }
            TokenKind::LParen => {
                let first = self.or_expr()?;
                if self.peek() != &TokenKind::Comma {
                    self.expect(TokenKind::RParen)?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.peek() == &TokenKind::Comma {
                    self.advance();
                    if self.peek() == &TokenKind::RParen {
                        break;
                    }
                    items.push(self.or_expr()?);
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::List(items))
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if self.peek() != &TokenKind::RBracket {
                    items.push(self.or_expr()?);
                    while self.peek() == &TokenKind::Comma {
                        self.advance();
                        if self.peek() == &TokenKind::RBracket {
                            break;
                        }
                        items.push(self.or_expr()?);
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            other => Err(ResourceEvaluationError::new(
                token.offset,
                format!("unexpected {}", other.describe()),
            )),
        }
    }
}
