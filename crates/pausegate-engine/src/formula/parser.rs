use pausegate_core::errors::FormulaError;

use super::lexer::{Spanned, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(String),
    Not(Box<Expr>),
    /// Operands of a run of `and`, in source order. Always two or more.
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

/// Recursive descent over the grammar:
///
/// ```text
/// or    := and (OR and)*
/// and   := unary (AND unary)*
/// unary := NOT unary | atom
/// atom  := NAME | '(' or ')'
/// ```
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

/// Parentheses and `not` may nest this deep.
pub const MAX_DEPTH: usize = 64;

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn descend(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FormulaError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(())
    }

    pub fn parse(mut self) -> Result<Expr, FormulaError> {
        let expr = self.or_expr()?;
        if let Some((offset, token)) = self.tokens.get(self.pos) {
            return Err(FormulaError::Unexpected {
                found: token.describe(),
                offset: *offset,
            });
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let next = self.tokens.get(self.pos).cloned();
        if next.is_some() {
            self.pos += 1;
        }
        next
    }

    fn or_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut terms = vec![self.and_expr()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.and_expr()?);
        }
        Ok(flatten(terms, Expr::Or))
    }

    fn and_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut terms = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.unary()?);
        }
        Ok(flatten(terms, Expr::And))
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, FormulaError> {
        match self.advance() {
            Some((_, Token::Ident(name))) => Ok(Expr::Var(name)),
            Some((_, Token::LParen)) => {
                self.descend()?;
                let inner = self.or_expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some((_, Token::RParen)) => Ok(inner),
                    Some((offset, token)) => Err(FormulaError::Unexpected {
                        found: token.describe(),
                        offset,
                    }),
                    None => Err(FormulaError::UnexpectedEnd {
                        expected: "')'".to_string(),
                    }),
                }
            }
            Some((offset, token)) => Err(FormulaError::Unexpected {
                found: token.describe(),
                offset,
            }),
            None => Err(FormulaError::UnexpectedEnd {
                expected: "an approver name".to_string(),
            }),
        }
    }
}

fn flatten(mut terms: Vec<Expr>, node: fn(Vec<Expr>) -> Expr) -> Expr {
    if terms.len() == 1 {
        if let Some(only) = terms.pop() {
            return only;
        }
    }
    node(terms)
}
