//! Recursive-descent parser producing an [`Expr`] tree.
//!
//! Precedence, loosest first:
//!
//! ```text
//! ternary      a ? b : c          (right associative)
//! or           ||
//! and          &&
//! equality     == !=
//! comparison   < <= > >=
//! additive     + -
//! term         * / %
//! unary        - !
//! primary      number, string, name, name(args), (expr)
//! ```
//!
//! Nesting is capped at [`MAX_DEPTH`] and length at [`MAX_TOKENS`] so a
//! hostile formula fails with a syntax error instead of exhausting the
//! stack in the parser or the evaluator.

use super::lexer::{tokenize, Spanned, Token};
use crate::error::{EvalError, EvalResult};

/// Deepest allowed parser recursion. Every parenthesis or call argument
/// costs two levels, every unary operator one.
pub const MAX_DEPTH: usize = 128;

/// Longest allowed formula, in tokens.
pub const MAX_TOKENS: usize = 1024;

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    /// Operator spelling, used in error messages.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
}

/// Parsed formula.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Numeric literal.
    Number(f64),
    /// String literal.
    Str(String),
    /// Variable reference.
    Var(String),
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : otherwise`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Function call.
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Returns true if any call in the tree satisfies `pred`.
    pub fn any_call(&self, pred: &impl Fn(&str) -> bool) -> bool {
        match self {
            Self::Number(_) | Self::Str(_) | Self::Var(_) => false,
            Self::Unary(_, inner) => inner.any_call(pred),
            Self::Binary(_, lhs, rhs) => lhs.any_call(pred) || rhs.any_call(pred),
            Self::Ternary(cond, then, otherwise) => {
                cond.any_call(pred) || then.any_call(pred) || otherwise.any_call(pred)
            }
            Self::Call(name, args) => pred(name) || args.iter().any(|a| a.any_call(pred)),
        }
    }
}

/// Parses a (preprocessed) formula.
///
/// # Errors
///
/// Returns [`EvalError::Syntax`] if the text is not a single well-formed
/// expression.
pub fn parse(source: &str) -> EvalResult<Expr> {
    let tokens = tokenize(source)?;
    if tokens.len() > MAX_TOKENS {
        return Err(EvalError::Syntax {
            offset: tokens[MAX_TOKENS].offset,
            message: format!("formula longer than {MAX_TOKENS} tokens"),
        });
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        end: source.len(),
        depth: 0,
    };
    let expr = parser.ternary()?;
    if let Some(extra) = parser.peek_spanned() {
        return Err(EvalError::Syntax {
            offset: extra.offset,
            message: format!("unexpected token {:?}", extra.token),
        });
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_spanned().map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.peek_spanned().map_or(self.end, |s| s.offset)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> EvalResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(EvalError::Syntax {
                offset: self.offset(),
                message: format!("expected {what}"),
            })
        }
    }

    /// Runs `f` one nesting level deeper.
    fn nested(&mut self, f: impl FnOnce(&mut Self) -> EvalResult<Expr>) -> EvalResult<Expr> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::Syntax {
                offset: self.offset(),
                message: format!("formula nested deeper than {MAX_DEPTH} levels"),
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn ternary(&mut self) -> EvalResult<Expr> {
        self.nested(Self::ternary_level)
    }

    fn ternary_level(&mut self) -> EvalResult<Expr> {
        let cond = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.ternary()?;
        self.expect(&Token::Colon, "':' in ternary")?;
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn or(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn comparison(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> EvalResult<Expr> {
        self.nested(Self::unary_level)
    }

    fn unary_level(&mut self) -> EvalResult<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Bang) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> EvalResult<Expr> {
        let offset = self.offset();
        let tokens = self.tokens;
        let Some(spanned) = tokens.get(self.pos) else {
            return Err(EvalError::Syntax {
                offset,
                message: "unexpected end of formula".to_string(),
            });
        };
        self.pos += 1;

        match &spanned.token {
            Token::Number(n) => Ok(Expr::Number(*n)),
            Token::Str(s) => Ok(Expr::Str(s.clone())),
            Token::Ident(name) => {
                if !self.eat(&Token::LParen) {
                    return Ok(Expr::Var(name.clone()));
                }
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.ternary()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma, "',' or ')' in argument list")?;
                    }
                }
                Ok(Expr::Call(name.clone(), args))
            }
            Token::LParen => {
                let inner = self.ternary()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(EvalError::Syntax {
                offset,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }
}
