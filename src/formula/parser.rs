//! Recursive-descent parser for the formula grammar.
//!
//! Precedence, lowest first: comparisons, `+ -`, `* /`, unary sign, `^`
//! (right associative).
//!
//! Runs of one left-associative level are kept flat as [`Expr::Chain`], so a
//! long sum costs no stack. Nesting (parentheses, signs, exponents, function
//! arguments) is capped at [`MAX_NESTING`].
use super::ast::{Expr, Formula};
use super::functions::{BinaryOp, Builtin};
use super::lexer::{tokenize, Spanned, Token};
use super::FormulaError;

/// Deepest nesting a formula may use before it is rejected.
pub const MAX_NESTING: usize = 64;

pub fn parse(src: &str) -> Result<Formula, FormulaError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }

    let mut parser = Parser { tokens, pos: 0, slots: 0, depth: 0 };
    let expr = parser.expression()?;

    if let Some(extra) = parser.peek() {
        return Err(match extra.token {
            Token::RParen => FormulaError::UnbalancedParens { pos: extra.pos },
            _ => FormulaError::UnexpectedToken { found: extra.token.describe(), pos: extra.pos },
        });
    }

    Ok(Formula { expr, slots: parser.slots })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    slots: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> { self.tokens.get(self.pos) }

    fn peek_token(&self) -> Option<&Token> { self.peek().map(|s| &s.token) }

    fn next(&mut self) -> Option<Spanned> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expression(&mut self) -> Result<Expr, FormulaError> { self.comparison() }

    fn comparison(&mut self) -> Result<Expr, FormulaError> {
        let head = self.additive()?;
        let mut tail = Vec::new();
        loop {
            let op = match self.peek_token() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => return Ok(chain(head, tail)),
            };
            self.pos += 1;
            tail.push((op, self.additive()?));
        }
    }

    fn additive(&mut self) -> Result<Expr, FormulaError> {
        let head = self.term()?;
        let mut tail = Vec::new();
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(chain(head, tail)),
            };
            self.pos += 1;
            tail.push((op, self.term()?));
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let head = self.unary()?;
        let mut tail = Vec::new();
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(chain(head, tail)),
            };
            self.pos += 1;
            tail.push((op, self.unary()?));
        }
    }

    /// Every nested construct passes through here, so this is where depth is counted.
    fn unary(&mut self) -> Result<Expr, FormulaError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            let pos = self.peek().map_or(0, |s| s.pos);
            return Err(FormulaError::TooDeep { limit: MAX_NESTING, pos });
        }
        let expr = self.signed();
        self.depth -= 1;
        expr
    }

    fn signed(&mut self) -> Result<Expr, FormulaError> {
        if self.eat(&Token::Minus) {
            let inner = self.unary()?;
            return Ok(match inner {
                Expr::Number(n) => Expr::Number(-n),
                other => Expr::Neg(Box::new(other)),
            });
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.primary()?;
        if self.eat(&Token::Caret) {
            let exponent = self.unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let Some(Spanned { token, pos }) = self.next() else {
            return Err(FormulaError::UnexpectedEnd);
        };
        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::LParen => {
                let inner = self.expression()?;
                self.close_paren(pos)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    self.call(name, pos)
                } else {
                    Ok(Expr::Ref(name))
                }
            }
            other => Err(FormulaError::UnexpectedToken { found: other.describe(), pos }),
        }
    }

    fn close_paren(&mut self, open_pos: usize) -> Result<(), FormulaError> {
        match self.next() {
            Some(Spanned { token: Token::RParen, .. }) => Ok(()),
            None => Err(FormulaError::UnbalancedParens { pos: open_pos }),
            Some(Spanned { token, pos }) => Err(FormulaError::UnexpectedToken { found: token.describe(), pos }),
        }
    }

    fn call(&mut self, name: String, pos: usize) -> Result<Expr, FormulaError> {
        let builtin = Builtin::from_name(&name).ok_or_else(|| FormulaError::UnknownFunction(name.clone()))?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.close_paren(pos)?;
                break;
            }
        }

        let (min, max) = builtin.arity();
        if args.len() < min || args.len() > max {
            return Err(FormulaError::Arity { func: name.to_ascii_uppercase(), found: args.len() });
        }

        let mut args = args.into_iter();
        let first = args.next().map(Box::new);
        Ok(match (builtin, first) {
            (Builtin::Scalar(func), Some(first)) => {
                let mut all = vec![*first];
                all.extend(args);
                Expr::Call { func, args: all }
            }
            (Builtin::Array(func), Some(arg)) => {
                let slot = self.slots;
                self.slots += 1;
                Expr::Accumulate { func, arg, slot }
            }
            (Builtin::Prev, Some(arg)) => Expr::Shift { arg, periods: 1 },
            (Builtin::Shift, Some(arg)) => {
                let periods = match args.next() {
                    None => 1,
                    Some(Expr::Number(n)) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => n as u32,
                    Some(_) => return Err(FormulaError::InvalidLag { pos }),
                };
                Expr::Shift { arg, periods }
            }
            (_, None) => return Err(FormulaError::Arity { func: name.to_ascii_uppercase(), found: 0 }),
        })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

fn chain(head: Expr, mut tail: Vec<(BinaryOp, Expr)>) -> Expr {
    match tail.len() {
        0 => head,
        1 => {
            let (op, rhs) = tail.remove(0);
            binary(op, head, rhs)
        }
        _ => Expr::Chain { head: Box::new(head), tail },
    }
}
