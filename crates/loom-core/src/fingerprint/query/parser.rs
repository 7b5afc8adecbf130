//! Recursive-descent parser producing the query AST.
//!
//! Precedence, lowest first: `|`, `,`, `//`, `or`, `and`,
//! comparisons, `+ -`, `* / %`, postfix (`.a`, `[..]`, `?`).

use serde_json::Value;

use super::QueryError;
use super::lexer::{Token, TokenKind, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ObjectKey {
    Literal(String),
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Identity,
    Literal(Value),
    Index { target: Box<Expr>, key: Box<Expr> },
    Iterate(Box<Expr>),
    Try(Box<Expr>),
    Array(Option<Box<Expr>>),
    Object(Vec<(ObjectKey, Expr)>),
    Pipe(Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
    Alt(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Call(Builtin, Vec<Expr>),
}

/// Builtin functions known to the evaluator, resolved at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Empty,
    Error,
    Not,
    Length,
    Keys,
    Sort,
    ToString,
    ToJson,
    Select,
    Map,
    Has,
    AsciiDowncase,
    AsciiUpcase,
}

impl Builtin {
    fn lookup(name: &str, arity: usize) -> Option<Self> {
        let builtin = match (name, arity) {
            ("empty", 0) => Builtin::Empty,
            ("error", 0 | 1) => Builtin::Error,
            ("not", 0) => Builtin::Not,
            ("length", 0) => Builtin::Length,
            ("keys", 0) => Builtin::Keys,
            ("sort", 0) => Builtin::Sort,
            ("tostring", 0) => Builtin::ToString,
            ("tojson", 0) => Builtin::ToJson,
            ("select", 1) => Builtin::Select,
            ("map", 1) => Builtin::Map,
            ("has", 1) => Builtin::Has,
            ("ascii_downcase", 0) => Builtin::AsciiDowncase,
            ("ascii_upcase", 0) => Builtin::AsciiUpcase,
            _ => return None,
        };
        Some(builtin)
    }
}

/// Deepest expression tree the parser accepts.
const MAX_DEPTH: usize = 64;

/// `eval` keeps at most one frame chain per node on the stack, so the token
/// count bounds evaluation depth.
const MAX_TOKENS: usize = 512;

pub(crate) fn parse(src: &str) -> Result<Expr, QueryError> {
    let tokens = tokenize(src)?;
    if let Some(token) = tokens.get(MAX_TOKENS) {
        return Err(QueryError::Parse {
            position: token.offset,
            message: format!("expression is longer than {MAX_TOKENS} tokens"),
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.pipe()?;
    parser.expect(&TokenKind::Eof, "end of expression")?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if kind != TokenKind::Eof {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), TokenKind::Ident(name) if name == keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Parse {
            position: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), QueryError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    /// Enters one more level of the expression tree.
    fn descend(&mut self) -> Result<(), QueryError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("expression nests deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, QueryError>,
    ) -> Result<T, QueryError> {
        self.descend()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn pipe(&mut self) -> Result<Expr, QueryError> {
        let lhs = self.comma()?;
        if self.eat(&TokenKind::Pipe) {
            let rhs = self.nested(Self::pipe)?;
            return Ok(Expr::Pipe(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn comma(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut lhs = self.alternative()?;
        while self.eat(&TokenKind::Comma) {
            self.descend()?;
            let rhs = self.alternative()?;
            lhs = Expr::Comma(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn alternative(&mut self) -> Result<Expr, QueryError> {
        let lhs = self.or()?;
        if self.eat(&TokenKind::Alt) {
            let rhs = self.nested(Self::alternative)?;
            return Ok(Expr::Alt(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut lhs = self.and()?;
        while self.eat_keyword("or") {
            self.descend()?;
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut lhs = self.comparison()?;
        while self.eat_keyword("and") {
            self.descend()?;
            let rhs = self.comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, QueryError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.additive()?;
        if matches!(
            self.peek(),
            TokenKind::Eq | TokenKind::Ne | TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge
        ) {
            return Err(self.error("comparison operators are non-associative"));
        }
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, QueryError> {
        if self.eat(&TokenKind::Minus) {
            let operand = self.nested(Self::postfix)?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut expr = self.primary()?;
        loop {
            match self.peek().clone() {
                TokenKind::Field(name) => {
                    self.advance();
                    self.descend()?;
                    expr = index(expr, Expr::Literal(Value::String(name)));
                }
                TokenKind::Dot => {
                    self.advance();
                    self.descend()?;
                    expr = match self.peek().clone() {
                        TokenKind::Str(key) => {
                            self.advance();
                            index(expr, Expr::Literal(Value::String(key)))
                        }
                        TokenKind::LBracket => {
                            self.advance();
                            self.bracket_suffix(expr)?
                        }
                        other => return Err(self.error(format!("unexpected {other:?} after '.'"))),
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    self.descend()?;
                    expr = self.bracket_suffix(expr)?;
                }
                TokenKind::Question => {
                    self.advance();
                    self.descend()?;
                    expr = Expr::Try(Box::new(expr));
                }
                _ => break,
            }
        }
        self.depth = base;
        Ok(expr)
    }

    /// After a consumed `[`: either `[]` (iterate) or `[expr]` (index).
    fn bracket_suffix(&mut self, target: Expr) -> Result<Expr, QueryError> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::Iterate(Box::new(target)));
        }
        let key = self.nested(Self::pipe)?;
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(index(target, key))
    }

    fn primary(&mut self) -> Result<Expr, QueryError> {
        match self.advance() {
            TokenKind::Dot => match self.peek().clone() {
                TokenKind::Str(key) => {
                    self.advance();
                    Ok(index(Expr::Identity, Expr::Literal(Value::String(key))))
                }
                TokenKind::LBracket => {
                    self.advance();
                    self.bracket_suffix(Expr::Identity)
                }
                _ => Ok(Expr::Identity),
            },
            TokenKind::Field(name) => Ok(index(Expr::Identity, Expr::Literal(Value::String(name)))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::LParen => {
                let inner = self.nested(Self::pipe)?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                if self.eat(&TokenKind::RBracket) {
                    return Ok(Expr::Array(None));
                }
                let inner = self.nested(Self::pipe)?;
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Expr::Array(Some(Box::new(inner))))
            }
            TokenKind::LBrace => self.nested(Self::object),
            TokenKind::Ident(name) => self.ident(name),
            TokenKind::Eof => Err(self.error("unexpected end of expression")),
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {other:?}")))
            }
        }
    }

    fn ident(&mut self, name: String) -> Result<Expr, QueryError> {
        match name.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            _ => {}
        }

        // Every supported builtin takes at most one argument.
        let mut args = Vec::new();
        if self.eat(&TokenKind::LParen) {
            args.push(self.nested(Self::pipe)?);
            self.expect(&TokenKind::RParen, "')' after function argument")?;
        }

        let builtin = Builtin::lookup(&name, args.len()).ok_or(QueryError::UnknownFunction {
            name,
            arity: args.len(),
        })?;
        Ok(Expr::Call(builtin, args))
    }

    fn object(&mut self) -> Result<Expr, QueryError> {
        let mut entries = Vec::new();
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let key = match self.advance() {
                TokenKind::Ident(name) => ObjectKey::Literal(name),
                TokenKind::Str(name) => ObjectKey::Literal(name),
                TokenKind::LParen => {
                    let key = self.pipe()?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    ObjectKey::Computed(key)
                }
                other => {
                    self.pos -= 1;
                    return Err(self.error(format!("invalid object key {other:?}")));
                }
            };

            let value = if self.eat(&TokenKind::Colon) {
                self.alternative()?
            } else {
                match &key {
                    ObjectKey::Literal(name) => {
                        index(Expr::Identity, Expr::Literal(Value::String(name.clone())))
                    }
                    ObjectKey::Computed(_) => {
                        return Err(self.error("computed object key needs a value"));
                    }
                }
            };
            entries.push((key, value));

            if self.eat(&TokenKind::RBrace) {
                return Ok(Expr::Object(entries));
            }
            self.expect(&TokenKind::Comma, "',' or '}'")?;
        }
    }
}

fn index(target: Expr, key: Expr) -> Expr {
    Expr::Index {
        target: Box::new(target),
        key: Box::new(key),
    }
}
