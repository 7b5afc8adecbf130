//! Tokenizer for the query language.

use super::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Dot,
    /// `.name` lexed as one token.
    Field(String),
    Ident(String),
    Str(String),
    Number(serde_json::Number),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Comma,
    Colon,
    Question,
    Alt,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, QueryError> {
    let mut lexer = Lexer {
        src,
        chars: src.char_indices().peekable(),
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Lexer<'_> {
    fn error(&self, offset: usize, message: impl Into<String>) -> QueryError {
        QueryError::Parse {
            position: offset,
            message: message.into(),
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn next_token(&mut self) -> Result<Token, QueryError> {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '#' {
                // comment to end of line
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.chars.next();
                }
            } else if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }

        let Some((offset, c)) = self.chars.next() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                offset: self.src.len(),
            });
        };

        let kind = match c {
            '.' => match self.chars.peek() {
                Some(&(_, n)) if is_ident_start(n) => TokenKind::Field(self.ident()),
                _ => TokenKind::Dot,
            },
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '|' => TokenKind::Pipe,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '%' => TokenKind::Percent,
            '/' => {
                if self.eat('/') {
                    TokenKind::Alt
                } else {
                    TokenKind::Slash
                }
            }
            '=' => {
                if self.eat('=') {
                    TokenKind::Eq
                } else {
                    return Err(self.error(offset, "assignment is not supported"));
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::Ne
                } else {
                    return Err(self.error(offset, "unexpected '!'"));
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '"' => TokenKind::Str(self.string(offset)?),
            c if c.is_ascii_digit() => TokenKind::Number(self.number(offset)?),
            c if is_ident_start(c) => {
                let mut name = c.to_string();
                name.push_str(&self.ident());
                TokenKind::Ident(name)
            }
            other => return Err(self.error(offset, format!("unexpected character '{other}'"))),
        };
        Ok(Token { kind, offset })
    }

    fn ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if !is_ident_continue(c) {
                break;
            }
            name.push(c);
            self.chars.next();
        }
        name
    }

    fn string(&mut self, start: usize) -> Result<String, QueryError> {
        let mut out = String::new();
        loop {
            let Some((offset, c)) = self.chars.next() else {
                return Err(self.error(start, "unterminated string"));
            };
            match c {
                '"' => return Ok(out),
                '\\' => {
                    let Some((_, esc)) = self.chars.next() else {
                        return Err(self.error(offset, "unterminated escape"));
                    };
                    match esc {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'u' => out.push(self.unicode_escape(offset)?),
                        other => {
                            return Err(self.error(offset, format!("invalid escape '\\{other}'")));
                        }
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self, offset: usize) -> Result<char, QueryError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .chars
                .next()
                .and_then(|(_, c)| c.to_digit(16))
                .ok_or_else(|| self.error(offset, "invalid \\u escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.error(offset, "invalid unicode code point"))
    }

    fn number(&mut self, start: usize) -> Result<serde_json::Number, QueryError> {
        let mut end = start + 1;
        let mut is_float = false;
        while let Some(&(i, c)) = self.chars.peek() {
            let accept = if c.is_ascii_digit() {
                true
            } else if c == '.' && !is_float {
                is_float = true;
                true
            } else if c == 'e' || c == 'E' {
                is_float = true;
                self.chars.next();
                end = i + 1;
                if let Some(&(j, sign)) = self.chars.peek()
                    && (sign == '+' || sign == '-')
                {
                    self.chars.next();
                    end = j + 1;
                }
                continue;
            } else {
                false
            };
            if !accept {
                break;
            }
            self.chars.next();
            end = i + c.len_utf8();
        }

        let text = &self.src[start..end];
        if !is_float && let Ok(n) = text.parse::<i64>() {
            return Ok(n.into());
        }
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .ok_or_else(|| self.error(start, format!("invalid number '{text}'")))
    }
}
