//! Query-language tokens and lexer.
//!
//! Identifiers start with a letter, `_`, `/`, `-`, `*` or `?` and admit
//! digits and `.` in body positions, so path fragments, glob patterns and
//! date literals (`2025-01-01`) lex as single bare words. A digit run
//! immediately followed by identifier-body characters also becomes one
//! word (`7d`). `.` followed by another `.` is always the range operator.

use ministore_core::{Error, Result};

/// One lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare word: field name, keyword value, glob, date or duration literal.
    Ident(String),
    /// Double-quoted string with standard escapes.
    Str(String),
    /// Numeric literal, kept as source text.
    Number(String),
    Colon,
    Range,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Gt,
    Ge,
    Lt,
    Le,
    Eof,
}

impl Token {
    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{s}'"),
            Token::Str(s) => format!("\"{s}\""),
            Token::Number(s) => format!("'{s}'"),
            Token::Colon => "':'".into(),
            Token::Range => "'..'".into(),
            Token::And => "'AND'".into(),
            Token::Or => "'OR'".into(),
            Token::Not => "'NOT'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Gt => "'>'".into(),
            Token::Ge => "'>='".into(),
            Token::Lt => "'<'".into(),
            Token::Le => "'<='".into(),
            Token::Eof => "end of query".into(),
        }
    }
}

/// Lexes a query string into tokens, ending with [`Token::Eof`].
pub fn lex(input: &str) -> Result<Vec<Token>> {
    Lexer::new(input).run()
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    input: &'a str,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '_' | '/' | '-' | '*' | '?')
}

fn is_ident_body(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '/' | '-' | '*' | '?' | '.')
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            input,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }
            let token = match c {
                '(' => {
                    self.pos += 1;
                    Token::LParen
                }
                ')' => {
                    self.pos += 1;
                    Token::RParen
                }
                ':' => {
                    self.pos += 1;
                    Token::Colon
                }
                '>' => {
                    self.pos += 1;
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        Token::Ge
                    } else {
                        Token::Gt
                    }
                }
                '<' => {
                    self.pos += 1;
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        Token::Le
                    } else {
                        Token::Lt
                    }
                }
                '&' => {
                    self.pos += 1;
                    Token::And
                }
                '|' => {
                    self.pos += 1;
                    if self.peek() == Some('|') {
                        self.pos += 1;
                        Token::Or
                    } else {
                        return Err(Error::query_parse("expected '||'"));
                    }
                }
                '!' => {
                    self.pos += 1;
                    Token::Not
                }
                '.' => {
                    if self.peek_at(1) == Some('.') {
                        self.pos += 2;
                        Token::Range
                    } else {
                        return Err(Error::query_parse("unexpected '.'"));
                    }
                }
                '"' => self.string()?,
                c if c.is_ascii_digit() => self.number_or_word(false),
                '-' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.pos += 1;
                    self.number_or_word(true)
                }
                c if is_ident_start(c) => self.word(String::new()),
                other => {
                    return Err(Error::query_parse(format!(
                        "unexpected character {other:?} in query {:?}",
                        self.input
                    )));
                }
            };
            tokens.push(token);
        }
        tokens.push(Token::Eof);
        Ok(tokens)
    }

    /// Scans a quoted string with standard escapes.
    fn string(&mut self) -> Result<Token> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(Error::query_parse("unterminated string")),
                Some('"') => return Ok(Token::Str(out)),
                Some('\\') => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('/') => out.push('/'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('u') => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let d = self
                                .bump()
                                .and_then(|c| c.to_digit(16))
                                .ok_or_else(|| {
                                    Error::query_parse("invalid \\u escape")
                                })?;
                            code = code * 16 + d;
                        }
                        let c = char::from_u32(code)
                            .ok_or_else(|| Error::query_parse("invalid \\u escape"))?;
                        out.push(c);
                    }
                    other => {
                        return Err(Error::query_parse(format!(
                            "invalid escape {other:?}"
                        )));
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    /// Scans a numeric literal; degrades to a bare word when identifier
    /// characters follow the digits (`7d`, `2025-01-01`).
    fn number_or_word(&mut self, negative: bool) -> Token {
        let mut out = String::new();
        if negative {
            out.push('-');
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            out.push(self.bump().unwrap());
        }
        // A decimal point, unless it is the start of a `..` range.
        if self.peek() == Some('.')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            out.push(self.bump().unwrap());
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                out.push(self.bump().unwrap());
            }
        }
        if self.peek().is_some_and(|c| is_ident_body(c) && c != '.') {
            return self.word(out);
        }
        Token::Number(out)
    }

    /// Scans a bare word; recognizes AND/OR/NOT at word boundaries.
    fn word(&mut self, prefix: String) -> Token {
        let mut out = prefix;
        while let Some(c) = self.peek() {
            if c == '.' {
                // `..` terminates the word; a lone `.` is part of it.
                if self.peek_at(1) == Some('.') {
                    break;
                }
                out.push(self.bump().unwrap());
            } else if is_ident_body(c) {
                out.push(self.bump().unwrap());
            } else {
                break;
            }
        }
        match out.to_ascii_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => Token::Ident(out),
        }
    }
}
