//! Formula tokenizer.
//!
//! The lexer never fails: characters it cannot classify become [`TokenKind::BadToken`] with a
//! diagnostic, and the stream always ends in [`TokenKind::Eof`].

use formula_refs::Address;
use serde::{Deserialize, Serialize};

use crate::value::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number { value: f64, is_integer: bool },
    String(String),
    Logical(bool),
    Error(ErrorKind),
    Identifier(String),
    /// An address-shaped word (`A1`, `$B$2`, `$C`, `$4`), already parsed.
    Address(Address),
    /// `Sheet1!` or `'My Sheet'!`; holds the unquoted sheet name.
    SheetLocator(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Amp,
    Percent,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Comma,
    Semicolon,
    Colon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Whitespace,
    BadToken(String),
    Eof,
}

impl TokenKind {
    /// Short name used in parser diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Number { .. } => "Number",
            TokenKind::String(_) => "String",
            TokenKind::Logical(_) => "Logical",
            TokenKind::Error(_) => "Error",
            TokenKind::Identifier(_) => "Identifier",
            TokenKind::Address(_) => "Address",
            TokenKind::SheetLocator(_) => "SheetLocator",
            TokenKind::Plus => "Plus",
            TokenKind::Minus => "Minus",
            TokenKind::Star => "Star",
            TokenKind::Slash => "Slash",
            TokenKind::Caret => "Caret",
            TokenKind::Amp => "Ampersand",
            TokenKind::Percent => "Percent",
            TokenKind::Eq => "Equals",
            TokenKind::Ne => "NotEqualTo",
            TokenKind::Lt => "LessThan",
            TokenKind::Gt => "GreaterThan",
            TokenKind::Le => "LessThanOrEqualTo",
            TokenKind::Ge => "GreaterThanOrEqualTo",
            TokenKind::Comma => "Comma",
            TokenKind::Semicolon => "SemiColon",
            TokenKind::Colon => "Colon",
            TokenKind::LParen => "LeftParenthesis",
            TokenKind::RParen => "RightParenthesis",
            TokenKind::LBrace => "LeftCurlyBracket",
            TokenKind::RBrace => "RightCurlyBracket",
            TokenKind::Whitespace => "Whitespace",
            TokenKind::BadToken(_) => "BadToken",
            TokenKind::Eof => "Eof",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Tokens plus the diagnostics collected while producing them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub errors: Vec<String>,
}

/// Tokenize `formula` for the parser: whitespace is dropped and the stream ends in `Eof`.
pub fn lex(formula: &str) -> LexOutput {
    let mut out = lex_with_trivia(formula);
    out.tokens
        .retain(|t| !matches!(t.kind, TokenKind::Whitespace));
    out
}

/// Tokenize `formula`, keeping whitespace tokens (useful for editors).
pub fn lex_with_trivia(formula: &str) -> LexOutput {
    Lexer::new(formula).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    errors: Vec<String>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> LexOutput {
        while let Some(c) = self.peek_char() {
            let start = self.pos;
            match c {
                c if c.is_whitespace() => {
                    self.take_while(char::is_whitespace);
                    self.push(TokenKind::Whitespace, start);
                }
                '0'..='9' => self.lex_number(),
                '.' if self.peek_nth_char(1).is_some_and(|d| d.is_ascii_digit()) => {
                    self.lex_number()
                }
                '"' => self.lex_string(),
                '\'' => self.lex_quoted_sheet(),
                '#' => self.lex_error_literal(),
                c if c == '$' || c == '_' || c.is_alphabetic() => self.lex_word(),
                '<' => {
                    self.bump();
                    let kind = match self.peek_char() {
                        Some('=') => {
                            self.bump();
                            TokenKind::Le
                        }
                        Some('>') => {
                            self.bump();
                            TokenKind::Ne
                        }
                        _ => TokenKind::Lt,
                    };
                    self.push(kind, start);
                }
                '>' => {
                    self.bump();
                    let kind = if self.peek_char() == Some('=') {
                        self.bump();
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    };
                    self.push(kind, start);
                }
                _ => {
                    self.bump();
                    let kind = match c {
                        '+' => TokenKind::Plus,
                        '-' => TokenKind::Minus,
                        '*' => TokenKind::Star,
                        '/' => TokenKind::Slash,
                        '^' => TokenKind::Caret,
                        '&' => TokenKind::Amp,
                        '%' => TokenKind::Percent,
                        '=' => TokenKind::Eq,
                        ',' => TokenKind::Comma,
                        ';' => TokenKind::Semicolon,
                        ':' => TokenKind::Colon,
                        '(' => TokenKind::LParen,
                        ')' => TokenKind::RParen,
                        '{' => TokenKind::LBrace,
                        '}' => TokenKind::RBrace,
                        other => {
                            self.errors
                                .push(format!("Unexpected character '{other}' at {start}"));
                            TokenKind::BadToken(other.to_string())
                        }
                    };
                    self.push(kind, start);
                }
            }
        }

        let end = self.src.len();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(end, end),
        });
        LexOutput {
            tokens: self.tokens,
            errors: self.errors,
        }
    }

    fn lex_number(&mut self) {
        let start = self.pos;
        let mut is_integer = true;
        self.take_while(|c| c.is_ascii_digit());
        if self.peek_char() == Some('.') {
            is_integer = false;
            self.bump();
            self.take_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let exponent_digit = match self.peek_nth_char(1) {
                Some('+' | '-') => self.peek_nth_char(2),
                other => other,
            };
            if exponent_digit.is_some_and(|d| d.is_ascii_digit()) {
                is_integer = false;
                self.bump();
                if matches!(self.peek_char(), Some('+' | '-')) {
                    self.bump();
                }
                self.take_while(|c| c.is_ascii_digit());
            }
        }

        let raw = &self.src[start..self.pos];
        match raw.parse::<f64>() {
            Ok(value) => self.push(TokenKind::Number { value, is_integer }, start),
            Err(_) => {
                self.errors.push(format!("Invalid number '{raw}' at {start}"));
                self.push(TokenKind::BadToken(raw.to_string()), start);
            }
        }
    }

    fn lex_string(&mut self) {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => {
                    if self.peek_char() == Some('"') {
                        self.bump();
                        value.push('"');
                    } else {
                        self.push(TokenKind::String(value), start);
                        return;
                    }
                }
                Some(c) => value.push(c),
                None => {
                    self.errors
                        .push(format!("Unterminated string literal at {start}"));
                    let raw = self.src[start..].to_string();
                    self.push(TokenKind::BadToken(raw), start);
                    return;
                }
            }
        }
    }

    fn lex_quoted_sheet(&mut self) {
        let start = self.pos;
        self.bump();
        let mut name = String::new();
        loop {
            match self.bump() {
                Some('\'') => {
                    if self.peek_char() == Some('\'') {
                        self.bump();
                        name.push('\'');
                        continue;
                    }
                    break;
                }
                Some(c) => name.push(c),
                None => {
                    self.errors
                        .push(format!("Unterminated sheet name at {start}"));
                    let raw = self.src[start..].to_string();
                    self.push(TokenKind::BadToken(raw), start);
                    return;
                }
            }
        }

        if self.peek_char() == Some('!') {
            self.bump();
            self.push(TokenKind::SheetLocator(name), start);
        } else {
            self.errors
                .push(format!("Expected '!' after sheet name '{name}' at {start}"));
            let raw = self.src[start..self.pos].to_string();
            self.push(TokenKind::BadToken(raw), start);
        }
    }

    fn lex_error_literal(&mut self) {
        let start = self.pos;
        let rest = &self.src[start..];
        let matched = [
            ErrorKind::Ref,
            ErrorKind::Name,
            ErrorKind::Circular,
            ErrorKind::NA,
            ErrorKind::Value,
            ErrorKind::Div0,
        ]
        .into_iter()
        .filter(|kind| {
            let code = kind.as_code();
            rest.len() >= code.len()
                && rest.is_char_boundary(code.len())
                && rest[..code.len()].eq_ignore_ascii_case(code)
        })
        .max_by_key(|kind| kind.as_code().len());

        match matched {
            Some(kind) => {
                self.pos += kind.as_code().len();
                self.push(TokenKind::Error(kind), start);
            }
            None => {
                self.bump();
                self.errors
                    .push(format!("Unknown error literal at {start}"));
                self.push(TokenKind::BadToken("#".to_string()), start);
            }
        }
    }

    fn lex_word(&mut self) {
        let start = self.pos;
        self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '$');
        let word = &self.src[start..self.pos];

        if self.peek_char() == Some('!') {
            self.bump();
            self.push(TokenKind::SheetLocator(word.to_string()), start);
            return;
        }

        if word.contains('$') {
            match Address::parse(word) {
                Some(address) => self.push(TokenKind::Address(address), start),
                None => {
                    self.errors
                        .push(format!("Invalid address '{word}' at {start}"));
                    self.push(TokenKind::BadToken(word.to_string()), start);
                }
            }
            return;
        }

        // `LOG10(` is a function call even though `LOG10` is address-shaped.
        if self.peek_char() == Some('(') {
            self.push(TokenKind::Identifier(word.to_string()), start);
            return;
        }

        if word.eq_ignore_ascii_case("TRUE") {
            self.push(TokenKind::Logical(true), start);
        } else if word.eq_ignore_ascii_case("FALSE") {
            self.push(TokenKind::Logical(false), start);
        } else if let Some(address) = Address::parse(word) {
            self.push(TokenKind::Address(address), start);
        } else {
            self.push(TokenKind::Identifier(word.to_string()), start);
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, self.pos),
        });
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth_char(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn take_while<F>(&mut self, pred: F)
    where
        F: Fn(char) -> bool,
    {
        while let Some(c) = self.peek_char() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_refs::{CellAddress, ColAddress, RowAddress};

    fn kinds(formula: &str) -> Vec<TokenKind> {
        lex(formula).tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn classifies_addresses_and_identifiers() {
        assert_eq!(
            kinds("=A1+$B$2*x"),
            vec![
                TokenKind::Eq,
                TokenKind::Address(Address::Cell(CellAddress::new(0, 0))),
                TokenKind::Plus,
                TokenKind::Address(Address::Cell(CellAddress::fixed(1, 1, true, true))),
                TokenKind::Star,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn fixed_bands_lex_as_addresses() {
        assert_eq!(
            kinds("$C:$4"),
            vec![
                TokenKind::Address(Address::Col(ColAddress::new(2, true))),
                TokenKind::Colon,
                TokenKind::Address(Address::Row(RowAddress::new(3, true))),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn address_shaped_function_names_stay_identifiers() {
        assert_eq!(
            kinds("LOG10(1)")[0],
            TokenKind::Identifier("LOG10".to_string())
        );
    }

    #[test]
    fn sheet_locators_plain_and_quoted() {
        assert_eq!(
            kinds("Sheet2!A1")[0],
            TokenKind::SheetLocator("Sheet2".to_string())
        );
        assert_eq!(
            kinds("'It''s here'!A1")[0],
            TokenKind::SheetLocator("It's here".to_string())
        );
    }

    #[test]
    fn literals() {
        assert_eq!(
            kinds("1.5 \"a\"\"b\" true #N/A 7"),
            vec![
                TokenKind::Number {
                    value: 1.5,
                    is_integer: false
                },
                TokenKind::String("a\"b".to_string()),
                TokenKind::Logical(true),
                TokenKind::Error(ErrorKind::NA),
                TokenKind::Number {
                    value: 7.0,
                    is_integer: true
                },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(
            kinds("<><=>=<>"),
            vec![
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Ne,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn bad_input_is_recorded_and_lexing_continues() {
        let out = lex("=1 ~ 2");
        assert_eq!(out.errors.len(), 1);
        assert!(out
            .tokens
            .iter()
            .any(|t| t.kind == TokenKind::BadToken("~".to_string())));
        assert_eq!(out.tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
    }

    #[test]
    fn unterminated_string_is_a_bad_token() {
        let out = lex("=\"abc");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
    }

    #[test]
    fn whitespace_is_kept_only_with_trivia() {
        assert!(lex_with_trivia("1 + 2")
            .tokens
            .iter()
            .any(|t| t.kind == TokenKind::Whitespace));
        assert_eq!(lex("1 + 2").tokens.len(), 4);
    }
}
