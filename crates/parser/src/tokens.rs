use smol_str::SmolStr;
use strum_macros::{AsRefStr, EnumString};

use crate::errors::SyntaxError;
use crate::lexer;

/// Reserved words. Only structural words are reserved; type names and
/// function names lex as plain identifiers so they remain usable as column
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive)]
pub enum Keyword {
    And,
    As,
    Asc,
    Avro,
    By,
    Case,
    Cast,
    Column,
    Compression,
    Connect,
    Create,
    Csv,
    Declare,
    Delimiter,
    Desc,
    Describe,
    Disconnect,
    Distinct,
    Else,
    End,
    False,
    Format,
    From,
    Group,
    Gzip,
    Headers,
    Insert,
    Into,
    Is,
    Json,
    Like,
    Limit,
    Not,
    Null,
    Numbers,
    Or,
    Order,
    Overwrite,
    Properties,
    Psv,
    Quoted,
    Rlike,
    Select,
    Set,
    Show,
    Text,
    Then,
    To,
    Top,
    True,
    Tsv,
    Values,
    View,
    When,
    Where,
    With,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Keyword(Keyword),
    Number,
    Quoted,
    Symbol,
}

/// A lexeme with its kind and source position. `text` holds the unquoted
/// content for quoted strings and backtick identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: SmolStr,
    pub offset: u32,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<SmolStr>, offset: u32, line: u32, col: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            offset,
            line,
            col,
        }
    }

    pub fn text(&self) -> &str {
        self.text.as_ref()
    }

    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Ident)
    }

    pub fn is_number(&self) -> bool {
        matches!(self.kind, TokenKind::Number)
    }

    pub fn is_quoted(&self) -> bool {
        matches!(self.kind, TokenKind::Quoted)
    }

    pub fn is_symbol(&self, s: &str) -> bool {
        matches!(self.kind, TokenKind::Symbol) && self.text == s
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match self.kind {
            TokenKind::Keyword(kw) => Some(kw),
            _ => None,
        }
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.keyword() == Some(kw)
    }

    /// Case-insensitive match for words, exact match for symbols. Quoted
    /// strings never match: `'from'` is data, not the FROM keyword.
    pub fn matches(&self, text: &str) -> bool {
        match self.kind {
            TokenKind::Ident | TokenKind::Keyword(_) => self.text.eq_ignore_ascii_case(text),
            TokenKind::Number | TokenKind::Symbol => self.text == text,
            TokenKind::Quoted => false,
        }
    }
}

/// Forward-only cursor over the token list with a LIFO mark stack for
/// backtracking. The raw source is retained for regex tags, which match the
/// untokenized remainder.
#[derive(Debug, Clone)]
pub struct TokenStream {
    source: String,
    tokens: Vec<Token>,
    pos: usize,
    marks: Vec<usize>,
}

impl TokenStream {
    pub fn new(source: impl Into<String>) -> Result<Self, SyntaxError> {
        let source = source.into();
        let tokens = lexer::tokenize(&source)?;
        Ok(Self {
            source,
            tokens,
            pos: 0,
            marks: Vec::new(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_next(&self) -> bool {
        self.pos < self.tokens.len()
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    pub fn next(&mut self) -> Result<Token, SyntaxError> {
        self.next_option()
            .ok_or_else(|| SyntaxError::eof("Unexpected end of input"))
    }

    pub fn next_option(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(token)
    }

    pub fn is(&self, text: &str) -> bool {
        self.peek().is_some_and(|token| token.matches(text))
    }

    /// Consume the next token iff it matches `text`.
    pub fn next_if(&mut self, text: &str) -> bool {
        if self.is(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, text: &str) -> Result<Token, SyntaxError> {
        if self.is(text) {
            self.next()
        } else {
            Err(SyntaxError::expected(
                &format!("'{text}'"),
                self.peek(),
            ))
        }
    }

    /// Push the current position onto the mark stack.
    pub fn mark(&mut self) {
        self.marks.push(self.pos);
    }

    /// Pop the most recent mark and rewind to it.
    pub fn reset(&mut self) {
        let mark = self.marks.pop().expect("reset without a matching mark");
        self.pos = mark;
    }

    /// Pop the most recent mark without moving.
    pub fn discard_mark(&mut self) {
        self.marks.pop().expect("discard without a matching mark");
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Byte offset of the current token, or the end of the source when
    /// exhausted.
    pub(crate) fn byte_offset(&self) -> usize {
        self.peek()
            .map_or(self.source.len(), |token| token.offset as usize)
    }

    /// Advance past every token that starts before `end`.
    pub(crate) fn advance_to_byte(&mut self, end: usize) {
        while self
            .peek()
            .is_some_and(|token| (token.offset as usize) < end)
        {
            self.pos += 1;
        }
    }

    pub fn syntax_error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.peek())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn keywords_lex_case_insensitively() {
        let ts = TokenStream::new("select FROM WheRe symbol").unwrap();
        let kinds: Vec<_> = ts.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword(Keyword::Select),
                TokenKind::Keyword(Keyword::From),
                TokenKind::Keyword(Keyword::Where),
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn mark_reset_is_lifo() {
        let mut ts = TokenStream::new("a b c d").unwrap();
        ts.mark();
        ts.next().unwrap();
        ts.mark();
        ts.next().unwrap();
        assert!(ts.is("c"));
        ts.reset();
        assert!(ts.is("b"));
        ts.reset();
        assert!(ts.is("a"));
    }

    #[test]
    fn next_if_consumes_only_on_match() {
        let mut ts = TokenStream::new("LIMIT 10").unwrap();
        assert!(!ts.next_if("TOP"));
        assert!(ts.next_if("limit"));
        assert!(ts.peek().unwrap().is_number());
    }

    #[test]
    fn quoted_strings_never_match_keywords() {
        let mut ts = TokenStream::new("'from'").unwrap();
        assert!(!ts.is("from"));
        let token = ts.next().unwrap();
        assert_eq!(token.kind, TokenKind::Quoted);
        assert_eq!(token.text(), "from");
    }

    #[test]
    fn expect_reports_the_offending_token() {
        let mut ts = TokenStream::new("GROUP UP").unwrap();
        ts.next().unwrap();
        let err = ts.expect("BY").unwrap_err();
        assert_eq!(err.token.as_deref(), Some("UP"));
        assert_eq!(err.line, 1);
    }
}
