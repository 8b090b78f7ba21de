use std::str::FromStr;

use crate::errors::SyntaxError;
use crate::tokens::{Keyword, Token, TokenKind};

/// Split a source string into tokens. Whitespace and `--`/`/* */` comments
/// are skipped; input is expected to fit in memory.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut cursor = Cursor::new(source);
    let mut tokens = Vec::new();

    loop {
        cursor.skip_trivia()?;
        if cursor.peek() == Cursor::EOF {
            break;
        }
        tokens.push(cursor.next_token()?);
    }

    Ok(tokens)
}

struct Cursor<'t> {
    text: &'t str,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'t> Cursor<'t> {
    const EOF: char = '\0';

    fn new(text: &'t str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> char {
        self.text[self.pos..].chars().next().unwrap_or(Self::EOF)
    }

    fn peek_next(&self) -> char {
        let mut chars = self.text[self.pos..].chars();
        chars.next();
        chars.next().unwrap_or(Self::EOF)
    }

    fn shift(&mut self) -> char {
        let Some(ch) = self.text[self.pos..].chars().next() else {
            return Self::EOF;
        };
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn shift_while(&mut self, f: impl Fn(char) -> bool + Copy) {
        while self.peek() != Self::EOF && f(self.peek()) {
            self.shift();
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            token: None,
            line: self.line,
            col: self.col,
        }
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            let ch = self.peek();
            if ch.is_whitespace() {
                self.shift();
            } else if ch == '-' && self.peek_next() == '-' {
                self.shift_while(|c| c != '\n');
            } else if ch == '/' && self.peek_next() == '*' {
                self.skip_block_comment()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), SyntaxError> {
        let start = self.error_here("Unterminated block comment");
        self.shift();
        self.shift();
        loop {
            match self.peek() {
                Self::EOF => return Err(start),
                '*' if self.peek_next() == '/' => {
                    self.shift();
                    self.shift();
                    return Ok(());
                }
                _ => {
                    self.shift();
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, SyntaxError> {
        let (offset, line, col) = (self.pos as u32, self.line, self.col);
        let ch = self.peek();

        let (kind, text) = if ch.is_ascii_alphabetic() || ch == '_' {
            self.lex_word()
        } else if ch.is_ascii_digit() {
            self.lex_number()
        } else if ch == '\'' || ch == '"' {
            self.lex_string(ch)?
        } else if ch == '`' {
            self.lex_backtick()?
        } else {
            self.lex_symbol()?
        };

        Ok(Token::new(kind, text, offset, line, col))
    }

    fn lex_word(&mut self) -> (TokenKind, String) {
        let start = self.pos;
        self.shift_while(|c| c.is_ascii_alphanumeric() || c == '_');
        let word = &self.text[start..self.pos];
        let kind = match Keyword::from_str(word) {
            Ok(kw) => TokenKind::Keyword(kw),
            Err(_) => TokenKind::Ident,
        };
        (kind, word.to_string())
    }

    fn lex_number(&mut self) -> (TokenKind, String) {
        let start = self.pos;
        self.shift_while(|c| c.is_ascii_digit());
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.shift();
            self.shift_while(|c| c.is_ascii_digit());
        }
        (TokenKind::Number, self.text[start..self.pos].to_string())
    }

    fn lex_string(&mut self, quote: char) -> Result<(TokenKind, String), SyntaxError> {
        let unterminated = self.error_here("Unterminated string literal");
        self.shift();
        let mut text = String::new();
        loop {
            match self.shift() {
                Self::EOF => return Err(unterminated),
                '\\' => {
                    let escaped = self.shift();
                    if escaped == Self::EOF {
                        return Err(unterminated);
                    }
                    text.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        other => other,
                    });
                }
                ch if ch == quote => return Ok((TokenKind::Quoted, text)),
                ch => text.push(ch),
            }
        }
    }

    /// Backtick identifiers may contain whitespace; they lex as identifiers
    /// so quoted column names behave like plain ones.
    fn lex_backtick(&mut self) -> Result<(TokenKind, String), SyntaxError> {
        let unterminated = self.error_here("Unterminated backtick identifier");
        self.shift();
        let start = self.pos;
        self.shift_while(|c| c != '`');
        if self.peek() == Self::EOF {
            return Err(unterminated);
        }
        let text = self.text[start..self.pos].to_string();
        self.shift();
        Ok((TokenKind::Ident, text))
    }

    fn lex_symbol(&mut self) -> Result<(TokenKind, String), SyntaxError> {
        const DOUBLES: [&str; 5] = ["<>", "<=", ">=", "!=", "||"];
        const SINGLES: &str = "(),;=<>+-*/%@.";

        let two: String = [self.peek(), self.peek_next()].into_iter().collect();
        if DOUBLES.contains(&two.as_str()) {
            self.shift();
            self.shift();
            return Ok((TokenKind::Symbol, two));
        }

        let ch = self.peek();
        if SINGLES.contains(ch) {
            self.shift();
            return Ok((TokenKind::Symbol, ch.to_string()));
        }

        Err(self.error_here(format!("Unexpected character '{ch}'")))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn texts(source: &str) -> Vec<String> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.text.to_string())
            .collect()
    }

    #[test]
    fn numbers_symbols_and_words() {
        assert_eq!(
            texts("SELECT a + 1.5 <> b"),
            vec!["SELECT", "a", "+", "1.5", "<>", "b"]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            texts("a -- trailing\n/* block\ncomment */ b"),
            vec!["a", "b"]
        );
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r"'it\'s \t here'").unwrap();
        assert_eq!(tokens[0].text(), "it's \t here");
        assert_eq!(tokens[0].kind, TokenKind::Quoted);
    }

    #[test]
    fn backtick_identifiers_allow_whitespace() {
        let tokens = tokenize("`Last Sale`").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[0].text(), "Last Sale");
    }

    #[test]
    fn qualified_reference_is_three_tokens() {
        assert_eq!(texts("t.Symbol"), vec!["t", ".", "Symbol"]);
    }

    #[test]
    fn line_positions_follow_newlines() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("'oops").is_err());
    }
}
