//! Lexer: converts a source buffer into a stream of [`Token`]s.
//!
//! The public surface is a pull-based queue with one-token lookahead, in the
//! spirit of `y-lang`'s char-by-char [`std::iter::Peekable`] scanner
//! (`crates/why_lib/src/lexer/mod.rs`), adapted to MiniScript's token rules:
//! compound keywords (`end if`, `else if`), doubled-quote string escapes,
//! and line-continuation detection for the REPL.

mod token;
mod token_kind;

pub use token::Token;
pub use token_kind::{Keyword, OpKind, TokenKind};

use std::collections::VecDeque;

use log::trace;

use crate::error::{LexError, SourceLoc};

/// Maximum length of a string literal, matching the runtime string cap.
pub const MAX_STRING_LEN: usize = (1 << 24) - 1;

#[derive(Debug, Clone)]
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    /// Current logical line, incremented only when a *real* newline
    /// (`\n`, `\r`, or `\r\n`) is dequeued, not when a `;` separator is.
    line: usize,
    queue: VecDeque<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            queue: VecDeque::new(),
        }
    }

    pub fn line_num(&self) -> usize {
        self.line
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.line)
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek_char();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat_horizontal_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
    }

    /// Skip horizontal whitespace and `//` comments, stopping right before
    /// an eol-producing character (or EOF). Does NOT skip eol characters
    /// themselves; those are tokens.
    fn skip_insignificant(&mut self) {
        loop {
            self.eat_horizontal_whitespace();
            if self.peek_char() == Some('/') && self.peek_char_at(1) == Some('/') {
                while !matches!(self.peek_char(), None | Some('\n') | Some('\r')) {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    /// Ensure the lookahead queue has at least one token, lexing a fresh one
    /// from the character stream if empty.
    fn fill(&mut self) -> Result<(), LexError> {
        if self.queue.is_empty() {
            let token = self.scan_token().map_err(|e| {
                trace!("{e}");
                e
            })?;
            self.queue.push_back(token);
        }
        Ok(())
    }

    /// Return the next token without consuming it. Idempotent.
    pub fn peek(&mut self) -> Result<Token, LexError> {
        self.fill()?;
        Ok(self.queue.front().cloned().unwrap())
    }

    /// Consume and return the next token.
    pub fn dequeue(&mut self) -> Result<Token, LexError> {
        self.fill()?;
        let token = self.queue.pop_front().unwrap();
        if let TokenKind::Eol = token.kind {
            if token.text != ";" {
                self.line += 1;
            }
        }
        Ok(token)
    }

    pub fn at_end(&mut self) -> bool {
        if !self.queue.is_empty() {
            return false;
        }
        self.peek_char().is_none()
    }

    fn scan_token(&mut self) -> Result<Token, LexError> {
        self.skip_insignificant();

        let line = self.line;
        let Some(c) = self.peek_char() else {
            return Ok(Token::new(TokenKind::Eof, "", line));
        };

        match c {
            '\r' => {
                self.pos += 1;
                if self.peek_char() == Some('\n') {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::Eol, "\r\n", line));
                }
                Ok(Token::new(TokenKind::Eol, "\r", line))
            }
            '\n' => {
                self.pos += 1;
                Ok(Token::new(TokenKind::Eol, "\n", line))
            }
            ';' => {
                self.pos += 1;
                Ok(Token::new(TokenKind::Eol, ";", line))
            }
            '"' => self.scan_string(line),
            '0'..='9' => self.scan_number(line),
            '.' if matches!(self.peek_char_at(1), Some('0'..='9')) => self.scan_number(line),
            c if is_identifier_start(c) => self.scan_identifier(line),
            _ => self.scan_operator(line),
        }
    }

    fn scan_string(&mut self, line: usize) -> Result<Token, LexError> {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') | Some('\r') => {
                    return Err(LexError::new("unterminated string literal", SourceLoc::new(line)));
                }
                Some('"') => {
                    self.pos += 1;
                    if self.peek_char() == Some('"') {
                        value.push('"');
                        self.pos += 1;
                        continue;
                    }
                    break;
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
            if value.len() > MAX_STRING_LEN {
                return Err(LexError::new("string literal too long", SourceLoc::new(line)));
            }
        }
        Ok(Token::new(TokenKind::String(value.clone()), value, line))
    }

    fn scan_number(&mut self, line: usize) -> Result<Token, LexError> {
        let start = self.pos;
        // first character already validated by caller
        self.pos += 1;
        loop {
            match self.peek_char() {
                Some('0'..='9') => self.pos += 1,
                Some('.') => self.pos += 1,
                Some('e') | Some('E') => {
                    self.pos += 1;
                    if matches!(self.peek_char(), Some('+') | Some('-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        Ok(Token::new(TokenKind::Number, text, line))
    }

    fn scan_identifier(&mut self, line: usize) -> Result<Token, LexError> {
        let start = self.pos;
        self.pos += 1;
        while matches!(self.peek_char(), Some(c) if is_identifier_continue(c)) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();

        if let Some(keyword) = Keyword::from_str(&text) {
            return self.finish_keyword(keyword, line);
        }

        Ok(Token::new(TokenKind::Identifier(text.clone()), text, line))
    }

    /// Handle compound keywords once a bare keyword has been recognized:
    /// `end X` (via recursive raw scan) and `else if` (via character
    /// lookahead, to keep `peek()` idempotent).
    fn finish_keyword(&mut self, keyword: Keyword, line: usize) -> Result<Token, LexError> {
        match keyword {
            Keyword::End => {
                self.eat_horizontal_whitespace();
                let follower_start = self.pos;
                let follower = self.scan_token()?;
                let TokenKind::Keyword(follower_kw) = follower.kind else {
                    return Err(LexError::new(
                        "'end' must be followed by 'if', 'while', 'for', or 'function'",
                        SourceLoc::new(line),
                    ));
                };
                let Some(combined) = Keyword::combine_end(follower_kw) else {
                    self.pos = follower_start;
                    return Err(LexError::new(
                        format!("'end {}' is not a valid block terminator", follower.text),
                        SourceLoc::new(line),
                    ));
                };
                Ok(Token::new(TokenKind::Keyword(combined), combined.text(), line))
            }
            Keyword::Else => {
                let save = self.pos;
                self.eat_horizontal_whitespace();
                if self.peek_char() == Some('i') && self.peek_char_at(1) == Some('f') {
                    let after = self.peek_char_at(2);
                    if !after.map(is_identifier_continue).unwrap_or(false) {
                        self.pos += 2;
                        return Ok(Token::new(TokenKind::Keyword(Keyword::ElseIf), "else if", line));
                    }
                }
                self.pos = save;
                Ok(Token::new(TokenKind::Keyword(Keyword::Else), "else", line))
            }
            other => Ok(Token::new(TokenKind::Keyword(other), other.text(), line)),
        }
    }

    fn scan_operator(&mut self, line: usize) -> Result<Token, LexError> {
        let two: Option<(char, char)> = match (self.peek_char(), self.peek_char_at(1)) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        };

        if let Some((a, b)) = two {
            let op = match (a, b) {
                ('=', '=') => Some(OpKind::EqEq),
                ('!', '=') => Some(OpKind::NotEq),
                ('<', '=') => Some(OpKind::LessEq),
                ('>', '=') => Some(OpKind::GreaterEq),
                ('+', '=') => Some(OpKind::PlusEq),
                ('-', '=') => Some(OpKind::MinusEq),
                ('*', '=') => Some(OpKind::StarEq),
                ('/', '=') => Some(OpKind::SlashEq),
                ('%', '=') => Some(OpKind::PercentEq),
                ('^', '=') => Some(OpKind::CaretEq),
                _ => None,
            };
            if let Some(op) = op {
                self.pos += 2;
                return Ok(Token::new(TokenKind::Op(op), op.text(), line));
            }
        }

        let c = self.advance().unwrap();
        let (kind, text): (TokenKind, &'static str) = match c {
            '+' => (TokenKind::Op(OpKind::Plus), "+"),
            '-' => (TokenKind::Op(OpKind::Minus), "-"),
            '*' => (TokenKind::Op(OpKind::Star), "*"),
            '/' => (TokenKind::Op(OpKind::Slash), "/"),
            '%' => (TokenKind::Op(OpKind::Percent), "%"),
            '^' => (TokenKind::Op(OpKind::Caret), "^"),
            '=' => (TokenKind::Op(OpKind::Eq), "="),
            '<' => (TokenKind::Op(OpKind::Less), "<"),
            '>' => (TokenKind::Op(OpKind::Greater), ">"),
            '(' => (TokenKind::LParen, "("),
            ')' => (TokenKind::RParen, ")"),
            '[' => (TokenKind::LSquare, "["),
            ']' => (TokenKind::RSquare, "]"),
            '{' => (TokenKind::LCurly, "{"),
            '}' => (TokenKind::RCurly, "}"),
            '@' => (TokenKind::AddressOf, "@"),
            ',' => (TokenKind::Comma, ","),
            '.' => (TokenKind::Dot, "."),
            ':' => (TokenKind::Colon, ":"),
            _ => {
                return Err(LexError::new(
                    format!("unexpected character '{c}'"),
                    SourceLoc::new(line),
                ))
            }
        };
        Ok(Token::new(kind, text, line))
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || (c as u32) > 0x9F
}

fn is_identifier_continue(c: char) -> bool {
    is_identifier_start(c) || c.is_ascii_digit()
}

/// Strip a trailing `//` comment from a single line of source, taking care
/// not to treat `//` inside a string literal as a comment start.
pub fn trim_comment(line_source: &str) -> String {
    let chars: Vec<char> = line_source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '/' && chars.get(i + 1) == Some(&'/') && !is_in_string_literal(i, &chars, 0) {
            return chars[..i].iter().collect();
        }
        i += 1;
    }
    line_source.to_owned()
}

/// Count unescaped `"` occurring in `chars[start_pos..char_pos]` to decide
/// whether `char_pos` sits inside a string literal (odd count = inside).
pub fn is_in_string_literal(char_pos: usize, chars: &[char], start_pos: usize) -> bool {
    let mut count = 0usize;
    let mut i = start_pos;
    while i < char_pos && i < chars.len() {
        if chars[i] == '"' {
            count += 1;
        }
        i += 1;
    }
    count % 2 == 1
}

/// The last non-comment, non-whitespace token on the final line of `source`,
/// used for line-continuation detection in the REPL.
pub fn last_token(source: &str) -> Option<Token> {
    let last_line = source.lines().last()?;
    let trimmed = trim_comment(last_line);
    if trimmed.trim().is_empty() {
        return None;
    }
    let mut lexer = Lexer::new(&trimmed);
    let mut last = None;
    loop {
        match lexer.dequeue() {
            Ok(token) if token.is_eof() => break,
            Ok(token) if token.is_eol() => continue,
            Ok(token) => last = Some(token),
            Err(_) => break,
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = vec![];
        loop {
            let token = lexer.dequeue().unwrap();
            if token.is_eof() {
                break;
            }
            out.push(token.kind);
        }
        out
    }

    #[test]
    fn lexes_identifier_and_number() {
        let mut lexer = Lexer::new("foo 42");
        let t1 = lexer.dequeue().unwrap();
        assert_eq!(t1.kind, TokenKind::Identifier("foo".into()));
        let t2 = lexer.dequeue().unwrap();
        assert_eq!(t2.kind, TokenKind::Number);
        assert_eq!(t2.text, "42");
        assert!(lexer.dequeue().unwrap().is_eof());
    }

    #[test]
    fn peek_is_idempotent() {
        let mut lexer = Lexer::new("alpha beta");
        let p1 = lexer.peek().unwrap();
        let p2 = lexer.peek().unwrap();
        assert_eq!(p1, p2);
        let d = lexer.dequeue().unwrap();
        assert_eq!(d, p1);
    }

    #[test]
    fn doubled_quote_escapes() {
        let mut lexer = Lexer::new(r#""Hi""There""#);
        let token = lexer.dequeue().unwrap();
        assert_eq!(token.kind, TokenKind::String("Hi\"There".into()));
    }

    #[test]
    fn unclosed_string_is_lex_error() {
        let mut lexer = Lexer::new("\"abc");
        assert!(lexer.dequeue().is_err());
    }

    #[test]
    fn end_if_combines() {
        let tokens = kinds("end if");
        assert_eq!(tokens, vec![TokenKind::Keyword(Keyword::EndIf)]);
    }

    #[test]
    fn end_without_follower_errors() {
        let mut lexer = Lexer::new("end");
        assert!(lexer.dequeue().is_err());
    }

    #[test]
    fn else_if_combines_but_else_alone_does_not() {
        assert_eq!(kinds("else if"), vec![TokenKind::Keyword(Keyword::ElseIf)]);
        assert_eq!(kinds("else"), vec![TokenKind::Keyword(Keyword::Else)]);
        // `elseif` as one identifier-ish word is NOT a compound: `if` must
        // be a standalone word.
        assert_eq!(kinds("elseif"), vec![TokenKind::Identifier("elseif".into())]);
    }

    #[test]
    fn line_numbering_is_monotonic() {
        let mut lexer = Lexer::new("a\nb\nc");
        assert_eq!(lexer.line_num(), 1);
        lexer.dequeue().unwrap(); // a
        assert_eq!(lexer.line_num(), 1);
        lexer.dequeue().unwrap(); // eol
        assert_eq!(lexer.line_num(), 2);
        lexer.dequeue().unwrap(); // b
        lexer.dequeue().unwrap(); // eol
        assert_eq!(lexer.line_num(), 3);
    }

    #[test]
    fn crlf_advances_line_by_one() {
        let mut lexer = Lexer::new("a\r\nb");
        lexer.dequeue().unwrap();
        assert_eq!(lexer.line_num(), 1);
        let eol = lexer.dequeue().unwrap();
        assert_eq!(eol.text, "\r\n");
        assert_eq!(lexer.line_num(), 2);
    }

    #[test]
    fn semicolon_does_not_advance_line() {
        let mut lexer = Lexer::new("a;b");
        lexer.dequeue().unwrap();
        lexer.dequeue().unwrap(); // ';'
        assert_eq!(lexer.line_num(), 1);
    }

    #[test]
    fn two_char_operators_take_precedence() {
        assert_eq!(kinds("<="), vec![TokenKind::Op(OpKind::LessEq)]);
        assert_eq!(kinds("<"), vec![TokenKind::Op(OpKind::Less)]);
    }

    #[test]
    fn trims_comment_outside_string() {
        assert_eq!(trim_comment("x = 1 // comment"), "x = 1 ");
        assert_eq!(trim_comment(r#"x = "//not a comment""#), r#"x = "//not a comment""#);
    }

    #[test]
    fn last_token_detects_trailing_operator() {
        let tok = last_token("x = 1 +").unwrap();
        assert_eq!(tok.kind, TokenKind::Op(OpKind::Plus));
    }
}
