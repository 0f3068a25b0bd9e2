// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Restartable token stream shared by the L2N and LVS readers.

use super::{FormatError, Key};
use crate::geom::Point;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    Word(String),
    Quoted(String),
}

/// A saved stream position.
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    pos: usize,
    line: usize,
}

pub struct TokenStream<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
    source: String,
}

fn is_word_char(c: u8) -> bool {
    !(c.is_ascii_whitespace() || matches!(c, b'(' | b')' | b',' | b'\'' | b'"'))
}

impl<'a> TokenStream<'a> {
    pub fn new(input: &'a str, source: &str) -> Self {
        Self { input: input.as_bytes(), pos: 0, line: 1, source: source.to_string() }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mark(&self) -> Mark {
        Mark { pos: self.pos, line: self.line }
    }

    pub fn reset(&mut self, m: Mark) {
        self.pos = m.pos;
        self.line = m.line;
    }

    pub fn error(&self, message: impl Into<String>) -> FormatError {
        FormatError::Syntax { message: message.into(), line: self.line, source: self.source.clone() }
    }

    pub fn eof_error(&self) -> FormatError {
        FormatError::UnexpectedEof { line: self.line, source: self.source.clone() }
    }

    pub fn unknown(&self, kind: &'static str, name: &str) -> FormatError {
        FormatError::Unknown { kind, name: name.to_string(), line: self.line, source: self.source.clone() }
    }

    fn skip_blanks(&mut self) {
        while self.pos < self.input.len() {
            let ch = self.input[self.pos];
            if ch == b'\n' {
                self.line += 1;
                self.pos += 1;
            } else if ch.is_ascii_whitespace() || ch == b',' {
                self.pos += 1;
            } else if ch == b'#' {
                while self.pos < self.input.len() && self.input[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn read_quoted(&mut self, quote: u8) -> Result<String, FormatError> {
        self.pos += 1;
        let mut bytes = Vec::new();
        while self.pos < self.input.len() {
            let c = self.input[self.pos];
            self.pos += 1;
            if c == quote {
                return String::from_utf8(bytes).map_err(|_| self.error("Invalid UTF-8 in string"));
            }
            if c == b'\n' {
                self.line += 1;
            }
            if c == b'\\' && self.pos < self.input.len() {
                let e = self.input[self.pos];
                self.pos += 1;
                bytes.push(match e {
                    b'n' => b'\n',
                    b't' => b'\t',
                    other => other,
                });
            } else {
                bytes.push(c);
            }
        }
        Err(self.eof_error())
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, FormatError> {
        self.skip_blanks();
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let tok = match self.input[self.pos] {
            b'(' => {
                self.pos += 1;
                Token::LParen
            }
            b')' => {
                self.pos += 1;
                Token::RParen
            }
            q @ (b'\'' | b'"') => Token::Quoted(self.read_quoted(q)?),
            _ => {
                let start = self.pos;
                while self.pos < self.input.len() && is_word_char(self.input[self.pos]) {
                    self.pos += 1;
                }
                Token::Word(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
            }
        };
        Ok(Some(tok))
    }

    pub fn peek_token(&mut self) -> Result<Option<Token>, FormatError> {
        let m = self.mark();
        let tok = self.next_token();
        self.reset(m);
        tok
    }

    pub fn at_end(&mut self) -> Result<bool, FormatError> {
        Ok(self.peek_token()?.is_none())
    }

    /// True if the next token closes the current group. Nothing is consumed.
    pub fn at_rparen(&mut self) -> Result<bool, FormatError> {
        Ok(matches!(self.peek_token()?, Some(Token::RParen)))
    }

    /// Consumes the key if it is next.
    pub fn test(&mut self, key: &Key) -> Result<bool, FormatError> {
        let m = self.mark();
        match self.next_token()? {
            Some(Token::Word(w)) if key.matches(&w) => Ok(true),
            _ => {
                self.reset(m);
                Ok(false)
            }
        }
    }

    /// Consumes the key and its opening parenthesis if both are next.
    pub fn test_group(&mut self, key: &Key) -> Result<bool, FormatError> {
        let m = self.mark();
        if self.test(key)? && matches!(self.peek_token()?, Some(Token::LParen)) {
            self.next_token()?;
            return Ok(true);
        }
        self.reset(m);
        Ok(false)
    }

    /// Consumes an opening parenthesis if it is next.
    pub fn test_lparen(&mut self) -> Result<bool, FormatError> {
        if matches!(self.peek_token()?, Some(Token::LParen)) {
            self.next_token()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn expect_lparen(&mut self) -> Result<(), FormatError> {
        match self.next_token()? {
            Some(Token::LParen) => Ok(()),
            Some(t) => Err(self.error(format!("Expected '(', got {:?}", t))),
            None => Err(self.eof_error()),
        }
    }

    pub fn expect_rparen(&mut self) -> Result<(), FormatError> {
        match self.next_token()? {
            Some(Token::RParen) => Ok(()),
            Some(t) => Err(self.error(format!("Expected ')', got {:?}", t))),
            None => Err(self.eof_error()),
        }
    }

    /// True if the next token is a plain word or a quoted string.
    pub fn at_word(&mut self) -> Result<bool, FormatError> {
        Ok(matches!(self.peek_token()?, Some(Token::Word(_)) | Some(Token::Quoted(_))))
    }

    /// A plain word or quoted string not followed by '(' (so not a key group).
    pub fn at_value_word(&mut self) -> Result<bool, FormatError> {
        let m = self.mark();
        let r = match self.next_token()? {
            Some(Token::Word(_)) => !matches!(self.peek_token()?, Some(Token::LParen)),
            Some(Token::Quoted(_)) => true,
            _ => false,
        };
        self.reset(m);
        Ok(r)
    }

    pub fn read_word(&mut self) -> Result<String, FormatError> {
        match self.next_token()? {
            Some(Token::Word(s)) | Some(Token::Quoted(s)) => Ok(s),
            Some(t) => Err(self.error(format!("Expected a name, got {:?}", t))),
            None => Err(self.eof_error()),
        }
    }

    pub fn read_int(&mut self) -> Result<i64, FormatError> {
        let w = self.read_word()?;
        w.parse().map_err(|_| self.error(format!("Expected an integer, got '{}'", w)))
    }

    pub fn read_id(&mut self) -> Result<usize, FormatError> {
        let w = self.read_word()?;
        w.parse().map_err(|_| self.error(format!("Expected an id, got '{}'", w)))
    }

    pub fn read_f64(&mut self) -> Result<f64, FormatError> {
        let w = self.read_word()?;
        w.parse().map_err(|_| self.error(format!("Expected a number, got '{}'", w)))
    }

    /// Coordinate that may be `*` for "same as `prev`".
    pub fn read_coord_or_star(&mut self, prev: i64) -> Result<i64, FormatError> {
        let w = self.read_word()?;
        if w == "*" {
            return Ok(prev);
        }
        w.parse::<f64>()
            .map(|v| v.round() as i64)
            .map_err(|_| self.error(format!("Expected a coordinate, got '{}'", w)))
    }

    /// `(dx dy)` relative to `reference`; updates the reference.
    pub fn read_rel_point(&mut self, reference: &mut Point) -> Result<Point, FormatError> {
        self.expect_lparen()?;
        let dx = self.read_int()?;
        let dy = self.read_int()?;
        self.expect_rparen()?;
        let p = Point::new(reference.x + dx, reference.y + dy);
        *reference = p;
        Ok(p)
    }

    /// Skips one element: a word with its group, a bare group or a single token.
    pub fn skip_group(&mut self) -> Result<(), FormatError> {
        match self.next_token()? {
            Some(Token::Word(_)) => {
                if self.test_lparen()? {
                    self.skip_balanced()?;
                }
                Ok(())
            }
            Some(Token::LParen) => self.skip_balanced(),
            Some(Token::Quoted(_)) => Ok(()),
            Some(Token::RParen) => Err(self.error("Unexpected ')'")),
            None => Err(self.eof_error()),
        }
    }

    /// Consumes everything up to and including the ')' closing an already opened group.
    pub fn skip_balanced(&mut self) -> Result<(), FormatError> {
        let mut depth = 1u32;
        loop {
            match self.next_token()? {
                Some(Token::LParen) => depth += 1,
                Some(Token::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return Err(self.eof_error()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::keys;

    #[test]
    fn test_tokens_and_comments() {
        let mut ts = TokenStream::new("# head\nnet(1 'a b',x)\n", "t");
        assert_eq!(ts.next_token().unwrap(), Some(Token::Word("net".into())));
        assert_eq!(ts.line(), 2);
        assert_eq!(ts.next_token().unwrap(), Some(Token::LParen));
        assert_eq!(ts.read_id().unwrap(), 1);
        assert_eq!(ts.read_word().unwrap(), "a b");
        assert_eq!(ts.read_word().unwrap(), "x");
        ts.expect_rparen().unwrap();
        assert!(ts.at_end().unwrap());
    }

    #[test]
    fn test_escapes() {
        let mut ts = TokenStream::new(r"'it\'s' 'a\\b'", "t");
        assert_eq!(ts.read_word().unwrap(), "it's");
        assert_eq!(ts.read_word().unwrap(), "a\\b");
    }

    #[test]
    fn test_key_groups_need_parens() {
        let mut ts = TokenStream::new("mirror N(1)", "t");
        assert!(!ts.test_group(&keys::MIRROR).unwrap());
        assert!(ts.test(&keys::MIRROR).unwrap());
        assert!(ts.test_group(&keys::NET).unwrap());
        assert_eq!(ts.read_id().unwrap(), 1);
    }

    #[test]
    fn test_skip_group() {
        let mut ts = TokenStream::new("future(a (b c) d(e)) net(2)", "t");
        ts.skip_group().unwrap();
        assert!(ts.test_group(&keys::NET).unwrap());
        let mut ts = TokenStream::new("future(a", "t");
        assert!(matches!(ts.skip_group(), Err(FormatError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_relative_points_and_stars() {
        let mut ts = TokenStream::new("(10 20) (-5 0) * 7", "t");
        let mut r = Point::new(0, 0);
        assert_eq!(ts.read_rel_point(&mut r).unwrap(), Point::new(10, 20));
        assert_eq!(ts.read_rel_point(&mut r).unwrap(), Point::new(5, 20));
        assert_eq!(ts.read_coord_or_star(42).unwrap(), 42);
        assert_eq!(ts.read_coord_or_star(42).unwrap(), 7);
    }

    #[test]
    fn test_errors_report_line() {
        let mut ts = TokenStream::new("\n\nx", "file.l2n");
        let e = ts.expect_lparen().unwrap_err();
        assert!(e.to_string().contains("line 3 of file.l2n"));
    }
}
