//! Lexer for arithmetic source strings.
//!
//! Uses logos for tokenization. A numeric literal is a maximal run of digits
//! and dots; runs with no digit or more than one dot are rejected. Whitespace
//! separates tokens and is otherwise ignored. Every other character is a
//! lexing error.

use std::fmt;

use logos::Logos;

use super::CompileError;

/// Token types for arithmetic expressions.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[regex(r"[0-9.]+", parse_number)]
    Number(f64),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

fn parse_number(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    let slice = lex.slice();
    if slice.matches('.').count() > 1 || !slice.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    slice.parse::<f64>().ok().filter(|v| v.is_finite())
}

impl Token {
    /// Binary operator precedence; parens have none.
    pub fn precedence(self) -> Option<u8> {
        match self {
            Token::Plus | Token::Minus => Some(1),
            Token::Star | Token::Slash => Some(2),
            _ => None,
        }
    }

    pub fn is_operator(self) -> bool {
        self.precedence().is_some()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

/// Lex a source string into tokens, rejecting any character outside the
/// grammar.
pub fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    Token::lexer(source)
        .map(|result| result.map_err(|_| CompileError::InvalidExpression))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_and_operators() {
        let tokens = lex("1 + 2.5*3").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(1.0),
                Token::Plus,
                Token::Number(2.5),
                Token::Star,
                Token::Number(3.0),
            ]
        );
    }

    #[test]
    fn parens() {
        let tokens = lex("(1)").unwrap();
        assert_eq!(
            tokens,
            vec![Token::LParen, Token::Number(1.0), Token::RParen]
        );
    }

    #[test]
    fn whitespace_is_insignificant() {
        assert_eq!(lex("1+2").unwrap(), lex(" 1 \t+  2 ").unwrap());
    }

    #[test]
    fn trailing_dot_parses() {
        // "1." is a single literal: one dot, at least one digit.
        assert_eq!(lex("1.").unwrap(), vec![Token::Number(1.0)]);
        assert_eq!(lex(".5").unwrap(), vec![Token::Number(0.5)]);
    }

    #[test]
    fn double_dot_is_rejected() {
        assert!(lex("1..5").is_err());
    }

    #[test]
    fn bare_dot_is_rejected() {
        assert!(lex(".").is_err());
        assert!(lex("1 + .").is_err());
    }

    #[test]
    fn unknown_characters_are_rejected() {
        assert!(lex("1 + x").is_err());
        assert!(lex("2^3").is_err());
        assert!(lex("1%2").is_err());
    }

    #[test]
    fn empty_source_lexes_to_nothing() {
        assert_eq!(lex("").unwrap(), Vec::new());
        assert_eq!(lex("   ").unwrap(), Vec::new());
    }
}
