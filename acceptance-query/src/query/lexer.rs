//! Lexer for acceptance queries using Logos
//!
//! The lexer is quote-aware from the start: string literals are single tokens,
//! so a dash-digit sequence inside `'some-2'` never becomes a time shift.

use logos::Logos;
use std::fmt;

use crate::types::{QueryError, Result};

/// Token type for acceptance queries
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // === Keywords ===
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("in")]
    In,
    #[token("is")]
    Is,
    #[token("contains")]
    Contains,
    #[token("True")]
    #[token("true")]
    True,
    #[token("False")]
    #[token("false")]
    False,

    // === Operators ===
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("==")]
    EqEq,
    #[token("=")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("~=")]
    ApproxEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,

    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("~")]
    Tilde,

    // === Delimiters ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,

    // === Literals ===
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        s[1..s.len()-1].to_string()
    })]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| {
        let s = lex.slice();
        s[1..s.len()-1].to_string()
    })]
    String(String),

    // === References ===
    /// `#(event name)`
    #[regex(r"#\([^)]*\)", |lex| {
        let s = lex.slice();
        s[2..s.len()-1].to_string()
    })]
    EventRef(String),

    /// `column-N`: value of `column` N timesteps ahead
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*-[0-9]+", shifted_identifier)]
    Shifted(Shift),

    // === Identifier ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    #[regex(r"`[^`]+`", |lex| {
        let s = lex.slice();
        s[1..s.len()-1].to_string()
    })]
    Ident(String),

    // === Special ===
    Eof,
}

/// Payload of a time-shift token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shift {
    /// Column being shifted
    pub column: String,
    /// Suffix digits exactly as written (used for the generated name)
    pub digits: String,
    /// Parsed shift amount
    pub amount: usize,
}

/// Split `column-N`, rejecting suffixes that run on into a longer token
fn shifted_identifier(lex: &mut logos::Lexer<Token>) -> Option<Shift> {
    let next = lex.remainder().chars().next();
    if matches!(next, Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return None;
    }
    let (column, digits) = lex.slice().rsplit_once('-')?;
    Some(Shift {
        column: column.to_string(),
        digits: digits.to_string(),
        amount: digits.parse().ok()?,
    })
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::In => write!(f, "in"),
            Token::Is => write!(f, "is"),
            Token::Contains => write!(f, "contains"),
            Token::True => write!(f, "True"),
            Token::False => write!(f, "False"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::EqEq => write!(f, "=="),
            Token::Eq => write!(f, "="),
            Token::NotEq => write!(f, "!="),
            Token::ApproxEq => write!(f, "~="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Amp => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::Tilde => write!(f, "~"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::EventRef(e) => write!(f, "#({})", e),
            Token::Shifted(s) => write!(f, "{}-{}", s.column, s.digits),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Eof => write!(f, "end of query"),
        }
    }
}

impl Token {
    /// Tokens that end a property key after `#(event):`
    pub fn ends_property_key(&self) -> bool {
        matches!(
            self,
            Token::EqEq
                | Token::Eq
                | Token::NotEq
                | Token::ApproxEq
                | Token::Lt
                | Token::Le
                | Token::Gt
                | Token::Ge
                | Token::Not
                | Token::Is
                | Token::Contains
                | Token::In
                | Token::And
                | Token::Or
                | Token::Amp
                | Token::Pipe
                | Token::LParen
                | Token::RParen
                | Token::LBracket
                | Token::RBracket
                | Token::Comma
                | Token::String(_)
                | Token::EventRef(_)
                | Token::Eof
        )
    }
}

/// Spanned token with byte offsets into the query text
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Tokenize a query, failing on the first unrecognized input.
///
/// A `column-N` run that continues past its digits (`speed-1.5`) is not a
/// shift; it is split into identifier and minus, and lexing resumes at the
/// number.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>> {
    let mut tokens = Vec::new();
    let mut offset = 0;

    'restart: loop {
        let mut lexer = Token::lexer(&source[offset..]);
        while let Some(next) = lexer.next() {
            let span = lexer.span();
            let (start, end) = (offset + span.start, offset + span.end);
            match next {
                Ok(token) => tokens.push(SpannedToken { token, start, end }),
                Err(()) => {
                    if let Some(column) = rejected_shift_column(lexer.slice()) {
                        let minus = start + column.len();
                        tokens.push(SpannedToken {
                            token: Token::Ident(column.to_string()),
                            start,
                            end: minus,
                        });
                        tokens.push(SpannedToken {
                            token: Token::Minus,
                            start: minus,
                            end: minus + 1,
                        });
                        offset = minus + 1;
                        continue 'restart;
                    }
                    return Err(QueryError::malformed(
                        start,
                        format!("unexpected input '{}'", lexer.slice()),
                    ));
                }
            }
        }
        break;
    }

    tokens.push(SpannedToken {
        token: Token::Eof,
        start: source.len(),
        end: source.len(),
    });
    Ok(tokens)
}

/// Column part of a `column-N` slice whose shift callback declined it
fn rejected_shift_column(slice: &str) -> Option<&str> {
    let (column, digits) = slice.rsplit_once('-')?;
    let mut chars = column.chars();
    let head = chars.next()?;
    let is_identifier = (head.is_ascii_alphabetic() || head == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    let is_number = !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
    (is_identifier && is_number).then_some(column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_aggregate_clause() {
        assert_eq!(
            kinds("count(aggregate | x > 1) = 0"),
            vec![
                Token::Ident("count".to_string()),
                Token::LParen,
                Token::Ident("aggregate".to_string()),
                Token::Pipe,
                Token::Ident("x".to_string()),
                Token::Gt,
                Token::Integer(1),
                Token::RParen,
                Token::Eq,
                Token::Integer(0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_event_reference() {
        assert_eq!(
            kinds("#(Some Event):Key == 'x'"),
            vec![
                Token::EventRef("Some Event".to_string()),
                Token::Colon,
                Token::Ident("Key".to_string()),
                Token::EqEq,
                Token::String("x".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_shifted_identifier() {
        assert_eq!(
            kinds("some-2 == 1"),
            vec![
                Token::Shifted(Shift {
                    column: "some".to_string(),
                    digits: "2".to_string(),
                    amount: 2,
                }),
                Token::EqEq,
                Token::Integer(1),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_subtraction_with_spaces_is_not_a_shift() {
        assert_eq!(
            kinds("some - 2"),
            vec![
                Token::Ident("some".to_string()),
                Token::Minus,
                Token::Integer(2),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_quoted_dash_digits_stay_literal() {
        assert_eq!(
            kinds("x == 'some-2'"),
            vec![
                Token::Ident("x".to_string()),
                Token::EqEq,
                Token::String("some-2".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_backtick_identifier() {
        assert_eq!(
            kinds("`aggregate-0` > 1.5"),
            vec![
                Token::Ident("aggregate-0".to_string()),
                Token::Gt,
                Token::Float(1.5),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unspaced_float_subtraction_is_not_a_shift() {
        assert_eq!(
            kinds("speed-1.5 > 0"),
            vec![
                Token::Ident("speed".to_string()),
                Token::Minus,
                Token::Float(1.5),
                Token::Gt,
                Token::Integer(0),
                Token::Eof,
            ]
        );
        let spans: Vec<_> = tokenize("speed-1.5")
            .unwrap()
            .into_iter()
            .map(|t| (t.start, t.end))
            .collect();
        assert_eq!(spans, vec![(0, 5), (5, 6), (6, 9), (9, 9)]);
    }

    #[test]
    fn test_shift_must_end_token() {
        assert_eq!(
            kinds("some-2x"),
            vec![
                Token::Ident("some".to_string()),
                Token::Minus,
                Token::Integer(2),
                Token::Ident("x".to_string()),
                Token::Eof,
            ]
        );
        assert!(tokenize("a == $").is_err());
    }

    #[test]
    fn test_approx_operator() {
        assert_eq!(
            kinds("~= ~ !="),
            vec![Token::ApproxEq, Token::Tilde, Token::NotEq, Token::Eof]
        );
    }
}
