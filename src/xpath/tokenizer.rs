//! Tokenizer for the XPath subset.
//!
//! Hand-rolled byte scanner over the expression text. Word operators
//! (`and`, `or`, `div`, `mod`) and `*` are lexed as names/stars and
//! disambiguated by the parser based on position, per the XPath 1.0 lexical
//! rules.

use crate::error::ParseError;

/// One lexical token, with its byte offset kept alongside by the parser
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Element or function name (may contain `-`, `_`, `.`, `:`)
    Name(String),
    /// Numeric literal
    Number(f64),
    /// Quoted string literal, quotes stripped
    Literal(String),
    /// `/`
    Slash,
    /// `//`
    DoubleSlash,
    /// `.`
    Dot,
    /// `..`
    DotDot,
    /// `@`
    At,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `,`
    Comma,
    /// `|`
    Pipe,
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
}

/// A token plus the byte offset where it started
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    /// The token
    pub token: Token,
    /// Byte offset into the expression text
    pub offset: usize,
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':')
}

/// Tokenize an expression. Errors carry the byte offset of the offending
/// character.
pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let b = bytes[pos];
        let token = match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                pos += 1;
                continue;
            }
            b'/' => {
                if bytes.get(pos + 1) == Some(&b'/') {
                    pos += 2;
                    Token::DoubleSlash
                } else {
                    pos += 1;
                    Token::Slash
                }
            }
            b'(' => {
                pos += 1;
                Token::LeftParen
            }
            b')' => {
                pos += 1;
                Token::RightParen
            }
            b'[' => {
                pos += 1;
                Token::LeftBracket
            }
            b']' => {
                pos += 1;
                Token::RightBracket
            }
            b',' => {
                pos += 1;
                Token::Comma
            }
            b'|' => {
                pos += 1;
                Token::Pipe
            }
            b'@' => {
                pos += 1;
                Token::At
            }
            b'+' => {
                pos += 1;
                Token::Plus
            }
            b'-' => {
                pos += 1;
                Token::Minus
            }
            b'*' => {
                pos += 1;
                Token::Star
            }
            b'=' => {
                pos += 1;
                Token::Equal
            }
            b'!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    Token::NotEqual
                } else {
                    return Err(ParseError::Expression {
                        position: pos,
                        message: "expected '=' after '!'".into(),
                    });
                }
            }
            b'<' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    Token::LessThanOrEqual
                } else {
                    pos += 1;
                    Token::LessThan
                }
            }
            b'>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    Token::GreaterThanOrEqual
                } else {
                    pos += 1;
                    Token::GreaterThan
                }
            }
            b'\'' | b'"' => {
                let quote = b;
                pos += 1;
                let lit_start = pos;
                while pos < bytes.len() && bytes[pos] != quote {
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return Err(ParseError::Expression {
                        position: start,
                        message: "unterminated string literal".into(),
                    });
                }
                let literal = input[lit_start..pos].to_string();
                pos += 1; // closing quote
                Token::Literal(literal)
            }
            b'.' => {
                if bytes.get(pos + 1) == Some(&b'.') {
                    pos += 2;
                    Token::DotDot
                } else if bytes.get(pos + 1).is_some_and(|c| c.is_ascii_digit()) {
                    scan_number(input, bytes, &mut pos)?
                } else {
                    pos += 1;
                    Token::Dot
                }
            }
            b'0'..=b'9' => scan_number(input, bytes, &mut pos)?,
            _ if is_name_start(b) => {
                pos += 1;
                while pos < bytes.len() && is_name_continue(bytes[pos]) {
                    pos += 1;
                }
                // A name must not end with '.', that belongs to a following
                // path step (names like "a-b" and "jr:name" stay intact).
                while pos > start + 1 && bytes[pos - 1] == b'.' {
                    pos -= 1;
                }
                Token::Name(input[start..pos].to_string())
            }
            _ => {
                let ch = input[pos..].chars().next().unwrap_or('?');
                return Err(ParseError::Expression {
                    position: pos,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        };
        tokens.push(SpannedToken {
            token,
            offset: start,
        });
    }
    Ok(tokens)
}

fn scan_number(input: &str, bytes: &[u8], pos: &mut usize) -> Result<Token, ParseError> {
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if bytes.get(*pos) == Some(&b'.') && bytes.get(*pos + 1).is_some_and(|c| c.is_ascii_digit()) {
        *pos += 1;
        while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
            *pos += 1;
        }
    } else if bytes.get(*pos) == Some(&b'.') && start < *pos {
        // trailing dot form "12."
        *pos += 1;
    }
    let text = &input[start..*pos];
    text.parse::<f64>()
        .map(Token::Number)
        .map_err(|_| ParseError::Expression {
            position: start,
            message: format!("invalid number '{text}'"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn tokenizes_simple_path() {
        assert_eq!(
            kinds("/data/age"),
            vec![
                Token::Slash,
                Token::Name("data".into()),
                Token::Slash,
                Token::Name("age".into()),
            ]
        );
    }

    #[test]
    fn hyphen_stays_inside_names() {
        assert_eq!(kinds("first-name"), vec![Token::Name("first-name".into())]);
        assert_eq!(
            kinds("a - b"),
            vec![
                Token::Name("a".into()),
                Token::Minus,
                Token::Name("b".into()),
            ]
        );
    }

    #[test]
    fn numbers_and_literals() {
        assert_eq!(
            kinds(". >= 18.5"),
            vec![Token::Dot, Token::GreaterThanOrEqual, Token::Number(18.5)]
        );
        assert_eq!(kinds("'yes'"), vec![Token::Literal("yes".into())]);
        assert_eq!(kinds(".5"), vec![Token::Number(0.5)]);
    }

    #[test]
    fn dotdot_and_function_call() {
        assert_eq!(
            kinds("../b"),
            vec![Token::DotDot, Token::Slash, Token::Name("b".into())]
        );
        assert_eq!(
            kinds("true()"),
            vec![
                Token::Name("true".into()),
                Token::LeftParen,
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn unterminated_literal_errors() {
        assert!(matches!(
            tokenize("'oops"),
            Err(ParseError::Expression { position: 0, .. })
        ));
    }
}
