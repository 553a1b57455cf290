//! Formula tokenizer.

use crate::error::{EvalError, EvalResult};

/// Statistic suffixes that may follow a resource key (`gold:max`).
pub const STAT_SUFFIXES: [&str; 3] = ["max", "earned", "ps"];

/// A lexical token.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// Numeric literal.
    Number(f64),
    /// Quoted string literal (quotes stripped).
    Str(String),
    /// Variable or function name, including `key:stat` forms.
    Ident(String),
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Bang,
    /// `?`
    Question,
    /// `:`
    Colon,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
}

/// Token plus its byte offset in the source.
#[derive(Clone, Debug, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Byte offset of its first character.
    pub offset: usize,
}

#[inline]
fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[inline]
fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Splits a formula into tokens.
///
/// # Errors
///
/// Returns [`EvalError::Syntax`] on an unexpected character, an unterminated
/// string or a malformed number.
pub fn tokenize(source: &str) -> EvalResult<Vec<Spanned>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let token = match c {
            b'0'..=b'9' | b'.' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                    pos += 1;
                }
                let text = &source[start..pos];
                let number = text.parse::<f64>().map_err(|_| EvalError::Syntax {
                    offset: start,
                    message: format!("malformed number '{text}'"),
                })?;
                tokens.push(Spanned {
                    token: Token::Number(number),
                    offset: start,
                });
                continue;
            }
            b'\'' | b'"' => {
                let quote = c;
                pos += 1;
                let content_start = pos;
                while pos < bytes.len() && bytes[pos] != quote {
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return Err(EvalError::Syntax {
                        offset: start,
                        message: "unterminated string".to_string(),
                    });
                }
                let text = source[content_start..pos].to_string();
                pos += 1;
                tokens.push(Spanned {
                    token: Token::Str(text),
                    offset: start,
                });
                continue;
            }
            c if is_ident_start(c) => {
                while pos < bytes.len() && is_ident_continue(bytes[pos]) {
                    pos += 1;
                }
                pos += stat_suffix_len(&bytes[pos..]);
                tokens.push(Spanned {
                    token: Token::Ident(source[start..pos].to_string()),
                    offset: start,
                });
                continue;
            }
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'?' => Token::Question,
            b':' => Token::Colon,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'=' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 1;
                Token::Eq
            }
            b'!' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 1;
                Token::NotEq
            }
            b'!' => Token::Bang,
            b'<' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 1;
                Token::LtEq
            }
            b'<' => Token::Lt,
            b'>' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 1;
                Token::GtEq
            }
            b'>' => Token::Gt,
            b'&' if bytes.get(pos + 1) == Some(&b'&') => {
                pos += 1;
                Token::AndAnd
            }
            b'|' if bytes.get(pos + 1) == Some(&b'|') => {
                pos += 1;
                Token::OrOr
            }
            _ => {
                let ch = source[start..].chars().next().unwrap_or('?');
                return Err(EvalError::Syntax {
                    offset: start,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        };
        pos += 1;
        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    Ok(tokens)
}

/// Length of a `:max` / `:earned` / `:ps` suffix at the start of `rest`,
/// or 0. The suffix must end at a word boundary, so a ternary colon
/// (`a ? b : c`) is never swallowed.
fn stat_suffix_len(rest: &[u8]) -> usize {
    if rest.first() != Some(&b':') {
        return 0;
    }
    for suffix in STAT_SUFFIXES {
        let end = 1 + suffix.len();
        if rest.len() >= end
            && &rest[1..end] == suffix.as_bytes()
            && rest.get(end).map_or(true, |&c| !is_ident_continue(c))
        {
            return end;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_arithmetic_tokens() {
        assert_eq!(
            kinds("count * 2.5 + 1"),
            vec![
                Token::Ident("count".into()),
                Token::Star,
                Token::Number(2.5),
                Token::Plus,
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn test_stat_suffix_is_part_of_identifier() {
        assert_eq!(
            kinds("gold:max >= 10"),
            vec![Token::Ident("gold:max".into()), Token::GtEq, Token::Number(10.0)]
        );
    }

    #[test]
    fn test_ternary_colon_not_swallowed() {
        assert_eq!(
            kinds("a ? b:c"),
            vec![
                Token::Ident("a".into()),
                Token::Question,
                Token::Ident("b".into()),
                Token::Colon,
                Token::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(
            kinds("have('upgrade_x')"),
            vec![
                Token::Ident("have".into()),
                Token::LParen,
                Token::Str("upgrade_x".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_errors_carry_offset() {
        let err = tokenize("1 + #").unwrap_err();
        assert!(matches!(err, EvalError::Syntax { offset: 4, .. }));
        assert!(tokenize("'open").is_err());
        assert!(tokenize("1.2.3").is_err());
    }
}
