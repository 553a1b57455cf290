//! `if` sugar.
//!
//! ```text
//! if (gold > 10 and have('mine')) gold * 2
//!   =>  (gold > 10 && have('mine')) ? (gold * 2) : 0
//! if (chance(50))
//!   =>  (chance(50)) ? (1) : 0
//! ```

use std::borrow::Cow;

use crate::error::{EvalError, EvalResult};

const IF_PREFIX: &str = "if ";

/// Rewrites an `if (condition) consequent` formula into a ternary.
///
/// Formulas without the prefix are returned unchanged (trimmed).
///
/// # Errors
///
/// Returns [`EvalError::Syntax`] if the condition's parentheses are
/// missing or unbalanced.
pub fn preprocess(formula: &str) -> EvalResult<Cow<'_, str>> {
    let trimmed = formula.trim();
    let Some(rest) = trimmed.strip_prefix(IF_PREFIX) else {
        return Ok(Cow::Borrowed(trimmed));
    };

    let rest_offset = trimmed.len() - rest.len();
    let body = rest.trim_start();
    let body_offset = rest_offset + (rest.len() - body.len());
    if !body.starts_with('(') {
        return Err(EvalError::Syntax {
            offset: body_offset,
            message: "if condition must be parenthesised".to_string(),
        });
    }

    let close = matching_paren(body).ok_or_else(|| EvalError::Syntax {
        offset: body_offset,
        message: "invalid if statement: mismatched parentheses".to_string(),
    })?;

    let condition = rewrite_word_operators(&body[..=close]);
    let consequent = body[close + 1..].trim();
    let consequent = if consequent.is_empty() { "1" } else { consequent };

    Ok(Cow::Owned(format!("{condition} ? ({consequent}) : 0")))
}

/// Byte index of the parenthesis closing the one at index 0.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote = None;
    for (index, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// Replaces standalone `and` / `or` words (outside string literals, not
/// used as a function name) with `&&` / `||`.
fn rewrite_word_operators(condition: &str) -> String {
    let mut out = String::with_capacity(condition.len() + 4);
    let mut chars = condition.char_indices().peekable();
    let mut quote = None;

    while let Some((start, c)) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        if c == '\'' || c == '"' {
            quote = Some(c);
            out.push(c);
            continue;
        }
        if !(c.is_ascii_alphabetic() || c == '_') {
            out.push(c);
            continue;
        }

        let mut end = start + c.len_utf8();
        while let Some(&(i, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' || next == ':' {
                end = i + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let word = &condition[start..end];
        let is_call = condition[end..].trim_start().starts_with('(');
        match word {
            "and" if !is_call => out.push_str("&&"),
            "or" if !is_call => out.push_str("||"),
            _ => out.push_str(word),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_formula_unchanged() {
        assert_eq!(preprocess("  gold * 2 ").unwrap(), "gold * 2");
        assert_eq!(preprocess("iffy + 1").unwrap(), "iffy + 1");
    }

    #[test]
    fn test_if_with_consequent() {
        assert_eq!(
            preprocess("if (gold > 10 and wood < 5) gold * 2").unwrap(),
            "(gold > 10 && wood < 5) ? (gold * 2) : 0"
        );
    }

    #[test]
    fn test_if_defaults_consequent_to_one() {
        assert_eq!(
            preprocess("if (have('mine') or gold:max > 3)").unwrap(),
            "(have('mine') || gold:max > 3) ? (1) : 0"
        );
    }

    #[test]
    fn test_words_inside_strings_and_calls_untouched() {
        assert_eq!(
            preprocess("if (and(a, b) and have('sand or stone'))").unwrap(),
            "(and(a, b) && have('sand or stone')) ? (1) : 0"
        );
        assert_eq!(
            preprocess("if (brand > 1 and order < 2)").unwrap(),
            "(brand > 1 && order < 2) ? (1) : 0"
        );
    }

    #[test]
    fn test_mismatched_parentheses() {
        assert!(matches!(preprocess("if (gold > 1"), Err(EvalError::Syntax { .. })));
        assert!(matches!(preprocess("if gold > 1"), Err(EvalError::Syntax { .. })));
    }
}
