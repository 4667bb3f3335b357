// Identifier & Literal Quoting
//
// Every statement fragment built from caller-controlled text passes
// through this module. Output follows PostgreSQL lexical rules:
// identifiers are always double-quoted, literals single-quoted, with
// the escape-string form (E'...') when a backslash is present.
//
// Input is `&str`, so multi-byte characters are whole `char`s and are
// copied through untouched; only the ASCII quote and backslash bytes
// are ever rewritten.

/// Errors produced when reading quoted text back.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("unterminated quoted text: {input}")]
    Unterminated { input: String },

    #[error("unescaped quote character inside {input}")]
    UnescapedQuote { input: String },

    #[error("unsupported escape sequence `\\{escape}` in {input}")]
    UnsupportedEscape { input: String, escape: char },
}

/// Quote an identifier (relation, schema or column name).
pub fn quote_identifier(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('"');
    for c in ident.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quote a `schema.name` pair.
pub fn quote_qualified_identifier(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(name))
}

/// Quote a string literal.
///
/// Single quotes are doubled. If the value contains a backslash the
/// escape-string syntax is used and backslashes are doubled too, so the
/// result means the same thing whatever `standard_conforming_strings`
/// is set to.
pub fn quote_literal(value: &str) -> String {
    let escape = value.contains('\\');
    let mut out = String::with_capacity(value.len() + 3);
    if escape {
        out.push('E');
    }
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Inverse of [`quote_literal`].
pub fn unquote_literal(quoted: &str) -> Result<String, QuoteError> {
    let (escape, body) = match quoted.strip_prefix(['E', 'e']) {
        Some(rest) => (true, rest),
        None => (false, quoted),
    };

    let inner = strip_delimiters(body, '\'').ok_or_else(|| QuoteError::Unterminated {
        input: quoted.to_string(),
    })?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => match chars.next() {
                Some('\'') => out.push('\''),
                _ => {
                    return Err(QuoteError::UnescapedQuote {
                        input: quoted.to_string(),
                    })
                }
            },
            '\\' if escape => match chars.next() {
                Some(e @ ('\\' | '\'')) => out.push(e),
                Some(other) => {
                    return Err(QuoteError::UnsupportedEscape {
                        input: quoted.to_string(),
                        escape: other,
                    })
                }
                None => {
                    return Err(QuoteError::Unterminated {
                        input: quoted.to_string(),
                    })
                }
            },
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Inverse of [`quote_identifier`].
pub fn unquote_identifier(quoted: &str) -> Result<String, QuoteError> {
    let inner = strip_delimiters(quoted, '"').ok_or_else(|| QuoteError::Unterminated {
        input: quoted.to_string(),
    })?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.next() != Some('"') {
                return Err(QuoteError::UnescapedQuote {
                    input: quoted.to_string(),
                });
            }
        }
        out.push(c);
    }
    Ok(out)
}

fn strip_delimiters(text: &str, delimiter: char) -> Option<&str> {
    if text.len() < 2 {
        return None;
    }
    text.strip_prefix(delimiter)?.strip_suffix(delimiter)
}
