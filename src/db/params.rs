//! Named-parameter rewriting.
//!
//! Rewrites `:name` bind variables into the positional placeholders a driver
//! understands, skipping anything inside quoted strings and comments. Unknown
//! names are left alone because several dialects use `:name` for other
//! purposes (array slices, casts, labels).

use crate::error::{DbError, DbResult};
use crate::models::NamedParameter;
use std::collections::BTreeMap;

/// Placeholder syntax expected by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderStyle {
    /// `?` for every parameter
    #[default]
    Positional,
    /// `$1`, `$2`, ... in occurrence order
    Numbered,
}

impl PlaceholderStyle {
    fn placeholder(&self, ordinal: usize) -> String {
        match self {
            Self::Positional => "?".to_string(),
            Self::Numbered => format!("${}", ordinal),
        }
    }
}

/// Query text after rewriting, with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenQuery {
    pub sql: String,
    /// One entry per placeholder; a name used twice appears twice
    pub parameters: Vec<NamedParameter>,
}

impl RewrittenQuery {
    pub fn has_parameters(&self) -> bool {
        !self.parameters.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
    /// Byte offset of the `:` that started the candidate name
    Identifier(usize),
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Replace every known `:name` outside strings and comments with a placeholder.
///
/// A candidate name at the very end of the text that matches no declared
/// parameter fails with `UnknownParameter`.
pub fn rewrite_named_parameters(
    sql: &str,
    declared: &BTreeMap<String, NamedParameter>,
    style: PlaceholderStyle,
) -> DbResult<RewrittenQuery> {
    let mut out = String::with_capacity(sql.len());
    let mut parameters = Vec::new();
    let mut state = ScanState::Code;
    let mut chars = sql.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        let next = chars.peek().map(|&(_, n)| n);

        if let ScanState::Identifier(start) = state {
            if is_identifier_char(c) {
                continue;
            }
            let name = &sql[start + 1..pos];
            match declared.get(name) {
                Some(param) => {
                    parameters.push(param.clone());
                    out.push_str(&style.placeholder(parameters.len()));
                }
                None => out.push_str(&sql[start..pos]),
            }
            state = ScanState::Code;
            // The terminating character is scanned like any other.
        }

        match state {
            ScanState::Quoted(quote) => {
                out.push(c);
                if c == quote {
                    if next == Some(quote) {
                        // Doubled quote is an escape
                        out.push(quote);
                        chars.next();
                    } else {
                        state = ScanState::Code;
                    }
                }
            }
            ScanState::LineComment => {
                out.push(c);
                if c == '\n' {
                    state = ScanState::Code;
                }
            }
            ScanState::BlockComment => {
                out.push(c);
                if c == '*' && next == Some('/') {
                    out.push('/');
                    chars.next();
                    state = ScanState::Code;
                }
            }
            ScanState::Code => {
                if c == '-' && next == Some('-') {
                    out.push_str("--");
                    chars.next();
                    state = ScanState::LineComment;
                } else if c == '/' && next == Some('*') {
                    out.push_str("/*");
                    chars.next();
                    state = ScanState::BlockComment;
                } else if c == '\'' || c == '"' {
                    out.push(c);
                    state = ScanState::Quoted(c);
                } else if c == ':' && next.is_some_and(is_identifier_char) {
                    state = ScanState::Identifier(pos);
                } else {
                    out.push(c);
                }
            }
            ScanState::Identifier(_) => unreachable!("identifier state is resolved above"),
        }
    }

    if let ScanState::Identifier(start) = state {
        let name = &sql[start + 1..];
        let param = declared
            .get(name)
            .ok_or_else(|| DbError::unknown_parameter(name))?;
        parameters.push(param.clone());
        out.push_str(&style.placeholder(parameters.len()));
    }

    Ok(RewrittenQuery {
        sql: out,
        parameters,
    })
}
