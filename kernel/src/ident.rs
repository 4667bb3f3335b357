// Relation Identifiers
//
// A relation is named either with an explicit schema or bare (resolved
// through the search path). Text input follows the usual identifier
// rules: unquoted parts fold to lower case, double-quoted parts are
// taken verbatim with `""` standing for one quote character.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quote::{quote_identifier, quote_qualified_identifier};

/// Name of a source, log or restore relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationIdent {
    Qualified { schema: String, name: String },
    Bare { name: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentError {
    #[error("invalid syntax for relation name: \"{input}\"")]
    InvalidSyntax { input: String },

    #[error("improper qualified name (too many dotted names): \"{input}\"")]
    TooManyParts { input: String },
}

impl RelationIdent {
    pub fn bare(name: impl Into<String>) -> Self {
        Self::Bare { name: name.into() }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Qualified {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `name`, `schema.name` or their quoted forms.
    pub fn parse(input: &str) -> Result<Self, IdentError> {
        let mut parts = split_identifier_string(input, '.')?;
        match parts.len() {
            1 => Ok(Self::Bare {
                name: parts.remove(0),
            }),
            2 => {
                let name = parts.remove(1);
                let schema = parts.remove(0);
                Ok(Self::Qualified { schema, name })
            }
            _ => Err(IdentError::TooManyParts {
                input: input.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Qualified { name, .. } | Self::Bare { name } => name,
        }
    }

    pub fn schema(&self) -> Option<&str> {
        match self {
            Self::Qualified { schema, .. } => Some(schema),
            Self::Bare { .. } => None,
        }
    }

    /// Same relation with `suffix` appended to the relation name.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        match self {
            Self::Qualified { schema, name } => Self::Qualified {
                schema: schema.clone(),
                name: format!("{name}{suffix}"),
            },
            Self::Bare { name } => Self::Bare {
                name: format!("{name}{suffix}"),
            },
        }
    }

    /// Quoted form, safe to embed in a statement.
    pub fn render(&self) -> String {
        match self {
            Self::Qualified { schema, name } => quote_qualified_identifier(schema, name),
            Self::Bare { name } => quote_identifier(name),
        }
    }
}

impl fmt::Display for RelationIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Split a list of possibly quoted identifiers on `separator`.
pub fn split_identifier_string(input: &str, separator: char) -> Result<Vec<String>, IdentError> {
    let invalid = || IdentError::InvalidSyntax {
        input: input.to_string(),
    };

    let mut parts = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut part = String::new();
        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next() {
                    Some('"') => {
                        if chars.next_if_eq(&'"').is_some() {
                            part.push('"');
                        } else {
                            break;
                        }
                    }
                    Some(c) => part.push(c),
                    None => return Err(invalid()),
                }
            }
            if part.is_empty() {
                return Err(invalid());
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != separator && !c.is_whitespace() && *c != '"') {
                part.extend(c.to_lowercase());
            }
            if part.is_empty() {
                return Err(invalid());
            }
        }
        parts.push(part);

        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        match chars.next() {
            None => break,
            Some(c) if c == separator => continue,
            Some(_) => return Err(invalid()),
        }
    }

    Ok(parts)
}
