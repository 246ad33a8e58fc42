//! The template language.
//!
//! A template is literal text with `{placeholder}` substitutions and three directives:
//!
//! - `@foreach <subject> [where(<condition>)]` repeats its body for every item of a registry
//!   collection, optionally skipping the items for which the condition is false.
//! - `@if(<condition>)` keeps its body only when the condition is true.
//! - `@end <kind>` closes the innermost directive, naming its subject (or `if`).
//!
//! A directive alone on its line removes the whole line from the output. Functions and types that
//! an extension guarded by a preprocessor symbol introduces, and the system types it uses, are
//! wrapped in `#if defined(...)` and `#endif`.

pub use self::{
    condition::ConditionError,
    expand::Subject,
    format::{format, FormatError},
    parse::{Control, ControlKind},
};
use self::expand::Expander;
use crate::registry::Registry;
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

pub mod condition;
mod expand;
mod format;
mod parse;

/// A parsed template, ready to be expanded against any number of registries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template<'t> {
    text: &'t str,
    nodes: Vec<Control>,
}

impl<'t> Template<'t> {
    pub fn parse(text: &'t str) -> Result<Self, TemplateError> {
        let nodes = parse::parse(text)?;

        Ok(Template { text, nodes })
    }

    /// The top-level directives, in source order.
    #[inline]
    pub fn nodes(&self) -> &[Control] {
        &self.nodes
    }

    pub fn expand(&self, registry: &Registry) -> Result<String, TemplateError> {
        Expander::new(self.text, registry).expand(&self.nodes)
    }
}

/// Parses `template` and expands it against `registry`.
pub fn expand(template: &str, registry: &Registry) -> Result<String, TemplateError> {
    Template::parse(template)?.expand(registry)
}

/// Error that can happen when parsing or expanding a template. Lines are 1-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateError {
    /// A directive keyword that isn't followed by a valid directive.
    Malformed { directive: String, line: usize },

    /// `@foreach` names a collection that doesn't exist.
    UnknownSubject { name: String, line: usize },

    /// `@end` closes a different directive than the innermost open one.
    MismatchedEnd {
        expected: String,
        found: String,
        line: usize,
    },

    /// `@end` without an open directive.
    UnmatchedEnd { kind: String, line: usize },

    /// A directive that is never closed.
    Unclosed { kind: String, line: usize },

    /// A nested subject such as `member` used outside the loop over its owner.
    MissingParent {
        subject: &'static str,
        owner: &'static str,
        line: usize,
    },

    /// Placeholder substitution failed.
    Format {
        line: usize,
        entity: Option<String>,
        error: FormatError,
    },

    /// A condition couldn't be evaluated.
    Condition {
        line: usize,
        entity: Option<String>,
        error: ConditionError,
    },
}

impl Error for TemplateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Format { error, .. } => Some(error),
            Self::Condition { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Malformed { directive, line } => {
                write!(f, "line {line}: malformed `{directive}` directive")
            }
            Self::UnknownSubject { name, line } => {
                write!(f, "line {line}: unknown subject `{name}`")
            }
            Self::MismatchedEnd {
                expected,
                found,
                line,
            } => write!(f, "line {line}: expected `@end {expected}`, found `@end {found}`"),
            Self::UnmatchedEnd { kind, line } => {
                write!(f, "line {line}: `@end {kind}` without a matching directive")
            }
            Self::Unclosed { kind, line } => write!(f, "line {line}: `{kind}` is never closed"),
            Self::MissingParent {
                subject,
                owner,
                line,
            } => write!(
                f,
                "line {line}: `@foreach {subject}` has to be nested in a loop over a {owner}",
            ),
            Self::Format { line, entity, error } => {
                write_expansion_error(f, *line, entity.as_deref(), error)
            }
            Self::Condition { line, entity, error } => {
                write_expansion_error(f, *line, entity.as_deref(), error)
            }
        }
    }
}

fn write_expansion_error(
    f: &mut Formatter<'_>,
    line: usize,
    entity: Option<&str>,
    error: &dyn Display,
) -> Result<(), FmtError> {
    match entity {
        Some(entity) => write!(f, "line {line}, while expanding `{entity}`: {error}"),
        None => write!(f, "line {line}: {error}"),
    }
}
