use crate::placeholders::Values;
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

/// Substitutes every `{name}` in `text` with its value. `{{` and `}}` stand for literal braces.
pub fn format(text: &str, values: &Values) -> Result<String, FormatError> {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(['{', '}']) {
        let offset = text.len() - rest.len() + pos;
        output.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            output.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            output.push('}');
            rest = after;
        } else if tail.starts_with('}') {
            return Err(FormatError::UnmatchedClose { offset });
        } else {
            let inner = &tail[1..];
            let end = inner
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(inner.len());
            let (name, after) = inner.split_at(end);

            if name.is_empty() || !after.starts_with('}') {
                return Err(FormatError::UnmatchedOpen { offset });
            }

            let value = values
                .get(name)
                .ok_or_else(|| FormatError::UnknownPlaceholder {
                    name: name.to_owned(),
                    offset,
                })?;
            output.push_str(value);
            rest = &after[1..];
        }
    }

    output.push_str(rest);

    Ok(output)
}

/// Error that can happen when substituting placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// No value exists for the placeholder.
    UnknownPlaceholder { name: String, offset: usize },
    /// A `{` that doesn't start a placeholder and isn't doubled.
    UnmatchedOpen { offset: usize },
    /// A `}` that doesn't end a placeholder and isn't doubled.
    UnmatchedClose { offset: usize },
}

impl FormatError {
    /// Byte offset of the offending brace in the formatted text.
    pub fn offset(&self) -> usize {
        match *self {
            Self::UnknownPlaceholder { offset, .. }
            | Self::UnmatchedOpen { offset }
            | Self::UnmatchedClose { offset } => offset,
        }
    }
}

impl Error for FormatError {}

impl Display for FormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::UnknownPlaceholder { name, offset } => {
                write!(f, "unknown placeholder `{{{name}}}` at offset {offset}")
            }
            Self::UnmatchedOpen { offset } => write!(f, "unmatched `{{` at offset {offset}"),
            Self::UnmatchedClose { offset } => write!(f, "unmatched `}}` at offset {offset}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> Values {
        let mut values = Values::new();
        values.insert("funcName", "vkCreateDevice");
        values.insert("prmIndex", 2);
        values
    }

    #[test]
    fn substitution() {
        assert_eq!(
            format("PFN_{funcName} p{prmIndex};", &values()).unwrap(),
            "PFN_vkCreateDevice p2;",
        );
    }

    #[test]
    fn escaped_braces() {
        assert_eq!(
            format("void f() {{ {funcName}(); }}", &values()).unwrap(),
            "void f() { vkCreateDevice(); }",
        );
    }

    #[test]
    fn text_without_placeholders() {
        assert_eq!(format("plain text\n", &Values::new()).unwrap(), "plain text\n");
    }

    #[test]
    fn unknown_placeholder() {
        assert_eq!(
            format("x {memName}", &values()),
            Err(FormatError::UnknownPlaceholder {
                name: "memName".to_owned(),
                offset: 2,
            }),
        );
    }

    #[test]
    fn lone_braces() {
        assert_eq!(
            format("struct S { int x; };", &Values::new()),
            Err(FormatError::UnmatchedOpen { offset: 9 }),
        );
        assert_eq!(
            format("a } b", &Values::new()),
            Err(FormatError::UnmatchedClose { offset: 2 }),
        );
    }
}
