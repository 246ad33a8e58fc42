//! Declaration descriptors shared by function parameters, struct members and union choices.
//!
//! A registry declaration is a small piece of C: a type, some `const`s and `*`s, a name and
//! possibly a static array suffix, plus `len=` metadata describing runtime array lengths. This
//! module turns one declaration into a [`Variable`] with every piece resolved.

use crate::{config::RegistryConfig, placeholders::Values};
use indexmap::IndexMap;
use log::warn;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{alpha1, char, digit1, multispace0},
    combinator::{all_consuming, map},
    sequence::{delimited, preceded, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

/// Type tag that replaces one level of `char` indirection.
pub const CSTRING: &str = "cstring";

const NULL_TERMINATED: &str = "null-terminated";

/// A fully resolved declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// The declared type name, after resolving aliases.
    pub type_id: String,
    /// `type_id` adjusted for strings and opaque pointer types.
    pub base_type: String,
    /// The element type when this is a pointer or an array, otherwise empty.
    pub child_type: String,
    /// The declaration text in front of the name, e.g. `const char* const*`.
    pub declared_type: String,
    /// The whole declaration without any embedded comment.
    pub declaration: String,
    pub pointer_levels: u32,
    /// A constant, the name of a sibling holding the count, or an arithmetic expression.
    pub array_length: Option<String>,
    /// Whether `array_length` came from a `len=` attribute rather than a static array.
    pub length_member: bool,
    /// Whether a sibling declaration uses this one as its length.
    pub is_length: bool,
    pub is_const: bool,
    /// Position among its siblings.
    pub index: usize,
}

/// Implemented by every role a [`Variable`] can play.
pub trait Declaration {
    fn variable(&self) -> &Variable;

    /// Prefix of the placeholders generated for this role.
    fn placeholder_prefix(&self) -> &'static str;

    /// Placeholders shared by every role, under the role's prefix.
    fn variable_placeholders(&self) -> Values {
        let var = self.variable();
        let prefix = self.placeholder_prefix();
        let mut values = Values::new();
        values.insert(format!("{prefix}Name"), &var.name);
        values.insert(format!("{prefix}TypeID"), &var.type_id);
        values.insert(format!("{prefix}BaseType"), &var.base_type);
        values.insert(format!("{prefix}ChildType"), &var.child_type);
        values.insert(format!("{prefix}Type"), &var.declared_type);
        values.insert(format!("{prefix}Declaration"), &var.declaration);
        values.insert(format!("{prefix}PtrLevel"), var.pointer_levels);
        values.insert(
            format!("{prefix}Length"),
            var.array_length.as_deref().unwrap_or_default(),
        );
        values.insert(format!("{prefix}LengthMember"), var.length_member);
        values.insert(format!("{prefix}IsLength"), var.is_length);
        values.insert(format!("{prefix}IsConst"), var.is_const);
        values.insert(format!("{prefix}Index"), var.index);
        values
    }
}

/// The raw pieces of a declaration as they appear in the registry.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawDeclaration<'a> {
    pub name: &'a str,
    pub type_name: &'a str,
    /// The declaration text. May still contain an embedded comment.
    pub code: &'a str,
    pub comment: Option<&'a str>,
    pub len: Option<&'a str>,
}

impl<'a> RawDeclaration<'a> {
    pub(crate) fn from_member(
        def: &'a vk_parse::TypeMemberDefinition,
    ) -> Result<Self, VariableError> {
        let mut name = None;
        let mut type_name = None;
        let mut comment = None;

        for markup in &def.markup {
            match markup {
                vk_parse::TypeMemberMarkup::Name(value) => name = Some(value.as_str()),
                vk_parse::TypeMemberMarkup::Type(value) => type_name = Some(value.as_str()),
                vk_parse::TypeMemberMarkup::Comment(value) => comment = Some(value.as_str()),
                _ => (),
            }
        }

        let name = name.ok_or_else(|| VariableError::MissingName {
            code: def.code.clone(),
        })?;
        let type_name = type_name.ok_or_else(|| VariableError::MissingType {
            name: name.to_owned(),
        })?;

        Ok(Self {
            name,
            type_name,
            code: &def.code,
            comment,
            len: def.len.as_deref(),
        })
    }

    pub(crate) fn from_param(param: &'a vk_parse::CommandParam) -> Result<Self, VariableError> {
        let definition = &param.definition;
        let type_name =
            definition
                .type_name
                .as_deref()
                .ok_or_else(|| VariableError::MissingType {
                    name: definition.name.clone(),
                })?;

        Ok(Self {
            name: &definition.name,
            type_name,
            code: &definition.code,
            comment: None,
            len: param.len.as_deref(),
        })
    }
}

/// Lookup tables a declaration is resolved against.
#[derive(Clone, Copy)]
pub(crate) struct Context<'a> {
    pub constants: &'a IndexMap<String, String>,
    pub aliases: &'a IndexMap<String, String>,
    pub config: &'a RegistryConfig,
}

/// Follows `name` through the alias map until it reaches a canonical name.
pub(crate) fn resolve_alias<'a>(aliases: &'a IndexMap<String, String>, name: &'a str) -> &'a str {
    let mut current = name;

    // Bounded so that a cyclic alias chain can't hang the builder.
    for _ in 0..aliases.len() {
        match aliases.get(current) {
            Some(target) if target != current => current = target,
            _ => break,
        }
    }

    current
}

impl Variable {
    pub(crate) fn new(
        raw: &RawDeclaration<'_>,
        index: usize,
        ctx: Context<'_>,
    ) -> Result<Self, VariableError> {
        let type_id = resolve_alias(ctx.aliases, raw.type_name).to_owned();

        let declaration = match raw.comment {
            Some(comment) if !comment.is_empty() => raw.code.replacen(comment, "", 1),
            _ => raw.code.to_owned(),
        };
        let declaration = declaration.trim();

        let (declared_type, suffix) = match declaration.rfind(raw.name) {
            Some(pos) => (
                declaration[..pos].trim(),
                &declaration[pos + raw.name.len()..],
            ),
            None => (declaration, ""),
        };
        let declared_type = if declared_type.is_empty() {
            raw.type_name
        } else {
            declared_type
        };

        let (array_length, length_member) = if let Some(size) = static_array_size(suffix) {
            let size = ctx
                .constants
                .get(size)
                .map_or_else(|| size.to_owned(), Clone::clone);
            (Some(size), false)
        } else if let Some(len) = raw.len {
            match len_attribute_length(raw.name, len)? {
                Some(length) => (Some(length), true),
                None => (None, false),
            }
        } else {
            (None, false)
        };

        let mut pointer_levels = declaration
            .chars()
            .filter(|&c| c == '*' || c == '[')
            .count() as i64;
        let mut base_type = type_id.clone();

        if type_id == "char" && pointer_levels > 0 {
            base_type = CSTRING.to_owned();
            pointer_levels -= 1;
        } else if ctx.config.is_opaque_pointer(&type_id) {
            base_type.push('*');
            pointer_levels -= 1;
        }

        let pointer_levels =
            u32::try_from(pointer_levels).map_err(|_| VariableError::NegativePointerLevel {
                declaration: declaration.to_owned(),
            })?;

        let child_type = if pointer_levels > 0 || array_length.is_some() {
            base_type.clone()
        } else {
            String::new()
        };

        Ok(Variable {
            name: raw.name.to_owned(),
            type_id,
            base_type,
            child_type,
            is_const: has_const_qualifier(declared_type),
            declared_type: declared_type.to_owned(),
            declaration: declaration.to_owned(),
            pointer_levels,
            array_length,
            length_member,
            is_length: false,
            index,
        })
    }

    /// The sibling this declaration takes its runtime length from, if any. A length read through
    /// a member path belongs to another struct, so it has none.
    pub fn length_source(&self) -> Option<&str> {
        if !self.length_member {
            return None;
        }

        let length = self.array_length.as_deref()?;
        if length.contains("->") {
            return None;
        }

        let end = length
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(length.len());

        (end > 0).then(|| &length[..end])
    }
}

/// Flags every declaration that another declaration in the same list uses as its length.
pub(crate) fn mark_length_givers<'a>(variables: impl IntoIterator<Item = &'a mut Variable>) {
    let mut variables: Vec<&mut Variable> = variables.into_iter().collect();
    let sources: Vec<String> = variables
        .iter()
        .filter_map(|var| var.length_source().map(ToOwned::to_owned))
        .collect();

    for var in &mut variables {
        if sources.iter().any(|source| *source == var.name) {
            var.is_length = true;
        }
    }
}

/// Whether `declared_type` has a `const` qualifier at any pointer level.
fn has_const_qualifier(declared_type: &str) -> bool {
    declared_type
        .split(|c: char| c.is_whitespace() || c == '*')
        .any(|token| token == "const")
}

fn static_array_size(suffix: &str) -> Option<&str> {
    let inner = suffix.trim_start().strip_prefix('[')?;
    let end = inner.find(']')?;

    Some(inner[..end].trim())
}

/// Resolves the length named by a `len=` attribute.
///
/// Only one real length is supported. When the attribute lists more than one, the first is used.
fn len_attribute_length(name: &str, len: &str) -> Result<Option<String>, VariableError> {
    let lengths: Vec<&str> = split_len(len)
        .into_iter()
        .filter(|length| !length.is_empty() && *length != NULL_TERMINATED)
        .collect();

    let Some(&length) = lengths.first() else {
        return Ok(None);
    };

    if lengths.len() > 1 {
        warn!(
            "`{}` has a multi-dimensional len `{}`, only `{}` is used",
            name, len, length,
        );
    }

    if length.starts_with("latexmath") {
        parse_latexmath(length).map(Some)
    } else {
        Ok(Some(normalize_length_path(length)))
    }
}

/// Splits a `len=` attribute on commas that aren't inside a latexmath block.
fn split_len(len: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in len.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(len[start..i].trim());
                start = i + 1;
            }
            _ => (),
        }
    }

    parts.push(len[start..].trim());
    parts
}

/// Rewrites a registry member path such as `pAllocateInfo::descriptorSetCount` into a C access
/// expression.
///
/// A leading dereference is added when the path ends in a pointer-named member reached through a
/// pointer-named parameter.
pub fn normalize_length_path(length: &str) -> String {
    let separator = if length.contains("::") {
        "::"
    } else if length.contains("->") {
        "->"
    } else {
        return length.to_owned();
    };

    let segments: Vec<&str> = length.split(separator).map(str::trim).collect();
    let first = segments.first().copied().unwrap_or_default();
    let last = segments.last().copied().unwrap_or_default();
    let dereference =
        last.starts_with('p') && first.chars().nth(1).is_some_and(char::is_uppercase);
    let path = segments.join("->");

    if dereference {
        format!("*{path}")
    } else {
        path
    }
}

/// Turns a `latexmath:[...]` length into an integer expression.
///
/// Two forms exist in the registry: a ceiling division, which becomes `x/y + 1`, and a plain
/// division, which becomes `x/y`.
pub fn parse_latexmath(text: &str) -> Result<String, VariableError> {
    let unsupported = || VariableError::UnsupportedLatexmath {
        text: text.to_owned(),
    };

    let body = text
        .strip_prefix("latexmath:[")
        .and_then(|body| body.strip_suffix(']'))
        .ok_or_else(unsupported)?;

    all_consuming(delimited(
        multispace0,
        alt((ceiling_division, division)),
        multispace0,
    ))(body)
    .map(|(_, expression)| expression)
    .map_err(|_| unsupported())
}

fn ceiling_division(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            tuple((tag("\\lceil"), multispace0, char('{'))),
            division_operands,
            tuple((char('}'), multispace0, tag("\\rceil"))),
        ),
        |(numerator, denominator)| format!("{numerator}/{denominator} + 1"),
    )(input)
}

fn division(input: &str) -> IResult<&str, String> {
    map(division_operands, |(numerator, denominator)| {
        format!("{numerator}/{denominator}")
    })(input)
}

fn division_operands(input: &str) -> IResult<&str, (String, String)> {
    map(
        tuple((
            preceded(multispace0, latex_operand),
            preceded(multispace0, tag("\\over")),
            preceded(multispace0, latex_operand),
            multispace0,
        )),
        |(numerator, _, denominator, _)| (numerator, denominator),
    )(input)
}

/// A number, or an identifier wrapped in a font command such as `\mathit{...}`.
fn latex_operand(input: &str) -> IResult<&str, String> {
    alt((
        map(
            preceded(
                tuple((char('\\'), alpha1)),
                delimited(char('{'), take_while1(|c| c != '}'), char('}')),
            ),
            |ident: &str| ident.replace("\\_", "_"),
        ),
        map(digit1, ToOwned::to_owned),
    ))(input)
}

/// Error that can happen when resolving a declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VariableError {
    /// The declaration has no `<name>` markup.
    MissingName { code: String },

    /// The declaration has no `<type>` markup.
    MissingType { name: String },

    /// A `latexmath:` length didn't match any of the supported forms.
    UnsupportedLatexmath { text: String },

    /// The declaration has fewer levels of indirection than its type requires.
    NegativePointerLevel { declaration: String },
}

impl Error for VariableError {}

impl Display for VariableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::MissingName { code } => write!(f, "declaration `{code}` has no name"),
            Self::MissingType { name } => write!(f, "declaration `{name}` has no type"),
            Self::UnsupportedLatexmath { text } => {
                write!(f, "unsupported latexmath length expression `{text}`")
            }
            Self::NegativePointerLevel { declaration } => write!(
                f,
                "declaration `{declaration}` has a negative pointer level after adjustment",
            ),
        }
    }
}
