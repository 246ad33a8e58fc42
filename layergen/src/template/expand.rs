//! Expansion of a parsed template against a [`Registry`].

use super::{
    condition,
    format::format,
    parse::{line_number, Control, ControlKind},
    TemplateError,
};
use crate::{
    extensions::{Extension, SystemType},
    placeholders::{Placeholders, Values},
    registry::{
        BaseType, Choice, Enum, EnumOption, ExternalType, Flag, FuncPointer, Function, Handle,
        Member, Parameter, Registry, Struct, Union,
    },
};
use smallvec::SmallVec;
use std::ops::Range;

/// The collection a `@foreach` iterates over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subject {
    BaseType,
    Bitmask,
    Choice,
    Enum,
    Extension,
    Flag,
    FuncPointer,
    Function,
    Handle,
    Option,
    Member,
    Parameter,
    Struct,
    SystemType,
    Type,
    Union,
}

impl Subject {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "basetype" => Self::BaseType,
            "bitmask" => Self::Bitmask,
            "choice" => Self::Choice,
            "enum" => Self::Enum,
            "extension" => Self::Extension,
            "flag" => Self::Flag,
            "funcpointer" => Self::FuncPointer,
            "function" => Self::Function,
            "handle" => Self::Handle,
            "option" => Self::Option,
            "member" => Self::Member,
            "parameter" => Self::Parameter,
            "struct" => Self::Struct,
            "systype" => Self::SystemType,
            "type" => Self::Type,
            "union" => Self::Union,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BaseType => "basetype",
            Self::Bitmask => "bitmask",
            Self::Choice => "choice",
            Self::Enum => "enum",
            Self::Extension => "extension",
            Self::Flag => "flag",
            Self::FuncPointer => "funcpointer",
            Self::Function => "function",
            Self::Handle => "handle",
            Self::Option => "option",
            Self::Member => "member",
            Self::Parameter => "parameter",
            Self::Struct => "struct",
            Self::SystemType => "systype",
            Self::Type => "type",
            Self::Union => "union",
        }
    }

    /// The kind of item an iteration over this subject has to be nested in.
    fn owner(self) -> Option<&'static str> {
        match self {
            Self::Choice => Some("union"),
            Self::Option => Some("enum or bitmask"),
            Self::Member => Some("struct"),
            Self::Parameter => Some("function"),
            _ => None,
        }
    }
}

/// One element of a collection, borrowed from the registry.
#[derive(Clone, Copy, Debug)]
enum Item<'r> {
    BaseType(&'r BaseType),
    Bitmask(&'r Enum),
    Choice(&'r Choice),
    Enum(&'r Enum),
    Extension(&'r Extension),
    Flag(&'r Flag),
    FuncPointer(&'r FuncPointer),
    Function(&'r Function),
    Handle(&'r Handle),
    Option(&'r EnumOption),
    Member(&'r Member),
    Parameter(&'r Parameter),
    Struct(&'r Struct),
    SystemType(&'r SystemType),
    Type(&'r ExternalType),
    Union(&'r Union),
}

impl<'r> Item<'r> {
    fn name(&self) -> &'r str {
        match *self {
            Self::BaseType(item) => &item.name,
            Self::Bitmask(item) | Self::Enum(item) => &item.name,
            Self::Choice(item) => &item.variable.name,
            Self::Extension(item) => &item.name,
            Self::Flag(item) => &item.name,
            Self::FuncPointer(item) => &item.name,
            Self::Function(item) => &item.name,
            Self::Handle(item) => &item.name,
            Self::Option(item) => &item.name,
            Self::Member(item) => &item.variable.name,
            Self::Parameter(item) => &item.variable.name,
            Self::Struct(item) => &item.name,
            Self::SystemType(item) => &item.name,
            Self::Type(item) => &item.name,
            Self::Union(item) => &item.name,
        }
    }

    fn placeholders(&self) -> Values {
        match *self {
            Self::BaseType(item) => item.placeholders(),
            Self::Bitmask(item) => item.bitmask_placeholders(),
            Self::Choice(item) => item.placeholders(),
            Self::Enum(item) => item.enum_placeholders(),
            Self::Extension(item) => item.placeholders(),
            Self::Flag(item) => item.placeholders(),
            Self::FuncPointer(item) => item.placeholders(),
            Self::Function(item) => item.placeholders(),
            Self::Handle(item) => item.placeholders(),
            Self::Option(item) => item.placeholders(),
            Self::Member(item) => item.placeholders(),
            Self::Parameter(item) => item.placeholders(),
            Self::Struct(item) => item.placeholders(),
            Self::SystemType(item) => item.placeholders(),
            Self::Type(item) => item.placeholders(),
            Self::Union(item) => item.placeholders(),
        }
    }
}

/// The items being iterated by the enclosing `@foreach` nodes, outermost first.
type Parents<'r> = SmallVec<[Item<'r>; 4]>;

pub(crate) struct Expander<'t, 'r> {
    text: &'t str,
    registry: &'r Registry,
}

impl<'t, 'r> Expander<'t, 'r> {
    pub(crate) fn new(text: &'t str, registry: &'r Registry) -> Self {
        Self { text, registry }
    }

    /// Expands the whole template, given its top-level nodes.
    pub(crate) fn expand(&self, nodes: &[Control]) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(self.text.len());
        let mut parents = Parents::new();

        self.expand_span(
            &mut output,
            0..self.text.len(),
            nodes,
            &Values::new(),
            &mut parents,
        )?;

        Ok(output)
    }

    /// Expands the literal text of `span` interleaved with the nodes it contains.
    fn expand_span(
        &self,
        output: &mut String,
        span: Range<usize>,
        nodes: &[Control],
        values: &Values,
        parents: &mut Parents<'r>,
    ) -> Result<(), TemplateError> {
        let mut cursor = span.start;

        for node in nodes {
            self.literal(output, cursor..node.outer.start, values, parents)?;
            self.expand_node(output, node, values, parents)?;
            cursor = node.outer.end;
        }

        self.literal(output, cursor..span.end, values, parents)
    }

    fn literal(
        &self,
        output: &mut String,
        span: Range<usize>,
        values: &Values,
        parents: &Parents<'r>,
    ) -> Result<(), TemplateError> {
        let start = span.start;
        let text = &self.text[span];

        let formatted = format(text, values).map_err(|error| TemplateError::Format {
            line: line_number(self.text, start + error.offset()),
            entity: entity(parents),
            error,
        })?;
        output.push_str(&formatted);

        Ok(())
    }

    fn expand_node(
        &self,
        output: &mut String,
        node: &Control,
        values: &Values,
        parents: &mut Parents<'r>,
    ) -> Result<(), TemplateError> {
        let subject = match node.kind {
            ControlKind::If => {
                if self.condition(node, values, parents)? {
                    self.expand_span(output, node.body.clone(), &node.children, values, parents)?;
                }

                return Ok(());
            }
            ControlKind::Foreach(subject) => subject,
        };

        for item in self.items(subject, node, parents)? {
            let mut merged = values.clone();
            merged.extend(item.placeholders());
            parents.push(item);

            let result = self.expand_item(output, node, item, &merged, parents);
            parents.pop();
            result?;
        }

        Ok(())
    }

    fn expand_item(
        &self,
        output: &mut String,
        node: &Control,
        item: Item<'r>,
        values: &Values,
        parents: &mut Parents<'r>,
    ) -> Result<(), TemplateError> {
        if !self.condition(node, values, parents)? {
            return Ok(());
        }

        let guard = self.guard(item);

        if let Some(guard) = guard {
            start_line(output);
            output.push_str("#if defined(");
            output.push_str(guard);
            output.push_str(")\n");
        }

        self.expand_span(output, node.body.clone(), &node.children, values, parents)?;

        if guard.is_some() {
            start_line(output);
            output.push_str("#endif\n");
        }

        Ok(())
    }

    /// Evaluates the node's condition with `values` substituted. A node without one always
    /// passes.
    fn condition(
        &self,
        node: &Control,
        values: &Values,
        parents: &Parents<'r>,
    ) -> Result<bool, TemplateError> {
        let Some(text) = &node.condition else {
            return Ok(true);
        };

        let substituted = format(text, values).map_err(|error| TemplateError::Format {
            line: node.line,
            entity: entity(parents),
            error,
        })?;

        condition::evaluate(&substituted).map_err(|error| TemplateError::Condition {
            line: node.line,
            entity: entity(parents),
            error,
        })
    }

    fn items(
        &self,
        subject: Subject,
        node: &Control,
        parents: &Parents<'r>,
    ) -> Result<Vec<Item<'r>>, TemplateError> {
        let registry = self.registry;

        let items: Vec<Item<'r>> = match subject {
            Subject::BaseType => registry.basetypes.values().map(Item::BaseType).collect(),
            Subject::Bitmask => registry.bitmasks.values().map(Item::Bitmask).collect(),
            Subject::Enum => registry.enums.values().map(Item::Enum).collect(),
            Subject::Extension => registry.extensions.values().map(Item::Extension).collect(),
            Subject::Flag => registry.flags.values().map(Item::Flag).collect(),
            Subject::FuncPointer => registry
                .func_pointers
                .values()
                .map(Item::FuncPointer)
                .collect(),
            Subject::Function => registry.functions.values().map(Item::Function).collect(),
            Subject::Handle => registry.handles.values().map(Item::Handle).collect(),
            Subject::Struct => registry.structs.values().map(Item::Struct).collect(),
            Subject::SystemType => registry.system_types.iter().map(Item::SystemType).collect(),
            Subject::Type => registry.external_types.values().map(Item::Type).collect(),
            Subject::Union => registry.unions.values().map(Item::Union).collect(),
            Subject::Choice | Subject::Option | Subject::Member | Subject::Parameter => {
                let owned = parents
                    .iter()
                    .rev()
                    .find_map(|parent| -> Option<Vec<Item<'r>>> {
                        match (subject, *parent) {
                            (Subject::Choice, Item::Union(owner)) => {
                                Some(owner.choices.iter().map(Item::Choice).collect())
                            }
                            (Subject::Option, Item::Enum(owner) | Item::Bitmask(owner)) => {
                                Some(owner.options.iter().map(Item::Option).collect())
                            }
                            (Subject::Member, Item::Struct(owner)) => {
                                Some(owner.members.iter().map(Item::Member).collect())
                            }
                            (Subject::Parameter, Item::Function(owner)) => {
                                Some(owner.parameters.iter().map(Item::Parameter).collect())
                            }
                            _ => None,
                        }
                    });

                owned.ok_or_else(|| TemplateError::MissingParent {
                    subject: subject.as_str(),
                    owner: subject.owner().unwrap_or_default(),
                    line: node.line,
                })?
            }
        };

        Ok(items)
    }

    /// The preprocessor guard an item has to be wrapped in: that of the extension introducing the
    /// function or type of the same name, or the one a system type was found in.
    ///
    /// Declarations nested in another item are never guarded on their own, since the item they
    /// belong to already is.
    fn guard(&self, item: Item<'r>) -> Option<&'r str> {
        let registry = self.registry;

        let extension = match item {
            Item::Choice(_) | Item::Option(_) | Item::Member(_) | Item::Parameter(_) => None,
            _ => registry
                .extension_for_function(item.name())
                .or_else(|| registry.extension_for_type(item.name()))
                .or_else(|| match item {
                    Item::SystemType(system_type) => {
                        registry.extensions.get(&system_type.extension)
                    }
                    _ => None,
                }),
        };

        extension
            .and_then(|extension| extension.guard.as_deref())
            .filter(|guard| !guard.is_empty())
    }
}

/// The name of the innermost item being expanded, for error messages.
fn entity(parents: &Parents<'_>) -> Option<String> {
    parents.last().map(|item| item.name().to_owned())
}

/// Makes sure the next text written to `output` starts a new line.
fn start_line(output: &mut String) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
}
