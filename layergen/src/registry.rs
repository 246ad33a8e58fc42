//! The registry model and the builder that produces it from a parsed registry document.

use crate::{
    config::RegistryConfig,
    extensions::{self, Extension, SystemType},
    placeholders::{Placeholders, Values},
    variable::{
        mark_length_givers, resolve_alias, Context, Declaration, RawDeclaration, Variable,
        VariableError,
    },
};
use foldhash::{HashSet, HashSetExt};
use heck::ToSnakeCase;
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    io::Read,
    path::Path,
};

const API_CONSTANTS: &str = "API Constants";
const STRUCTURE_TYPE: &str = "VkStructureType";
const VK_DEFINE_HANDLE: &str = "VK_DEFINE_HANDLE";
const VK_PLATFORM: &str = "vk_platform";
const VK_VIDEO_HEADERS: &str = "vk_video/";

/// Whether a function is dispatched through the instance or through the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchType {
    Instance,
    Device,
}

impl DispatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Device => "device",
        }
    }

    pub(crate) fn from_registry(value: &str) -> Option<Self> {
        match value {
            "instance" => Some(Self::Instance),
            "device" => Some(Self::Device),
            _ => None,
        }
    }
}

impl Display for DispatchType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub variable: Variable,
}

impl Declaration for Parameter {
    fn variable(&self) -> &Variable {
        &self.variable
    }

    fn placeholder_prefix(&self) -> &'static str {
        "prm"
    }
}

impl Placeholders for Parameter {
    fn placeholders(&self) -> Values {
        self.variable_placeholders()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub variable: Variable,
    /// The sibling member that selects which choice of this union-typed member is active.
    pub selector: Option<String>,
    /// The enumerant this member is fixed to, e.g. the value of `sType`.
    pub values: Option<String>,
}

impl Declaration for Member {
    fn variable(&self) -> &Variable {
        &self.variable
    }

    fn placeholder_prefix(&self) -> &'static str {
        "mem"
    }
}

impl Placeholders for Member {
    fn placeholders(&self) -> Values {
        let mut values = self.variable_placeholders();
        values.insert("memSelector", self.selector.as_deref().unwrap_or_default());
        values.insert("memValues", self.values.as_deref().unwrap_or_default());
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub variable: Variable,
    /// The selector values for which this choice is active.
    pub selection: Vec<String>,
}

impl Declaration for Choice {
    fn variable(&self) -> &Variable {
        &self.variable
    }

    fn placeholder_prefix(&self) -> &'static str {
        "chc"
    }
}

impl Placeholders for Choice {
    fn placeholders(&self) -> Values {
        let mut values = self.variable_placeholders();
        values.insert("chcSelection", self.selection.join(","));
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub return_type: String,
    pub parameters: Vec<Parameter>,
    pub dispatch_type: DispatchType,
    /// Equal to `dispatch_type` unless an instance extension introduces the function.
    pub ty: DispatchType,
    pub state_tracking_code: Option<String>,
    /// False when a non-const pointer parameter is written by the call, so arguments can't be
    /// printed before it returns.
    pub safe_to_print: bool,
}

impl Placeholders for Function {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("funcName", &self.name);
        values.insert(
            "funcShortName",
            self.name.strip_prefix("vk").unwrap_or(&self.name),
        );
        values.insert("funcSnakeName", self.name.to_snake_case());
        values.insert("funcReturn", &self.return_type);
        values.insert("funcDispatchType", self.dispatch_type);
        values.insert("funcType", self.ty);
        values.insert(
            "funcDispatchParam",
            self.parameters
                .first()
                .map(|param| param.variable.name.as_str())
                .unwrap_or_default(),
        );
        values.insert("funcNamedParams", self.joined(|var| &var.name));
        values.insert("funcTypedParams", self.joined(|var| &var.declaration));
        values.insert("funcParamCount", self.parameters.len());
        values.insert("funcSafeToPrint", self.safe_to_print);
        values.insert(
            "funcStateTrackingCode",
            self.state_tracking_code.as_deref().unwrap_or_default(),
        );
        values
    }
}

impl Function {
    fn joined(&self, f: impl Fn(&Variable) -> &String) -> String {
        self.parameters
            .iter()
            .map(|param| f(&param.variable).as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Struct {
    pub name: String,
    pub members: Vec<Member>,
    /// The structs this one can be chained into, as listed by the registry.
    pub struct_extends: String,
    /// The structure type value carried by this struct when it extends another, otherwise -1.
    pub structure_type_index: i64,
}

impl Placeholders for Struct {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("sctName", &self.name);
        values.insert("sctSnakeName", self.name.to_snake_case());
        values.insert("sctExtends", &self.struct_extends);
        values.insert("sctStructureTypeIndex", self.structure_type_index);
        values.insert("sctMemberCount", self.members.len());
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Union {
    pub name: String,
    pub choices: Vec<Choice>,
}

impl Placeholders for Union {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("unName", &self.name);
        values.insert("unChoiceCount", self.choices.len());
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumOption {
    pub name: String,
    pub value: i64,
    pub comment: String,
    /// True when the value isn't a single bit.
    pub is_multi_value: bool,
}

impl EnumOption {
    pub fn new(name: &str, value: i64, comment: Option<&str>) -> Self {
        Self {
            name: name.to_owned(),
            value,
            comment: comment.unwrap_or_default().to_owned(),
            is_multi_value: !(value as u64).is_power_of_two(),
        }
    }
}

impl Placeholders for EnumOption {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("optName", &self.name);
        values.insert("optValue", self.value);
        values.insert("optComment", &self.comment);
        values.insert("optMultiValue", self.is_multi_value);
        values
    }
}

/// An `<enums>` group: either a plain enumeration or the bits of a bitmask.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enum {
    pub name: String,
    /// `enum` or `bitmask`.
    pub ty: String,
    pub bit_width: u32,
    pub options: Vec<EnumOption>,
}

impl Enum {
    /// Adds an option unless one with the same name already exists.
    pub(crate) fn push_option(&mut self, option: EnumOption) -> bool {
        if self.options.iter().any(|existing| existing.name == option.name) {
            debug!("{}: ignoring duplicate option `{}`", self.name, option.name);
            return false;
        }

        self.options.push(option);
        true
    }

    pub fn option(&self, name: &str) -> Option<&EnumOption> {
        self.options.iter().find(|option| option.name == name)
    }

    /// Placeholders for a plain enumeration.
    pub(crate) fn enum_placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("enumName", &self.name);
        values.insert("enumType", &self.ty);
        values.insert("enumOptionCount", self.options.len());
        values
    }

    /// Placeholders for a bitmask.
    pub(crate) fn bitmask_placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("bitName", &self.name);
        values.insert("bitType", &self.ty);
        values.insert("bitWidth", self.bit_width);
        values.insert("bitOptionCount", self.options.len());
        values
    }
}

/// A flags typedef such as `VkAccessFlags`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub name: String,
    pub ty: String,
    /// The bitmask enumeration holding the individual bits, if there is one.
    pub bitmask: Option<String>,
}

impl Placeholders for Flag {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("flagName", &self.name);
        values.insert("flagType", &self.ty);
        values.insert("flagEnum", self.bitmask.as_deref().unwrap_or_default());
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub name: String,
    pub parent: Option<String>,
    pub dispatchable: bool,
}

impl Placeholders for Handle {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("hdlName", &self.name);
        values.insert("hdlParent", self.parent.as_deref().unwrap_or_default());
        values.insert("hdlDispatchable", self.dispatchable);
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseType {
    pub name: String,
    /// The underlying type, empty for opaque types.
    pub ty: String,
}

impl Placeholders for BaseType {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("baseName", &self.name);
        values.insert("baseType", &self.ty);
        values
    }
}

/// A type defined outside the registry, e.g. `uint32_t` or `Display`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalType {
    pub name: String,
    /// The header or module that provides the type.
    pub requires: String,
    /// Whether the type comes from a system header rather than the API's own headers.
    pub system: bool,
}

impl Placeholders for ExternalType {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("typeName", &self.name);
        values.insert("typeRequires", &self.requires);
        values.insert("typeSystem", self.system);
        values
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncPointer {
    pub name: String,
    pub return_type: String,
}

impl Placeholders for FuncPointer {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("pfnName", &self.name);
        values.insert("pfnReturn", &self.return_type);
        values
    }
}

/// The resolved registry. Immutable once built.
///
/// Every collection keeps the order in which the registry declares its entities, so expanding a
/// template produces byte-identical output across runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub functions: IndexMap<String, Function>,
    pub structs: IndexMap<String, Struct>,
    pub unions: IndexMap<String, Union>,
    pub enums: IndexMap<String, Enum>,
    pub bitmasks: IndexMap<String, Enum>,
    pub flags: IndexMap<String, Flag>,
    pub handles: IndexMap<String, Handle>,
    pub basetypes: IndexMap<String, BaseType>,
    pub external_types: IndexMap<String, ExternalType>,
    pub func_pointers: IndexMap<String, FuncPointer>,
    pub extensions: IndexMap<String, Extension>,
    pub system_types: Vec<SystemType>,
    /// Alias name to the name it stands for.
    pub aliases: IndexMap<String, String>,
    /// The `API Constants` group.
    pub constants: IndexMap<String, String>,
    /// Function name to the name of the extension that introduces it.
    pub extension_functions: IndexMap<String, String>,
    /// Type name to the name of the extension that introduces it.
    pub extension_types: IndexMap<String, String>,
}

impl Registry {
    /// Parses and resolves the registry document at `path`.
    pub fn load(path: &Path, config: &RegistryConfig) -> Result<Self, RegistryError> {
        info!("loading registry from {}", path.display());
        let (raw, errors) =
            vk_parse::parse_file(path).map_err(|err| RegistryError::Parse(format!("{err:?}")))?;
        log_parse_errors(&errors);

        Self::from_vk_parse(&raw, config)
    }

    /// Parses and resolves a registry document read from `reader`.
    pub fn from_reader<R: Read>(reader: R, config: &RegistryConfig) -> Result<Self, RegistryError> {
        let (raw, errors) = vk_parse::parse_stream(reader)
            .map_err(|err| RegistryError::Parse(format!("{err:?}")))?;
        log_parse_errors(&errors);

        Self::from_vk_parse(&raw, config)
    }

    /// Builds the model from an already parsed registry document.
    pub fn from_vk_parse(
        raw: &vk_parse::Registry,
        config: &RegistryConfig,
    ) -> Result<Self, RegistryError> {
        let mut builder = RegistryBuilder::new(config);
        builder.collect_aliases(raw);
        builder.collect_constants(raw);
        builder.collect_types(raw)?;
        builder.collect_enums(raw);
        builder.collect_functions(raw)?;
        builder.collect_features(raw);
        extensions::resolve(&mut builder, raw);
        builder.resolve_structure_types();

        Ok(builder.finish())
    }

    /// Follows `name` through the alias map.
    #[inline]
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        resolve_alias(&self.aliases, name)
    }

    pub fn extension_for_function(&self, name: &str) -> Option<&Extension> {
        self.extension_functions
            .get(name)
            .and_then(|ext| self.extensions.get(ext))
    }

    pub fn extension_for_type(&self, name: &str) -> Option<&Extension> {
        self.extension_types
            .get(name)
            .and_then(|ext| self.extensions.get(ext))
    }
}

fn log_parse_errors(errors: &[vk_parse::Error]) {
    for error in errors {
        debug!("registry parse diagnostic: {:?}", error);
    }
}

/// Accumulates entities during one registry load. Turned into an immutable [`Registry`] by
/// [`RegistryBuilder::finish`].
pub(crate) struct RegistryBuilder<'c> {
    pub(crate) config: &'c RegistryConfig,
    pub(crate) registry: Registry,
    /// Alias-resolved names of every type and command already turned into an entity.
    tracked: HashSet<String>,
}

impl<'c> RegistryBuilder<'c> {
    fn new(config: &'c RegistryConfig) -> Self {
        Self {
            config,
            registry: Registry::default(),
            tracked: HashSet::new(),
        }
    }

    fn finish(self) -> Registry {
        let registry = self.registry;
        info!(
            "registry: {} functions, {} structs, {} unions, {} enums, {} bitmasks, {} handles, \
            {} extensions, {} system types",
            registry.functions.len(),
            registry.structs.len(),
            registry.unions.len(),
            registry.enums.len(),
            registry.bitmasks.len(),
            registry.handles.len(),
            registry.extensions.len(),
            registry.system_types.len(),
        );
        registry
    }

    /// Records `name` as seen. Returns false when it already was.
    fn track(&mut self, name: &str) -> bool {
        let name = resolve_alias(&self.registry.aliases, name);
        if self.tracked.insert(name.to_owned()) {
            true
        } else {
            debug!("ignoring redeclaration of `{}`", name);
            false
        }
    }

    fn context(&self) -> Context<'_> {
        Context {
            constants: &self.registry.constants,
            aliases: &self.registry.aliases,
            config: self.config,
        }
    }

    fn collect_aliases(&mut self, raw: &vk_parse::Registry) {
        for ty in types(raw) {
            if let (Some(name), Some(alias)) = (&ty.name, &ty.alias) {
                self.registry.aliases.insert(name.clone(), alias.clone());
            }
        }

        for command in commands(raw) {
            if let vk_parse::Command::Alias { name, alias } = command {
                self.registry.aliases.insert(name.clone(), alias.clone());
            }
        }
    }

    fn collect_constants(&mut self, raw: &vk_parse::Registry) {
        let constants = enums_groups(raw)
            .filter(|enums| enums.name.as_deref() == Some(API_CONSTANTS))
            .flat_map(|enums| enum_children(enums));

        for constant in constants {
            match &constant.spec {
                vk_parse::EnumSpec::Value { value, .. } => {
                    self.registry
                        .constants
                        .entry(constant.name.clone())
                        .or_insert_with(|| value.clone());
                }
                vk_parse::EnumSpec::Alias { alias, .. } => {
                    if let Some(value) = self.registry.constants.get(alias).cloned() {
                        self.registry
                            .constants
                            .entry(constant.name.clone())
                            .or_insert(value);
                    }
                }
                _ => (),
            }
        }
    }

    fn collect_types(&mut self, raw: &vk_parse::Registry) -> Result<(), RegistryError> {
        for ty in types(raw) {
            if ty.alias.is_some() || !self.config.contains_api(ty.api.as_deref()) {
                continue;
            }

            let Some(name) = type_name(ty) else {
                continue;
            };

            // Categories this model has no entity for are ignored, as are uncategorized types
            // that don't name a providing header.
            let known = matches!(
                ty.category.as_deref(),
                Some("basetype" | "bitmask" | "handle" | "funcpointer" | "struct" | "union")
            ) || (ty.category.is_none() && ty.requires.is_some());

            if !known || !self.track(name) {
                continue;
            }

            let name = name.to_owned();

            match ty.category.as_deref() {
                Some("basetype") => {
                    let base = BaseType {
                        ty: code_type(ty).unwrap_or_default().to_owned(),
                        name: name.clone(),
                    };
                    self.registry.basetypes.insert(name, base);
                }
                Some("bitmask") => {
                    let flag = Flag {
                        ty: code_type(ty).unwrap_or_default().to_owned(),
                        bitmask: ty.requires.clone().or_else(|| ty.bitvalues.clone()),
                        name: name.clone(),
                    };
                    self.registry.flags.insert(name, flag);
                }
                Some("handle") => {
                    let handle = Handle {
                        parent: ty
                            .parent
                            .as_deref()
                            .and_then(|parent| parent.split(',').next())
                            .map(ToOwned::to_owned),
                        dispatchable: code_type(ty) == Some(VK_DEFINE_HANDLE),
                        name: name.clone(),
                    };
                    self.registry.handles.insert(name, handle);
                }
                Some("funcpointer") => {
                    let func_pointer = FuncPointer {
                        return_type: func_pointer_return_type(ty),
                        name: name.clone(),
                    };
                    self.registry.func_pointers.insert(name, func_pointer);
                }
                Some("struct") => {
                    let members = self
                        .declarations(&name, ty)?
                        .into_iter()
                        .map(|(variable, def)| Member {
                            variable,
                            selector: def.selector.clone(),
                            values: def.values.clone(),
                        })
                        .collect();
                    let structure = Struct {
                        members,
                        struct_extends: ty.structextends.clone().unwrap_or_default(),
                        structure_type_index: -1,
                        name: name.clone(),
                    };
                    self.registry.structs.insert(name, structure);
                }
                Some("union") => {
                    let choices = self
                        .declarations(&name, ty)?
                        .into_iter()
                        .map(|(variable, def)| Choice {
                            variable,
                            selection: def
                                .selection
                                .as_deref()
                                .map(|selection| {
                                    selection.split(',').map(ToOwned::to_owned).collect()
                                })
                                .unwrap_or_default(),
                        })
                        .collect();
                    let union = Union {
                        choices,
                        name: name.clone(),
                    };
                    self.registry.unions.insert(name, union);
                }
                _ => {
                    let requires = ty.requires.clone().unwrap_or_default();
                    let external = ExternalType {
                        system: requires != VK_PLATFORM && !requires.starts_with(VK_VIDEO_HEADERS),
                        requires,
                        name: name.clone(),
                    };
                    self.registry.external_types.insert(name, external);
                }
            }
        }

        Ok(())
    }

    /// Resolves the member declarations of a struct or union.
    fn declarations<'t>(
        &self,
        owner: &str,
        ty: &'t vk_parse::Type,
    ) -> Result<Vec<(Variable, &'t vk_parse::TypeMemberDefinition)>, RegistryError> {
        let vk_parse::TypeSpec::Members(members) = &ty.spec else {
            return Ok(Vec::new());
        };

        let ctx = self.context();
        let mut declarations = members
            .iter()
            .filter_map(|member| match member {
                vk_parse::TypeMember::Definition(def) => Some(def),
                _ => None,
            })
            .filter(|def| self.config.contains_api(def.api.as_deref()))
            .enumerate()
            .map(|(index, def)| {
                RawDeclaration::from_member(def)
                    .and_then(|raw| Variable::new(&raw, index, ctx))
                    .map(|variable| (variable, def))
                    .map_err(|error| RegistryError::Declaration {
                        entity: owner.to_owned(),
                        error,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        mark_length_givers(declarations.iter_mut().map(|(variable, _)| variable));

        Ok(declarations)
    }

    fn collect_enums(&mut self, raw: &vk_parse::Registry) {
        for enums in enums_groups(raw) {
            let Some(name) = enums.name.as_deref() else {
                continue;
            };
            let ty = match enums.kind.as_deref() {
                Some(ty @ ("enum" | "bitmask")) => ty,
                _ => continue,
            };

            if !self.track(name) {
                continue;
            }

            let mut entity = Enum {
                name: name.to_owned(),
                ty: ty.to_owned(),
                bit_width: enums.bitwidth.unwrap_or(32),
                options: Vec::new(),
            };

            for option in enum_children(enums) {
                if !self.config.contains_api(option.api.as_deref()) {
                    continue;
                }

                let value = match &option.spec {
                    vk_parse::EnumSpec::Value { value, .. } => parse_integer(value),
                    vk_parse::EnumSpec::Bitpos { bitpos, .. } => Some(1i64 << *bitpos),
                    _ => None,
                };

                if let Some(value) = value {
                    entity.push_option(EnumOption::new(
                        &option.name,
                        value,
                        option.comment.as_deref(),
                    ));
                }
            }

            if ty == "enum" {
                self.registry.enums.insert(name.to_owned(), entity);
            } else {
                self.registry.bitmasks.insert(name.to_owned(), entity);
            }
        }
    }

    fn collect_functions(&mut self, raw: &vk_parse::Registry) -> Result<(), RegistryError> {
        let instance_handles = self.instance_handles();

        for command in commands(raw) {
            let vk_parse::Command::Definition(def) = command else {
                continue;
            };
            let name = def.proto.name.as_str();

            if self.config.is_excluded(name) {
                debug!("skipping excluded function `{}`", name);
                continue;
            }

            if self.registry.aliases.contains_key(name) || !self.track(name) {
                continue;
            }

            let ctx = self.context();
            let mut parameters = def
                .params
                .iter()
                .filter(|param| self.config.contains_api(param.api.as_deref()))
                .enumerate()
                .map(|(index, param)| {
                    RawDeclaration::from_param(param)
                        .and_then(|raw| Variable::new(&raw, index, ctx))
                        .map(|variable| Parameter { variable })
                        .map_err(|error| RegistryError::Declaration {
                            entity: name.to_owned(),
                            error,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            mark_length_givers(parameters.iter_mut().map(|param| &mut param.variable));

            let dispatch_type = match parameters.first() {
                Some(first) if instance_handles.contains(first.variable.type_id.as_str()) => {
                    DispatchType::Instance
                }
                _ if name == self.config.instance_creation_function => DispatchType::Instance,
                _ => DispatchType::Device,
            };

            let safe_to_print = !parameters.iter().any(|param| {
                param.variable.declared_type.contains('*') && !param.variable.is_const
            });

            let function = Function {
                name: name.to_owned(),
                return_type: def
                    .proto
                    .type_name
                    .clone()
                    .unwrap_or_else(|| "void".to_owned()),
                parameters,
                dispatch_type,
                ty: dispatch_type,
                state_tracking_code: self.config.state_tracking.get(name).cloned(),
                safe_to_print,
            };
            self.registry.functions.insert(name.to_owned(), function);
        }

        Ok(())
    }

    /// Handles that dispatch through the instance: those without a parent, and dispatchable
    /// handles whose parent has no parent.
    fn instance_handles(&self) -> HashSet<String> {
        let handles = &self.registry.handles;
        let is_root = |name: &str| handles.get(name).is_some_and(|h| h.parent.is_none());

        handles
            .values()
            .filter(|handle| match handle.parent.as_deref() {
                None => true,
                Some(parent) => handle.dispatchable && is_root(parent),
            })
            .map(|handle| handle.name.clone())
            .collect()
    }

    /// Core version blocks add enum values the same way extensions do.
    fn collect_features(&mut self, raw: &vk_parse::Registry) {
        let features = raw.0.iter().filter_map(|child| match child {
            vk_parse::RegistryChild::Feature(feature) => Some(feature),
            _ => None,
        });

        for feature in features {
            if !self.config.contains_api(Some(feature.api.as_str())) {
                continue;
            }

            for option in extensions::required_enums(&feature.children, self.config) {
                if let extensions::Contribution::Extends {
                    base,
                    name,
                    value,
                    comment,
                } = extensions::contribution(option, None)
                {
                    self.add_enum_option(base, EnumOption::new(name, value, comment));
                }
            }
        }
    }

    /// Adds an option to the enum or bitmask named `base`, unless it already has one by that
    /// name.
    pub(crate) fn add_enum_option(&mut self, base: &str, option: EnumOption) {
        let base = resolve_alias(&self.registry.aliases, base);
        let target = match self.registry.enums.get_mut(base) {
            Some(target) => target,
            None => match self.registry.bitmasks.get_mut(base) {
                Some(target) => target,
                None => {
                    debug!("`{}` extends unknown enum `{}`", option.name, base);
                    return;
                }
            },
        };

        target.push_option(option);
    }

    /// Fills in `structure_type_index` for structs that extend another struct.
    fn resolve_structure_types(&mut self) {
        let Registry { structs, enums, .. } = &mut self.registry;
        let Some(structure_types) = enums.get(STRUCTURE_TYPE) else {
            return;
        };

        for structure in structs.values_mut() {
            if structure.struct_extends.is_empty() {
                continue;
            }

            let value = structure
                .members
                .iter()
                .filter_map(|member| member.values.as_deref())
                .filter_map(|values| values.split(',').next())
                .find_map(|value| structure_types.option(value));

            if let Some(option) = value {
                structure.structure_type_index = option.value;
            }
        }
    }
}

pub(crate) fn types(raw: &vk_parse::Registry) -> impl Iterator<Item = &vk_parse::Type> {
    raw.0
        .iter()
        .filter_map(|child| match child {
            vk_parse::RegistryChild::Types(types) => Some(types),
            _ => None,
        })
        .flat_map(|types| &types.children)
        .filter_map(|child| match child {
            vk_parse::TypesChild::Type(ty) => Some(ty),
            _ => None,
        })
}

fn commands(raw: &vk_parse::Registry) -> impl Iterator<Item = &vk_parse::Command> {
    raw.0
        .iter()
        .filter_map(|child| match child {
            vk_parse::RegistryChild::Commands(commands) => Some(commands),
            _ => None,
        })
        .flat_map(|commands| &commands.children)
}

fn enums_groups(raw: &vk_parse::Registry) -> impl Iterator<Item = &vk_parse::Enums> {
    raw.0.iter().filter_map(|child| match child {
        vk_parse::RegistryChild::Enums(enums) => Some(enums),
        _ => None,
    })
}

fn enum_children(enums: &vk_parse::Enums) -> impl Iterator<Item = &vk_parse::Enum> {
    enums.children.iter().filter_map(|child| match child {
        vk_parse::EnumsChild::Enum(option) => Some(option),
        _ => None,
    })
}

/// The name of a type, which handles and function pointers only give in their markup.
fn type_name(ty: &vk_parse::Type) -> Option<&str> {
    ty.name.as_deref().or_else(|| match &ty.spec {
        vk_parse::TypeSpec::Code(code) => code.markup.iter().find_map(|markup| match markup {
            vk_parse::TypeCodeMarkup::Name(name) => Some(name.as_str()),
            _ => None,
        }),
        _ => None,
    })
}

/// The first `<type>` referenced by a type's code.
fn code_type(ty: &vk_parse::Type) -> Option<&str> {
    match &ty.spec {
        vk_parse::TypeSpec::Code(code) => code.markup.iter().find_map(|markup| match markup {
            vk_parse::TypeCodeMarkup::Type(name) => Some(name.as_str()),
            _ => None,
        }),
        _ => None,
    }
}

/// Extracts `void*` from `typedef void* (VKAPI_PTR *PFN_vkAllocationFunction)(...)`.
fn func_pointer_return_type(ty: &vk_parse::Type) -> String {
    let vk_parse::TypeSpec::Code(code) = &ty.spec else {
        return String::new();
    };

    let code = code.code.trim_start();
    let code = code.strip_prefix("typedef").unwrap_or(code);

    code.split_once('(')
        .map_or(code, |(return_type, _)| return_type)
        .trim()
        .to_owned()
}

/// Parses a registry integer: decimal, negative or `0x` hexadecimal, with optional C suffixes.
pub(crate) fn parse_integer(value: &str) -> Option<i64> {
    let value = value
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim_end_matches(['U', 'u', 'L', 'l']);
    let (negative, digits) = match value.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, value),
    };

    let parsed = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }?;

    Some(if negative { -parsed } else { parsed })
}

/// Error that can happen when building the registry model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry document couldn't be read or parsed.
    Parse(String),

    /// A declaration inside `entity` couldn't be resolved.
    Declaration {
        entity: String,
        error: VariableError,
    },
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Declaration { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Parse(err) => write!(f, "failed to parse the registry: {err}"),
            Self::Declaration { entity, error } => write!(f, "in `{entity}`: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<registry>
    <types>
        <type requires="vk_platform" name="uint32_t"/>
        <type requires="vk_platform" name="void"/>
        <type requires="vk_platform" name="char"/>
        <type category="basetype">typedef <type>uint32_t</type> <name>VkFlags</name>;</type>
        <type category="basetype">typedef <type>uint32_t</type> <name>VkBool32</name>;</type>
        <type category="handle"><type>VK_DEFINE_HANDLE</type>(<name>VkInstance</name>)</type>
        <type category="handle" parent="VkInstance"><type>VK_DEFINE_HANDLE</type>(<name>VkPhysicalDevice</name>)</type>
        <type category="handle" parent="VkPhysicalDevice"><type>VK_DEFINE_HANDLE</type>(<name>VkDevice</name>)</type>
        <type category="handle" parent="VkDevice"><type>VK_DEFINE_NON_DISPATCHABLE_HANDLE</type>(<name>VkFence</name>)</type>
        <type category="enum" name="VkStructureType"/>
        <type category="enum" name="VkSampleCountFlagBits"/>
        <type requires="VkSampleCountFlagBits" category="bitmask">typedef <type>VkFlags</type> <name>VkSampleCountFlags</name>;</type>
        <type category="funcpointer">typedef void* (VKAPI_PTR *<name>PFN_vkAllocationFunction</name>)(
    <type>void</type>*                                       pUserData);</type>
        <type category="struct" name="VkBaseInfo">
            <member><type>VkStructureType</type> <name>sType</name></member>
            <member>const <type>void</type>* <name>pNext</name></member>
        </type>
        <type category="struct" name="VkFooInfo" structextends="VkBaseInfo">
            <member values="VK_STRUCTURE_TYPE_FOO_INFO"><type>VkStructureType</type> <name>sType</name></member>
            <member>const <type>void</type>* <name>pNext</name></member>
            <member><type>uint32_t</type> <name>count</name></member>
            <member len="count">const <type>uint32_t</type>* <name>pValues</name></member>
        </type>
        <type category="struct" name="VkFooInfo2" alias="VkFooInfo"/>
        <type category="union" name="VkClearValue">
            <member><type>uint32_t</type> <name>color</name></member>
            <member><type>uint32_t</type> <name>depthStencil</name></member>
        </type>
    </types>
    <enums name="API Constants">
        <enum value="256" name="VK_MAX_NAME_SIZE"/>
    </enums>
    <enums name="VkStructureType" type="enum">
        <enum value="0" name="VK_STRUCTURE_TYPE_BASE_INFO"/>
        <enum value="1" name="VK_STRUCTURE_TYPE_FOO_INFO"/>
        <enum value="7" name="VK_STRUCTURE_TYPE_FOO_INFO"/>
    </enums>
    <enums name="VkSampleCountFlagBits" type="bitmask">
        <enum bitpos="0" name="VK_SAMPLE_COUNT_1_BIT"/>
        <enum bitpos="2" name="VK_SAMPLE_COUNT_4_BIT"/>
        <enum value="0x00000005" name="VK_SAMPLE_COUNT_1_AND_4"/>
    </enums>
    <commands>
        <command>
            <proto><type>void</type> <name>vkCreateInstance</name></proto>
            <param>const <type>char</type>* <name>pName</name></param>
            <param><type>VkInstance</type>* <name>pInstance</name></param>
        </command>
        <command>
            <proto><type>void</type> <name>vkEnumeratePhysicalDevices</name></proto>
            <param><type>VkInstance</type> <name>instance</name></param>
            <param><type>uint32_t</type>* <name>pPhysicalDeviceCount</name></param>
            <param len="pPhysicalDeviceCount"><type>VkPhysicalDevice</type>* <name>pPhysicalDevices</name></param>
        </command>
        <command>
            <proto><type>void</type> <name>vkQueryDevice</name></proto>
            <param><type>VkPhysicalDevice</type> <name>physicalDevice</name></param>
        </command>
        <command>
            <proto><type>void</type> <name>vkWaitForFence</name></proto>
            <param><type>VkDevice</type> <name>device</name></param>
            <param>const <type>VkFence</type>* <name>pFence</name></param>
        </command>
        <command name="vkWaitForFenceKHR" alias="vkWaitForFence"/>
        <command>
            <proto><type>uint32_t</type> <name>vkEnumerateInstanceVersion</name></proto>
            <param><type>uint32_t</type>* <name>pApiVersion</name></param>
        </command>
    </commands>
</registry>
"#;

    fn registry() -> Registry {
        Registry::from_reader(REGISTRY.as_bytes(), &RegistryConfig::default()).unwrap()
    }

    #[test]
    fn entity_collections() {
        let registry = registry();

        assert_eq!(
            registry.basetypes.keys().collect::<Vec<_>>(),
            ["VkFlags", "VkBool32"],
        );
        assert_eq!(registry.basetypes["VkFlags"].ty, "uint32_t");
        assert_eq!(registry.handles.len(), 4);
        assert!(registry.handles["VkInstance"].dispatchable);
        assert!(!registry.handles["VkFence"].dispatchable);
        assert_eq!(
            registry.flags["VkSampleCountFlags"].bitmask.as_deref(),
            Some("VkSampleCountFlagBits"),
        );
        assert_eq!(
            registry.func_pointers["PFN_vkAllocationFunction"].return_type,
            "void*",
        );
        assert!(registry.unions.contains_key("VkClearValue"));
        assert_eq!(registry.external_types.len(), 3);
        assert!(!registry.external_types["uint32_t"].system);
        assert_eq!(registry.constants["VK_MAX_NAME_SIZE"], "256");
    }

    #[test]
    fn aliases_are_not_entities() {
        let registry = registry();

        assert!(!registry.structs.contains_key("VkFooInfo2"));
        assert_eq!(registry.resolve_alias("VkFooInfo2"), "VkFooInfo");
        assert!(!registry.functions.contains_key("vkWaitForFenceKHR"));
        assert_eq!(registry.resolve_alias("vkWaitForFenceKHR"), "vkWaitForFence");
    }

    #[test]
    fn version_query_is_excluded() {
        assert!(!registry()
            .functions
            .contains_key("vkEnumerateInstanceVersion"));
    }

    #[test]
    fn dispatch_types() {
        let registry = registry();
        let dispatch = |name: &str| registry.functions[name].dispatch_type;

        assert_eq!(dispatch("vkCreateInstance"), DispatchType::Instance);
        assert_eq!(dispatch("vkEnumeratePhysicalDevices"), DispatchType::Instance);
        assert_eq!(dispatch("vkQueryDevice"), DispatchType::Instance);
        assert_eq!(dispatch("vkWaitForFence"), DispatchType::Device);
    }

    #[test]
    fn safe_to_print() {
        let registry = registry();

        assert!(!registry.functions["vkEnumeratePhysicalDevices"].safe_to_print);
        assert!(registry.functions["vkWaitForFence"].safe_to_print);
    }

    #[test]
    fn duplicate_options_keep_the_first() {
        let registry = registry();
        let options = &registry.enums["VkStructureType"].options;

        assert_eq!(options.len(), 2);
        assert_eq!(options[1].name, "VK_STRUCTURE_TYPE_FOO_INFO");
        assert_eq!(options[1].value, 1);
    }

    #[test]
    fn bitmask_options() {
        let registry = registry();
        let bits = &registry.bitmasks["VkSampleCountFlagBits"];

        assert_eq!(bits.bit_width, 32);
        assert_eq!(
            bits.options
                .iter()
                .map(|o| (o.value, o.is_multi_value))
                .collect::<Vec<_>>(),
            [(1, false), (4, false), (5, true)],
        );
    }

    #[test]
    fn structure_type_index() {
        let registry = registry();

        assert_eq!(registry.structs["VkFooInfo"].structure_type_index, 1);
        assert_eq!(registry.structs["VkBaseInfo"].structure_type_index, -1);
    }

    #[test]
    fn members_know_their_lengths() {
        let registry = registry();
        let members = &registry.structs["VkFooInfo"].members;

        assert!(members[2].variable.is_length);
        assert_eq!(members[3].variable.array_length.as_deref(), Some("count"));
        assert!(members[3].variable.length_member);
        assert_eq!(members[1].variable.base_type, "void*");
    }

    #[test]
    fn integers() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-3"), Some(-3));
        assert_eq!(parse_integer("0x7FFFFFFF"), Some(0x7FFF_FFFF));
        assert_eq!(parse_integer("1000U"), Some(1000));
        assert_eq!(parse_integer("(~0U)"), None);
    }
}
