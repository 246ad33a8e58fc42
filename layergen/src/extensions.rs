//! Cross-references between extensions and the entities they introduce.

use crate::{
    config::RegistryConfig,
    placeholders::{Placeholders, Values},
    registry::{parse_integer, DispatchType, EnumOption, Registry, RegistryBuilder},
    variable::Variable,
};
use foldhash::{HashMap, HashMapExt};
use heck::ToUpperCamelCase;
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

/// Base of every value an extension adds to an existing enumeration.
const EXTENSION_ENUM_BASE: i64 = 1_000_000_000;
/// Number of values reserved for each extension.
const EXTENSION_ENUM_BLOCK: i64 = 1000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub name: String,
    /// 1-based registration number.
    pub number: i64,
    pub ty: Option<DispatchType>,
    /// The extensions or core versions this one depends on, as written in the registry.
    pub dependency: Option<String>,
    /// Preprocessor symbol that has to be defined for the extension to be available.
    pub guard: Option<String>,
    pub supported: Option<String>,
    pub types: Vec<String>,
    pub functions: Vec<String>,
    /// Base enumeration name to the options this extension adds to it.
    pub enum_values: IndexMap<String, Vec<(String, i64)>>,
    /// Freestanding constants such as `*_SPEC_VERSION` and `*_EXTENSION_NAME`.
    pub constants: IndexMap<String, String>,
}

impl Extension {
    #[inline]
    pub fn is_guarded(&self) -> bool {
        self.guard.as_deref().is_some_and(|guard| !guard.is_empty())
    }
}

impl Placeholders for Extension {
    fn placeholders(&self) -> Values {
        let short_name = self.name.strip_prefix("VK_").unwrap_or(&self.name);
        let mut values = Values::new();
        values.insert("extName", &self.name);
        values.insert("extShortName", short_name.to_upper_camel_case());
        values.insert("extNumber", self.number);
        values.insert(
            "extType",
            self.ty.map(DispatchType::as_str).unwrap_or_default(),
        );
        values.insert(
            "extDependency",
            self.dependency.as_deref().unwrap_or_default(),
        );
        values.insert("extGuard", self.guard.as_deref().unwrap_or_default());
        values
    }
}

/// A type from outside the API, such as a window-system handle, that an extension's structs or
/// functions use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemType {
    pub name: String,
    /// The type as it's used, including the trailing pointer marker of opaque types.
    pub ty: String,
    /// The extension that first uses the type.
    pub extension: String,
}

impl Placeholders for SystemType {
    fn placeholders(&self) -> Values {
        let mut values = Values::new();
        values.insert("sysName", &self.name);
        values.insert("sysType", &self.ty);
        values.insert("sysExtension", &self.extension);
        values
    }
}

/// Computes the value of an enumerant an extension adds with an `offset`.
#[inline]
pub fn extension_enum_value(number: i64, offset: i64, positive: bool) -> i64 {
    let value = EXTENSION_ENUM_BASE + EXTENSION_ENUM_BLOCK * (number - 1) + offset;

    if positive {
        value
    } else {
        -value
    }
}

/// What a single `<enum>` inside a `<require>` block contributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Contribution<'a> {
    /// A new option of the enumeration `base`.
    Extends {
        base: &'a str,
        name: &'a str,
        value: i64,
        comment: Option<&'a str>,
    },
    /// A constant that doesn't belong to any enumeration.
    Constant { name: &'a str, value: String },
    /// A reference to something defined elsewhere, or an alias.
    Reference,
}

pub(crate) fn contribution(option: &vk_parse::Enum, number: Option<i64>) -> Contribution<'_> {
    let name = option.name.as_str();
    let comment = option.comment.as_deref();

    match &option.spec {
        vk_parse::EnumSpec::Offset {
            offset,
            extends,
            extnumber,
            dir,
            ..
        } => match extnumber.or(number) {
            Some(number) => Contribution::Extends {
                base: extends,
                name,
                value: extension_enum_value(number, *offset, *dir),
                comment,
            },
            None => {
                debug!("`{}` has an offset but no extension number", name);
                Contribution::Reference
            }
        },
        vk_parse::EnumSpec::Bitpos {
            bitpos, extends, ..
        } => match extends {
            Some(base) => Contribution::Extends {
                base,
                name,
                value: 1i64 << *bitpos,
                comment,
            },
            None => Contribution::Constant {
                name,
                value: (1i64 << *bitpos).to_string(),
            },
        },
        vk_parse::EnumSpec::Value { value, extends, .. } => match extends {
            Some(base) => match parse_integer(value) {
                Some(value) => Contribution::Extends {
                    base,
                    name,
                    value,
                    comment,
                },
                None => {
                    debug!("`{}` has a non-integer value `{}`", name, value);
                    Contribution::Reference
                }
            },
            None => Contribution::Constant {
                name,
                value: value.clone(),
            },
        },
        _ => Contribution::Reference,
    }
}

/// The `<enum>` items of every `<require>` block that applies to the configured API.
pub(crate) fn required_enums<'a>(
    children: &'a [vk_parse::ExtensionChild],
    config: &'a RegistryConfig,
) -> impl Iterator<Item = &'a vk_parse::Enum> + 'a {
    required_items(children, config).filter_map(move |item| match item {
        vk_parse::InterfaceItem::Enum(option) if config.contains_api(option.api.as_deref()) => {
            Some(option)
        }
        _ => None,
    })
}

fn required_items<'a>(
    children: &'a [vk_parse::ExtensionChild],
    config: &'a RegistryConfig,
) -> impl Iterator<Item = &'a vk_parse::InterfaceItem> + 'a {
    children
        .iter()
        .filter_map(move |child| match child {
            vk_parse::ExtensionChild::Require { api, items, .. }
                if config.contains_api(api.as_deref()) =>
            {
                Some(items)
            }
            _ => None,
        })
        .flatten()
}

/// Records the extensions of `raw` in the builder's registry: the extension entities, the
/// name-to-extension maps, enum contributions and the derived system types.
pub(crate) fn resolve(builder: &mut RegistryBuilder<'_>, raw: &vk_parse::Registry) {
    let platforms = platforms(raw);
    let config = builder.config;

    let extensions = raw
        .0
        .iter()
        .filter_map(|child| match child {
            vk_parse::RegistryChild::Extensions(extensions) => Some(extensions),
            _ => None,
        })
        .flat_map(|extensions| &extensions.children);

    for raw_ext in extensions {
        if !config.contains_api(raw_ext.supported.as_deref()) {
            debug!("skipping unsupported extension `{}`", raw_ext.name);
            continue;
        }

        if builder.registry.extensions.contains_key(&raw_ext.name) {
            continue;
        }

        let guard = raw_ext
            .platform
            .as_ref()
            .and_then(|platform| platforms.get(platform.as_str()).cloned())
            .or_else(|| raw_ext.protect.clone());

        let mut extension = Extension {
            name: raw_ext.name.clone(),
            number: raw_ext.number.unwrap_or(0),
            ty: raw_ext
                .ext_type
                .as_deref()
                .and_then(DispatchType::from_registry),
            dependency: raw_ext.depends.clone().or_else(|| raw_ext.requires.clone()),
            guard,
            supported: raw_ext.supported.clone(),
            types: Vec::new(),
            functions: Vec::new(),
            enum_values: IndexMap::new(),
            constants: IndexMap::new(),
        };

        for item in required_items(&raw_ext.children, config) {
            match item {
                vk_parse::InterfaceItem::Type { name, .. } => {
                    if !extension.types.contains(name) {
                        extension.types.push(name.clone());
                    }
                }
                vk_parse::InterfaceItem::Command { name, .. } => {
                    if !extension.functions.contains(name) {
                        extension.functions.push(name.clone());
                    }
                }
                vk_parse::InterfaceItem::Enum(option) => {
                    if !config.contains_api(option.api.as_deref()) {
                        continue;
                    }

                    match contribution(option, raw_ext.number) {
                        Contribution::Extends {
                            base,
                            name,
                            value,
                            comment,
                        } => {
                            let values = extension.enum_values.entry(base.to_owned()).or_default();
                            if !values.iter().any(|(existing, _)| existing == name) {
                                values.push((name.to_owned(), value));
                            }
                            builder.add_enum_option(base, EnumOption::new(name, value, comment));
                        }
                        Contribution::Constant { name, value } => {
                            extension
                                .constants
                                .entry(name.to_owned())
                                .or_insert(value);
                        }
                        Contribution::Reference => (),
                    }
                }
                _ => (),
            }
        }

        register(builder, extension);
    }

    let system_types = system_types(&builder.registry);
    builder.registry.system_types = system_types;
}

/// Adds `extension` to the registry and points its types and functions at it.
fn register(builder: &mut RegistryBuilder<'_>, extension: Extension) {
    let registry = &mut builder.registry;

    for name in &extension.types {
        record(registry, RecordKind::Type, name, &extension);
    }

    for name in &extension.functions {
        record(registry, RecordKind::Function, name, &extension);

        if extension.ty == Some(DispatchType::Instance) {
            if let Some(function) = registry.functions.get_mut(name) {
                function.ty = DispatchType::Instance;
            }
        }
    }

    registry
        .extensions
        .insert(extension.name.clone(), extension);
}

#[derive(Clone, Copy)]
enum RecordKind {
    Type,
    Function,
}

/// Maps `name` to `extension`. A name already mapped to a guarded extension is taken over by an
/// unguarded one, since the item is then available without the guard.
fn record(registry: &mut Registry, kind: RecordKind, name: &str, extension: &Extension) {
    let is_guarded = |ext: &str, extensions: &IndexMap<String, Extension>| {
        extensions.get(ext).is_some_and(Extension::is_guarded)
    };

    let map = match kind {
        RecordKind::Type => &mut registry.extension_types,
        RecordKind::Function => &mut registry.extension_functions,
    };

    let keep = map.get(name).is_some_and(|existing| {
        extension.is_guarded() || !is_guarded(existing, &registry.extensions)
    });

    if !keep {
        map.insert(name.to_owned(), extension.name.clone());
    }
}

fn platforms(raw: &vk_parse::Registry) -> HashMap<&str, String> {
    let mut platforms = HashMap::new();

    for child in &raw.0 {
        if let vk_parse::RegistryChild::Platforms(group) = child {
            for platform in &group.children {
                platforms.insert(platform.name.as_str(), platform.protect.clone());
            }
        }
    }

    platforms
}

/// Finds the system types used by the structs and functions that extensions introduce.
fn system_types(registry: &Registry) -> Vec<SystemType> {
    let mut system_types: Vec<SystemType> = Vec::new();

    for extension in registry.extensions.values() {
        let struct_members = extension
            .types
            .iter()
            .filter_map(|name| registry.structs.get(registry.resolve_alias(name)))
            .flat_map(|structure| structure.members.iter().map(|member| &member.variable));
        let parameters = extension
            .functions
            .iter()
            .filter_map(|name| registry.functions.get(registry.resolve_alias(name)))
            .flat_map(|function| function.parameters.iter().map(|param| &param.variable));

        for variable in struct_members.chain(parameters) {
            if let Some(system_type) = system_type(registry, variable, extension) {
                if !system_types
                    .iter()
                    .any(|known| known.name == system_type.name && known.ty == system_type.ty)
                {
                    system_types.push(system_type);
                }
            }
        }
    }

    system_types
}

fn system_type(registry: &Registry, variable: &Variable, extension: &Extension) -> Option<SystemType> {
    let name = variable.base_type.trim_end_matches('*');
    let external = registry.external_types.get(name)?;

    external.system.then(|| SystemType {
        name: external.name.clone(),
        ty: variable.base_type.clone(),
        extension: extension.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<registry>
    <platforms>
        <platform name="xlib" protect="VK_USE_PLATFORM_XLIB_KHR"/>
    </platforms>
    <types>
        <type requires="vk_platform" name="uint32_t"/>
        <type requires="vk_platform" name="void"/>
        <type requires="X11/Xlib.h" name="Display"/>
        <type requires="X11/Xlib.h" name="Window"/>
        <type category="handle"><type>VK_DEFINE_HANDLE</type>(<name>VkInstance</name>)</type>
        <type category="handle" parent="VkInstance"><type>VK_DEFINE_HANDLE</type>(<name>VkPhysicalDevice</name>)</type>
        <type category="handle" parent="VkPhysicalDevice"><type>VK_DEFINE_HANDLE</type>(<name>VkDevice</name>)</type>
        <type category="enum" name="VkStructureType"/>
        <type category="enum" name="VkResult"/>
        <type category="struct" name="VkXlibSurfaceCreateInfoKHR">
            <member values="VK_STRUCTURE_TYPE_XLIB_SURFACE_CREATE_INFO_KHR"><type>VkStructureType</type> <name>sType</name></member>
            <member>const <type>void</type>* <name>pNext</name></member>
            <member><type>Display</type>* <name>dpy</name></member>
            <member><type>Window</type> <name>window</name></member>
        </type>
    </types>
    <enums name="VkStructureType" type="enum">
        <enum value="0" name="VK_STRUCTURE_TYPE_APPLICATION_INFO"/>
    </enums>
    <enums name="VkResult" type="enum">
        <enum value="0" name="VK_SUCCESS"/>
    </enums>
    <commands>
        <command>
            <proto><type>void</type> <name>vkCreateXlibSurfaceKHR</name></proto>
            <param><type>VkInstance</type> <name>instance</name></param>
            <param>const <type>VkXlibSurfaceCreateInfoKHR</type>* <name>pCreateInfo</name></param>
        </command>
        <command>
            <proto><type>void</type> <name>vkTrimThing</name></proto>
            <param><type>VkDevice</type> <name>device</name></param>
        </command>
        <command>
            <proto><type>void</type> <name>vkGetDisplayThing</name></proto>
            <param><type>VkPhysicalDevice</type> <name>physicalDevice</name></param>
            <param><type>Display</type>* <name>dpy</name></param>
        </command>
    </commands>
    <feature api="vulkan" name="VK_VERSION_1_1" number="1.1">
        <require>
            <enum extends="VkResult" extnumber="70" offset="0" dir="-" name="VK_ERROR_OUT_OF_POOL_MEMORY"/>
        </require>
    </feature>
    <extensions>
        <extension name="VK_KHR_xlib_surface" number="5" type="instance" platform="xlib" supported="vulkan">
            <require>
                <enum value="6" name="VK_KHR_XLIB_SURFACE_SPEC_VERSION"/>
                <enum offset="0" extends="VkStructureType" name="VK_STRUCTURE_TYPE_XLIB_SURFACE_CREATE_INFO_KHR"/>
                <type name="VkXlibSurfaceCreateInfoKHR"/>
                <command name="vkCreateXlibSurfaceKHR"/>
                <command name="vkGetDisplayThing"/>
            </require>
        </extension>
        <extension name="VK_KHR_trim" number="3" type="instance" supported="vulkan">
            <require>
                <enum offset="7" extends="VkResult" name="VK_TRIM_RESULT"/>
                <enum offset="7" extends="VkResult" dir="-" name="VK_ERROR_TRIM_RESULT"/>
                <enum offset="8" extends="VkResult" name="VK_TRIM_RESULT"/>
                <command name="vkTrimThing"/>
                <command name="vkGetDisplayThing"/>
            </require>
        </extension>
        <extension name="VK_EXT_disabled" number="9" supported="disabled">
            <require>
                <enum offset="0" extends="VkResult" name="VK_DISABLED_RESULT"/>
                <command name="vkTrimThing"/>
            </require>
        </extension>
    </extensions>
</registry>
"#;

    fn registry() -> Registry {
        Registry::from_reader(REGISTRY.as_bytes(), &RegistryConfig::default()).unwrap()
    }

    #[test]
    fn offset_formula() {
        assert_eq!(extension_enum_value(3, 7, true), 1_000_002_007);
        assert_eq!(extension_enum_value(3, 7, false), -1_000_002_007);
        assert_eq!(extension_enum_value(1, 0, true), 1_000_000_000);
    }

    #[test]
    fn contributed_enum_values() {
        let registry = registry();
        let results = &registry.enums["VkResult"];

        assert_eq!(results.option("VK_TRIM_RESULT").unwrap().value, 1_000_002_007);
        assert_eq!(
            results.option("VK_ERROR_TRIM_RESULT").unwrap().value,
            -1_000_002_007,
        );
        assert_eq!(
            results.option("VK_ERROR_OUT_OF_POOL_MEMORY").unwrap().value,
            -1_000_069_000,
        );
        assert!(results.option("VK_DISABLED_RESULT").is_none());
        assert_eq!(
            results
                .options
                .iter()
                .filter(|option| option.name == "VK_TRIM_RESULT")
                .count(),
            1,
        );
        assert_eq!(
            registry.extensions["VK_KHR_trim"].enum_values["VkResult"],
            [
                ("VK_TRIM_RESULT".to_owned(), 1_000_002_007),
                ("VK_ERROR_TRIM_RESULT".to_owned(), -1_000_002_007),
            ],
        );
    }

    #[test]
    fn freestanding_constants() {
        let registry = registry();

        assert_eq!(
            registry.extensions["VK_KHR_xlib_surface"].constants["VK_KHR_XLIB_SURFACE_SPEC_VERSION"],
            "6",
        );
    }

    #[test]
    fn guards_come_from_platforms() {
        let registry = registry();

        assert_eq!(
            registry.extensions["VK_KHR_xlib_surface"].guard.as_deref(),
            Some("VK_USE_PLATFORM_XLIB_KHR"),
        );
        assert!(!registry.extensions["VK_KHR_trim"].is_guarded());
    }

    #[test]
    fn disabled_extensions_are_skipped() {
        let registry = registry();

        assert!(!registry.extensions.contains_key("VK_EXT_disabled"));
        assert_eq!(registry.extension_functions["vkTrimThing"], "VK_KHR_trim");
    }

    #[test]
    fn unguarded_extension_takes_over() {
        let registry = registry();

        assert_eq!(
            registry.extension_functions["vkCreateXlibSurfaceKHR"],
            "VK_KHR_xlib_surface",
        );
        assert_eq!(registry.extension_functions["vkGetDisplayThing"], "VK_KHR_trim");
        assert_eq!(
            registry
                .extension_for_type("VkXlibSurfaceCreateInfoKHR")
                .unwrap()
                .name,
            "VK_KHR_xlib_surface",
        );
    }

    #[test]
    fn instance_extensions_retype_functions() {
        let registry = registry();
        let function = &registry.functions["vkTrimThing"];

        assert_eq!(function.dispatch_type, DispatchType::Device);
        assert_eq!(function.ty, DispatchType::Instance);
    }

    #[test]
    fn system_types_are_deduplicated() {
        let registry = registry();

        assert_eq!(
            registry.system_types,
            [
                SystemType {
                    name: "Display".to_owned(),
                    ty: "Display*".to_owned(),
                    extension: "VK_KHR_xlib_surface".to_owned(),
                },
                SystemType {
                    name: "Window".to_owned(),
                    ty: "Window".to_owned(),
                    extension: "VK_KHR_xlib_surface".to_owned(),
                },
            ],
        );
    }

    #[test]
    fn extension_placeholders() {
        let registry = registry();
        let values = registry.extensions["VK_KHR_xlib_surface"].placeholders();

        assert_eq!(values.get("extShortName"), Some("KhrXlibSurface"));
        assert_eq!(values.get("extNumber"), Some("5"));
        assert_eq!(values.get("extType"), Some("instance"));
        assert_eq!(values.get("extGuard"), Some("VK_USE_PLATFORM_XLIB_KHR"));
    }
}
