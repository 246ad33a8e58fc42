//! Source generation for Vulkan layers from the API registry.
//!
//! The registry document is parsed into a [`Registry`]: functions, structs, unions, enums,
//! bitmasks, handles and every other kind of entity, with aliases resolved, declarations broken
//! down into [`Variable`](variable::Variable)s and extensions cross-referenced. A [`Template`]
//! is then expanded against that model to produce source text.
//!
//! ```no_run
//! use layergen::{Registry, RegistryConfig};
//! use std::path::Path;
//!
//! let registry = Registry::load(Path::new("registry/vk.xml"), &RegistryConfig::default())?;
//! let header = layergen::expand(
//!     "@foreach function\nPFN_{funcName} {funcName};\n@end function\n",
//!     &registry,
//! )?;
//! # Ok::<(), layergen::Error>(())
//! ```

pub use self::{
    cache::{CacheError, RegistryCache},
    config::RegistryConfig,
    extensions::{Extension, SystemType},
    registry::{DispatchType, Registry, RegistryError},
    template::{expand, Template, TemplateError},
    variable::VariableError,
};
use std::{
    error::Error as StdError,
    fmt::{Display, Error as FmtError, Formatter},
};

pub mod cache;
pub mod config;
pub mod extensions;
pub mod placeholders;
pub mod registry;
pub mod template;
pub mod variable;

/// Any error this crate can produce.
#[derive(Debug)]
pub enum Error {
    Registry(RegistryError),
    Template(TemplateError),
    Cache(CacheError),
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            Self::Template(err) => Some(err),
            Self::Cache(err) => Some(err),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Registry(err) => write!(f, "{err}"),
            Self::Template(err) => write!(f, "template error at {err}"),
            Self::Cache(err) => write!(f, "{err}"),
        }
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<TemplateError> for Error {
    fn from(err: TemplateError) -> Self {
        Self::Template(err)
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        Self::Cache(err)
    }
}
