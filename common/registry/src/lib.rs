//! Constructor-graph dependency injection for process startup.
//!
//! Providers are registered once per output type, either as plain functions whose
//! arguments are resolved positionally, or as functions taking a single params struct
//! declared with [`params!`]. Requesting a type walks the graph, builds every missing
//! dependency exactly once and hands back a clone of the cached singleton.
//!
//! ```ignore
//! let registry = Registry::new();
//! registry.register(new_store)?;
//! registry.register(new_api)?.implements(|api: Arc<Api>| -> Arc<dyn Handler> { api });
//! let api: Arc<Api> = registry.request()?;
//! ```

mod constructor;
mod error;
mod key;
mod params;
mod registry;

pub use constructor::Constructor;
pub use error::RegistryError;
pub use key::{Extras, Injectable, Instance, TypeKey};
pub use params::{FieldKind, OptionalParam, ParamField, ParamSource, Params};
pub use registry::{Registration, Registry};
