use std::collections::HashMap;

use crate::constructor::downcast;
use crate::error::RegistryError;
use crate::key::{Injectable, Instance, TypeKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Resolved from the graph (or a request extra of the exact type).
    Required,
    /// Only taken from request extras, `Default` when none was passed.
    Lazy,
    /// Like `Required`, but left as `None` when nothing matches.
    AllowNil,
}

#[derive(Clone, Copy, Debug)]
pub struct ParamField {
    pub name: &'static str,
    pub key: TypeKey,
    pub kind: FieldKind,
}

impl ParamField {
    pub fn required<T: Injectable>(name: &'static str) -> Self {
        Self {
            name,
            key: TypeKey::of::<T>(),
            kind: FieldKind::Required,
        }
    }

    pub fn lazy<T: Injectable + Default>(name: &'static str) -> Self {
        Self {
            name,
            key: TypeKey::of::<T>(),
            kind: FieldKind::Lazy,
        }
    }

    pub fn allow_nil(name: &'static str, key: TypeKey) -> Self {
        Self {
            name,
            key,
            kind: FieldKind::AllowNil,
        }
    }
}

/// A struct whose fields are injected one by one. Use [`params!`](crate::params) to
/// declare one rather than implementing this by hand.
pub trait Params: Sized + Send + 'static {
    fn fields() -> Vec<ParamField>;

    fn assemble(source: &ParamSource) -> Result<Self, RegistryError>;
}

/// `Option<T>` fields tagged `allow_nil`.
pub trait OptionalParam: Sized {
    fn key() -> TypeKey;

    fn take(source: &ParamSource, field: &'static str) -> Result<Self, RegistryError>;
}

impl<T: Injectable> OptionalParam for Option<T> {
    fn key() -> TypeKey {
        TypeKey::of::<T>()
    }

    fn take(source: &ParamSource, _field: &'static str) -> Result<Self, RegistryError> {
        source
            .values
            .get(&TypeKey::of::<T>())
            .map(|instance| downcast::<T>(Some(instance)))
            .transpose()
    }
}

/// Values matched to params fields during resolution.
pub struct ParamSource {
    params: &'static str,
    values: HashMap<TypeKey, Instance>,
}

impl ParamSource {
    pub(crate) fn new(params: &'static str) -> Self {
        Self {
            params,
            values: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, key: TypeKey, instance: Instance) {
        self.values.insert(key, instance);
    }

    pub fn required<T: Injectable>(&self, field: &'static str) -> Result<T, RegistryError> {
        let key = TypeKey::of::<T>();
        match self.values.get(&key) {
            Some(instance) => downcast::<T>(Some(instance)),
            None => Err(RegistryError::UnmatchedParam {
                params: self.params,
                field,
                ty: key,
            }),
        }
    }

    pub fn lazy<T: Injectable + Default>(&self, _field: &'static str) -> Result<T, RegistryError> {
        match self.values.get(&TypeKey::of::<T>()) {
            Some(instance) => downcast::<T>(Some(instance)),
            None => Ok(T::default()),
        }
    }
}

/// Declares a params struct: every field is injected on its own. Fields tagged
/// `#[registry(lazy)]` come from request extras only and fall back to `Default`;
/// `#[registry(allow_nil)]` fields must be `Option<T>` and stay `None` when nothing
/// provides `T`.
///
/// ```ignore
/// params! {
///     pub struct ServerParams {
///         #[registry(lazy)]
///         pub config: ServerConfig,
///         pub exporter: Arc<PrometheusExporter>,
///         #[registry(allow_nil)]
///         pub checker: Option<Arc<HealthChecker>>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! params {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[registry($kind:ident)])?
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $fvis $field: $ty, )*
        }

        impl $crate::Params for $name {
            fn fields() -> ::std::vec::Vec<$crate::ParamField> {
                ::std::vec![
                    $( $crate::__param_field!(stringify!($field), $ty $(, $kind)?) ),*
                ]
            }

            fn assemble(
                source: &$crate::ParamSource,
            ) -> ::std::result::Result<Self, $crate::RegistryError> {
                ::std::result::Result::Ok(Self {
                    $( $field: $crate::__param_value!(source, stringify!($field), $ty $(, $kind)?)?, )*
                })
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __param_field {
    ($name:expr, $ty:ty) => {
        $crate::ParamField::required::<$ty>($name)
    };
    ($name:expr, $ty:ty, lazy) => {
        $crate::ParamField::lazy::<$ty>($name)
    };
    ($name:expr, $ty:ty, allow_nil) => {
        $crate::ParamField::allow_nil($name, <$ty as $crate::OptionalParam>::key())
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __param_value {
    ($source:ident, $name:expr, $ty:ty) => {
        $source.required::<$ty>($name)
    };
    ($source:ident, $name:expr, $ty:ty, lazy) => {
        $source.lazy::<$ty>($name)
    };
    ($source:ident, $name:expr, $ty:ty, allow_nil) => {
        <$ty as $crate::OptionalParam>::take($source, $name)
    };
}
