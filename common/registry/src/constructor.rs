use std::any::type_name;

use crate::error::RegistryError;
use crate::key::{Injectable, Instance, TypeKey};

/// A provider function whose arguments are resolved positionally from the graph.
///
/// Implemented for every `Fn(A1, .., An) -> anyhow::Result<T>` up to six arguments,
/// where each argument and the output are [`Injectable`]. `Args` is only there to keep
/// the arity impls apart.
pub trait Constructor<Args>: Send + Sync + 'static {
    type Output: Injectable;

    /// Argument types in call order.
    fn requires() -> Vec<TypeKey>;

    /// Calls the function with already resolved arguments, one per [`requires`](Self::requires) entry.
    fn construct(&self, args: &[Instance]) -> Result<Self::Output, RegistryError>;
}

pub(crate) fn downcast<A: Injectable>(instance: Option<&Instance>) -> Result<A, RegistryError> {
    instance
        .and_then(|i| i.downcast_ref::<A>())
        .cloned()
        .ok_or(RegistryError::ArgumentType {
            expected: type_name::<A>(),
        })
}

macro_rules! impl_constructor {
    ( $($ty:ident),* ) => {
        #[allow(non_snake_case, unused_variables, unused_mut)]
        impl<F, T, $($ty,)*> Constructor<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> anyhow::Result<T> + Send + Sync + 'static,
            T: Injectable,
            $( $ty: Injectable, )*
        {
            type Output = T;

            fn requires() -> Vec<TypeKey> {
                vec![$(TypeKey::of::<$ty>()),*]
            }

            fn construct(&self, args: &[Instance]) -> Result<T, RegistryError> {
                let mut args = args.iter();
                $( let $ty = downcast::<$ty>(args.next())?; )*
                (self)($($ty),*).map_err(|source| RegistryError::Constructor {
                    provider: TypeKey::of::<T>(),
                    source,
                })
            }
        }
    };
}

impl_constructor!();
impl_constructor!(A1);
impl_constructor!(A1, A2);
impl_constructor!(A1, A2, A3);
impl_constructor!(A1, A2, A3, A4);
impl_constructor!(A1, A2, A3, A4, A5);
impl_constructor!(A1, A2, A3, A4, A5, A6);
