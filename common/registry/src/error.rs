use thiserror::Error;

use crate::key::{join_keys, TypeKey};

/// Configuration and resolution failures. All of them indicate a wiring bug and
/// should abort startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a provider for {0} was already registered")]
    DuplicateProvider(TypeKey),

    #[error("no provider for {requested}")]
    NoProvider { requested: TypeKey },

    #[error("no provider for {requested} (and no exact signature match), required by {required_by}")]
    UnresolvedDependency {
        requested: TypeKey,
        required_by: TypeKey,
    },

    #[error("cannot pick an implementor for {requested}, provided by {}", join_keys(.candidates, " and "))]
    AmbiguousProvider {
        requested: TypeKey,
        candidates: Vec<TypeKey>,
    },

    #[error("cyclic dependency: {}", join_keys(.chain, " -> "))]
    CyclicDependency { chain: Vec<TypeKey> },

    #[error("could not find param {ty} for field `{field}` of {params}")]
    UnmatchedParam {
        params: &'static str,
        field: &'static str,
        ty: TypeKey,
    },

    #[error("{requested} requested from inside a constructor the registry is running")]
    ReentrantCall { requested: TypeKey },

    #[error("resolved argument is not a {expected}")]
    ArgumentType { expected: &'static str },

    #[error("constructor for {provider} failed: {source:#}")]
    Constructor {
        provider: TypeKey,
        source: anyhow::Error,
    },
}
