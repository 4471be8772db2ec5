use std::any::type_name;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::debug;

use crate::constructor::{downcast, Constructor};
use crate::error::RegistryError;
use crate::key::{Extras, Injectable, Instance, TypeKey};
use crate::params::{FieldKind, ParamField, ParamSource, Params};

type BuildFn = Arc<dyn Fn(&[Instance]) -> Result<Instance, RegistryError> + Send + Sync>;
type AssembleFn = Arc<dyn Fn(&ParamSource) -> Result<Instance, RegistryError> + Send + Sync>;
type CastFn = Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

#[derive(Clone)]
enum Recipe {
    Positional {
        requires: Vec<TypeKey>,
        build: BuildFn,
    },
    Params {
        params: &'static str,
        fields: Vec<ParamField>,
        build: AssembleFn,
    },
}

struct Provider {
    recipe: Recipe,
    static_args: Extras,
    instance: Option<Instance>,
}

struct Implementor {
    provider: TypeKey,
    cast: CastFn,
}

enum Target {
    Exact(TypeKey),
    Cast(TypeKey, CastFn),
}

#[derive(Default)]
struct State {
    providers: HashMap<TypeKey, Provider>,
    /// Interface key to its implementors, in registration order.
    interfaces: HashMap<TypeKey, Vec<Implementor>>,
}

/// Holds providers and their singleton instances for the lifetime of the process.
///
/// Resolution runs under a single lock. A constructor calling back into the registry it
/// is being resolved from gets [`RegistryError::ReentrantCall`].
#[derive(Default)]
pub struct Registry {
    state: Mutex<State>,
    // Thread currently running constructors.
    resolving: Mutex<Option<ThreadId>>,
}

/// Marks the current thread as resolving until dropped.
struct Resolving<'r> {
    owner: &'r Mutex<Option<ThreadId>>,
}

impl<'r> Resolving<'r> {
    fn enter(owner: &'r Mutex<Option<ThreadId>>) -> Self {
        *owner.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
        Self { owner }
    }
}

impl Drop for Resolving<'_> {
    fn drop(&mut self) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Like [`lock`](Self::lock), but fails instead of deadlocking when called from a
    /// constructor this registry is running.
    fn enter(&self, requested: TypeKey) -> Result<MutexGuard<'_, State>, RegistryError> {
        let owner = *self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        if owner == Some(thread::current().id()) {
            return Err(RegistryError::ReentrantCall { requested });
        }
        Ok(self.lock())
    }

    /// Registers a function whose arguments are all resolved from the graph, or from a
    /// trailing run of request extras (see [`request_with`](Self::request_with)).
    pub fn register<Args, C>(&self, ctor: C) -> Result<Registration<'_, C::Output>, RegistryError>
    where
        C: Constructor<Args>,
    {
        let build: BuildFn = Arc::new(move |args: &[Instance]| -> Result<Instance, RegistryError> {
            let instance: Instance = Arc::new(ctor.construct(args)?);
            Ok(instance)
        });
        self.insert::<C::Output>(Recipe::Positional {
            requires: C::requires(),
            build,
        })
    }

    /// Registers a function taking a single [`Params`] struct.
    pub fn register_params<P, T, F>(&self, ctor: F) -> Result<Registration<'_, T>, RegistryError>
    where
        P: Params,
        T: Injectable,
        F: Fn(P) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let build: AssembleFn = Arc::new(move |source: &ParamSource| -> Result<Instance, RegistryError> {
            let value = ctor(P::assemble(source)?).map_err(|err| RegistryError::Constructor {
                provider: TypeKey::of::<T>(),
                source: err,
            })?;
            let instance: Instance = Arc::new(value);
            Ok(instance)
        });
        self.insert::<T>(Recipe::Params {
            params: type_name::<P>(),
            fields: P::fields(),
            build,
        })
    }

    fn insert<T: Injectable>(&self, recipe: Recipe) -> Result<Registration<'_, T>, RegistryError> {
        let key = TypeKey::of::<T>();
        let mut state = self.enter(key)?;
        if state.providers.contains_key(&key) {
            return Err(RegistryError::DuplicateProvider(key));
        }

        match &recipe {
            Recipe::Positional { requires, .. } => {
                debug!(provides = %key, ?requires, "registry: registered provider")
            }
            Recipe::Params { params, fields, .. } => {
                let requires: Vec<_> = fields
                    .iter()
                    .filter(|f| f.kind != FieldKind::Lazy)
                    .map(|f| f.key)
                    .collect();
                let lazy: Vec<_> = fields
                    .iter()
                    .filter(|f| f.kind == FieldKind::Lazy)
                    .map(|f| f.key)
                    .collect();
                debug!(provides = %key, params, ?requires, ?lazy, "registry: registered provider")
            }
        }

        state.providers.insert(
            key,
            Provider {
                recipe,
                static_args: Extras::new(),
                instance: None,
            },
        );
        Ok(Registration {
            registry: self,
            key,
            _provides: PhantomData,
        })
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.lock().providers.contains_key(&TypeKey::of::<T>())
    }

    pub fn request<T: Injectable>(&self) -> Result<T, RegistryError> {
        self.request_with(Extras::new())
    }

    /// Resolves `T` (exactly, or as the single registered implementor of an interface)
    /// and everything it depends on. `extras` feed lazy params fields and, for positional
    /// providers, can stand in for the trailing arguments nothing provides.
    pub fn request_with<T: Injectable>(&self, extras: Extras) -> Result<T, RegistryError> {
        let key = TypeKey::of::<T>();
        debug!(requested = %key, ?extras, "registry: requesting provider");

        let instance = {
            let mut state = self.enter(key)?;
            let target = state
                .target_for(&key)?
                .ok_or(RegistryError::NoProvider { requested: key })?;
            let _resolving = Resolving::enter(&self.resolving);
            state.instance_for(target, &extras, &mut Vec::new())?
        };
        downcast::<T>(Some(&instance))
    }

    pub fn request_and_set<T: Injectable>(
        &self,
        slot: &mut Option<T>,
        extras: Extras,
    ) -> Result<(), RegistryError> {
        *slot = Some(self.request_with(extras)?);
        Ok(())
    }
}

impl State {
    fn target_for(&self, key: &TypeKey) -> Result<Option<Target>, RegistryError> {
        if self.providers.contains_key(key) {
            return Ok(Some(Target::Exact(*key)));
        }
        let Some(implementors) = self.interfaces.get(key) else {
            return Ok(None);
        };
        match implementors.as_slice() {
            [] => Ok(None),
            [one] => {
                debug!(interface = %key, provider = %one.provider, "registry: interface provided by implementor");
                Ok(Some(Target::Cast(one.provider, one.cast.clone())))
            }
            many => Err(RegistryError::AmbiguousProvider {
                requested: *key,
                candidates: many.iter().map(|i| i.provider).collect(),
            }),
        }
    }

    fn instance_for(
        &mut self,
        target: Target,
        extras: &Extras,
        chain: &mut Vec<TypeKey>,
    ) -> Result<Instance, RegistryError> {
        match target {
            Target::Exact(key) => self.resolve(key, extras, chain),
            Target::Cast(key, cast) => {
                let instance = self.resolve(key, extras, chain)?;
                cast(&instance).ok_or(RegistryError::ArgumentType {
                    expected: key.name(),
                })
            }
        }
    }

    fn resolve(
        &mut self,
        key: TypeKey,
        extras: &Extras,
        chain: &mut Vec<TypeKey>,
    ) -> Result<Instance, RegistryError> {
        let provider = self
            .providers
            .get(&key)
            .ok_or(RegistryError::NoProvider { requested: key })?;
        if let Some(instance) = &provider.instance {
            debug!(provides = %key, "registry: returning previously created instance");
            return Ok(instance.clone());
        }
        if chain.contains(&key) {
            let mut cycle = chain.clone();
            cycle.push(key);
            return Err(RegistryError::CyclicDependency { chain: cycle });
        }

        let extras = extras.joined(&provider.static_args);
        let recipe = provider.recipe.clone();

        chain.push(key);
        let built = match recipe {
            Recipe::Positional { requires, build } => {
                self.build_positional(key, &requires, &build, &extras, chain)
            }
            Recipe::Params {
                params,
                fields,
                build,
            } => self.build_params(params, &fields, &build, &extras, chain),
        };
        chain.pop();

        let instance = built?;
        if let Some(provider) = self.providers.get_mut(&key) {
            provider.instance = Some(instance.clone());
        }
        debug!(provides = %key, "registry: instantiated");
        Ok(instance)
    }

    fn build_positional(
        &mut self,
        key: TypeKey,
        requires: &[TypeKey],
        build: &BuildFn,
        extras: &Extras,
        chain: &mut Vec<TypeKey>,
    ) -> Result<Instance, RegistryError> {
        let mut args = Vec::with_capacity(requires.len());
        for (idx, required) in requires.iter().enumerate() {
            match self.target_for(required)? {
                Some(target) => args.push(self.instance_for(target, extras, chain)?),
                None => {
                    if !exact_suffix_match(&requires[idx..], extras) {
                        return Err(RegistryError::UnresolvedDependency {
                            requested: *required,
                            required_by: key,
                        });
                    }
                    debug!(provides = %key, idx, ?extras, "registry: exact sub signature match");
                    args.extend(extras.instances().cloned());
                    break;
                }
            }
        }
        build(&args)
    }

    fn build_params(
        &mut self,
        params: &'static str,
        fields: &[ParamField],
        build: &AssembleFn,
        extras: &Extras,
        chain: &mut Vec<TypeKey>,
    ) -> Result<Instance, RegistryError> {
        let mut source = ParamSource::new(params);
        for field in fields {
            if field.kind == FieldKind::Lazy {
                if let Some(instance) = extras.find(&field.key) {
                    source.insert(field.key, instance.clone());
                }
                continue;
            }

            if let Some(target) = self.target_for(&field.key)? {
                let instance = self.instance_for(target, extras, chain)?;
                source.insert(field.key, instance);
            } else if let Some(instance) = extras.find(&field.key) {
                source.insert(field.key, instance.clone());
            } else if field.kind == FieldKind::Required {
                return Err(RegistryError::UnmatchedParam {
                    params,
                    field: field.name,
                    ty: field.key,
                });
            }
        }
        build(&source)
    }
}

/// Arguments from `remaining` onwards must line up one to one with the extras.
fn exact_suffix_match(remaining: &[TypeKey], extras: &Extras) -> bool {
    remaining.len() == extras.len() && remaining.iter().zip(extras.keys()).all(|(a, b)| a == b)
}

/// Handle returned by registration, used to declare interfaces and bind static args.
pub struct Registration<'r, T> {
    registry: &'r Registry,
    key: TypeKey,
    _provides: PhantomData<fn() -> T>,
}

impl<T: Injectable> Registration<'_, T> {
    /// Makes this provider resolvable as `I` as well, usually an `Arc<dyn Trait>`.
    pub fn implements<I, F>(self, cast: F) -> Self
    where
        I: Injectable,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        let interface = TypeKey::of::<I>();
        let cast: CastFn = Arc::new(move |instance: &Instance| -> Option<Instance> {
            let value = instance.downcast_ref::<T>().cloned()?;
            let cast_instance: Instance = Arc::new(cast(value));
            Some(cast_instance)
        });
        {
            let mut state = self.registry.lock();
            state.interfaces.entry(interface).or_default().push(Implementor {
                provider: self.key,
                cast,
            });
        }
        debug!(provides = %self.key, %interface, "registry: registered implementation");
        self
    }

    /// Binds values that are appended to the request extras whenever this provider is built.
    pub fn with_args(self, args: Extras) -> Self {
        {
            let mut state = self.registry.lock();
            if let Some(provider) = state.providers.get_mut(&self.key) {
                provider.static_args = provider.static_args.joined(&args);
            }
        }
        self
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }
}
