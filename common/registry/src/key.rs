use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Anything the registry can hand out. Providers are singletons, so the values are
/// usually cheap handles such as `Arc<T>` or small `Copy` config structs.
pub trait Injectable: Clone + Send + Sync + 'static {}

impl<T> Injectable for T where T: Clone + Send + Sync + 'static {}

/// Type-erased value as stored in the registry.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Identity of a provided type. Equality only looks at the `TypeId`, the name is kept
/// for logs and error messages.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub(crate) fn join_keys(keys: &[TypeKey], sep: &str) -> String {
    keys.iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Ordered, typed values passed along with a request (or bound to a provider at
/// registration time). They feed lazy params fields and the positional suffix match.
#[derive(Clone, Default)]
pub struct Extras {
    values: Vec<(TypeKey, Instance)>,
}

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Injectable>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    pub fn push<T: Injectable>(&mut self, value: T) {
        let instance: Instance = Arc::new(value);
        self.values.push((TypeKey::of::<T>(), instance));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First value of exactly this type.
    pub(crate) fn find(&self, key: &TypeKey) -> Option<&Instance> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, instance)| instance)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &TypeKey> {
        self.values.iter().map(|(k, _)| k)
    }

    pub(crate) fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.values.iter().map(|(_, instance)| instance)
    }

    pub(crate) fn joined(&self, other: &Extras) -> Extras {
        let mut values = self.values.clone();
        values.extend(other.values.iter().cloned());
        Extras { values }
    }
}

impl fmt::Debug for Extras {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_compare_by_type() {
        assert_eq!(TypeKey::of::<u16>(), TypeKey::of::<u16>());
        assert_ne!(TypeKey::of::<u16>(), TypeKey::of::<u32>());
        assert_eq!(TypeKey::of::<Arc<String>>().to_string(), "alloc::sync::Arc<alloc::string::String>");
    }

    #[test]
    fn extras_keep_order_and_find_first() {
        let extras = Extras::new().with(8080u16).with("a".to_string()).with(9090u16);
        assert_eq!(extras.len(), 3);
        let port = extras
            .find(&TypeKey::of::<u16>())
            .and_then(|i| i.downcast_ref::<u16>())
            .copied();
        assert_eq!(port, Some(8080));

        let joined = extras.joined(&Extras::new().with(true));
        assert_eq!(
            format!("{joined:?}"),
            "[u16, alloc::string::String, u16, bool]"
        );
    }
}
