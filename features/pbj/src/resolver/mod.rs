use crate::{
    errors::PbjError,
    invocation::Resolution,
    key::{AsKey, KeyId},
    types::{Injectable, Instance},
};

pub mod lazy;
pub mod list;
pub mod rc;

pub use lazy::{ListLike, Pbj, ProxyState};
pub use list::ListOf;

/// Shapes a dependency can be injected as
///
/// Implemented for `Rc<T>` (forced), `Option<Rc<T>>` (forced, null allowed) and [Pbj]
/// (lazy).
pub trait Resolver: Sized {
    /// Resolves `key` on behalf of the service being built
    fn resolve(resolution: &Resolution<'_>, key: &KeyId) -> Result<Self, PbjError>;

    /// Converts a literal argument of the service `owner`
    fn from_value(owner: &KeyId, value: Option<Instance>) -> Result<Self, PbjError>;
}

/// An argument passed to a factory or constructor
#[derive(Clone, Debug)]
pub enum Arg {
    /// Resolved at invocation time and recorded as a dependency
    Key(KeyId),
    /// Passed as is
    Value(Instance),
}

impl Arg {
    pub fn key(key: &impl AsKey) -> Self {
        Arg::Key(key.key_id())
    }

    pub fn value<T: Injectable>(value: T) -> Self {
        Arg::Value(Instance::new(value))
    }

    /// Identity comparison
    pub fn same(&self, other: &Arg) -> bool {
        match (self, other) {
            (Arg::Key(a), Arg::Key(b)) => a == b,
            (Arg::Value(a), Arg::Value(b)) => a.same(b),
            _ => false,
        }
    }

    /// Name used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            Arg::Key(key) => key.name().to_string(),
            Arg::Value(instance) => format!("<{}>", instance.info.type_name),
        }
    }
}

impl From<KeyId> for Arg {
    fn from(key: KeyId) -> Self {
        Arg::Key(key)
    }
}
impl<T> From<crate::key::PbjKey<T>> for Arg {
    fn from(key: crate::key::PbjKey<T>) -> Self {
        Arg::key(&key)
    }
}
impl<T> From<&crate::key::PbjKey<T>> for Arg {
    fn from(key: &crate::key::PbjKey<T>) -> Self {
        Arg::key(key)
    }
}
impl<T: Injectable> From<crate::key::TypeKey<T>> for Arg {
    fn from(key: crate::key::TypeKey<T>) -> Self {
        Arg::key(&key)
    }
}
impl<T> From<Pbj<T>> for Arg {
    fn from(proxy: Pbj<T>) -> Self {
        Arg::Key(proxy.key().clone())
    }
}
impl<T> From<&Pbj<T>> for Arg {
    fn from(proxy: &Pbj<T>) -> Self {
        Arg::Key(proxy.key().clone())
    }
}
