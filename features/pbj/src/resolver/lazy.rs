use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt::{Debug, Display},
    marker::PhantomData,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{
    container::{Context, ContextInner},
    errors::PbjError,
    invocation::Resolution,
    key::{AsKey, KeyId, ServiceKey},
    record::ServiceRecord,
    resolver::{
        rc::{downcast_optional, downcast_required},
        Resolver,
    },
    types::{Injectable, Instance},
};

/// Lazy handle to a service
///
/// Holding a `Pbj` never builds the service. The first accessor call invokes the record,
/// later calls reuse the cached instance, and after an invalidation the next access builds
/// a fresh one. Passing a `Pbj` where a key is expected is the same as passing its key.
///
/// Accessors return errors instead of panicking, `get` is the usual entry point:
/// ```
/// use pbj::{pbj_key, Context};
///
/// let ctx = Context::new();
/// let greeting = pbj_key::<String>("greeting");
/// ctx.register(&greeting).with_value("hello".to_string());
///
/// let proxy = ctx.pbj(&greeting);
/// assert_eq!(proxy.get().unwrap().len(), 5);
/// assert_eq!(format!("{proxy} world"), "hello world");
/// ```
pub struct Pbj<T> {
    context: Weak<ContextInner>,
    key: KeyId,
    _marker: PhantomData<fn() -> T>,
}

/// What a proxy currently holds, without forcing it
#[derive(Debug, Clone)]
pub enum ProxyState {
    /// Not built, or invalidated since
    Unbuilt,
    /// Waiting for an async factory
    Pending,
    Value,
    Primitive,
    Null,
    /// The last invocation failed
    Error(PbjError),
}

impl<T> Clone for Pbj<T> {
    fn clone(&self) -> Self {
        Pbj {
            context: self.context.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Pbj<T> {
    pub(crate) fn new(context: &Context, key: KeyId) -> Self {
        Pbj {
            context: Rc::downgrade(&context.0),
            key,
            _marker: PhantomData,
        }
    }

    fn context(&self) -> Result<Context, PbjError> {
        self.context
            .upgrade()
            .map(Context)
            .ok_or_else(|| PbjError::ContextDropped {
                key: self.key.clone(),
            })
    }

    pub fn key(&self) -> &KeyId {
        &self.key
    }

    /// The record behind this handle, never invokes it
    pub fn record(&self) -> Result<Rc<ServiceRecord>, PbjError> {
        Ok(self.context()?.record_id(&self.key))
    }

    /// Peeks at the record without building it
    pub fn state(&self) -> ProxyState {
        let Ok(record) = self.record() else {
            return ProxyState::Unbuilt;
        };

        let state = record.state.borrow();
        if state.pending.is_some() {
            return ProxyState::Pending;
        }
        if let Some(error) = &state.error {
            return ProxyState::Error(error.clone());
        }

        let current = match &state.service {
            crate::factories::Service::Value(value) => Some(value),
            _ => state.cached.as_ref(),
        };
        match current {
            None => ProxyState::Unbuilt,
            Some(None) => ProxyState::Null,
            Some(Some(instance)) if instance.is_primitive() => ProxyState::Primitive,
            Some(Some(_)) => ProxyState::Value,
        }
    }

    /// Forces the service and returns the type erased value
    pub fn instance(&self) -> Result<Option<Instance>, PbjError> {
        self.context()?.invoke_key(&self.key)
    }

    /// True if the service resolves to a value of type `U`, the `instanceof` check
    pub fn is<U: Injectable>(&self) -> Result<bool, PbjError> {
        Ok(self.instance()?.is_some_and(|instance| instance.is::<U>()))
    }

    pub fn is_primitive(&self) -> Result<bool, PbjError> {
        Ok(self.instance()?.is_some_and(|instance| instance.is_primitive()))
    }

    pub fn is_null(&self) -> Result<bool, PbjError> {
        Ok(self.instance()?.is_none())
    }
}

impl<T: Injectable> Pbj<T> {
    /// Forces the service, a null value is an error
    pub fn get(&self) -> Result<Rc<T>, PbjError> {
        downcast_required(&self.key, self.instance()?)
    }

    pub fn get_optional(&self) -> Result<Option<Rc<T>>, PbjError> {
        downcast_optional(&self.key, self.instance()?)
    }

    /// Runs `f` against the current value
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, PbjError> {
        let value = self.get()?;
        Ok(f(&value))
    }
}

impl<T: Injectable + ListLike> Pbj<T> {
    /// Length of a list like value, maps count their values
    pub fn len(&self) -> Result<usize, PbjError> {
        Ok(self.get_optional()?.map_or(0, |list| list.list_len()))
    }

    pub fn is_empty(&self) -> Result<bool, PbjError> {
        Ok(self.len()? == 0)
    }
}

impl<T> AsKey for Pbj<T> {
    fn key_id(&self) -> KeyId {
        self.key.clone()
    }
}
impl<T: Injectable> ServiceKey for Pbj<T> {
    type Output = T;
}

impl<T: Injectable> Resolver for Pbj<T> {
    fn resolve(resolution: &Resolution<'_>, key: &KeyId) -> Result<Self, PbjError> {
        resolution.context().tracker().track_lazy(key);
        Ok(resolution.context().pbj_id(key.clone()))
    }

    fn from_value(owner: &KeyId, _: Option<Instance>) -> Result<Self, PbjError> {
        Err(PbjError::InvalidArgument(format!(
            "a literal argument of '{owner}' can't be injected as a lazy handle"
        )))
    }
}

impl<T: Injectable + Display> Display for Pbj<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get_optional() {
            Ok(Some(value)) => Display::fmt(&*value, f),
            Ok(None) => f.write_str("null"),
            Err(e) => write!(f, "<{e}>"),
        }
    }
}

impl<T> Debug for Pbj<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pbj").field(&self.key).finish()
    }
}

/// Values with a length
pub trait ListLike {
    fn list_len(&self) -> usize;
}

impl<U> ListLike for Vec<U> {
    fn list_len(&self) -> usize {
        self.len()
    }
}
impl<U> ListLike for VecDeque<U> {
    fn list_len(&self) -> usize {
        self.len()
    }
}
impl<U, const N: usize> ListLike for [U; N] {
    fn list_len(&self) -> usize {
        N
    }
}
impl<K, V, S> ListLike for HashMap<K, V, S> {
    fn list_len(&self) -> usize {
        self.values().count()
    }
}
impl<K, V> ListLike for BTreeMap<K, V> {
    fn list_len(&self) -> usize {
        self.values().count()
    }
}
impl<K, V, S> ListLike for IndexMap<K, V, S> {
    fn list_len(&self) -> usize {
        self.values().count()
    }
}
