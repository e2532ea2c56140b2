//! Task local overrides
//!
//! A scoped service has no value of its own: it resolves to whatever the innermost active
//! scope bound for it. Scopes follow the logical call chain through `.await` points, so
//! concurrently running tasks each see their own binding.

use std::{future::Future, marker::PhantomData, rc::Rc};

use crate::{
    container::Context,
    errors::PbjError,
    factories::Service,
    key::{KeyId, ServiceKey},
    types::{Injectable, Instance},
};

tokio::task_local! {
    static OVERRIDES: Rc<Binding>;
}

/// One bound value, chained to the bindings of the enclosing scopes
struct Binding {
    key: KeyId,
    value: Option<Instance>,
    outer: Option<Rc<Binding>>,
}

impl Binding {
    fn find(&self, key: &KeyId) -> Option<Option<Instance>> {
        if &self.key == key {
            return Some(self.value.clone());
        }
        self.outer.as_ref().and_then(|outer| outer.find(key))
    }
}

fn bind(key: &KeyId, value: Option<Instance>) -> Rc<Binding> {
    Rc::new(Binding {
        key: key.clone(),
        value,
        outer: OVERRIDES.try_with(Rc::clone).ok(),
    })
}

/// Value bound to `key` by the innermost active scope
pub(crate) fn current_override(key: &KeyId) -> Result<Option<Instance>, PbjError> {
    OVERRIDES
        .try_with(|binding| binding.find(key))
        .ok()
        .flatten()
        .ok_or_else(|| PbjError::ScopeConflict {
            key: key.clone(),
            reason: "resolved outside of an active scope",
        })
}

/// Binds values to a scoped service for the duration of a call
pub struct Scoped<T> {
    context: Context,
    key: KeyId,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for Scoped<T> {
    fn clone(&self) -> Self {
        Scoped {
            context: self.context.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Injectable> Scoped<T> {
    pub fn key(&self) -> &KeyId {
        &self.key
    }

    /// Runs `f` with `value` bound
    pub fn run<R>(&self, value: T, f: impl FnOnce() -> R) -> R {
        self.run_optional(Some(value), f)
    }

    pub fn run_optional<R>(&self, value: Option<T>, f: impl FnOnce() -> R) -> R {
        let binding = bind(&self.key, value.map(Instance::new));
        self.context.invalidate(&self.key);
        let result = OVERRIDES.sync_scope(binding, f);
        self.context.invalidate(&self.key);
        result
    }

    /// Awaits `fut` with `value` bound, the binding follows the future across `.await`
    pub async fn run_async<F: Future>(&self, value: T, fut: F) -> F::Output {
        let binding = bind(&self.key, Some(Instance::new(value)));
        self.context.invalidate(&self.key);
        let result = OVERRIDES.scope(binding, fut).await;
        self.context.invalidate(&self.key);
        result
    }
}

impl Context {
    /// Turns `key` into a scoped service
    ///
    /// Fails if the key is already bound to a value or factory.
    pub fn scoped<K: ServiceKey>(&self, key: &K) -> Result<Scoped<K::Output>, PbjError> {
        let key = key.key_id();
        let record = self.register_id(&key);
        if record.is_registered() && !record.is_scoped() {
            return Err(PbjError::ScopeConflict {
                key,
                reason: "already bound to a value or factory",
            });
        }

        record.set_cacheable(false);
        record.set_optional(true);
        record.set_service(Service::Scoped);
        Ok(Scoped {
            context: self.clone(),
            key,
            _marker: PhantomData,
        })
    }
}
