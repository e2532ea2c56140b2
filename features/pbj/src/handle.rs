use std::{future::Future, marker::PhantomData, rc::Rc};

use crate::{
    container::Context,
    errors::PbjError,
    factories::{Construct, Factory, Service},
    initiator::Initializer,
    invocation::{interceptor, NextFn, Resolution},
    key::{AsKey, KeyId, ServiceKey},
    record::ServiceRecord,
    resolver::{
        rc::{downcast_optional, downcast_required},
        Arg, Pbj,
    },
    types::{DynError, Injectable, Instance},
};

/// Chainable configuration of a registered service
///
/// Every setter applies immediately, the handle only keeps the record around. Setting the
/// same service, arguments or flags again is a no-op and keeps the cached instance.
/// ```
/// use std::rc::Rc;
/// use pbj::{pbj_key, Arg, Context};
///
/// let ctx = Context::new();
/// let base = pbj_key::<u32>("base");
/// let doubled = pbj_key::<u32>("doubled");
///
/// ctx.register(&base).with_value(21);
/// ctx.register(&doubled)
///     .with_factory(|r| r.arg::<Rc<u32>>(0).map(|base| *base * 2))
///     .with_args([Arg::key(&base)]);
///
/// assert_eq!(*ctx.resolve(&doubled).unwrap(), 42);
/// ```
pub struct ServiceHandle<T> {
    context: Context,
    record: Rc<ServiceRecord>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ServiceHandle<T> {
    fn clone(&self) -> Self {
        ServiceHandle {
            context: self.context.clone(),
            record: self.record.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ServiceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ServiceHandle").field(self.record.key()).finish()
    }
}

impl<T: Injectable> ServiceHandle<T> {
    pub(crate) fn new(context: Context, record: Rc<ServiceRecord>) -> Self {
        ServiceHandle {
            context,
            record,
            _marker: PhantomData,
        }
    }

    /// Replaces the arguments passed to the factory
    pub fn with_args(self, args: impl IntoIterator<Item = Arg>) -> Self {
        self.record.set_args(args.into_iter().collect());
        self
    }

    /// Appends one argument
    pub fn with_arg(self, arg: impl Into<Arg>) -> Self {
        let mut args = self.record.args();
        args.push(arg.into());
        self.record.set_args(args);
        self
    }

    pub fn with_value(self, value: T) -> Self {
        self.set(Service::Value(Some(Instance::new(value))))
    }

    /// A value which keeps its identity, registering the same `Rc` again is a no-op
    pub fn with_shared_value(self, value: Rc<T>) -> Self {
        self.set(Service::Value(Some(Instance::from_rc(value))))
    }

    /// A value which may be null, a null value makes the service optional
    pub fn with_optional_value(self, value: Option<T>) -> Self {
        if value.is_none() {
            self.record.set_optional(true);
        }
        self.set(Service::Value(value.map(Instance::new)))
    }

    pub fn with_factory<E, F>(self, factory: F) -> Self
    where
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Result<T, E> + 'static,
    {
        self.set(Service::Factory(Factory::function(factory)))
    }

    /// A factory which may produce nothing, the service is marked optional
    pub fn with_optional_factory<E, F>(self, factory: F) -> Self
    where
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Result<Option<T>, E> + 'static,
    {
        self.record.set_optional(true);
        self.set(Service::Factory(Factory::optional_function(factory)))
    }

    /// A factory producing a future
    ///
    /// Synchronous resolution of this service, or of anything depending on it, fails with
    /// [crate::AsyncPending] until the future settled. Use [Context::resolve_async].
    pub fn with_async_factory<E, F, Fut>(self, factory: F) -> Self
    where
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        self.set(Service::Factory(Factory::async_function(factory)))
    }

    pub fn with_constructor(self) -> Self
    where
        T: Construct,
    {
        self.set(Service::Factory(Factory::constructor::<T>()))
    }

    pub fn with_cacheable(self, cacheable: bool) -> Self {
        self.record.set_cacheable(cacheable);
        self
    }

    pub fn with_optional(self, optional: bool) -> Self {
        self.record.set_optional(optional);
        self
    }

    /// Replaces the tags, see [Context::list_of]
    pub fn with_tags<K: AsKey>(self, tags: impl IntoIterator<Item = K>) -> Self {
        self.record
            .set_tags(tags.into_iter().map(|tag| tag.key_id()).collect());
        self
    }

    pub fn with_tag(self, tag: &impl AsKey) -> Self {
        let tag = tag.key_id();
        if !self.record.has_tag(&tag) {
            let mut tags = self.record.tags();
            tags.push(tag);
            self.record.set_tags(tags);
        }
        self
    }

    pub fn with_description(self, description: &str) -> Self {
        self.record.set_description(description);
        self
    }

    pub fn with_name(self, name: &str) -> Self {
        self.record.set_name(name);
        self
    }

    /// Wraps every invocation, the first interceptor added is the outermost
    ///
    /// An interceptor may call `next` any number of times, including never, and may swallow
    /// its errors.
    pub fn with_interceptor<F>(self, f: F) -> Self
    where
        F: Fn(&mut Next<'_, '_, T>) -> Result<Option<Rc<T>>, PbjError> + 'static,
    {
        self.record.push_interceptor(typed_interceptor(f));
        self
    }

    /// Replaces all interceptors
    pub fn with_interceptors<F>(self, interceptors: impl IntoIterator<Item = F>) -> Self
    where
        F: Fn(&mut Next<'_, '_, T>) -> Result<Option<Rc<T>>, PbjError> + 'static,
    {
        self.record
            .set_interceptors(interceptors.into_iter().map(typed_interceptor).collect());
        self
    }

    /// Runs `hook` once on every freshly built instance
    pub fn with_initialize<E, F>(self, method: &str, hook: F) -> Self
    where
        E: Into<DynError>,
        F: Fn(&T) -> Result<(), E> + 'static,
    {
        self.record.set_initializer(Initializer::new(method, hook));
        self
    }

    /// Marks the service as producing a list
    pub fn as_array(self) -> Self {
        self.record.set_array(true);
        self
    }

    fn set(self, service: Service) -> Self {
        self.record.set_service(service);
        self
    }

    pub fn key(&self) -> &KeyId {
        self.record.key()
    }

    pub fn record(&self) -> Rc<ServiceRecord> {
        self.record.clone()
    }

    pub fn pbj(&self) -> Pbj<T> {
        self.context.pbj_id(self.record.key().clone())
    }

    pub fn resolve(&self) -> Result<Rc<T>, PbjError> {
        downcast_required(self.record.key(), self.record.invoke()?)
    }

    pub fn resolve_optional(&self) -> Result<Option<Rc<T>>, PbjError> {
        downcast_optional(self.record.key(), self.record.invoke()?)
    }

    pub async fn resolve_async(&self) -> Result<Rc<T>, PbjError> {
        let key = self.record.key().clone();
        let instance = self.context.invoke_async(&key).await?;
        downcast_required(&key, instance)
    }

    pub fn invalidate(&self) {
        self.record.invalidate();
    }
}

impl<T> AsKey for ServiceHandle<T> {
    fn key_id(&self) -> KeyId {
        self.record.key().clone()
    }
}
impl<T: Injectable> ServiceKey for ServiceHandle<T> {
    type Output = T;
}

impl<T> From<&ServiceHandle<T>> for Arg {
    fn from(handle: &ServiceHandle<T>) -> Self {
        Arg::Key(handle.record.key().clone())
    }
}

/// Continuation of an intercepted invocation
pub struct Next<'a, 'b, T> {
    key: &'a KeyId,
    inner: &'a mut NextFn<'b>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Injectable> Next<'_, '_, T> {
    /// Key of the intercepted service
    pub fn key(&self) -> &KeyId {
        self.key
    }

    /// Runs the rest of the chain
    pub fn next(&mut self) -> Result<Option<Rc<T>>, PbjError> {
        let produced = (self.inner)()?;
        downcast_optional(self.key, produced)
    }
}

fn typed_interceptor<T, F>(f: F) -> crate::invocation::Interceptor
where
    T: Injectable,
    F: Fn(&mut Next<'_, '_, T>) -> Result<Option<Rc<T>>, PbjError> + 'static,
{
    interceptor(move |key, inner| {
        let mut next = Next {
            key,
            inner,
            _marker: PhantomData,
        };
        f(&mut next).map(|value| value.map(Instance::from_rc))
    })
}
