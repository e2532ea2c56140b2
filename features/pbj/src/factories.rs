use std::{any::TypeId, future::Future, rc::Rc};

use futures::FutureExt;

use crate::{
    errors::PbjError,
    invocation::Resolution,
    types::{DynError, Injectable, Instance, TypeInfo},
};

/// A type which knows how to build itself - the equivalent of a class constructor
///
/// Registering a type key of a [Construct] type makes the type its own service.
pub trait Construct: Injectable + Sized {
    /// Builds a new instance, dependencies are requested through `resolution`
    fn construct(resolution: &Resolution<'_>) -> Result<Self, DynError>;
}

/// Outcome of calling a factory
pub(crate) enum Produced {
    Ready(Option<Instance>),
    Pending(futures::future::LocalBoxFuture<'static, Result<Option<Instance>, PbjError>>),
}

/// Whether a factory is a plain function or a type's constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryKind {
    Function,
    Constructor,
}

type CallFn = dyn Fn(&Resolution<'_>) -> Result<Produced, PbjError>;

/// Type erased factory of a record
#[derive(Clone)]
pub(crate) struct Factory {
    pub kind: FactoryKind,
    pub provides: TypeInfo,
    /// Set for stateless functions, two factories with the same origin are the same function
    pub origin: Option<TypeId>,
    call: Rc<CallFn>,
}

impl Factory {
    pub fn call(&self, resolution: &Resolution<'_>) -> Result<Produced, PbjError> {
        (self.call)(resolution)
    }

    pub fn same(&self, other: &Factory) -> bool {
        match (self.origin, other.origin) {
            (Some(a), Some(b)) => a == b,
            _ => Rc::ptr_eq(&self.call, &other.call),
        }
    }

    pub fn function<T, E, F>(f: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Result<T, E> + 'static,
    {
        Self::optional_function(move |r| f(r).map(Some)).with_origin::<F>()
    }

    pub fn optional_function<T, E, F>(f: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Result<Option<T>, E> + 'static,
    {
        Factory {
            kind: FactoryKind::Function,
            provides: TypeInfo::of::<T>(),
            origin: stateless_origin::<F>(),
            call: erase(move |r| {
                f(r).map(|value| Produced::Ready(value.map(Instance::new)))
                    .map_err(|e| PbjError::from_dyn(r.key(), e.into()))
            }),
        }
    }

    pub fn async_function<T, E, F, Fut>(f: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Factory {
            kind: FactoryKind::Function,
            provides: TypeInfo::of::<T>(),
            origin: stateless_origin::<F>(),
            call: erase(move |r| {
                let key = r.key().clone();
                let fut = f(r);
                Ok(Produced::Pending(
                    async move {
                        fut.await
                            .map(|value| Some(Instance::new(value)))
                            .map_err(|e| PbjError::from_dyn(&key, e.into()))
                    }
                    .boxed_local(),
                ))
            }),
        }
    }

    pub fn constructor<T: Construct>() -> Self {
        Factory {
            kind: FactoryKind::Constructor,
            provides: TypeInfo::of::<T>(),
            origin: Some(TypeId::of::<T>()),
            call: erase(|r| {
                T::construct(r)
                    .map(|value| Produced::Ready(Some(Instance::new(value))))
                    .map_err(|e| PbjError::from_dyn(r.key(), e))
            }),
        }
    }

    /// Factory producing an already type erased value
    pub(crate) fn raw<F>(provides: TypeInfo, f: F) -> Self
    where
        F: Fn(&Resolution<'_>) -> Result<Option<Instance>, PbjError> + 'static,
    {
        Factory {
            kind: FactoryKind::Function,
            provides,
            origin: None,
            call: erase(move |r| f(r).map(Produced::Ready)),
        }
    }

    fn with_origin<F: 'static>(mut self) -> Self {
        self.origin = stateless_origin::<F>();
        self
    }
}

fn erase<F>(f: F) -> Rc<CallFn>
where
    F: Fn(&Resolution<'_>) -> Result<Produced, PbjError> + 'static,
{
    Rc::new(f)
}

/// Only zero sized functions are fully identified by their type
fn stateless_origin<F: 'static>() -> Option<TypeId> {
    (std::mem::size_of::<F>() == 0).then(TypeId::of::<F>)
}

/// The underlying implementation of a record
#[derive(Clone)]
pub(crate) enum Service {
    /// Nothing registered yet
    Unset,
    /// A plain value, returned verbatim
    Value(Option<Instance>),
    Factory(Factory),
    /// Value supplied by the innermost active scope
    Scoped,
}

impl Service {
    pub fn is_invokable(&self) -> bool {
        matches!(self, Service::Factory(_) | Service::Scoped)
    }

    pub fn provides(&self) -> Option<TypeInfo> {
        match self {
            Service::Value(Some(instance)) => Some(instance.info),
            Service::Factory(factory) => Some(factory.provides),
            _ => None,
        }
    }

    pub fn same(&self, other: &Service) -> bool {
        match (self, other) {
            (Service::Unset, Service::Unset) | (Service::Scoped, Service::Scoped) => true,
            (Service::Value(None), Service::Value(None)) => true,
            (Service::Value(Some(a)), Service::Value(Some(b))) => a.same(b),
            (Service::Factory(a), Service::Factory(b)) => a.same(b),
            _ => false,
        }
    }
}
