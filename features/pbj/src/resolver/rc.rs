use std::{any::type_name, rc::Rc};

use crate::{
    errors::PbjError,
    invocation::Resolution,
    key::KeyId,
    resolver::Resolver,
    types::{Injectable, Instance},
};

impl<T: Injectable> Resolver for Rc<T> {
    fn resolve(resolution: &Resolution<'_>, key: &KeyId) -> Result<Self, PbjError> {
        let resolved = resolution.resolve_instance(key)?;
        downcast_required(key, resolved)
    }

    fn from_value(owner: &KeyId, value: Option<Instance>) -> Result<Self, PbjError> {
        downcast_required(owner, value)
    }
}

impl<Resolvable: Resolver> Resolver for Option<Resolvable> {
    fn resolve(resolution: &Resolution<'_>, key: &KeyId) -> Result<Self, PbjError> {
        match Resolvable::resolve(resolution, key) {
            Ok(resolved) => Ok(Some(resolved)),
            // Null and unregistered services don't fail an optional dependency
            Err(PbjError::Null { .. }) | Err(PbjError::Unregistered { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn from_value(owner: &KeyId, value: Option<Instance>) -> Result<Self, PbjError> {
        match value {
            Some(value) => Resolvable::from_value(owner, Some(value)).map(Some),
            None => Ok(None),
        }
    }
}

/// Downcasts a resolved value, a missing value is an error
pub(crate) fn downcast_required<T: Injectable>(
    key: &KeyId,
    resolved: Option<Instance>,
) -> Result<Rc<T>, PbjError> {
    let Some(instance) = resolved else {
        return Err(PbjError::Null { key: key.clone() });
    };

    instance
        .downcast::<T>()
        .map_err(|actual| PbjError::TypeMismatch {
            key: key.clone(),
            required: type_name::<T>(),
            actual,
        })
}

/// Downcasts a resolved value which may be missing
pub(crate) fn downcast_optional<T: Injectable>(
    key: &KeyId,
    resolved: Option<Instance>,
) -> Result<Option<Rc<T>>, PbjError> {
    match resolved {
        Some(instance) => downcast_required(key, Some(instance)).map(Some),
        None => Ok(None),
    }
}
