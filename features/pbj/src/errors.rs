use std::rc::Rc;

use thiserror::Error;

use crate::{key::KeyId, pending::AsyncPending, types::DynError};

/// Errors raised while registering or resolving services
#[derive(Error, Debug, Clone)]
pub enum PbjError {
    /// Nothing has been registered for the key
    #[error("No service has been registered for '{key}'")]
    Unregistered { key: KeyId },
    /// The record holds a plain value but was invoked with arguments
    #[error("'{key}' is configured as a non-invokable value and can't be invoked")]
    NotInvokable { key: KeyId },
    /// The resolved value is not of the requested type
    #[error("Type mismatch for '{key}', required: '{required}' actual: '{actual}'")]
    TypeMismatch {
        key: KeyId,
        required: &'static str,
        actual: &'static str,
    },
    /// A non optional service produced no value
    #[error("'{key}' resolved to nothing but is not optional")]
    NonOptionalNull { key: KeyId },
    /// An optional service produced no value, and a value was required by the caller
    #[error("'{key}' resolved to nothing, use the optional accessor")]
    Null { key: KeyId },
    /// A service is waiting on an async factory
    #[error(transparent)]
    AsyncPending(#[from] AsyncPending),
    /// A factory or constructor failed
    #[error("Factory for '{key}' failed - error: {error}")]
    Invocation { key: KeyId, error: Rc<DynError> },
    /// The post construction hook failed
    #[error("Initializer '{method}' of '{key}' failed - error: {error}")]
    Initialize {
        key: KeyId,
        method: String,
        error: Rc<DynError>,
    },
    /// A service was forced while it is still being constructed
    #[error("Circular resolution of '{key}' through {chain:?} - Consider holding a `Pbj` handle instead")]
    Circular { key: KeyId, chain: Vec<KeyId> },
    #[error("Scope conflict for '{key}': {reason}")]
    ScopeConflict { key: KeyId, reason: &'static str },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("'{key}' has no argument at index {index}")]
    MissingArgument { key: KeyId, index: usize },
    /// Async resolution got the same pending operation back after it settled
    #[error("Async resolution of '{key}' made no progress waiting on '{pending}'")]
    Stalled { key: KeyId, pending: KeyId },
    /// A handle outlived the context it belongs to
    #[error("The context owning '{key}' was dropped")]
    ContextDropped { key: KeyId },
}

impl PbjError {
    /// Converts an error returned by user code
    ///
    /// A [PbjError] passing through a factory is recovered as is.
    pub fn from_dyn(key: &KeyId, error: DynError) -> PbjError {
        match error.downcast::<PbjError>() {
            Ok(pbj) => *pbj,
            Err(error) => PbjError::Invocation {
                key: key.clone(),
                error: Rc::new(error),
            },
        }
    }

    pub fn is_async_pending(&self) -> bool {
        matches!(self, PbjError::AsyncPending(_))
    }

    /// The user error behind an invocation failure
    pub fn source_error(&self) -> Option<&DynError> {
        match self {
            PbjError::Invocation { error, .. } | PbjError::Initialize { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}
