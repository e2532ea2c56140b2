//! Post construction initialization
//!
//! A record may bind a hook which runs once on every freshly built instance. The hook is
//! armed again whenever the record is invalidated, so a rebuilt instance is initialized too.
//!
//! Ordering is implied by reads: a constructor which reads a dependency forces that
//! dependency, including its initializer, before it continues. Services holding each other
//! only as [crate::Pbj] handles may observe the other side before its hook has run.

use std::{any::Any, cell::Cell, rc::Rc};

use crate::{
    errors::PbjError,
    key::KeyId,
    types::{DynError, Injectable, Instance},
};

type HookFn = dyn Fn(&dyn Any) -> Result<(), DynError>;

/// Runs a named hook once per construction epoch
pub(crate) struct Initializer {
    method: String,
    hook: Rc<HookFn>,
    initialized: Cell<bool>,
}

impl Initializer {
    pub fn new<T, E, F>(method: &str, hook: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&T) -> Result<(), E> + 'static,
    {
        let method_name = method.to_string();
        Initializer {
            method: method.to_string(),
            hook: Rc::new(move |any: &dyn Any| -> Result<(), DynError> {
                match any.downcast_ref::<T>() {
                    Some(instance) => hook(instance).map_err(Into::into),
                    None => Err(format!(
                        "'{method_name}' expects an instance of '{}'",
                        std::any::type_name::<T>()
                    )
                    .into()),
                }
            }),
            initialized: Cell::new(false),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Runs the hook unless it already ran in this epoch
    ///
    /// A failing hook leaves the initializer armed.
    pub fn invoke(&self, key: &KeyId, instance: &Instance) -> Result<(), PbjError> {
        if self.initialized.get() {
            return Ok(());
        }

        tracing::trace!("Initializing '{}' with '{}'", key, self.method);
        (self.hook)(instance.value.as_ref()).map_err(|error| PbjError::Initialize {
            key: key.clone(),
            method: self.method.clone(),
            error: Rc::new(error),
        })?;

        self.initialized.set(true);
        Ok(())
    }

    /// Starts a new epoch
    pub fn invalidate(&self) {
        self.initialized.set(false);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Default)]
    struct Connection {
        opened: Cell<u32>,
    }

    impl Connection {
        fn open(&self) -> Result<(), DynError> {
            self.opened.set(self.opened.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn runs_once_per_epoch() {
        let key = KeyId::symbol("connection");
        let init = Initializer::new("open", Connection::open);
        let conn = Rc::new(Connection::default());
        let instance = Instance::from_rc(conn.clone());

        init.invoke(&key, &instance).unwrap();
        init.invoke(&key, &instance).unwrap();
        assert_eq!(conn.opened.get(), 1);

        init.invalidate();
        init.invoke(&key, &instance).unwrap();
        assert_eq!(conn.opened.get(), 2);
    }

    #[test]
    fn failure_keeps_it_armed() {
        let key = KeyId::symbol("flaky");
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();
        let init = Initializer::new("start", move |_: &u8| {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                Err("not yet")
            } else {
                Ok(())
            }
        });
        let instance = Instance::new(1_u8);

        let err = init.invoke(&key, &instance).unwrap_err();
        assert!(matches!(err, PbjError::Initialize { ref method, .. } if method == "start"));
        assert!(!init.is_initialized());

        init.invoke(&key, &instance).unwrap();
        assert!(init.is_initialized());
        assert_eq!(attempts.get(), 2);
    }
}
