use std::rc::Rc;

use crate::{
    container::Context,
    invocation::Resolution,
    key::ServiceKey,
    logger::{logger_key, Logger, TracingLogger},
    types::DynError,
};

type Registration = Box<dyn FnOnce(&Context)>;

/// Configures a [Context] before it is handed out
///
/// ```
/// use pbj::{pbj_key, Context};
///
/// let port = pbj_key::<u16>("port");
/// let ctx = Context::builder()
///     .name("app")
///     .add_value(&port, 8080)
///     .build();
///
/// assert_eq!(ctx.name(), "app");
/// assert_eq!(*ctx.resolve(&port).unwrap(), 8080);
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    name: Option<String>,
    logger: Option<Rc<dyn Logger>>,
    parent: Option<Context>,
    registrations: Vec<Registration>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn logger(self, logger: impl Logger + 'static) -> Self {
        self.logger_rc(Rc::new(logger))
    }

    pub fn logger_rc(mut self, logger: Rc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Reads through to `parent`
    pub fn parent(mut self, parent: Context) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn add_value<K>(mut self, key: &K, value: K::Output) -> Self
    where
        K: ServiceKey + Clone + 'static,
    {
        let key = key.clone();
        self.registrations.push(Box::new(move |ctx| {
            ctx.register(&key).with_value(value);
        }));
        self
    }

    pub fn add_factory<K, E, F>(mut self, key: &K, factory: F) -> Self
    where
        K: ServiceKey + Clone + 'static,
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Result<K::Output, E> + 'static,
    {
        let key = key.clone();
        self.registrations.push(Box::new(move |ctx| {
            ctx.register(&key).with_factory(factory);
        }));
        self
    }

    pub fn build(self) -> Context {
        let root = self.parent.is_none();
        let explicit_logger = self.logger.is_some();
        let name = self
            .name
            .unwrap_or_else(|| if root { "root".to_string() } else { "child".to_string() });
        let logger = self
            .logger
            .or_else(|| self.parent.as_ref().map(|p| p.logger()))
            .unwrap_or_else(|| Rc::new(TracingLogger));

        let ctx = Context::from_parts(name, self.parent, logger.clone());
        if root || explicit_logger {
            ctx.register(&logger_key()).with_value(logger);
        }

        for registration in self.registrations {
            registration(&ctx);
        }

        tracing::debug!("Built context '{}'", ctx.name());
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::pbj_key;

    #[test]
    fn root_contexts_register_their_logger() {
        let ctx = ContextBuilder::new().build();
        assert_eq!(ctx.name(), "root");
        assert!(ctx.resolve(&logger_key()).is_ok());
    }

    #[test]
    fn factories_are_registered_on_build() {
        let greeting = pbj_key::<String>("greeting");
        let ctx = ContextBuilder::new()
            .add_factory(&greeting, |_| Ok::<_, DynError>("hi".to_string()))
            .build();
        assert_eq!(*ctx.resolve(&greeting).unwrap(), "hi");
    }

    #[test]
    fn children_inherit_the_parent_logger() {
        let root = ContextBuilder::new().name("app").build();
        let child = ContextBuilder::new().parent(root.clone()).build();
        assert_eq!(child.name(), "child");
        assert!(Rc::ptr_eq(&child.logger(), &root.logger()));
        assert!(child.keys().is_empty());
    }
}
