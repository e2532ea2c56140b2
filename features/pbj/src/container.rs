use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt::Debug,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{
    builder::ContextBuilder,
    errors::PbjError,
    factories::{Construct, Factory, Service},
    handle::ServiceHandle,
    invocation::{Resolution, Tracker},
    key::{type_key, AsKey, FnKey, KeyId, ServiceKey},
    logger::Logger,
    notify::Notifier,
    record::ServiceRecord,
    resolver::{
        rc::{downcast_optional, downcast_required},
        Arg, Pbj,
    },
    types::{DynError, Injectable, Instance},
};

/// Registry of services
///
/// Cloning a context is cheap, every clone points to the same table. A child context created
/// with [Context::new_context] reads through to its parent, while registration and
/// invalidation stay local.
#[derive(Clone)]
pub struct Context(pub(crate) Rc<ContextInner>);

pub(crate) struct ContextInner {
    pub name: String,
    pub parent: Option<Context>,
    pub children: RefCell<Vec<Weak<ContextInner>>>,
    /// Insertion ordered, registration order is observable through lists and notifications
    pub table: RefCell<IndexMap<KeyId, Rc<ServiceRecord>>>,
    pub tracker: Rc<Tracker>,
    /// tag -> key of the list record
    pub lists: RefCell<HashMap<KeyId, KeyId>>,
    /// (source, path) -> key of the derived record
    pub paths: RefCell<HashMap<(KeyId, String), KeyId>>,
    pub notifier: Notifier,
    pub logger: Rc<dyn Logger>,
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_struct("Context");
        map.field("name", &self.0.name);
        for record in self.0.table.borrow().values() {
            let val = if record.is_cached() {
                "cached"
            } else if record.is_registered() {
                "registered"
            } else {
                "unset"
            };
            map.field(record.key().name(), &val);
        }
        map.finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        ContextBuilder::new().build()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub(crate) fn from_parts(
        name: String,
        parent: Option<Context>,
        logger: Rc<dyn Logger>,
    ) -> Self {
        let tracker = parent
            .as_ref()
            .map(|p| p.0.tracker.clone())
            .unwrap_or_default();

        let context = Context(Rc::new(ContextInner {
            name,
            parent: parent.clone(),
            children: RefCell::new(Vec::new()),
            table: RefCell::new(IndexMap::new()),
            tracker,
            lists: RefCell::new(HashMap::new()),
            paths: RefCell::new(HashMap::new()),
            notifier: Notifier::default(),
            logger,
        }));

        if let Some(parent) = parent {
            parent
                .0
                .children
                .borrow_mut()
                .push(Rc::downgrade(&context.0));
        }

        context
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Context> {
        self.0.parent.as_ref()
    }

    /// Creates a child context reading through to this one
    pub fn new_context(&self) -> Context {
        self.new_named_context(&format!("{}/child", self.0.name))
    }

    pub fn new_named_context(&self, name: &str) -> Context {
        ContextBuilder::new()
            .name(name)
            .parent(self.clone())
            .build()
    }

    pub(crate) fn children(&self) -> Vec<Context> {
        let mut children = self.0.children.borrow_mut();
        children.retain(|child| child.strong_count() > 0);
        children
            .iter()
            .filter_map(Weak::upgrade)
            .map(Context)
            .collect()
    }

    pub(crate) fn tracker(&self) -> &Tracker {
        &self.0.tracker
    }

    pub fn logger(&self) -> Rc<dyn Logger> {
        self.0.logger.clone()
    }

    /// Keys of the local table, in registration order
    pub fn keys(&self) -> Vec<KeyId> {
        self.0.table.borrow().keys().cloned().collect()
    }

    pub(crate) fn local_record(&self, key: &KeyId) -> Option<Rc<ServiceRecord>> {
        self.0.table.borrow().get(key).cloned()
    }

    /// Looks a key up locally, then in the parents
    ///
    /// A local record without a service doesn't hide a registered parent record.
    pub fn get_record<K: AsKey + ?Sized>(&self, key: &K) -> Option<Rc<ServiceRecord>> {
        self.lookup(&key.key_id())
    }

    fn lookup(&self, key: &KeyId) -> Option<Rc<ServiceRecord>> {
        let local = self.local_record(key);
        if local.as_ref().is_some_and(|r| r.is_registered()) {
            return local;
        }

        self.0
            .parent
            .as_ref()
            .and_then(|parent| parent.lookup(key))
            .filter(|r| r.is_registered())
            .or(local)
    }

    /// Finds or creates the record of a key
    pub fn record<K: AsKey + ?Sized>(&self, key: &K) -> Rc<ServiceRecord> {
        self.record_id(&key.key_id())
    }

    pub(crate) fn record_id(&self, key: &KeyId) -> Rc<ServiceRecord> {
        self.lookup(key).unwrap_or_else(|| self.create_record(key))
    }

    fn create_record(&self, key: &KeyId) -> Rc<ServiceRecord> {
        tracing::trace!("Creating record for '{}' in '{}'", key, self.0.name);
        let record = Rc::new(ServiceRecord::new(key.clone(), Rc::downgrade(&self.0)));
        self.0
            .table
            .borrow_mut()
            .insert(key.clone(), record.clone());
        record
    }

    /// Finds or creates the local record for registration
    ///
    /// An existing record that is invalid gets its dependents invalidated before it is
    /// handed out.
    pub(crate) fn register_id(&self, key: &KeyId) -> Rc<ServiceRecord> {
        match self.local_record(key) {
            Some(record) => {
                if record.dependents_stale() {
                    self.invalidate(key);
                }
                record
            }
            None => {
                self.0
                    .logger
                    .debug("Registering {key}", &[("key", key.name())]);
                self.create_record(key)
            }
        }
    }

    /// Registers or updates a service, configure it through the returned handle
    pub fn register<K: ServiceKey>(&self, key: &K) -> ServiceHandle<K::Output> {
        ServiceHandle::new(self.clone(), self.register_id(&key.key_id()))
    }

    /// Registers a service together with its arguments
    pub fn register_with<K: ServiceKey>(
        &self,
        key: &K,
        args: impl IntoIterator<Item = Arg>,
    ) -> ServiceHandle<K::Output> {
        self.register(key).with_args(args)
    }

    /// Registers a function which is its own key
    ///
    /// Registering the same stateless function again keeps the cached instance.
    pub fn register_fn<T, E, F>(&self, factory: F) -> ServiceHandle<T>
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Result<T, E> + 'static,
    {
        let key = FnKey::<T>::of::<F>();
        self.register(&key).with_factory(factory)
    }

    /// Registers a type built by its own constructor
    pub fn register_type<T: Construct>(&self) -> ServiceHandle<T> {
        self.register(&type_key::<T>())
            .with_constructor()
    }

    pub fn resolve<K: ServiceKey>(&self, key: &K) -> Result<Rc<K::Output>, PbjError> {
        let id = key.key_id();
        let instance = self.invoke_key(&id)?;
        self.require_value(&id, instance)
    }

    /// Resolves a service which may be null
    pub fn resolve_optional<K: ServiceKey>(
        &self,
        key: &K,
    ) -> Result<Option<Rc<K::Output>>, PbjError> {
        let id = key.key_id();
        downcast_optional(&id, self.invoke_key(&id)?)
    }

    /// Registers `args` on the key, then resolves it
    pub fn resolve_with<K: ServiceKey>(
        &self,
        key: &K,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<Rc<K::Output>, PbjError> {
        self.register_with(key, args).resolve()
    }

    pub fn resolve_fn<T, E, F>(&self, factory: F) -> Result<Rc<T>, PbjError>
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Result<T, E> + 'static,
    {
        self.register_fn(factory).resolve()
    }

    pub fn resolve_fn_with<T, E, F>(
        &self,
        factory: F,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<Rc<T>, PbjError>
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&Resolution<'_>) -> Result<T, E> + 'static,
    {
        self.register_fn(factory).with_args(args).resolve()
    }

    /// Resolves a type, registering its constructor on first use
    pub fn resolve_type<T: Construct>(&self) -> Result<Rc<T>, PbjError> {
        let key = type_key::<T>();
        let record = self.record(&key);
        if !record.is_registered() {
            record.set_service(Service::Factory(Factory::constructor::<T>()));
        }
        self.resolve(&key)
    }

    /// Lazy handle on a service, never builds it
    pub fn pbj<K: ServiceKey>(&self, key: &K) -> Pbj<K::Output> {
        self.pbj_id(key.key_id())
    }

    pub(crate) fn pbj_id<T>(&self, key: KeyId) -> Pbj<T> {
        self.record_id(&key);
        Pbj::new(self, key)
    }

    pub(crate) fn invoke_key(&self, key: &KeyId) -> Result<Option<Instance>, PbjError> {
        self.record_id(key).invoke()
    }

    pub(crate) fn require_value<T: Injectable>(
        &self,
        key: &KeyId,
        instance: Option<Instance>,
    ) -> Result<Rc<T>, PbjError> {
        downcast_required(key, instance)
    }

    /// Invalidates a record and, transitively, every record depending on it
    ///
    /// Dependents are found by scanning the whole table. Child contexts drop their dependents
    /// too, unless they override the key themselves.
    pub fn invalidate<K: AsKey + ?Sized>(&self, key: &K) {
        let key = key.key_id();
        tracing::trace!("Invalidating '{}' in '{}'", key, self.0.name);
        self.invalidate_inner(&key, &mut HashSet::new(), true);
    }

    fn invalidate_inner(&self, key: &KeyId, seen: &mut HashSet<KeyId>, own: bool) {
        if !seen.insert(key.clone()) {
            return;
        }

        if own {
            if let Some(record) = self.local_record(key) {
                record.mark_invalid();
            }
        }

        let dependents: Vec<KeyId> = self
            .0
            .table
            .borrow()
            .values()
            .filter(|record| record.depends_on(key))
            .map(|record| record.key().clone())
            .collect();
        for dependent in dependents {
            self.invalidate_inner(&dependent, seen, true);
        }
        if own {
            if let Some(record) = self.local_record(key) {
                record.set_dependents_invalidated();
            }
        }

        for child in self.children() {
            if child.local_record(key).is_some_and(|r| r.is_registered()) {
                continue;
            }
            child.invalidate_inner(key, &mut HashSet::new(), false);
        }
    }

    /// A record was added or changed
    pub(crate) fn announce(&self, record: &Rc<ServiceRecord>) {
        if record.list_of().is_some() {
            return;
        }
        self.invalidate_lists();
        self.0.notifier.announce(record);
    }
}
