use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use indexmap::IndexSet;

use crate::{
    container::{Context, ContextInner},
    errors::PbjError,
    factories::{FactoryKind, Service},
    initiator::Initializer,
    invocation::{Discovered, Interceptor},
    key::KeyId,
    pending::PendingOp,
    resolver::Arg,
    types::{Instance, TypeInfo},
};

/// Mutable registry entry of one key
///
/// Records are created on first registration or access and live as long as their context.
/// Invalidation never removes a record, it only drops the cached instance.
pub struct ServiceRecord {
    key: KeyId,
    pub(crate) state: RefCell<RecordState>,
    context: Weak<ContextInner>,
}

pub(crate) struct RecordState {
    pub service: Service,
    pub args: Vec<Arg>,
    pub cacheable: bool,
    pub optional: bool,
    pub tags: Vec<KeyId>,
    pub dependencies: IndexSet<KeyId>,
    /// Dependencies only ever held as lazy handles
    pub lazy: IndexSet<KeyId>,
    pub invalid: bool,
    pub invoked: bool,
    /// Invalidated without its dependents being invalidated too
    pub dependents_stale: bool,
    /// Bumped on every invalidation, async results of an older epoch are dropped
    pub epoch: u64,
    /// Present iff `invoked && !invalid && cacheable`
    pub cached: Option<Option<Instance>>,
    /// Outcome of a finished async invocation of a non cacheable record, kept for the
    /// running async resolutions
    pub settled: Option<Result<Option<Instance>, PbjError>>,
    pub pending: Option<PendingOp>,
    pub error: Option<PbjError>,
    pub initializer: Option<Rc<Initializer>>,
    pub interceptors: Vec<Interceptor>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub list_of: Option<KeyId>,
    pub array: bool,
    pub primitive: bool,
}

impl RecordState {
    fn mark_invalid(&mut self) {
        self.invalid = true;
        self.invoked = false;
        self.cached = None;
        self.settled = None;
        self.pending = None;
        self.epoch += 1;
        if let Some(initializer) = &self.initializer {
            initializer.invalidate();
        }
    }
}

impl ServiceRecord {
    pub(crate) fn new(key: KeyId, context: Weak<ContextInner>) -> Self {
        ServiceRecord {
            key,
            context,
            state: RefCell::new(RecordState {
                service: Service::Unset,
                args: Vec::new(),
                cacheable: true,
                optional: false,
                tags: Vec::new(),
                dependencies: IndexSet::new(),
                lazy: IndexSet::new(),
                invalid: true,
                invoked: false,
                dependents_stale: false,
                epoch: 0,
                cached: None,
                settled: None,
                pending: None,
                error: None,
                initializer: None,
                interceptors: Vec::new(),
                name: None,
                description: None,
                list_of: None,
                array: false,
                primitive: false,
            }),
        }
    }

    pub fn key(&self) -> &KeyId {
        &self.key
    }

    /// Display name, the configured name or the key's name
    pub fn name(&self) -> String {
        self.state
            .borrow()
            .name
            .clone()
            .unwrap_or_else(|| self.key.name().to_string())
    }

    pub fn description(&self) -> Option<String> {
        self.state.borrow().description.clone()
    }

    pub(crate) fn context(&self) -> Option<Context> {
        self.context.upgrade().map(Context)
    }

    pub fn cacheable(&self) -> bool {
        self.state.borrow().cacheable
    }

    pub fn optional(&self) -> bool {
        self.state.borrow().optional
    }

    /// False for plain values, which are handed out verbatim
    pub fn invokable(&self) -> bool {
        self.state.borrow().service.is_invokable()
    }

    pub fn is_registered(&self) -> bool {
        !matches!(self.state.borrow().service, Service::Unset)
    }

    pub fn is_constructor(&self) -> bool {
        matches!(
            &self.state.borrow().service,
            Service::Factory(factory) if factory.kind == FactoryKind::Constructor
        )
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self.state.borrow().service, Service::Scoped)
    }

    pub fn invoked(&self) -> bool {
        self.state.borrow().invoked
    }

    pub fn invalid(&self) -> bool {
        self.state.borrow().invalid
    }

    pub fn is_cached(&self) -> bool {
        self.state.borrow().cached.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().pending.is_some()
    }

    pub fn is_primitive(&self) -> bool {
        self.state.borrow().primitive
    }

    pub fn is_array(&self) -> bool {
        self.state.borrow().array
    }

    /// The tag this record lists, for records created by [Context::list_of]
    pub fn list_of(&self) -> Option<KeyId> {
        self.state.borrow().list_of.clone()
    }

    /// Type the service produces, if known
    pub fn provides(&self) -> Option<TypeInfo> {
        self.state.borrow().service.provides()
    }

    pub fn tags(&self) -> Vec<KeyId> {
        self.state.borrow().tags.clone()
    }

    pub fn has_tag(&self, tag: &KeyId) -> bool {
        self.state.borrow().tags.contains(tag)
    }

    pub fn args(&self) -> Vec<Arg> {
        self.state.borrow().args.clone()
    }

    /// Keys touched during invocations, and key arguments
    pub fn dependencies(&self) -> Vec<KeyId> {
        self.state.borrow().dependencies.iter().cloned().collect()
    }

    pub fn depends_on(&self, key: &KeyId) -> bool {
        self.state.borrow().dependencies.contains(key)
    }

    /// Last invocation failure, cleared by the next success
    pub fn error(&self) -> Option<PbjError> {
        self.state.borrow().error.clone()
    }

    pub fn initializer_method(&self) -> Option<String> {
        self.state
            .borrow()
            .initializer
            .as_ref()
            .map(|init| init.method().to_string())
    }

    /// Records a dependency, a record never depends on itself
    pub fn add_dependency(&self, key: &KeyId) -> bool {
        if key == &self.key {
            return false;
        }
        self.state.borrow_mut().dependencies.insert(key.clone())
    }

    /// Dependencies held as lazy handles, they don't force construction order
    pub fn lazy_dependencies(&self) -> Vec<KeyId> {
        self.state.borrow().lazy.iter().cloned().collect()
    }

    pub(crate) fn merge_dependencies(&self, discovered: Discovered) {
        let mut state = self.state.borrow_mut();
        for key in discovered.all {
            if key == self.key {
                continue;
            }
            if discovered.lazy.contains(&key) {
                if state.dependencies.insert(key.clone()) {
                    state.lazy.insert(key);
                }
            } else {
                state.lazy.shift_remove(&key);
                state.dependencies.insert(key);
            }
        }
    }

    /// Drops the cached instance of this record only
    ///
    /// Dependents are left untouched until the record is fetched for registration again.
    pub(crate) fn mark_invalid(&self) {
        let mut state = self.state.borrow_mut();
        state.mark_invalid();
        state.dependents_stale = true;
    }

    /// True when the record was invalidated on its own and dependents may still be cached
    pub(crate) fn dependents_stale(&self) -> bool {
        self.state.borrow().dependents_stale
    }

    pub(crate) fn set_dependents_invalidated(&self) {
        self.state.borrow_mut().dependents_stale = false;
    }

    /// Invalidates the record and everything depending on it
    pub fn invalidate(&self) {
        match self.context() {
            Some(context) => context.invalidate(&self.key),
            None => self.mark_invalid(),
        }
    }

    pub(crate) fn set_service(self: &Rc<Self>, service: Service) {
        {
            let mut state = self.state.borrow_mut();
            if state.service.same(&service) {
                return;
            }
            state.primitive = match &service {
                Service::Value(Some(instance)) => instance.is_primitive(),
                _ => false,
            };
            state.service = service;
        }

        tracing::trace!("Service of '{}' changed", self.key);
        self.invalidate();
        self.announce();
    }

    pub(crate) fn set_args(&self, args: Vec<Arg>) {
        {
            let mut state = self.state.borrow_mut();
            let unchanged = state.args.len() == args.len()
                && state.args.iter().zip(&args).all(|(a, b)| a.same(b));
            if unchanged {
                return;
            }

            for arg in &args {
                if let Arg::Key(key) = arg {
                    if key != &self.key {
                        state.dependencies.insert(key.clone());
                    }
                }
            }
            state.args = args;
        }

        self.invalidate();
    }

    pub(crate) fn set_cacheable(&self, cacheable: bool) {
        if std::mem::replace(&mut self.state.borrow_mut().cacheable, cacheable) != cacheable {
            self.invalidate();
        }
    }

    pub(crate) fn set_optional(&self, optional: bool) {
        if std::mem::replace(&mut self.state.borrow_mut().optional, optional) != optional {
            self.invalidate();
        }
    }

    pub(crate) fn set_tags(self: &Rc<Self>, tags: Vec<KeyId>) {
        {
            let mut state = self.state.borrow_mut();
            if state.tags == tags {
                return;
            }
            state.tags = tags;
        }

        self.invalidate();
        self.announce();
    }

    pub(crate) fn set_interceptors(&self, interceptors: Vec<Interceptor>) {
        self.state.borrow_mut().interceptors = interceptors;
        self.invalidate();
    }

    pub(crate) fn push_interceptor(&self, interceptor: Interceptor) {
        self.state.borrow_mut().interceptors.push(interceptor);
        self.invalidate();
    }

    pub(crate) fn set_initializer(&self, initializer: Initializer) {
        self.state.borrow_mut().initializer = Some(Rc::new(initializer));
        self.invalidate();
    }

    pub(crate) fn set_name(&self, name: &str) {
        self.state.borrow_mut().name = Some(name.to_string());
    }

    pub(crate) fn set_description(&self, description: &str) {
        self.state.borrow_mut().description = Some(description.to_string());
    }

    pub(crate) fn set_array(&self, array: bool) {
        self.state.borrow_mut().array = array;
    }

    pub(crate) fn set_list_of(&self, tag: KeyId) {
        self.state.borrow_mut().list_of = Some(tag);
    }

    fn announce(self: &Rc<Self>) {
        if let Some(context) = self.context() {
            context.announce(self);
        }
    }
}

impl std::fmt::Debug for ServiceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ServiceRecord")
            .field("key", &self.key)
            .field("invokable", &state.service.is_invokable())
            .field("cacheable", &state.cacheable)
            .field("optional", &state.optional)
            .field("invoked", &state.invoked)
            .field("invalid", &state.invalid)
            .field("epoch", &state.epoch)
            .field("dependencies", &state.dependencies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(name: &str) -> Rc<ServiceRecord> {
        Rc::new(ServiceRecord::new(KeyId::symbol(name), Weak::new()))
    }

    #[test]
    fn never_depends_on_itself() {
        let record = detached("self");
        assert!(!record.add_dependency(&record.key().clone()));
        assert!(record.dependencies().is_empty());

        let other = KeyId::symbol("other");
        assert!(record.add_dependency(&other));
        assert!(!record.add_dependency(&other));
        assert_eq!(record.dependencies(), vec![other]);
    }

    #[test]
    fn key_arguments_become_dependencies() {
        let record = detached("consumer");
        let dep = KeyId::symbol("dep");
        record.set_args(vec![
            Arg::Key(dep.clone()),
            Arg::Key(record.key().clone()),
            Arg::value(5_u8),
        ]);
        assert_eq!(record.dependencies(), vec![dep]);
        assert_eq!(record.args().len(), 3);
    }

    #[test]
    fn invalidation_starts_a_new_epoch() {
        let record = detached("epoch");
        assert!(!record.dependents_stale());

        record.mark_invalid();
        record.mark_invalid();
        let state = record.state.borrow();
        assert_eq!(state.epoch, 2);
        assert!(state.pending.is_none());
        assert!(state.dependents_stale);
    }

    #[test]
    fn fresh_records_are_invalid_and_uncached() {
        let record = detached("fresh");
        assert!(record.invalid());
        assert!(!record.invoked());
        assert!(!record.is_cached());
        assert!(record.cacheable());
        assert!(!record.optional());
        assert!(!record.is_registered());
    }
}
