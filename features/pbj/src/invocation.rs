//! Invocation engine
//!
//! Turns a record into a value: plain values are handed out, cached instances are reused,
//! everything else runs the factory inside a resolution frame. Keys resolved while a frame is
//! on top of the [Tracker] become dependencies of the record owning the frame.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use futures::{future::LocalBoxFuture, FutureExt};
use indexmap::IndexSet;

use crate::{
    container::Context,
    errors::PbjError,
    factories::{Factory, Produced, Service},
    key::{AsKey, KeyId, ServiceKey},
    pending::{AsyncPending, PendingOp},
    record::ServiceRecord,
    resolver::{Arg, Pbj, Resolver},
    types::Instance,
};

/// Continuation handed to interceptors
pub type NextFn<'a> = dyn FnMut() -> Result<Option<Instance>, PbjError> + 'a;

/// Type erased interceptor, wraps one invocation of a record
pub(crate) type Interceptor =
    Rc<dyn Fn(&KeyId, &mut NextFn<'_>) -> Result<Option<Instance>, PbjError>>;

struct Frame {
    record: Rc<ServiceRecord>,
    discovered: IndexSet<KeyId>,
    /// Keys only reached through lazy handles so far
    lazy: IndexSet<KeyId>,
}

/// Keys touched by one construction
pub(crate) struct Discovered {
    pub all: IndexSet<KeyId>,
    pub lazy: IndexSet<KeyId>,
}

/// Stack of records under construction, shared by a context and its children
#[derive(Default)]
pub(crate) struct Tracker {
    frames: RefCell<Vec<Frame>>,
    /// Number of running async resolutions
    passes: Cell<usize>,
    /// Non cacheable records holding a settled outcome for the running async resolutions
    settled: RefCell<Vec<Weak<ServiceRecord>>>,
}

impl Tracker {
    /// Opens a frame, failing when the record is already under construction
    fn enter(&self, record: &Rc<ServiceRecord>) -> Result<(), PbjError> {
        let mut frames = self.frames.borrow_mut();
        if let Some(position) = frames.iter().position(|f| Rc::ptr_eq(&f.record, record)) {
            let mut chain: Vec<KeyId> = frames[position..]
                .iter()
                .map(|f| f.record.key().clone())
                .collect();
            chain.push(record.key().clone());
            return Err(PbjError::Circular {
                key: record.key().clone(),
                chain,
            });
        }

        frames.push(Frame {
            record: record.clone(),
            discovered: IndexSet::new(),
            lazy: IndexSet::new(),
        });
        Ok(())
    }

    fn exit(&self) -> Discovered {
        match self.frames.borrow_mut().pop() {
            Some(frame) => Discovered {
                all: frame.discovered,
                lazy: frame.lazy,
            },
            None => Discovered {
                all: IndexSet::new(),
                lazy: IndexSet::new(),
            },
        }
    }

    /// Records `key` as a dependency of the record currently under construction
    pub fn track(&self, key: &KeyId) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            if frame.record.key() != key {
                frame.discovered.insert(key.clone());
                frame.lazy.shift_remove(key);
            }
        }
    }

    /// Records a dependency which is held as a lazy handle and not read yet
    pub fn track_lazy(&self, key: &KeyId) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            if frame.record.key() != key && frame.discovered.insert(key.clone()) {
                frame.lazy.insert(key.clone());
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Starts an async resolution, settled outcomes are kept until the last one ends
    pub fn begin_pass(self: &Rc<Self>) -> AsyncPass {
        self.passes.set(self.passes.get() + 1);
        AsyncPass {
            tracker: self.clone(),
        }
    }

    fn in_pass(&self) -> bool {
        self.passes.get() > 0
    }

    fn keep_settled(&self, record: &Rc<ServiceRecord>) {
        self.settled.borrow_mut().push(Rc::downgrade(record));
    }

    fn end_pass(&self) {
        let passes = self.passes.get().saturating_sub(1);
        self.passes.set(passes);
        if passes > 0 {
            return;
        }

        let records = std::mem::take(&mut *self.settled.borrow_mut());
        for record in records.iter().filter_map(Weak::upgrade) {
            record.state.borrow_mut().settled = None;
        }
    }
}

/// Guard of one running async resolution
pub(crate) struct AsyncPass {
    tracker: Rc<Tracker>,
}

impl Drop for AsyncPass {
    fn drop(&mut self) {
        self.tracker.end_pass();
    }
}

impl ServiceRecord {
    /// Resolves the record to its current value
    pub(crate) fn invoke(self: &Rc<Self>) -> Result<Option<Instance>, PbjError> {
        let context = self.context().ok_or_else(|| PbjError::ContextDropped {
            key: self.key().clone(),
        })?;
        context.tracker().track(self.key());

        let interceptors = self.state.borrow().interceptors.clone();
        if interceptors.is_empty() {
            return self.invoke_core(&context);
        }

        run_chain(self.key(), &interceptors, &mut || self.invoke_core(&context))
    }

    fn invoke_core(self: &Rc<Self>, context: &Context) -> Result<Option<Instance>, PbjError> {
        let in_pass = context.tracker().in_pass();
        let (factory, args) = {
            let mut state = self.state.borrow_mut();
            if let Some(pending) = &state.pending {
                return Err(AsyncPending {
                    key: self.key().clone(),
                    pending: pending.clone(),
                }
                .into());
            }
            // Outside of async resolutions a settled outcome is handed out once
            let settled = if in_pass {
                state.settled.clone()
            } else {
                state.settled.take()
            };
            if let Some(settled) = settled {
                return settled;
            }

            let factory = match &state.service {
                Service::Unset => {
                    return Err(PbjError::Unregistered {
                        key: self.key().clone(),
                    })
                }
                Service::Value(value) if state.args.is_empty() => return Ok(value.clone()),
                Service::Value(_) => {
                    return Err(PbjError::NotInvokable {
                        key: self.key().clone(),
                    })
                }
                Service::Factory(factory) => Some(factory.clone()),
                Service::Scoped => None,
            };

            if state.invoked && !state.invalid && state.cacheable {
                if let Some(cached) = &state.cached {
                    return Ok(cached.clone());
                }
            }

            (factory, state.args.clone())
        };

        match factory {
            Some(factory) => self.construct(context, &factory, &args),
            None => self.invoke_scoped(),
        }
    }

    fn construct(
        self: &Rc<Self>,
        context: &Context,
        factory: &Factory,
        args: &[Arg],
    ) -> Result<Option<Instance>, PbjError> {
        let initializer = self.state.borrow().initializer.clone();
        if let Some(initializer) = &initializer {
            initializer.invalidate();
        }

        let tracker = context.tracker();
        tracker.enter(self)?;
        let produced = factory.call(&Resolution {
            context,
            record: self,
            args,
        });
        let discovered = tracker.exit();
        self.merge_dependencies(discovered);

        match produced {
            Ok(Produced::Ready(value)) => self.finish(value),
            Ok(Produced::Pending(fut)) => Err(self.start_pending(fut).into()),
            Err(error) => Err(self.fail(error)),
        }
    }

    #[cfg(feature = "scoped")]
    fn invoke_scoped(self: &Rc<Self>) -> Result<Option<Instance>, PbjError> {
        let value = crate::scope::current_override(self.key())?;
        self.finish(value)
    }

    #[cfg(not(feature = "scoped"))]
    fn invoke_scoped(self: &Rc<Self>) -> Result<Option<Instance>, PbjError> {
        Err(PbjError::ScopeConflict {
            key: self.key().clone(),
            reason: "scoping support is not enabled",
        })
    }

    /// Stores a successful result and runs the initializer
    fn finish(&self, value: Option<Instance>) -> Result<Option<Instance>, PbjError> {
        let initializer = {
            let mut state = self.state.borrow_mut();
            state.error = None;
            state.primitive = value.as_ref().is_some_and(Instance::is_primitive);

            if value.is_none() && !state.optional {
                let error = PbjError::NonOptionalNull {
                    key: self.key().clone(),
                };
                state.error = Some(error.clone());
                state.invalid = true;
                state.invoked = false;
                state.cached = None;
                return Err(error);
            }

            state.invoked = true;
            state.invalid = false;
            state.cached = state.cacheable.then(|| value.clone());
            state.initializer.clone()
        };

        if let (Some(initializer), Some(instance)) = (initializer, &value) {
            if let Err(error) = initializer.invoke(self.key(), instance) {
                return Err(self.fail(error));
            }
        }

        Ok(value)
    }

    /// Records a failure, the record stays invalid and the next call retries
    fn fail(&self, error: PbjError) -> PbjError {
        if error.is_async_pending() {
            return error;
        }

        tracing::debug!("Invocation of '{}' failed: {}", self.key(), error);
        let mut state = self.state.borrow_mut();
        state.error = Some(error.clone());
        state.invalid = true;
        state.invoked = false;
        state.cached = None;
        if let Some(initializer) = &state.initializer {
            initializer.invalidate();
        }
        error
    }

    fn start_pending(
        self: &Rc<Self>,
        fut: LocalBoxFuture<'static, Result<Option<Instance>, PbjError>>,
    ) -> AsyncPending {
        let record = Rc::downgrade(self);
        let epoch = self.state.borrow().epoch;
        let op: PendingOp = async move {
            let result = fut.await;
            match record.upgrade() {
                Some(record) => record.complete_pending(epoch, result),
                None => result,
            }
        }
        .boxed_local()
        .shared();

        tracing::debug!("'{}' is pending async resolution", self.key());
        self.state.borrow_mut().pending = Some(op.clone());
        AsyncPending {
            key: self.key().clone(),
            pending: op,
        }
    }

    /// Stores the outcome of an async factory
    ///
    /// An outcome from before the last invalidation is dropped and settles with no value, so
    /// waiters retry against the current registration.
    fn complete_pending(
        self: &Rc<Self>,
        epoch: u64,
        result: Result<Option<Instance>, PbjError>,
    ) -> Result<Option<Instance>, PbjError> {
        {
            let mut state = self.state.borrow_mut();
            if state.epoch != epoch {
                tracing::debug!("Dropping outdated async result of '{}'", self.key());
                return Ok(None);
            }
            state.pending = None;
        }

        let outcome = match result {
            Ok(value) => self.finish(value),
            Err(error) => Err(self.fail(error)),
        };

        if !self.cacheable() {
            self.state.borrow_mut().settled = Some(outcome.clone());
            if let Some(context) = self.context() {
                context.tracker().keep_settled(self);
            }
        }
        outcome
    }
}

pub(crate) fn interceptor<F>(f: F) -> Interceptor
where
    F: Fn(&KeyId, &mut NextFn<'_>) -> Result<Option<Instance>, PbjError> + 'static,
{
    Rc::new(f)
}

fn run_chain(
    key: &KeyId,
    chain: &[Interceptor],
    core: &mut NextFn<'_>,
) -> Result<Option<Instance>, PbjError> {
    match chain.split_first() {
        None => core(),
        Some((head, rest)) => head(key, &mut || run_chain(key, rest, core)),
    }
}

/// What a factory sees of the registry while it runs
///
/// Everything resolved through a resolution is recorded as a dependency of the service
/// being built.
pub struct Resolution<'a> {
    context: &'a Context,
    record: &'a Rc<ServiceRecord>,
    args: &'a [Arg],
}

impl<'a> Resolution<'a> {
    /// Key of the service being built
    pub fn key(&self) -> &KeyId {
        self.record.key()
    }

    pub fn context(&self) -> &Context {
        self.context
    }

    pub fn args(&self) -> &[Arg] {
        self.args
    }

    /// Resolves the argument at `index`
    ///
    /// Key arguments are resolved through the registry, literal arguments are downcast.
    pub fn arg<R: Resolver>(&self, index: usize) -> Result<R, PbjError> {
        match self.args.get(index) {
            Some(Arg::Key(key)) => R::resolve(self, key),
            Some(Arg::Value(instance)) => R::from_value(self.key(), Some(instance.clone())),
            None => Err(PbjError::MissingArgument {
                key: self.key().clone(),
                index,
            }),
        }
    }

    /// Resolves any key into the requested shape
    pub fn get<R: Resolver>(&self, key: &impl AsKey) -> Result<R, PbjError> {
        R::resolve(self, &key.key_id())
    }

    pub fn resolve<K: ServiceKey>(&self, key: &K) -> Result<Rc<K::Output>, PbjError> {
        self.get(key)
    }

    /// A lazy handle, the key is recorded as a dependency right away
    pub fn pbj<K: ServiceKey>(&self, key: &K) -> Pbj<K::Output> {
        let id = key.key_id();
        self.context.tracker().track_lazy(&id);
        self.context.pbj_id(id)
    }

    pub fn resolve_instance(&self, key: &KeyId) -> Result<Option<Instance>, PbjError> {
        self.context.invoke_key(key)
    }

    pub fn track(&self, key: &KeyId) {
        self.context.tracker().track(key);
    }
}
