//! Async resolution protocol
//!
//! Invocation is synchronous. When a factory hands back a future, the record keeps a shared
//! handle to it and every synchronous caller receives an [AsyncPending] signal carrying that
//! handle. [Context::resolve_async] awaits the carried operation and retries.

use std::{rc::Rc, task::Poll};

use futures::future::{poll_fn, LocalBoxFuture, Shared};

use crate::{
    container::Context,
    errors::PbjError,
    key::{KeyId, ServiceKey},
    resolver::Arg,
    types::Instance,
};

/// The memoized operation of a pending record, every waiter observes the same outcome
pub type PendingOp = Shared<LocalBoxFuture<'static, Result<Option<Instance>, PbjError>>>;

/// Signal raised by synchronous resolution while an async factory is still running
#[derive(thiserror::Error, Clone)]
#[error("'{key}' is pending async resolution - please use the async resolution entry point (`resolve_async`)")]
pub struct AsyncPending {
    pub key: KeyId,
    pub pending: PendingOp,
}

impl std::fmt::Debug for AsyncPending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPending")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl AsyncPending {
    /// Waits for the pending operation to settle
    ///
    /// An operation whose record was invalidated while it ran settles with no value.
    pub async fn wait(&self) -> Result<Option<Instance>, PbjError> {
        self.pending.clone().await
    }
}

impl Context {
    /// Resolves a service, awaiting any async factory on the way
    pub async fn resolve_async<K: ServiceKey>(&self, key: &K) -> Result<Rc<K::Output>, PbjError> {
        let id = key.key_id();
        let instance = self.invoke_async(&id).await?;
        self.require_value(&id, instance)
    }

    /// Registers `args` on the key, then resolves it asynchronously
    pub async fn resolve_async_with<K: ServiceKey>(
        &self,
        key: &K,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<Rc<K::Output>, PbjError> {
        self.register_with(key, args);
        self.resolve_async(key).await
    }

    /// Invokes until no dependency is pending anymore
    ///
    /// Outcomes of non cacheable async services stay readable until the resolution ends, so a
    /// factory reading one of them twice sees the same value.
    pub(crate) async fn invoke_async(&self, id: &KeyId) -> Result<Option<Instance>, PbjError> {
        let _pass = self.0.tracker.begin_pass();
        let mut awaited: Option<PendingOp> = None;

        loop {
            match self.invoke_key(id) {
                Err(PbjError::AsyncPending(signal)) => {
                    if awaited.as_ref().is_some_and(|op| op.ptr_eq(&signal.pending)) {
                        return Err(PbjError::Stalled {
                            key: id.clone(),
                            pending: signal.key,
                        });
                    }

                    tracing::debug!(
                        "Resolution of '{}' waits on pending '{}'",
                        id,
                        signal.key
                    );
                    // A rejected dependency ends the resolution
                    signal.wait().await?;
                    awaited = Some(signal.pending);
                    yield_now().await;
                }
                other => return other,
            }
        }
    }
}

/// Hands control back to the executor once
async fn yield_now() {
    let mut yielded = false;
    poll_fn(|cx| {
        if yielded {
            return Poll::Ready(());
        }
        yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    })
    .await
}
