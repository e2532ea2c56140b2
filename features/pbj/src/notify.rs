//! Service added notifications
//!
//! Registrations are queued while they happen and delivered by
//! [Context::flush_notifications], so listeners never run in the middle of a registration
//! chain. Nothing is queued without listeners and a record is queued at most once until the
//! next flush. Streams receive keys right away.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::{Rc, Weak},
};

use futures_channel::mpsc;

use crate::{
    container::{Context, ContextInner},
    key::KeyId,
    record::ServiceRecord,
    types::DynError,
};

type ListenerFn = dyn Fn(&ServiceRecord) -> Result<(), DynError>;

struct Listener {
    id: u64,
    /// Only entries queued after subscribing are delivered
    since: u64,
    callback: Rc<ListenerFn>,
}

struct Queued {
    seq: u64,
    record: Weak<ServiceRecord>,
    /// Replays of existing services go to the subscribing listener only
    target: Option<u64>,
}

#[derive(Default)]
pub(crate) struct Notifier {
    listeners: RefCell<Vec<Listener>>,
    queue: RefCell<VecDeque<Queued>>,
    streams: RefCell<Vec<mpsc::UnboundedSender<KeyId>>>,
    seq: Cell<u64>,
    next_id: Cell<u64>,
}

impl Notifier {
    fn next_seq(&self) -> u64 {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        seq
    }

    pub fn announce(&self, record: &Rc<ServiceRecord>) {
        let seq = self.next_seq();
        if !self.listeners.borrow().is_empty() {
            let weak = Rc::downgrade(record);
            let mut queue = self.queue.borrow_mut();
            // A later announcement reaches every listener the earlier one did
            queue.retain(|queued| queued.target.is_some() || !queued.record.ptr_eq(&weak));
            queue.push_back(Queued {
                seq,
                record: weak,
                target: None,
            });
        }

        self.streams
            .borrow_mut()
            .retain(|sender| sender.unbounded_send(record.key().clone()).is_ok());
    }

    fn subscribe(&self, callback: Rc<ListenerFn>) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            since: self.seq.get(),
            callback,
        });
        id
    }

    fn replay(&self, id: u64, records: Vec<Rc<ServiceRecord>>) {
        let mut queue = self.queue.borrow_mut();
        for record in records {
            let seq = self.seq.get();
            queue.push_back(Queued {
                seq,
                record: Rc::downgrade(&record),
                target: Some(id),
            });
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut listeners = self.listeners.borrow_mut();
        listeners.retain(|listener| listener.id != id);

        let mut queue = self.queue.borrow_mut();
        if listeners.is_empty() {
            queue.clear();
        } else {
            queue.retain(|queued| queued.target != Some(id));
        }
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    fn receivers(&self, queued: &Queued) -> Vec<Rc<ListenerFn>> {
        self.listeners
            .borrow()
            .iter()
            .filter(|listener| match queued.target {
                Some(target) => listener.id == target,
                None => listener.since < queued.seq,
            })
            .map(|listener| listener.callback.clone())
            .collect()
    }
}

/// Handle of a registered listener
#[derive(Debug)]
pub struct Subscription {
    context: Weak<ContextInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(context) = self.context.upgrade() {
            context.notifier.unsubscribe(self.id);
        }
    }
}

impl Context {
    /// Calls `listener` for every service registered from now on
    ///
    /// With `notify_existing` the services already registered in this context are delivered
    /// too. Calls happen during [Context::flush_notifications]. A failing listener is logged
    /// and doesn't affect other listeners.
    pub fn on_service_added<E, F>(&self, listener: F, notify_existing: bool) -> Subscription
    where
        E: Into<DynError>,
        F: Fn(&ServiceRecord) -> Result<(), E> + 'static,
    {
        let notifier = &self.0.notifier;
        let id = notifier.subscribe(Rc::new(
            move |record: &ServiceRecord| -> Result<(), DynError> {
                listener(record).map_err(Into::into)
            },
        ));

        if notify_existing {
            let existing = self
                .0
                .table
                .borrow()
                .values()
                .filter(|record| record.is_registered() && record.list_of().is_none())
                .cloned()
                .collect();
            notifier.replay(id, existing);
        }

        Subscription {
            context: Rc::downgrade(&self.0),
            id,
        }
    }

    /// Keys of services registered from now on, sent as they are registered
    pub fn service_added_stream(&self) -> mpsc::UnboundedReceiver<KeyId> {
        let (sender, receiver) = mpsc::unbounded();
        self.0.notifier.streams.borrow_mut().push(sender);
        receiver
    }

    /// Delivers queued notifications, returns the number of listener calls
    pub fn flush_notifications(&self) -> usize {
        let notifier = &self.0.notifier;
        let mut delivered = 0;

        loop {
            let Some(queued) = notifier.queue.borrow_mut().pop_front() else {
                break;
            };
            let Some(record) = queued.record.upgrade() else {
                continue;
            };

            for listener in notifier.receivers(&queued) {
                delivered += 1;
                if let Err(error) = listener(&record) {
                    tracing::warn!(
                        "Service added listener failed for '{}': {}",
                        record.key(),
                        error
                    );
                }
            }
        }

        delivered
    }
}
