use std::{any::type_name, marker::PhantomData, rc::Rc};

use indexmap::IndexSet;

use crate::{
    container::Context,
    errors::PbjError,
    factories::{Factory, Service},
    key::{AsKey, KeyId, ServiceKey},
    resolver::Pbj,
    types::{Injectable, Instance, TypeInfo},
};

/// Live list of every service carrying a tag, in registration order
///
/// Registering, retagging or replacing a service invalidates the list, so the next read
/// reflects the current registry.
pub struct ListOf<T> {
    tag: KeyId,
    items: Pbj<Vec<Instance>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ListOf<T> {
    fn clone(&self) -> Self {
        ListOf {
            tag: self.tag.clone(),
            items: self.items.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Injectable> ListOf<T> {
    pub fn tag(&self) -> &KeyId {
        &self.tag
    }

    /// Key of the list record itself
    pub fn key(&self) -> &KeyId {
        self.items.key()
    }

    /// The list as a lazy handle on the type erased values
    pub fn pbj(&self) -> &Pbj<Vec<Instance>> {
        &self.items
    }

    pub fn get(&self) -> Result<Vec<Rc<T>>, PbjError> {
        self.items
            .get()?
            .iter()
            .map(|instance| {
                instance
                    .downcast::<T>()
                    .map_err(|actual| PbjError::TypeMismatch {
                        key: self.tag.clone(),
                        required: type_name::<T>(),
                        actual,
                    })
            })
            .collect()
    }

    pub fn len(&self) -> Result<usize, PbjError> {
        self.items.len()
    }

    pub fn is_empty(&self) -> Result<bool, PbjError> {
        Ok(self.len()? == 0)
    }
}

impl<T> std::fmt::Debug for ListOf<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ListOf").field(&self.tag).finish()
    }
}

impl Context {
    /// Every service tagged with `tag`, or producing the type of a type key
    pub fn list_of<K: ServiceKey>(&self, tag: &K) -> ListOf<K::Output> {
        let tag = tag.key_id();
        let existing = self.0.lists.borrow().get(&tag).cloned();
        let list_key = match existing {
            Some(key) => key,
            None => self.create_list(&tag),
        };

        ListOf {
            tag,
            items: self.pbj_id(list_key),
            _marker: PhantomData,
        }
    }

    fn create_list(&self, tag: &KeyId) -> KeyId {
        let list_key = KeyId::symbol(&format!("listOf({tag})"));
        let record = self.record_id(&list_key);
        record.set_list_of(tag.clone());
        record.set_array(true);

        let members_of = tag.clone();
        record.set_service(Service::Factory(Factory::raw(
            TypeInfo::of::<Vec<Instance>>(),
            move |resolution| {
                let members = resolution.context().matching_records(&members_of);
                let mut items = Vec::with_capacity(members.len());
                for key in members {
                    if let Some(instance) = resolution.resolve_instance(&key)? {
                        items.push(instance);
                    }
                }
                Ok(Some(Instance::new(items)))
            },
        )));

        self.0
            .lists
            .borrow_mut()
            .insert(tag.clone(), list_key.clone());
        list_key
    }

    /// Keys of registered services matching a tag, parents first, in registration order
    pub(crate) fn matching_records(&self, tag: &KeyId) -> Vec<KeyId> {
        let mut keys = IndexSet::new();
        self.collect_matching(tag, &mut keys);
        keys.into_iter().collect()
    }

    fn collect_matching(&self, tag: &KeyId, keys: &mut IndexSet<KeyId>) {
        if let Some(parent) = &self.0.parent {
            parent.collect_matching(tag, keys);
        }

        let tag_type = tag.type_id();
        for record in self.0.table.borrow().values() {
            if record.list_of().is_some() || !record.is_registered() {
                continue;
            }

            let by_type = tag_type.is_some()
                && record.provides().map(|info| info.type_id) == tag_type;
            if by_type || record.has_tag(tag) {
                keys.insert(record.key().clone());
            }
        }
    }

    /// Drops every cached list, called when services are added or changed
    pub(crate) fn invalidate_lists(&self) {
        let lists: Vec<KeyId> = self.0.lists.borrow().values().cloned().collect();
        for list in lists {
            self.invalidate(&list);
        }

        for child in self.children() {
            child.invalidate_lists();
        }
    }
}
