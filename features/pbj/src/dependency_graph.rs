//! Dependency graph traversal and diagnostics
//!
//! The graph is whatever the records discovered so far: keys resolved during construction
//! plus key arguments. Nothing here invokes a service.

use std::{collections::HashSet, rc::Rc};

use serde::Serialize;
use thiserror::Error;

use crate::{
    container::Context,
    errors::PbjError,
    key::{AsKey, KeyId},
    record::ServiceRecord,
    resolver::Arg,
};

/// What a visitor wants done with a record
///
/// The registry doesn't act on it, callers get every non `Continue` answer back and apply
/// their own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Destroy,
    Remove,
}

/// Serializable view of a record, related keys are given by name
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub description: Option<String>,
    pub cacheable: bool,
    pub optional: bool,
    pub invokable: bool,
    pub invoked: bool,
    pub invalid: bool,
    pub primitive: bool,
    pub array: bool,
    pub scoped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_of: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ServiceRecord> for ServiceSnapshot {
    fn from(record: &ServiceRecord) -> Self {
        let names = |keys: Vec<KeyId>| -> Vec<String> {
            keys.iter().map(|key| key.name().to_string()).collect()
        };
        ServiceSnapshot {
            name: record.name(),
            description: record.description(),
            cacheable: record.cacheable(),
            optional: record.optional(),
            invokable: record.invokable(),
            invoked: record.invoked(),
            invalid: record.invalid(),
            primitive: record.is_primitive(),
            array: record.is_array(),
            scoped: record.is_scoped(),
            list_of: record.list_of().map(|tag| tag.name().to_string()),
            tags: names(record.tags()),
            dependencies: names(record.dependencies()),
            args: record.args().iter().map(Arg::describe).collect(),
            error: record.error().map(|e| e.to_string()),
        }
    }
}

impl Context {
    /// Visits `key` and everything it depends on, dependencies first
    ///
    /// Each key is visited once, so cycles terminate. Returns the answers other than
    /// [Visit::Continue].
    pub fn visit<K, F>(&self, key: &K, mut f: F) -> Vec<(KeyId, Visit)>
    where
        K: AsKey + ?Sized,
        F: FnMut(&Rc<ServiceRecord>) -> Visit,
    {
        let mut seen = HashSet::new();
        let mut signals = Vec::new();
        self.visit_recurse(&key.key_id(), &mut seen, &mut f, &mut signals);
        signals
    }

    /// Visits every record of this context
    pub fn visit_all<F>(&self, mut f: F) -> Vec<(KeyId, Visit)>
    where
        F: FnMut(&Rc<ServiceRecord>) -> Visit,
    {
        let mut seen = HashSet::new();
        let mut signals = Vec::new();
        for key in self.keys() {
            self.visit_recurse(&key, &mut seen, &mut f, &mut signals);
        }
        signals
    }

    /// Visits the graphs rooted at `keys`, sharing one seen set
    pub fn visit_keys<F>(&self, keys: &[KeyId], mut f: F) -> Result<Vec<(KeyId, Visit)>, PbjError>
    where
        F: FnMut(&Rc<ServiceRecord>) -> Visit,
    {
        if keys.is_empty() {
            return Err(PbjError::InvalidArgument(
                "visit needs at least one key".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut signals = Vec::new();
        for key in keys {
            self.visit_recurse(key, &mut seen, &mut f, &mut signals);
        }
        Ok(signals)
    }

    fn visit_recurse<F>(
        &self,
        key: &KeyId,
        seen: &mut HashSet<KeyId>,
        f: &mut F,
        signals: &mut Vec<(KeyId, Visit)>,
    ) where
        F: FnMut(&Rc<ServiceRecord>) -> Visit,
    {
        if !seen.insert(key.clone()) {
            return;
        }
        let Some(record) = self.get_record(key) else {
            return;
        };

        for dependency in record.dependencies() {
            self.visit_recurse(&dependency, seen, f, signals);
        }

        let answer = f(&record);
        if answer != Visit::Continue {
            signals.push((key.clone(), answer));
        }
    }

    /// Snapshots of the records of this context, in registration order
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        let records: Vec<Rc<ServiceRecord>> = self.0.table.borrow().values().cloned().collect();
        records
            .iter()
            .map(|record| ServiceSnapshot::from(record.as_ref()))
            .collect()
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self.snapshot())
    }

    /// Validates the known graph
    ///
    /// Reports key arguments without a registered service, and cycles which don't pass
    /// through a lazy handle. Returns a list of all issues.
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = Vec::new();

        for key in self.keys() {
            let Some(record) = self.get_record(&key) else {
                continue;
            };
            if !record.is_registered() {
                continue;
            }

            for arg in record.args() {
                let Arg::Key(dependency) = arg else {
                    continue;
                };
                if !self
                    .get_record(&dependency)
                    .is_some_and(|r| r.is_registered())
                {
                    errors.push(DependencyGraphError::MissingDependency {
                        dependency: dependency.clone(),
                        required_by: key.clone(),
                    });
                }
            }

            let mut chain = Vec::new();
            self.check_recurse(&record, &mut checked, &mut errors, &mut chain);
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }
        Ok(())
    }

    fn check_recurse(
        &self,
        record: &Rc<ServiceRecord>,
        checked: &mut HashSet<KeyId>,
        errors: &mut Vec<DependencyGraphError>,
        chain: &mut Vec<KeyId>,
    ) {
        let key = record.key();
        if let Some(first) = chain.iter().position(|k| k == key) {
            let mut cycle = chain[first..].to_vec();
            cycle.push(key.clone());
            errors.push(DependencyGraphError::CircularDependency {
                from: cycle[cycle.len() - 2].clone(),
                to: key.clone(),
                chain: cycle,
            });
            return;
        }

        if !checked.insert(key.clone()) {
            return;
        }

        chain.push(key.clone());
        let lazy = record.lazy_dependencies();
        for dependency in record.dependencies() {
            if lazy.contains(&dependency) {
                continue;
            }
            if let Some(next) = self.get_record(&dependency) {
                self.check_recurse(&next, checked, errors, chain);
            }
        }
        chain.pop();
    }
}

#[derive(Error, Debug, Clone)]
pub enum DependencyGraphError {
    #[error("'{required_by}' needs '{dependency}' but it is missing")]
    MissingDependency {
        dependency: KeyId,
        required_by: KeyId,
    },
    #[error("A Circular Dependency exists between '{from}' and '{to}' through {chain:?} - Consider holding a `Pbj` handle")]
    CircularDependency {
        from: KeyId,
        to: KeyId,
        chain: Vec<KeyId>,
    },
}

#[derive(Error, Debug, Clone)]
pub struct DependencyGraphErrors {
    pub errors: Vec<DependencyGraphError>,
}

impl std::fmt::Display for DependencyGraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key::pbj_key, types::DynError};

    #[test]
    fn dependencies_are_visited_first() {
        let ctx = Context::new();
        let a = pbj_key::<u8>("a");
        let b = pbj_key::<u8>("b");
        let c = pbj_key::<u8>("c");
        ctx.register(&a).with_value(1);
        ctx.register(&b).with_factory(|r| r.arg::<Rc<u8>>(0).map(|a| *a + 1)).with_arg(&a);
        ctx.register(&c).with_factory(|r| r.arg::<Rc<u8>>(0).map(|b| *b + 1)).with_arg(&b);

        let mut order = Vec::new();
        let signals = ctx.visit(&c, |record| {
            order.push(record.name());
            if record.name() == "b" {
                Visit::Destroy
            } else {
                Visit::Continue
            }
        });

        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(signals, vec![(b.key_id(), Visit::Destroy)]);
    }

    #[test]
    fn empty_key_lists_are_rejected() {
        let ctx = Context::new();
        let err = ctx.visit_keys(&[], |_| Visit::Continue).unwrap_err();
        assert!(matches!(err, PbjError::InvalidArgument(_)));
    }

    #[test]
    fn missing_arguments_are_reported() {
        let ctx = Context::new();
        let missing = pbj_key::<u8>("missing");
        let user = pbj_key::<u8>("user");
        ctx.register(&user)
            .with_factory(|r| r.arg::<Rc<u8>>(0).map(|v| *v))
            .with_arg(&missing);

        let errors = ctx.check().unwrap_err();
        assert_eq!(errors.errors.len(), 1);
        assert_eq!(
            errors.to_string(),
            "The dependency graph had one or more errors:\n- 'user' needs 'missing' but it is missing"
        );
    }

    #[test]
    fn snapshots_name_their_relations() {
        let ctx = Context::new();
        let port = pbj_key::<u16>("port");
        let url = pbj_key::<String>("url");
        ctx.register(&port).with_value(80).with_description("listen port");
        let port_key = port.clone();
        ctx.register(&url)
            .with_factory(move |r| {
                let port = r.resolve(&port_key)?;
                Ok::<_, DynError>(format!("http://localhost:{port}"))
            })
            .with_tag(&port);
        ctx.resolve(&url).unwrap();

        let json = ctx.to_json().unwrap();
        let url_json = json
            .as_array()
            .unwrap()
            .iter()
            .find(|entry| entry["name"] == "url")
            .unwrap();
        assert_eq!(url_json["dependencies"], serde_json::json!(["port"]));
        assert_eq!(url_json["tags"], serde_json::json!(["port"]));
        assert_eq!(url_json["invoked"], true);
    }
}
