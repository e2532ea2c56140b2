//! pbj is a single threaded dependency injection registry with lazy, self invalidating
//! services.
//!
//! Services are registered under keys in a [Context]. Resolving a key builds the service
//! once and caches it; every key read while a service is being built becomes one of its
//! dependencies, and changing a dependency invalidates everything built on top of it.
//!
//! pbj is split into three major parts:
//! 1. Keys: [PbjKey] for named services, [TypeKey] for types which build themselves
//! 2. Context: registration through [ServiceHandle], resolution, invalidation
//! 3. Pbj<T>: a lazy handle which builds its service on first access
//!
//! # Examples
//!
//! ```rust
//! use std::rc::Rc;
//! use pbj::{pbj_key, Context, DynError};
//!
//! let ctx = Context::new();
//! let host = pbj_key::<String>("host");
//! let port = pbj_key::<u16>("port");
//! let url = pbj_key::<String>("url");
//!
//! ctx.register(&host).with_value("localhost".to_string());
//! ctx.register(&port).with_value(8080);
//! let (h, p) = (host.clone(), port.clone());
//! ctx.register(&url).with_factory(move |r| {
//!     let host: Rc<String> = r.resolve(&h)?;
//!     let port: Rc<u16> = r.resolve(&p)?;
//!     Ok::<_, DynError>(format!("http://{host}:{port}"))
//! });
//!
//! assert_eq!(*ctx.resolve(&url).unwrap(), "http://localhost:8080");
//!
//! // Changing a dependency rebuilds the dependents on their next read
//! ctx.register(&port).with_value(9090);
//! assert_eq!(*ctx.resolve(&url).unwrap(), "http://localhost:9090");
//! ```

mod builder;
mod container;
mod dependency_graph;
mod errors;
mod factories;
mod handle;
mod initiator;
mod invocation;
mod key;
mod logger;
mod notify;
mod path;
mod pending;
mod record;
mod resolver;
#[cfg(feature = "scoped")]
mod scope;
mod types;

pub use builder::ContextBuilder;
pub use container::Context;
pub use dependency_graph::{DependencyGraphError, DependencyGraphErrors, ServiceSnapshot, Visit};
pub use errors::PbjError;
pub use factories::{Construct, FactoryKind};
pub use handle::{Next, ServiceHandle};
pub use invocation::{NextFn, Resolution};
pub use key::{
    as_string, function_name, key_of, pbj_key, type_key, AsKey, FnKey, KeyId, Named, PbjKey,
    ServiceKey, TypeKey,
};
pub use logger::{format_template, logger_key, Logger, TracingLogger};
pub use notify::Subscription;
pub use pending::{AsyncPending, PendingOp};
pub use record::ServiceRecord;
pub use resolver::{Arg, ListLike, ListOf, Pbj, ProxyState, Resolver};
#[cfg(feature = "scoped")]
pub use scope::Scoped;
pub use types::{DynError, Injectable, Instance, TypeInfo};
