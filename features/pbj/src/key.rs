//! Key identity
//!
//! Every registrable service is addressed by a [KeyId]. Keys compare by identity only:
//! an allocated symbol number, or the `TypeId` of a type or function. The carried name is
//! for diagnostics and never takes part in lookups.

use std::{
    any::TypeId,
    borrow::Cow,
    collections::HashMap,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, LazyLock, Mutex,
    },
};

use crate::types::Injectable;

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);
static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(0);
static ANONYMOUS_NAMES: LazyLock<Mutex<HashMap<TypeId, Arc<str>>>> =
    LazyLock::new(Default::default);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeyKind {
    Symbol(u64),
    Type(TypeId),
    Function(TypeId),
}

/// Canonical identity of a service
#[derive(Clone)]
pub struct KeyId {
    kind: KeyKind,
    name: Arc<str>,
}

impl KeyId {
    /// Allocates a fresh symbol
    pub fn symbol(name: &str) -> Self {
        KeyId {
            kind: KeyKind::Symbol(NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
        }
    }

    /// Key of a type, the equivalent of a class reference
    pub fn of_type<T: Injectable + ?Sized>() -> Self {
        KeyId {
            kind: KeyKind::Type(TypeId::of::<T>()),
            name: short_type_name(std::any::type_name::<T>()).into(),
        }
    }

    /// Key of a function
    ///
    /// Every fn item and closure has its own type, so its `TypeId` identifies the function.
    pub fn of_fn<F: 'static>() -> Self {
        KeyId {
            kind: KeyKind::Function(TypeId::of::<F>()),
            name: function_name::<F>(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `TypeId` for type keys
    pub fn type_id(&self) -> Option<TypeId> {
        match self.kind {
            KeyKind::Type(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self.kind, KeyKind::Symbol(_))
    }
}

impl PartialEq for KeyId {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
impl Eq for KeyId {}
impl Hash for KeyId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state)
    }
}
impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
impl std::fmt::Debug for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            KeyKind::Symbol(id) => write!(f, "Symbol({}#{id})", self.name),
            KeyKind::Type(_) => write!(f, "Type({})", self.name),
            KeyKind::Function(_) => write!(f, "Fn({})", self.name),
        }
    }
}

/// Anything that canonicalizes to a [KeyId]
pub trait AsKey {
    fn key_id(&self) -> KeyId;
}

/// A key with a statically known value type
pub trait ServiceKey: AsKey {
    type Output: Injectable;
}

impl AsKey for KeyId {
    fn key_id(&self) -> KeyId {
        self.clone()
    }
}
impl<K: AsKey + ?Sized> AsKey for &K {
    fn key_id(&self) -> KeyId {
        (**self).key_id()
    }
}
impl<K: ServiceKey + ?Sized> ServiceKey for &K {
    type Output = K::Output;
}

/// Canonical identity of any key, type key, function key or proxy
pub fn key_of<K: AsKey + ?Sized>(key: &K) -> KeyId {
    key.key_id()
}

/// A symbol key carrying the type of its service
pub struct PbjKey<T> {
    id: KeyId,
    _marker: PhantomData<fn() -> T>,
}

/// Allocates a new key, names don't need to be unique
pub fn pbj_key<T: Injectable>(name: &str) -> PbjKey<T> {
    PbjKey {
        id: KeyId::symbol(name),
        _marker: PhantomData,
    }
}

impl<T> Clone for PbjKey<T> {
    fn clone(&self) -> Self {
        PbjKey {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}
impl<T> std::fmt::Debug for PbjKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PbjKey").field(&self.id).finish()
    }
}
impl<T> AsKey for PbjKey<T> {
    fn key_id(&self) -> KeyId {
        self.id.clone()
    }
}
impl<T: Injectable> ServiceKey for PbjKey<T> {
    type Output = T;
}

/// Key of a type, its own constructor provides the service
pub struct TypeKey<T>(PhantomData<fn() -> T>);

pub fn type_key<T: Injectable>() -> TypeKey<T> {
    TypeKey(PhantomData)
}

impl<T> Clone for TypeKey<T> {
    fn clone(&self) -> Self {
        TypeKey(PhantomData)
    }
}
impl<T: Injectable> AsKey for TypeKey<T> {
    fn key_id(&self) -> KeyId {
        KeyId::of_type::<T>()
    }
}
impl<T: Injectable> ServiceKey for TypeKey<T> {
    type Output = T;
}

/// Key of a factory function, the function is both key and service
pub struct FnKey<T> {
    id: KeyId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FnKey<T> {
    pub(crate) fn of<F: 'static>() -> Self {
        FnKey {
            id: KeyId::of_fn::<F>(),
            _marker: PhantomData,
        }
    }
}
impl<T> Clone for FnKey<T> {
    fn clone(&self) -> Self {
        FnKey {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}
impl<T> AsKey for FnKey<T> {
    fn key_id(&self) -> KeyId {
        self.id.clone()
    }
}
impl<T: Injectable> ServiceKey for FnKey<T> {
    type Output = T;
}

/// Things with a human readable name
pub trait Named {
    fn display_name(&self) -> Cow<'_, str>;
}
impl Named for str {
    fn display_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}
impl Named for String {
    fn display_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}
impl Named for KeyId {
    fn display_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}
impl<T> Named for PbjKey<T> {
    fn display_name(&self) -> Cow<'_, str> {
        self.id.display_name()
    }
}
impl<T: Injectable> Named for TypeKey<T> {
    fn display_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.key_id().name.to_string())
    }
}
impl<T> Named for FnKey<T> {
    fn display_name(&self) -> Cow<'_, str> {
        self.id.display_name()
    }
}

/// Best effort human readable name
pub fn as_string<N: Named + ?Sized>(value: &N) -> String {
    value.display_name().into_owned()
}

/// Name of a function, anonymous functions get a stable `<anonymous>@N` label
pub fn function_name<F: 'static>() -> Arc<str> {
    let full = std::any::type_name::<F>();
    if !full.contains("{{closure}}") {
        return short_type_name(full).into();
    }

    let mut names = ANONYMOUS_NAMES.lock().unwrap_or_else(|e| e.into_inner());
    names
        .entry(TypeId::of::<F>())
        .or_insert_with(|| {
            let n = NEXT_ANONYMOUS.fetch_add(1, Ordering::Relaxed);
            format!("<anonymous>@{n}").into()
        })
        .clone()
}

/// Strips the module path, keeping generic arguments
fn short_type_name(full: &str) -> String {
    let (path, generics) = match full.find('<') {
        Some(idx) => full.split_at(idx),
        None => (full, ""),
    };
    let base = path.rsplit("::").next().unwrap_or(path);
    format!("{base}{generics}")
}
