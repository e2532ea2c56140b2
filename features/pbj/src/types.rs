use std::{
    any::{Any, TypeId},
    rc::Rc,
};

/// Errors returned by user supplied factories, constructors and hooks
///
/// Resolution is single threaded, so errors don't need to be `Send`.
pub type DynError = Box<dyn std::error::Error>;

/// Anything which can be stored in a [crate::Context]
///
/// The registry runs on a single thread, so only a static lifetime is required.
pub trait Injectable: 'static {}
impl<T: 'static> Injectable for T {}

/// A resolved service value
///
/// The value is shared, every clone points to the same allocation.
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    pub value: Rc<dyn Any>,
    primitive: bool,
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Self::from_rc(Rc::new(instance))
    }

    pub fn from_rc<T: Injectable>(instance: Rc<T>) -> Self {
        let info = TypeInfo::of::<T>();
        Instance {
            primitive: is_primitive(info.type_id),
            info,
            value: instance,
        }
    }

    /// True for strings, numbers, booleans and chars
    pub fn is_primitive(&self) -> bool {
        self.primitive
    }

    pub fn is<T: Injectable>(&self) -> bool {
        self.info.type_id == TypeId::of::<T>()
    }

    /// Returns the typed value, or the actual type name on mismatch
    pub fn downcast<T: Injectable>(&self) -> Result<Rc<T>, &'static str> {
        match Rc::downcast::<T>(self.value.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.info.type_name),
        }
    }

    /// Identity comparison, two instances are the same if they share the allocation
    pub fn same(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.info.type_name)
            .field("primitive", &self.primitive)
            .finish()
    }
}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

fn is_primitive(type_id: TypeId) -> bool {
    macro_rules! any_of {
        ($($ty:ty),*) => {
            [$(TypeId::of::<$ty>()),*].contains(&type_id)
        };
    }

    any_of!(
        String, &'static str, Rc<str>, bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32,
        u64, u128, usize, f32, f64
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_primitives() {
        assert!(Instance::new(42_u32).is_primitive());
        assert!(Instance::new("text".to_string()).is_primitive());
        assert!(Instance::new(true).is_primitive());
        assert!(!Instance::new(vec![1, 2, 3]).is_primitive());
    }

    #[test]
    fn downcast_reports_actual_type() {
        let instance = Instance::new(1_i64);
        assert_eq!(*instance.downcast::<i64>().unwrap(), 1);
        assert_eq!(instance.downcast::<String>().unwrap_err(), "i64");
    }
}
