use std::{
    any::{Any, TypeId},
    borrow::Cow,
    fmt,
    sync::Arc,
};

/// Errors returned by user factories
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// An error shared between several teardown continuations
pub type Failure = Arc<dyn std::error::Error + Send + Sync>;

/// Discriminates multiple bindings of the same type
pub type Qualifier = Cow<'static, str>;

/// We assume that we are using a multithreaded async runtime
/// So anything injectable needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: ?Sized + Send + Sync + 'static> Injectable for T {}

/// Type erased instance
///
/// Always wraps an `Arc<T>`, which allows trait objects to be stored the same
/// way as concrete types and keeps the identity of the allocation when cloned.
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    instance: Arc<dyn Any + Send + Sync + 'static>,
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc<T: ?Sized + Injectable>(instance: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            instance: Arc::new(instance),
        }
    }

    pub fn downcast<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match self.instance.downcast_ref::<Arc<T>>() {
            Some(downcasted) => Ok(downcasted.clone()),
            None => Err(self.info.type_name),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Instance").field(&self.info.type_name).finish()
    }
}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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

/// A `(type, qualifier)` pair, the identity of a binding
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct InjectionKey {
    pub type_info: TypeInfo,
    pub qualifier: Option<Qualifier>,
}

impl InjectionKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_info: TypeInfo::of::<T>(),
            qualifier: None,
        }
    }

    pub fn qualified<T: ?Sized + 'static>(qualifier: impl Into<Qualifier>) -> Self {
        Self {
            type_info: TypeInfo::of::<T>(),
            qualifier: Some(qualifier.into()),
        }
    }

    pub(crate) fn with_qualifier(type_info: TypeInfo, qualifier: Option<Qualifier>) -> Self {
        Self {
            type_info,
            qualifier,
        }
    }
}

impl fmt::Display for InjectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}[{qualifier}]", self.type_info),
            None => write!(f, "{}", self.type_info),
        }
    }
}

/// How long a constructed instance lives, and who owns it
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Lifetime {
    /// One instance owned by the root container, torn down on container close
    Singleton,
    /// One instance per scope
    Scoped,
    /// A fresh instance per resolution, torn down with the active scope
    Transient,
}

impl Lifetime {
    /// Whether an instance with this lifetime may hold a dependency of `dependency` lifetime
    ///
    /// A longer lived instance must never capture a shorter lived one.
    pub fn can_depend_on(self, dependency: Lifetime) -> bool {
        match self {
            Lifetime::Singleton => dependency == Lifetime::Singleton,
            Lifetime::Scoped => matches!(dependency, Lifetime::Singleton | Lifetime::Scoped),
            Lifetime::Transient => true,
        }
    }

    /// Only singletons may be resolved without an active scope
    pub fn requires_scope(self) -> bool {
        self != Lifetime::Singleton
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifetime::Singleton => "singleton",
            Lifetime::Scoped => "scoped",
            Lifetime::Transient => "transient",
        })
    }
}
