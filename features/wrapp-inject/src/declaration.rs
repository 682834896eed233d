use std::{fmt, future::Future, marker::PhantomData, sync::Arc};

use crate::{
    factories::Factory,
    generator::{AsyncGenerator, Generator},
    resolver::arguments::Arguments,
    types::{DynError, Injectable, InjectionKey, Instance, Lifetime, Qualifier, TypeInfo},
};

/// How to source one factory argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSpec {
    /// Recursively resolved service
    Service {
        key: InjectionKey,
        /// Binds to nothing instead of failing when no declaration exists
        optional: bool,
    },
    /// A value of the config store
    Config { key: String },
    /// A `${key}` template interpolated against the config store
    Expression { template: String },
}

impl ParamSpec {
    pub fn service<T: ?Sized + 'static>() -> Self {
        ParamSpec::Service {
            key: InjectionKey::of::<T>(),
            optional: false,
        }
    }

    pub fn qualified<T: ?Sized + 'static>(qualifier: impl Into<Qualifier>) -> Self {
        ParamSpec::Service {
            key: InjectionKey::qualified::<T>(qualifier),
            optional: false,
        }
    }

    pub fn optional<T: ?Sized + 'static>() -> Self {
        ParamSpec::Service {
            key: InjectionKey::of::<T>(),
            optional: true,
        }
    }

    pub fn config(key: impl Into<String>) -> Self {
        ParamSpec::Config { key: key.into() }
    }

    pub fn expression(template: impl Into<String>) -> Self {
        ParamSpec::Expression {
            template: template.into(),
        }
    }
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSpec::Service {
                key,
                optional: false,
            } => write!(f, "{key}"),
            ParamSpec::Service {
                key,
                optional: true,
            } => write!(f, "Option<{key}>"),
            ParamSpec::Config { key } => write!(f, "config '{key}'"),
            ParamSpec::Expression { template } => write!(f, "expression '{template}'"),
        }
    }
}

type Upcast = Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

/// Binds a concrete declaration to an abstract type
#[derive(Clone)]
pub struct Implements {
    pub abstract_type: TypeInfo,
    upcast: Upcast,
}

impl Implements {
    pub fn new<T: Injectable, I: ?Sized + Injectable>(upcast: fn(Arc<T>) -> Arc<I>) -> Self {
        Self {
            abstract_type: TypeInfo::of::<I>(),
            upcast: Arc::new(move |instance: &Instance| {
                instance
                    .downcast::<T>()
                    .ok()
                    .map(|concrete| Instance::from_arc(upcast(concrete)))
            }),
        }
    }

    /// Converts an instance of the concrete type into one of the abstract type
    pub(crate) fn upcast(&self, instance: &Instance) -> Option<Instance> {
        (self.upcast)(instance)
    }
}

impl fmt::Debug for Implements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Implements")
            .field(&self.abstract_type.type_name)
            .finish()
    }
}

/// A type with no direct instance, resolved through its implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbstractBinding {
    pub type_info: TypeInfo,
}

impl AbstractBinding {
    pub fn of<I: ?Sized + 'static>() -> Self {
        Self {
            type_info: TypeInfo::of::<I>(),
        }
    }
}

/// Immutable record describing how to construct one injectable
#[derive(Debug, Clone)]
pub struct InjectableDeclaration {
    pub key: InjectionKey,
    pub lifetime: Lifetime,
    pub factory: Factory,
    pub params: Vec<ParamSpec>,
    pub implements: Option<Implements>,
}

impl InjectableDeclaration {
    pub fn singleton<T: Injectable>() -> DeclarationBuilder<T> {
        DeclarationBuilder::new(Lifetime::Singleton)
    }

    pub fn scoped<T: Injectable>() -> DeclarationBuilder<T> {
        DeclarationBuilder::new(Lifetime::Scoped)
    }

    pub fn transient<T: Injectable>() -> DeclarationBuilder<T> {
        DeclarationBuilder::new(Lifetime::Transient)
    }

    pub fn is_async(&self) -> bool {
        self.factory.is_async()
    }

    pub fn is_generator(&self) -> bool {
        self.factory.is_generator()
    }

    /// Keys of all service parameters
    pub fn service_dependencies(&self) -> impl Iterator<Item = (usize, &InjectionKey, bool)> {
        self.params
            .iter()
            .enumerate()
            .filter_map(|(index, param)| match param {
                ParamSpec::Service { key, optional } => Some((index, key, *optional)),
                _ => None,
            })
    }
}

/// Typed builder for [`InjectableDeclaration`]
///
/// # Example
/// ```rust
/// use std::convert::Infallible;
/// use wrapp_inject::InjectableDeclaration;
///
/// struct Pool(String);
///
/// let declaration = InjectableDeclaration::singleton::<Pool>()
///     .expression("postgres://${db.host}")
///     .constructor(|args| Ok::<_, Infallible>(Pool(args.text(0).unwrap().to_string())));
/// ```
pub struct DeclarationBuilder<T> {
    lifetime: Lifetime,
    qualifier: Option<Qualifier>,
    params: Vec<ParamSpec>,
    implements: Option<Implements>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Injectable> DeclarationBuilder<T> {
    fn new(lifetime: Lifetime) -> Self {
        Self {
            lifetime,
            qualifier: None,
            params: Vec::new(),
            implements: None,
            _marker: PhantomData,
        }
    }

    pub fn qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn depends_on<D: ?Sized + 'static>(self) -> Self {
        self.param(ParamSpec::service::<D>())
    }

    pub fn depends_on_qualified<D: ?Sized + 'static>(self, qualifier: impl Into<Qualifier>) -> Self {
        self.param(ParamSpec::qualified::<D>(qualifier))
    }

    pub fn optional<D: ?Sized + 'static>(self) -> Self {
        self.param(ParamSpec::optional::<D>())
    }

    pub fn config(self, key: impl Into<String>) -> Self {
        self.param(ParamSpec::config(key))
    }

    pub fn expression(self, template: impl Into<String>) -> Self {
        self.param(ParamSpec::expression(template))
    }

    /// Registers this declaration as an implementation of the abstract type `I`
    ///
    /// `upcast` is usually just `|concrete| concrete`.
    pub fn implements<I: ?Sized + Injectable>(mut self, upcast: fn(Arc<T>) -> Arc<I>) -> Self {
        self.implements = Some(Implements::new(upcast));
        self
    }

    pub fn constructor<F, E>(self, constructor: F) -> InjectableDeclaration
    where
        F: Fn(Arguments) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        self.finish(Factory::constructor(constructor))
    }

    pub fn function<F, E>(self, function: F) -> InjectableDeclaration
    where
        F: Fn(Arguments) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        self.finish(Factory::function(function))
    }

    pub fn async_function<F, Fut, E>(self, function: F) -> InjectableDeclaration
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<DynError>,
    {
        self.finish(Factory::async_function(function))
    }

    pub fn generator<G, F, E>(self, start: F) -> InjectableDeclaration
    where
        G: Generator<T>,
        F: Fn(Arguments) -> Result<G, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        self.finish(Factory::generator(start))
    }

    pub fn async_generator<G, F, Fut, E>(self, start: F) -> InjectableDeclaration
    where
        G: AsyncGenerator<T>,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<G, E>> + Send + 'static,
        E: Into<DynError>,
    {
        self.finish(Factory::async_generator(start))
    }

    fn finish(self, factory: Factory) -> InjectableDeclaration {
        InjectableDeclaration {
            key: InjectionKey::with_qualifier(TypeInfo::of::<T>(), self.qualifier),
            lifetime: self.lifetime,
            factory,
            params: self.params,
            implements: self.implements,
        }
    }
}
