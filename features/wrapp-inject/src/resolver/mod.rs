//! Resolution of injection keys into instances
//!
//! Order of lookup for a key:
//! 1. the newest active override
//! 2. the concrete declaration, or the implementation selected for an abstract type
//! 3. the cache owning the declaration's lifetime
//!
//! Parameters are resolved depth first with the same resolver, so a scoped
//! declaration sees the instances cached in the scope it was requested from.

use std::sync::{atomic::Ordering, Arc};

use futures::{future::BoxFuture, FutureExt};
use wrapp_config::ConfigError;

use crate::{
    container::ContainerInner,
    declaration::{InjectableDeclaration, ParamSpec},
    errors::{FactoryError, FactoryFailure, ResolveError},
    factories::Factory,
    generator::{GeneratorState, Signal},
    lifecycle::{Teardown, TeardownStack},
    registry::Lookup,
    scope::ScopeInner,
    types::{DynError, Injectable, InjectionKey, Instance, Lifetime, TypeInfo},
};

use self::arguments::{Argument, Arguments};

pub mod arguments;

pub(crate) fn downcast<T: ?Sized + Injectable>(instance: &Instance) -> Result<Arc<T>, ResolveError> {
    instance
        .downcast::<T>()
        .map_err(|actual_type| ResolveError::DowncastFailed {
            required_type: TypeInfo::of::<T>().type_name,
            actual_type,
        })
}

/// Resolves keys against a container, optionally from within a scope
#[derive(Clone, Copy)]
pub(crate) struct Resolver<'a> {
    container: &'a ContainerInner,
    scope: Option<&'a ScopeInner>,
}

/// A declaration selected for a requested key
struct Target<'a> {
    declaration: &'a InjectableDeclaration,
    /// Set when the key named an abstract type
    upcast: bool,
}

impl<'a> Target<'a> {
    /// Converts the instance of the concrete declaration to the requested type
    fn finish(&self, instance: Instance) -> Result<Instance, ResolveError> {
        if !self.upcast {
            return Ok(instance);
        }
        self.declaration
            .implements
            .as_ref()
            .and_then(|implements| implements.upcast(&instance))
            .ok_or(ResolveError::DowncastFailed {
                required_type: self.declaration.key.type_info.type_name,
                actual_type: instance.info.type_name,
            })
    }
}

impl<'a> Resolver<'a> {
    pub(crate) fn root(container: &'a ContainerInner) -> Self {
        Self {
            container,
            scope: None,
        }
    }

    pub(crate) fn scoped(container: &'a ContainerInner, scope: &'a ScopeInner) -> Self {
        Self {
            container,
            scope: Some(scope),
        }
    }

    pub(crate) fn resolve(self, key: &InjectionKey) -> Result<Instance, ResolveError> {
        self.check_open()?;
        if let Some(instance) = self.container.overrides.top(key) {
            return Ok(instance);
        }

        let target = self.target(key)?;
        let declaration = target.declaration;
        self.check_lifetime(declaration)?;

        if self.container.graph.requires_async(&declaration.key) {
            let instance = self.cached(declaration).ok_or_else(|| {
                FactoryError::new(&declaration.key, FactoryFailure::AsyncInSyncContext)
            })?;
            return target.finish(instance);
        }

        let instance = match declaration.lifetime {
            Lifetime::Singleton => {
                let root = Resolver::root(self.container);
                self.container
                    .singletons
                    .get_or_construct(&declaration.key, || root.construct(declaration))?
            }
            Lifetime::Scoped => self
                .scope_inner(declaration)?
                .cache
                .get_or_construct(&declaration.key, || self.construct(declaration))?,
            Lifetime::Transient => self.construct(declaration)?,
        };

        target.finish(instance)
    }

    pub(crate) fn resolve_async(
        self,
        key: &'a InjectionKey,
    ) -> BoxFuture<'a, Result<Instance, ResolveError>> {
        async move {
            self.check_open()?;
            if let Some(instance) = self.container.overrides.top(key) {
                return Ok(instance);
            }

            let target = self.target(key)?;
            let declaration = target.declaration;
            self.check_lifetime(declaration)?;

            let instance = match declaration.lifetime {
                Lifetime::Singleton => {
                    let root = Resolver::root(self.container);
                    self.container
                        .singletons
                        .get_or_construct_async(&declaration.key, || {
                            root.construct_async(declaration)
                        })
                        .await?
                }
                Lifetime::Scoped => {
                    self.scope_inner(declaration)?
                        .cache
                        .get_or_construct_async(&declaration.key, || {
                            self.construct_async(declaration)
                        })
                        .await?
                }
                Lifetime::Transient => self.construct_async(declaration).await?,
            };

            target.finish(instance)
        }
        .boxed()
    }

    fn check_open(&self) -> Result<(), ResolveError> {
        match self.scope {
            Some(scope) if scope.closed.load(Ordering::Acquire) => {
                Err(ResolveError::ScopeClosed(scope.id))
            }
            None if self.container.closed.load(Ordering::Acquire) => {
                Err(ResolveError::ContainerClosed)
            }
            _ => Ok(()),
        }
    }

    fn target(&self, key: &InjectionKey) -> Result<Target<'a>, ResolveError> {
        let registry = &self.container.registry;
        match registry.lookup(key) {
            Lookup::Concrete(position) => Ok(Target {
                declaration: registry.declaration(position),
                upcast: false,
            }),
            Lookup::Implementation(position) => Ok(Target {
                declaration: registry.declaration(position),
                upcast: true,
            }),
            Lookup::Ambiguous(candidates) => Err(ResolveError::Ambiguous {
                key: key.clone(),
                candidates,
            }),
            Lookup::Missing => Err(ResolveError::UnknownInjectable(key.clone())),
        }
    }

    /// Rejects lifetimes which cannot be served from here
    fn check_lifetime(&self, declaration: &InjectableDeclaration) -> Result<(), ResolveError> {
        match declaration.lifetime {
            Lifetime::Singleton if self.container.closed.load(Ordering::Acquire) => {
                Err(ResolveError::ContainerClosed)
            }
            lifetime if lifetime.requires_scope() && self.scope.is_none() => {
                Err(ResolveError::ScopeRequired {
                    key: declaration.key.clone(),
                    lifetime,
                })
            }
            _ => Ok(()),
        }
    }

    fn scope_inner(&self, declaration: &InjectableDeclaration) -> Result<&'a ScopeInner, ResolveError> {
        self.scope.ok_or_else(|| ResolveError::ScopeRequired {
            key: declaration.key.clone(),
            lifetime: declaration.lifetime,
        })
    }

    /// The already constructed instance of `declaration`, if any
    fn cached(&self, declaration: &InjectableDeclaration) -> Option<Instance> {
        match declaration.lifetime {
            Lifetime::Singleton => self.container.singletons.get(&declaration.key),
            Lifetime::Scoped => self.scope?.cache.get(&declaration.key),
            Lifetime::Transient => None,
        }
    }

    /// The error for a construction outliving the owner of its teardown
    fn owner_closed(&self, declaration: &InjectableDeclaration) -> ResolveError {
        match (declaration.lifetime, self.scope) {
            (Lifetime::Singleton, _) | (_, None) => ResolveError::ContainerClosed,
            (_, Some(scope)) => ResolveError::ScopeClosed(scope.id),
        }
    }

    /// Hands the continuation of a started generator to its owner
    ///
    /// If the owner closed while the generator started, the continuation runs
    /// right away and the instance is not handed out.
    fn keep_teardown(
        &self,
        declaration: &InjectableDeclaration,
        teardown: Teardown,
    ) -> Result<(), ResolveError> {
        let Err(teardown) = self.owner(declaration)?.push(teardown) else {
            return Ok(());
        };
        tracing::debug!("Owner of {} closed during construction", declaration.key);
        if let Err(error) = teardown.run(None) {
            tracing::warn!("{error}");
        }
        Err(self.owner_closed(declaration))
    }

    async fn keep_teardown_async(
        &self,
        declaration: &InjectableDeclaration,
        teardown: Teardown,
    ) -> Result<(), ResolveError> {
        let Err(teardown) = self.owner(declaration)?.push(teardown) else {
            return Ok(());
        };
        tracing::debug!("Owner of {} closed during construction", declaration.key);
        if let Err(error) = teardown.run_async(None).await {
            tracing::warn!("{error}");
        }
        Err(self.owner_closed(declaration))
    }

    /// Teardown stack owning the continuations of `declaration`
    fn owner(&self, declaration: &InjectableDeclaration) -> Result<&'a TeardownStack, ResolveError> {
        match declaration.lifetime {
            Lifetime::Singleton => Ok(&self.container.teardown),
            _ => self.scope_inner(declaration).map(|scope| &scope.teardown),
        }
    }

    fn arguments(self, declaration: &InjectableDeclaration) -> Result<Arguments, ResolveError> {
        let mut values = Vec::with_capacity(declaration.params.len());
        for param in &declaration.params {
            let value = match param {
                ParamSpec::Service { key, optional } => match self.resolve(key) {
                    Ok(instance) => Argument::Service(instance),
                    Err(ResolveError::UnknownInjectable(missing)) if *optional && missing == *key => {
                        Argument::Absent
                    }
                    Err(error) => return Err(error),
                },
                other => self.config_argument(other)?,
            };
            values.push(value);
        }
        Ok(Arguments::new(values))
    }

    fn arguments_async(
        self,
        declaration: &'a InjectableDeclaration,
    ) -> BoxFuture<'a, Result<Arguments, ResolveError>> {
        async move {
            let mut values = Vec::with_capacity(declaration.params.len());
            for param in &declaration.params {
                let value = match param {
                    ParamSpec::Service { key, optional } => match self.resolve_async(key).await {
                        Ok(instance) => Argument::Service(instance),
                        Err(ResolveError::UnknownInjectable(missing))
                            if *optional && missing == *key =>
                        {
                            Argument::Absent
                        }
                        Err(error) => return Err(error),
                    },
                    other => self.config_argument(other)?,
                };
                values.push(value);
            }
            Ok(Arguments::new(values))
        }
        .boxed()
    }

    fn config_argument(&self, param: &ParamSpec) -> Result<Argument, ResolveError> {
        let config = &self.container.config;
        match param {
            ParamSpec::Config { key } => config
                .get(key)
                .cloned()
                .map(Argument::Config)
                .ok_or_else(|| ConfigError::Missing(key.clone()).into()),
            ParamSpec::Expression { template } => {
                Ok(Argument::Text(config.interpolate(template)?))
            }
            ParamSpec::Service { key, .. } => Err(ResolveError::UnknownInjectable(key.clone())),
        }
    }

    fn construct(self, declaration: &InjectableDeclaration) -> Result<Instance, ResolveError> {
        let arguments = self.arguments(declaration)?;
        let key = &declaration.key;
        let failed = |error: DynError| FactoryError::new(key, FactoryFailure::failed(error));

        let instance = match &declaration.factory {
            Factory::Constructor(factory) | Factory::SyncFunction(factory) => {
                factory(arguments).map_err(failed)?
            }
            Factory::SyncGenerator(start) => {
                let mut generator = start(arguments).map_err(failed)?;
                match generator.resume(Signal::Start).map_err(failed)? {
                    GeneratorState::Yielded(instance) => {
                        self.keep_teardown(
                            declaration,
                            Teardown::Sync {
                                key: key.clone(),
                                generator,
                            },
                        )?;
                        instance
                    }
                    GeneratorState::Complete => {
                        return Err(FactoryError::new(key, FactoryFailure::DidNotYield).into())
                    }
                }
            }
            Factory::AsyncFunction(_) | Factory::AsyncGenerator(_) => {
                return Err(FactoryError::new(key, FactoryFailure::AsyncInSyncContext).into())
            }
        };

        tracing::debug!("Constructed {} {}", declaration.lifetime, key);
        Ok(instance)
    }

    fn construct_async(
        self,
        declaration: &'a InjectableDeclaration,
    ) -> BoxFuture<'a, Result<Instance, ResolveError>> {
        async move {
            let arguments = self.arguments_async(declaration).await?;
            let key = &declaration.key;
            let failed = |error: DynError| FactoryError::new(key, FactoryFailure::failed(error));

            let instance = match &declaration.factory {
                Factory::Constructor(factory) | Factory::SyncFunction(factory) => {
                    factory(arguments).map_err(failed)?
                }
                Factory::AsyncFunction(factory) => factory(arguments).await.map_err(failed)?,
                Factory::SyncGenerator(start) => {
                    let mut generator = start(arguments).map_err(failed)?;
                    match generator.resume(Signal::Start).map_err(failed)? {
                        GeneratorState::Yielded(instance) => {
                            self.keep_teardown(
                                declaration,
                                Teardown::Sync {
                                    key: key.clone(),
                                    generator,
                                },
                            )?;
                            instance
                        }
                        GeneratorState::Complete => {
                            return Err(FactoryError::new(key, FactoryFailure::DidNotYield).into())
                        }
                    }
                }
                Factory::AsyncGenerator(start) => {
                    let mut generator = start(arguments).await.map_err(failed)?;
                    match generator.resume(Signal::Start).await.map_err(failed)? {
                        GeneratorState::Yielded(instance) => {
                            self.keep_teardown_async(
                                declaration,
                                Teardown::Async {
                                    key: key.clone(),
                                    generator,
                                },
                            )
                            .await?;
                            instance
                        }
                        GeneratorState::Complete => {
                            return Err(FactoryError::new(key, FactoryFailure::DidNotYield).into())
                        }
                    }
                }
            };

            tracing::debug!("Constructed {} {}", declaration.lifetime, key);
            Ok(instance)
        }
        .boxed()
    }
}
