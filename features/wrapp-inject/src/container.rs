use std::{
    fmt::Debug,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use wrapp_config::ConfigStore;

use crate::{
    dependency_graph::DependencyGraph,
    errors::{CloseError, ResolveError},
    lifecycle::{InstanceCache, TeardownStack},
    overrides::{OverrideGuard, OverrideStack},
    registry::Registry,
    resolver::{downcast, Resolver},
    scope::{Scope, ScopeOptions},
    types::{DynError, Failure, Injectable, InjectionKey, Instance, Qualifier},
};

/// Container holding all declarations and the singleton instances
///
/// Cheap to clone, all clones share the same state.
#[derive(Clone)]
pub struct Container(pub(crate) Arc<ContainerInner>);

pub(crate) struct ContainerInner {
    pub(crate) registry: Registry,
    pub(crate) graph: DependencyGraph,
    pub(crate) config: ConfigStore,
    pub(crate) singletons: InstanceCache,
    pub(crate) teardown: TeardownStack,
    pub(crate) overrides: OverrideStack,
    pub(crate) closed: AtomicBool,
    scope_ids: AtomicU64,
}

impl ContainerInner {
    pub(crate) fn next_scope_id(&self) -> u64 {
        self.scope_ids.fetch_add(1, Ordering::Relaxed)
    }
}

impl Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for declaration in self.0.registry.declarations() {
            let state = match self.0.singletons.get(&declaration.key) {
                Some(_) => format!("{} (constructed)", declaration.lifetime),
                None => declaration.lifetime.to_string(),
            };
            map.entry(&declaration.key.to_string(), &state);
        }
        map.finish()
    }
}

impl Container {
    pub(crate) fn new(registry: Registry, graph: DependencyGraph, config: ConfigStore) -> Self {
        Self(Arc::new(ContainerInner {
            registry,
            graph,
            config,
            singletons: InstanceCache::new(true),
            teardown: TeardownStack::default(),
            overrides: OverrideStack::default(),
            closed: AtomicBool::new(false),
            scope_ids: AtomicU64::new(0),
        }))
    }

    /// Attempts to get the requested singleton
    ///
    /// Scoped and transient types need a [`Scope`].
    pub fn get<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, ResolveError> {
        let instance = Resolver::root(&self.0).resolve(&InjectionKey::of::<T>())?;
        downcast(&instance)
    }

    pub fn get_qualified<T: ?Sized + Injectable>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<Arc<T>, ResolveError> {
        let instance = Resolver::root(&self.0).resolve(&InjectionKey::qualified::<T>(qualifier))?;
        downcast(&instance)
    }

    /// Attempts to get the requested singleton, awaiting async factories
    pub async fn get_async<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, ResolveError> {
        let key = InjectionKey::of::<T>();
        let instance = Resolver::root(&self.0).resolve_async(&key).await?;
        downcast(&instance)
    }

    pub async fn get_qualified_async<T: ?Sized + Injectable>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<Arc<T>, ResolveError> {
        let key = InjectionKey::qualified::<T>(qualifier);
        let instance = Resolver::root(&self.0).resolve_async(&key).await?;
        downcast(&instance)
    }

    /// Enters a new scope
    ///
    /// The scope must be closed once its unit of work is done, see [`Container::with_scope`].
    pub fn enter_scope(&self) -> Scope {
        self.enter_scope_with(ScopeOptions::default())
    }

    pub fn enter_scope_with(&self, options: ScopeOptions) -> Scope {
        Scope::new(self.0.clone(), None, options)
    }

    /// Runs `body` in a new scope and closes it afterwards
    ///
    /// If `body` fails, its error is handed to every teardown and returned as
    /// [`CloseError::original`].
    pub fn with_scope<R>(
        &self,
        body: impl FnOnce(&Scope) -> Result<R, DynError>,
    ) -> Result<R, CloseError> {
        let scope = self.enter_scope();
        match body(&scope) {
            Ok(value) => scope.close().map(|_| value),
            Err(error) => {
                let failure = Failure::from(error);
                Err(body_failed(
                    failure.clone(),
                    scope.close_with_error(failure),
                ))
            }
        }
    }

    /// Async version of [`Container::with_scope`]
    pub async fn with_scope_async<R, F, Fut>(&self, body: F) -> Result<R, CloseError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<R, DynError>>,
    {
        let scope = self.enter_scope();
        match body(scope.clone()).await {
            Ok(value) => scope.close_async().await.map(|_| value),
            Err(error) => {
                let failure = Failure::from(error);
                Err(body_failed(
                    failure.clone(),
                    scope.close_with_error_async(failure).await,
                ))
            }
        }
    }

    /// Replaces `T` with `replacement` until the returned guard is dropped
    ///
    /// Instances which already hold the previous `T` keep it.
    pub fn override_instance<T: ?Sized + Injectable>(&self, replacement: Arc<T>) -> OverrideGuard {
        self.push_override(InjectionKey::of::<T>(), Instance::from_arc(replacement))
    }

    pub fn override_qualified<T: ?Sized + Injectable>(
        &self,
        qualifier: impl Into<Qualifier>,
        replacement: Arc<T>,
    ) -> OverrideGuard {
        self.push_override(
            InjectionKey::qualified::<T>(qualifier),
            Instance::from_arc(replacement),
        )
    }

    /// Runs `body` while `T` is replaced with `replacement`
    ///
    /// The override is removed however `body` exits.
    pub fn with_override<T: ?Sized + Injectable, R>(
        &self,
        replacement: Arc<T>,
        body: impl FnOnce() -> R,
    ) -> R {
        let _guard = self.override_instance(replacement);
        body()
    }

    fn push_override(&self, key: InjectionKey, instance: Instance) -> OverrideGuard {
        let id = self.0.overrides.push(key.clone(), instance);
        OverrideGuard::new(Arc::downgrade(&self.0), key, id)
    }

    /// Tears down all singletons
    ///
    /// Afterwards the container refuses to resolve anything.
    /// Closing again does nothing.
    pub fn close(&self) -> Result<(), CloseError> {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let errors = self.0.teardown.run(None);
        tracing::debug!("Closed container");
        CloseError::check(None, errors)
    }

    pub async fn close_async(&self) -> Result<(), CloseError> {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let errors = self.0.teardown.run_async(None).await;
        tracing::debug!("Closed container");
        CloseError::check(None, errors)
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.0.graph
    }

    pub fn config(&self) -> &ConfigStore {
        &self.0.config
    }
}

/// The error of a scope whose body failed
///
/// The body may have closed the scope itself, then only its failure is left.
fn body_failed(failure: Failure, closed: Result<(), CloseError>) -> CloseError {
    closed.err().unwrap_or(CloseError {
        original: Some(failure),
        teardown_errors: Vec::new(),
    })
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        let pending = self.teardown.len();
        if pending > 0 {
            tracing::warn!("Container dropped without closing, {pending} teardowns never ran");
        }
    }
}
