use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    container::ContainerInner,
    errors::{CloseError, ResolveError},
    lifecycle::{InstanceCache, TeardownStack},
    resolver::{downcast, Resolver},
    types::{Failure, Injectable, InjectionKey, Qualifier},
};

/// Options for newly entered scopes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeOptions {
    /// Serialize construction of scoped instances
    ///
    /// Only needed when one scope is shared between concurrent tasks.
    pub shared: bool,
}

/// A unit of work
///
/// Holds the scoped instances and the teardown continuations of everything
/// scoped or transient constructed through it. Cloning a scope is cheap, all
/// clones refer to the same unit of work.
#[derive(Clone)]
pub struct Scope(pub(crate) Arc<ScopeInner>);

pub(crate) struct ScopeInner {
    pub(crate) id: u64,
    pub(crate) container: Arc<ContainerInner>,
    pub(crate) parent: Option<Scope>,
    pub(crate) options: ScopeOptions,
    pub(crate) cache: InstanceCache,
    pub(crate) teardown: TeardownStack,
    pub(crate) closed: AtomicBool,
}

impl Scope {
    pub(crate) fn new(
        container: Arc<ContainerInner>,
        parent: Option<Scope>,
        options: ScopeOptions,
    ) -> Self {
        let id = container.next_scope_id();
        tracing::debug!("Entered scope {id}");
        Self(Arc::new(ScopeInner {
            id,
            container,
            parent,
            options,
            cache: InstanceCache::new(options.shared),
            teardown: TeardownStack::default(),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::scoped(&self.0.container, &self.0)
    }

    /// Resolves `T` from within this scope
    pub fn get<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, ResolveError> {
        let instance = self.resolver().resolve(&InjectionKey::of::<T>())?;
        downcast(&instance)
    }

    pub fn get_qualified<T: ?Sized + Injectable>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<Arc<T>, ResolveError> {
        let instance = self
            .resolver()
            .resolve(&InjectionKey::qualified::<T>(qualifier))?;
        downcast(&instance)
    }

    /// Resolves `T` from within this scope, awaiting async factories
    pub async fn get_async<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, ResolveError> {
        let key = InjectionKey::of::<T>();
        let instance = self.resolver().resolve_async(&key).await?;
        downcast(&instance)
    }

    pub async fn get_qualified_async<T: ?Sized + Injectable>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<Arc<T>, ResolveError> {
        let key = InjectionKey::qualified::<T>(qualifier);
        let instance = self.resolver().resolve_async(&key).await?;
        downcast(&instance)
    }

    /// Enters a child scope
    ///
    /// The child starts with an empty cache and tears down independently.
    pub fn enter_scope(&self) -> Scope {
        Scope::new(self.0.container.clone(), Some(self.clone()), self.0.options)
    }

    /// Marks the scope as closed, returns false if it already was
    fn mark_closed(&self) -> bool {
        !self.0.closed.swap(true, Ordering::AcqRel)
    }

    /// Closes the scope after its unit of work succeeded
    pub fn close(&self) -> Result<(), CloseError> {
        self.close_inner(None)
    }

    /// Closes the scope after its unit of work failed with `failure`
    ///
    /// Every teardown sees the failure. It is returned as the primary error.
    pub fn close_with_error(&self, failure: Failure) -> Result<(), CloseError> {
        self.close_inner(Some(failure))
    }

    fn close_inner(&self, failure: Option<Failure>) -> Result<(), CloseError> {
        if !self.mark_closed() {
            return Ok(());
        }
        let errors = self.0.teardown.run(failure.as_ref());
        tracing::debug!("Closed scope {}", self.0.id);
        CloseError::check(failure, errors)
    }

    pub async fn close_async(&self) -> Result<(), CloseError> {
        self.close_inner_async(None).await
    }

    pub async fn close_with_error_async(&self, failure: Failure) -> Result<(), CloseError> {
        self.close_inner_async(Some(failure)).await
    }

    async fn close_inner_async(&self, failure: Option<Failure>) -> Result<(), CloseError> {
        if !self.mark_closed() {
            return Ok(());
        }
        let errors = self.0.teardown.run_async(failure.as_ref()).await;
        tracing::debug!("Closed scope {}", self.0.id);
        CloseError::check(failure, errors)
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.0.id)
            .field("parent", &self.0.parent.as_ref().map(Scope::id))
            .field("closed", &self.is_closed())
            .field("instances", &self.0.cache.len())
            .field("pending_teardowns", &self.0.teardown.len())
            .finish()
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        let pending = self.teardown.len();
        if pending > 0 {
            tracing::warn!(
                "Scope {} dropped without closing, {pending} teardowns never ran",
                self.id
            );
        }
    }
}
