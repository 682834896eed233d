//! Instance caches and teardown stacks
//!
//! Singletons are cached by the root container and scoped instances by their
//! scope. Both own a [`TeardownStack`] receiving the continuations of every
//! generator they constructed.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
};

use futures::{executor::block_on, lock::Mutex as AsyncMutex};

use crate::{
    errors::{FactoryError, FactoryFailure},
    generator::{DynAsyncGenerator, DynGenerator, GeneratorState, Signal},
    types::{DynError, Failure, InjectionKey, Instance},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One cache entry: the published instance and the lock serializing its construction
#[derive(Default)]
struct Slot {
    value: OnceLock<Instance>,
    construction: AsyncMutex<()>,
    /// Async callers waiting for or holding `construction`
    async_callers: AtomicUsize,
}

/// Counts one async caller of a slot until dropped
struct AsyncCaller<'a>(&'a AtomicUsize);

impl<'a> AsyncCaller<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for AsyncCaller<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Slot {
    /// Publishes `instance`, unless another caller was faster
    fn publish(&self, instance: Instance) -> Instance {
        self.value.get_or_init(|| instance).clone()
    }
}

/// Caches one instance per key
///
/// With `serialize` set, construction of a key is double checked under a per key
/// lock, so concurrent callers never construct the same key twice.
/// Otherwise the first published instance wins.
pub(crate) struct InstanceCache {
    slots: Mutex<HashMap<InjectionKey, Arc<Slot>>>,
    serialize: bool,
}

impl InstanceCache {
    pub(crate) fn new(serialize: bool) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            serialize,
        }
    }

    fn slot(&self, key: &InjectionKey) -> Arc<Slot> {
        lock(&self.slots).entry(key.clone()).or_default().clone()
    }

    pub(crate) fn get(&self, key: &InjectionKey) -> Option<Instance> {
        lock(&self.slots)
            .get(key)
            .and_then(|slot| slot.value.get().cloned())
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.value.get().is_some())
            .count()
    }

    /// Returns the cached instance of `key` or constructs it
    ///
    /// Blocks while another thread constructs `key`. A construction driven by
    /// async callers can only progress on its executor, so meeting one fails
    /// with [`FactoryFailure::AsyncInSyncContext`] instead of blocking.
    pub(crate) fn get_or_construct<E: From<FactoryError>>(
        &self,
        key: &InjectionKey,
        construct: impl FnOnce() -> Result<Instance, E>,
    ) -> Result<Instance, E> {
        let slot = self.slot(key);
        if let Some(instance) = slot.value.get() {
            return Ok(instance.clone());
        }

        if !self.serialize {
            return construct().map(|instance| slot.publish(instance));
        }

        let _guard = match slot.construction.try_lock() {
            Some(guard) => guard,
            None if slot.async_callers.load(Ordering::SeqCst) > 0 => {
                return Err(FactoryError::new(key, FactoryFailure::AsyncInSyncContext).into());
            }
            None => block_on(slot.construction.lock()),
        };
        if let Some(instance) = slot.value.get() {
            return Ok(instance.clone());
        }
        construct().map(|instance| slot.publish(instance))
    }

    /// Async version of [`InstanceCache::get_or_construct`]
    pub(crate) async fn get_or_construct_async<E, Fut>(
        &self,
        key: &InjectionKey,
        construct: impl FnOnce() -> Fut,
    ) -> Result<Instance, E>
    where
        Fut: Future<Output = Result<Instance, E>>,
    {
        let slot = self.slot(key);
        if let Some(instance) = slot.value.get() {
            return Ok(instance.clone());
        }

        if !self.serialize {
            return construct().await.map(|instance| slot.publish(instance));
        }

        let _caller = AsyncCaller::enter(&slot.async_callers);
        let _guard = slot.construction.lock().await;
        if let Some(instance) = slot.value.get() {
            return Ok(instance.clone());
        }
        construct().await.map(|instance| slot.publish(instance))
    }
}

/// A pending teardown continuation
pub(crate) enum Teardown {
    Sync {
        key: InjectionKey,
        generator: Box<dyn DynGenerator>,
    },
    Async {
        key: InjectionKey,
        generator: Box<dyn DynAsyncGenerator>,
    },
}

impl Teardown {
    fn key(&self) -> &InjectionKey {
        match self {
            Teardown::Sync { key, .. } | Teardown::Async { key, .. } => key,
        }
    }

    /// Resumes the continuation with `failure`
    ///
    /// Async continuations cannot be driven here and are reported as failed.
    pub(crate) fn run(self, failure: Option<&Failure>) -> Result<(), FactoryError> {
        tracing::debug!("Running teardown of {}", self.key());
        match self {
            Teardown::Sync { key, mut generator } => {
                finish(&key, generator.resume(Signal::Finish(failure.cloned())))
            }
            Teardown::Async { key, .. } => Err(FactoryError::new(
                &key,
                FactoryFailure::AsyncInSyncContext,
            )),
        }
    }

    /// Resumes the continuation with `failure`, awaiting async ones
    pub(crate) async fn run_async(self, failure: Option<&Failure>) -> Result<(), FactoryError> {
        tracing::debug!("Running teardown of {}", self.key());
        match self {
            Teardown::Sync { key, mut generator } => {
                finish(&key, generator.resume(Signal::Finish(failure.cloned())))
            }
            Teardown::Async { key, mut generator } => finish(
                &key,
                generator.resume(Signal::Finish(failure.cloned())).await,
            ),
        }
    }
}

#[derive(Default)]
struct Entries {
    pending: Vec<Teardown>,
    /// Set once the owner started tearing down
    sealed: bool,
}

/// Teardown continuations in construction order
///
/// Draining the stack seals it. Continuations of constructions finishing
/// afterwards are handed back by [`TeardownStack::push`].
#[derive(Default)]
pub(crate) struct TeardownStack {
    entries: Mutex<Entries>,
}

impl TeardownStack {
    /// Keeps `teardown` until the owner closes
    ///
    /// Returns it back if the stack is already sealed, the caller has to run it.
    pub(crate) fn push(&self, teardown: Teardown) -> Result<(), Teardown> {
        let mut entries = lock(&self.entries);
        if entries.sealed {
            return Err(teardown);
        }
        entries.pending.push(teardown);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).pending.len()
    }

    /// Seals the stack, then removes and returns the last pushed continuation
    fn pop(&self) -> Option<Teardown> {
        let mut entries = lock(&self.entries);
        entries.sealed = true;
        entries.pending.pop()
    }

    /// Runs every continuation, last constructed first
    pub(crate) fn run(&self, failure: Option<&Failure>) -> Vec<FactoryError> {
        let mut errors = Vec::new();
        while let Some(teardown) = self.pop() {
            if let Err(error) = teardown.run(failure) {
                tracing::warn!("{error}");
                errors.push(error);
            }
        }
        errors
    }

    /// Runs every continuation, last constructed first, awaiting async ones
    pub(crate) async fn run_async(&self, failure: Option<&Failure>) -> Vec<FactoryError> {
        let mut errors = Vec::new();
        while let Some(teardown) = self.pop() {
            if let Err(error) = teardown.run_async(failure).await {
                tracing::warn!("{error}");
                errors.push(error);
            }
        }
        errors
    }
}

/// Checks the outcome of resuming a generator with [`Signal::Finish`]
fn finish(
    key: &InjectionKey,
    outcome: Result<GeneratorState<Instance>, DynError>,
) -> Result<(), FactoryError> {
    match outcome {
        Ok(GeneratorState::Complete) => Ok(()),
        Ok(GeneratorState::Yielded(_)) => {
            Err(FactoryError::new(key, FactoryFailure::YieldedTwice))
        }
        Err(error) => Err(FactoryError::new(key, FactoryFailure::teardown(error))),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use rstest::rstest;

    use super::*;
    use crate::generator::{AsyncResource, Erased};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
        yields_on_finish: bool,
        fails: bool,
    }

    impl DynGenerator for Recording {
        fn resume(&mut self, signal: Signal) -> Result<GeneratorState<Instance>, DynError> {
            let Signal::Finish(failure) = signal else {
                return Ok(GeneratorState::Yielded(Instance::new(self.name)));
            };
            let outcome = if failure.is_some() { "rollback" } else { "commit" };
            self.log.lock().unwrap().push(format!("{} {outcome}", self.name));
            if self.fails {
                return Err(format!("{} failed", self.name).into());
            }
            if self.yields_on_finish {
                return Ok(GeneratorState::Yielded(Instance::new(self.name)));
            }
            Ok(GeneratorState::Complete)
        }
    }

    fn recording(name: &'static str, log: &Log) -> Teardown {
        Teardown::Sync {
            key: InjectionKey::qualified::<&str>(name),
            generator: Box::new(Recording {
                name,
                log: log.clone(),
                yields_on_finish: false,
                fails: false,
            }),
        }
    }

    fn push(stack: &TeardownStack, teardown: Teardown) {
        assert!(stack.push(teardown).is_ok(), "stack is sealed");
    }

    #[rstest]
    fn teardowns_run_in_reverse_order() {
        let log = Log::default();
        let stack = TeardownStack::default();
        push(&stack, recording("d", &log));
        push(&stack, recording("c", &log));

        let errors = stack.run(None);

        assert!(errors.is_empty());
        assert_eq!(*log.lock().unwrap(), ["c commit", "d commit"]);
        assert_eq!(stack.len(), 0);
    }

    #[rstest]
    fn failures_are_collected_and_every_teardown_runs() {
        let log = Log::default();
        let stack = TeardownStack::default();
        push(&stack, recording("first", &log));
        push(&stack, Teardown::Sync {
            key: InjectionKey::qualified::<&str>("twice"),
            generator: Box::new(Recording {
                name: "twice",
                log: log.clone(),
                yields_on_finish: true,
                fails: false,
            }),
        });
        push(&stack, Teardown::Sync {
            key: InjectionKey::qualified::<&str>("broken"),
            generator: Box::new(Recording {
                name: "broken",
                log: log.clone(),
                yields_on_finish: false,
                fails: true,
            }),
        });
        let failure: Failure = Arc::new(std::io::Error::other("request failed"));

        let errors = stack.run(Some(&failure));

        assert_eq!(
            *log.lock().unwrap(),
            ["broken rollback", "twice rollback", "first rollback"]
        );
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0].kind, FactoryFailure::TeardownFailed(_)));
        assert!(matches!(errors[1].kind, FactoryFailure::YieldedTwice));
    }

    #[rstest]
    fn async_teardowns_need_the_async_runner() {
        let released = Arc::new(AtomicUsize::new(0));
        let make = |released: Arc<AtomicUsize>| Teardown::Async {
            key: InjectionKey::of::<u8>(),
            generator: Box::new(Erased::<_, u8>::new(AsyncResource::new(
                1_u8,
                move |_| async move {
                    released.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, DynError>(())
                },
            ))),
        };
        let stack = TeardownStack::default();

        let sync_errors = make(released.clone()).run(None);
        push(&stack, make(released.clone()));
        let async_errors = block_on(stack.run_async(None));

        assert!(matches!(
            sync_errors,
            Err(FactoryError {
                kind: FactoryFailure::AsyncInSyncContext,
                ..
            })
        ));
        assert!(async_errors.is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn serialized_cache_constructs_once() {
        let cache = Arc::new(InstanceCache::new(true));
        let constructed = Arc::new(AtomicUsize::new(0));
        let key = InjectionKey::of::<usize>();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let constructed = constructed.clone();
                let key = key.clone();
                thread::spawn(move || {
                    cache
                        .get_or_construct(&key, || {
                            thread::sleep(std::time::Duration::from_millis(5));
                            let count = constructed.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, FactoryError>(Instance::new(count))
                        })
                        .unwrap()
                })
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        let first = instances[0].downcast::<usize>().unwrap();
        for instance in &instances {
            assert!(Arc::ptr_eq(&first, &instance.downcast::<usize>().unwrap()));
        }
        assert_eq!(cache.len(), 1);
    }

    #[rstest]
    fn failed_construction_is_not_cached() {
        let cache = InstanceCache::new(false);
        let key = InjectionKey::of::<u8>();

        let failed = cache.get_or_construct(&key, || {
            Err(FactoryError::new(&key, FactoryFailure::DidNotYield))
        });
        let built = block_on(cache.get_or_construct_async(&key, || async {
            Ok::<_, FactoryError>(Instance::new(3_u8))
        }));

        assert!(matches!(
            failed.unwrap_err().kind,
            FactoryFailure::DidNotYield
        ));
        assert_eq!(*built.unwrap().downcast::<u8>().unwrap(), 3);
        assert!(cache.get(&key).is_some());
    }

    #[rstest]
    fn sealed_stack_hands_teardowns_back() {
        let log = Log::default();
        let stack = TeardownStack::default();

        let errors = stack.run(None);
        let late = stack.push(recording("late", &log));

        assert!(errors.is_empty());
        let Err(late) = late else {
            panic!("a drained stack must not accept teardowns");
        };
        assert!(late.run(None).is_ok());
        assert_eq!(*log.lock().unwrap(), ["late commit"]);
        assert_eq!(stack.len(), 0);
    }

    #[rstest]
    fn sync_caller_does_not_wait_for_async_construction() {
        let cache = InstanceCache::new(true);
        let key = InjectionKey::of::<u8>();
        let (release, released) = futures::channel::oneshot::channel::<()>();
        let mut pending = Box::pin(cache.get_or_construct_async(&key, || async {
            released.await.ok();
            Ok::<_, FactoryError>(Instance::new(1_u8))
        }));
        assert!(futures::FutureExt::now_or_never(pending.as_mut()).is_none());

        let sync = cache.get_or_construct(&key, || Ok::<_, FactoryError>(Instance::new(2_u8)));
        release.send(()).ok();
        let awaited = block_on(pending);

        assert!(matches!(
            sync.unwrap_err().kind,
            FactoryFailure::AsyncInSyncContext
        ));
        assert_eq!(*awaited.unwrap().downcast::<u8>().unwrap(), 1);
    }
}
