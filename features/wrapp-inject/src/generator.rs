//! Resource factories with a teardown phase
//!
//! A generator factory performs its setup, yields exactly one value which is
//! injected, and performs its teardown once the owning scope (or the root
//! container for singletons) closes. The teardown receives the failure that was
//! active when the scope closed, if any, so it can branch between commit and
//! rollback. It cannot suppress that failure.
//!
//! For the common acquire/release case use [`Resource`] or [`AsyncResource`].
//! Implement [`Generator`] or [`AsyncGenerator`] directly for anything else.

use std::{future::Future, marker::PhantomData};

use futures::{future::BoxFuture, FutureExt};

use crate::types::{DynError, Failure, Injectable, Instance};

/// What the generator is resumed with
#[derive(Debug, Clone)]
pub enum Signal {
    /// Run setup and yield the value
    Start,
    /// Run teardown, with the failure of the unit of work if there was one
    Finish(Option<Failure>),
}

/// Result of resuming a generator
#[derive(Debug)]
pub enum GeneratorState<T> {
    Yielded(T),
    Complete,
}

/// A synchronous factory with a teardown phase
///
/// Must yield on [`Signal::Start`] and complete on [`Signal::Finish`].
pub trait Generator<T>: Send + 'static {
    fn resume(&mut self, signal: Signal) -> Result<GeneratorState<T>, DynError>;
}

/// An asynchronous factory with a teardown phase
///
/// Must yield on [`Signal::Start`] and complete on [`Signal::Finish`].
pub trait AsyncGenerator<T>: Send + 'static {
    fn resume(
        &mut self,
        signal: Signal,
    ) -> impl Future<Output = Result<GeneratorState<T>, DynError>> + Send + '_;
}

/// Wrapper Trait for generators, yielding instances of Any
pub trait DynGenerator: Send {
    fn resume(&mut self, signal: Signal) -> Result<GeneratorState<Instance>, DynError>;
}

/// Wrapper Trait for async generators, yielding instances of Any
pub trait DynAsyncGenerator: Send {
    fn resume(&mut self, signal: Signal)
        -> BoxFuture<'_, Result<GeneratorState<Instance>, DynError>>;
}

pub(crate) struct Erased<G, T> {
    generator: G,
    _marker: PhantomData<fn() -> T>,
}

impl<G, T> Erased<G, T> {
    pub(crate) fn new(generator: G) -> Self {
        Self {
            generator,
            _marker: PhantomData,
        }
    }
}

impl<T: Injectable, G: Generator<T>> DynGenerator for Erased<G, T> {
    fn resume(&mut self, signal: Signal) -> Result<GeneratorState<Instance>, DynError> {
        Ok(match self.generator.resume(signal)? {
            GeneratorState::Yielded(value) => GeneratorState::Yielded(Instance::new(value)),
            GeneratorState::Complete => GeneratorState::Complete,
        })
    }
}

impl<T: Injectable, G: AsyncGenerator<T>> DynAsyncGenerator for Erased<G, T> {
    fn resume(
        &mut self,
        signal: Signal,
    ) -> BoxFuture<'_, Result<GeneratorState<Instance>, DynError>> {
        async move {
            Ok(match self.generator.resume(signal).await? {
                GeneratorState::Yielded(value) => GeneratorState::Yielded(Instance::new(value)),
                GeneratorState::Complete => GeneratorState::Complete,
            })
        }
        .boxed()
    }
}

/// Two phase resource: a value plus the function releasing it
///
/// # Example
/// ```rust
/// use wrapp_inject::generator::Resource;
///
/// struct Connection;
/// let resource = Resource::new(Connection, |failure| {
///     match failure {
///         Some(_) => { /* rollback */ }
///         None => { /* commit */ }
///     }
///     Ok(())
/// });
/// ```
pub struct Resource<T, Release> {
    value: Option<T>,
    release: Option<Release>,
}

impl<T, Release> Resource<T, Release>
where
    Release: FnOnce(Option<Failure>) -> Result<(), DynError>,
{
    pub fn new(value: T, release: Release) -> Self {
        Self {
            value: Some(value),
            release: Some(release),
        }
    }
}

impl<T, Release> Generator<T> for Resource<T, Release>
where
    T: Send + 'static,
    Release: FnOnce(Option<Failure>) -> Result<(), DynError> + Send + 'static,
{
    fn resume(&mut self, signal: Signal) -> Result<GeneratorState<T>, DynError> {
        match signal {
            Signal::Start => Ok(match self.value.take() {
                Some(value) => GeneratorState::Yielded(value),
                None => GeneratorState::Complete,
            }),
            Signal::Finish(failure) => {
                if let Some(release) = self.release.take() {
                    release(failure)?;
                }
                Ok(GeneratorState::Complete)
            }
        }
    }
}

/// Two phase resource with an asynchronous release
pub struct AsyncResource<T, Release> {
    value: Option<T>,
    release: Option<Release>,
}

impl<T, Release, Fut> AsyncResource<T, Release>
where
    Release: FnOnce(Option<Failure>) -> Fut,
    Fut: Future<Output = Result<(), DynError>>,
{
    pub fn new(value: T, release: Release) -> Self {
        Self {
            value: Some(value),
            release: Some(release),
        }
    }
}

impl<T, Release, Fut> AsyncGenerator<T> for AsyncResource<T, Release>
where
    T: Send + 'static,
    Release: FnOnce(Option<Failure>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), DynError>> + Send,
{
    fn resume(
        &mut self,
        signal: Signal,
    ) -> impl Future<Output = Result<GeneratorState<T>, DynError>> + Send + '_ {
        async move {
            match signal {
                Signal::Start => Ok(match self.value.take() {
                    Some(value) => GeneratorState::Yielded(value),
                    None => GeneratorState::Complete,
                }),
                Signal::Finish(failure) => {
                    if let Some(release) = self.release.take() {
                        release(failure).await?;
                    }
                    Ok(GeneratorState::Complete)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::executor::block_on;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn resource_yields_once_then_releases() {
        let released = Arc::new(Mutex::new(None));
        let seen = released.clone();
        let mut resource = Resource::new(7_u32, move |failure: Option<Failure>| {
            *seen.lock().unwrap() = Some(failure.is_some());
            Ok(())
        });

        assert!(matches!(
            resource.resume(Signal::Start).unwrap(),
            GeneratorState::Yielded(7)
        ));
        assert!(matches!(
            resource.resume(Signal::Finish(None)).unwrap(),
            GeneratorState::Complete
        ));
        assert_eq!(*released.lock().unwrap(), Some(false));
    }

    #[rstest]
    fn async_resource_sees_failure() {
        let released = Arc::new(Mutex::new(None));
        let seen = released.clone();
        let mut resource = AsyncResource::new("conn", move |failure: Option<Failure>| async move {
            *seen.lock().unwrap() = failure.map(|f| f.to_string());
            Ok::<_, DynError>(())
        });
        let failure: Failure = Arc::new(std::io::Error::other("request failed"));

        block_on(async {
            assert!(matches!(
                resource.resume(Signal::Start).await.unwrap(),
                GeneratorState::Yielded("conn")
            ));
            resource.resume(Signal::Finish(Some(failure))).await.unwrap();
        });

        assert_eq!(released.lock().unwrap().as_deref(), Some("request failed"));
    }

    #[rstest]
    fn erased_generator_wraps_yielded_value() {
        let mut erased: Erased<_, String> =
            Erased::new(Resource::new(String::from("value"), |_| Ok(())));

        let GeneratorState::Yielded(instance) = DynGenerator::resume(&mut erased, Signal::Start)
            .unwrap()
        else {
            panic!("expected a yielded instance");
        };

        assert_eq!(*instance.downcast::<String>().unwrap(), "value");
    }
}
