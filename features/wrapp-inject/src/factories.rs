use std::{fmt, future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};

use crate::{
    generator::{AsyncGenerator, DynAsyncGenerator, DynGenerator, Erased, Generator},
    resolver::arguments::Arguments,
    types::{DynError, Injectable, Instance},
};

pub type SyncFactoryFn = Arc<dyn Fn(Arguments) -> Result<Instance, DynError> + Send + Sync>;
pub type AsyncFactoryFn =
    Arc<dyn Fn(Arguments) -> BoxFuture<'static, Result<Instance, DynError>> + Send + Sync>;
pub type SyncGeneratorFn =
    Arc<dyn Fn(Arguments) -> Result<Box<dyn DynGenerator>, DynError> + Send + Sync>;
pub type AsyncGeneratorFn = Arc<
    dyn Fn(Arguments) -> BoxFuture<'static, Result<Box<dyn DynAsyncGenerator>, DynError>>
        + Send
        + Sync,
>;

/// How an injectable is constructed
///
/// Dispatch happens on the tag, nothing is introspected at call time.
#[derive(Clone)]
pub enum Factory {
    /// Builds the declared type directly
    Constructor(SyncFactoryFn),
    /// A plain function returning the declared type
    SyncFunction(SyncFactoryFn),
    /// An async function returning the declared type
    AsyncFunction(AsyncFactoryFn),
    /// Yields the instance once and tears it down later
    SyncGenerator(SyncGeneratorFn),
    /// Async version of [`Factory::SyncGenerator`]
    AsyncGenerator(AsyncGeneratorFn),
}

impl Factory {
    pub fn constructor<T, F, E>(constructor: F) -> Self
    where
        T: Injectable,
        F: Fn(Arguments) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        Factory::Constructor(erase_sync(constructor))
    }

    pub fn function<T, F, E>(function: F) -> Self
    where
        T: Injectable,
        F: Fn(Arguments) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        Factory::SyncFunction(erase_sync(function))
    }

    pub fn async_function<T, F, Fut, E>(function: F) -> Self
    where
        T: Injectable,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<DynError>,
    {
        Factory::AsyncFunction(Arc::new(move |arguments| {
            let construction_fut = function(arguments);
            async move {
                construction_fut
                    .await
                    .map(Instance::new)
                    .map_err(Into::<DynError>::into)
            }
            .boxed()
        }))
    }

    pub fn generator<T, G, F, E>(start: F) -> Self
    where
        T: Injectable,
        G: Generator<T>,
        F: Fn(Arguments) -> Result<G, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        Factory::SyncGenerator(Arc::new(move |arguments| {
            start(arguments)
                .map(|generator| Box::new(Erased::<G, T>::new(generator)) as Box<dyn DynGenerator>)
                .map_err(Into::<DynError>::into)
        }))
    }

    pub fn async_generator<T, G, F, Fut, E>(start: F) -> Self
    where
        T: Injectable,
        G: AsyncGenerator<T>,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<G, E>> + Send + 'static,
        E: Into<DynError>,
    {
        Factory::AsyncGenerator(Arc::new(move |arguments| {
            let start_fut = start(arguments);
            async move {
                start_fut
                    .await
                    .map(|generator| {
                        Box::new(Erased::<G, T>::new(generator)) as Box<dyn DynAsyncGenerator>
                    })
                    .map_err(Into::<DynError>::into)
            }
            .boxed()
        }))
    }

    /// A factory handing out an already constructed instance
    pub(crate) fn existing(instance: Instance) -> Self {
        Factory::Constructor(Arc::new(move |_: Arguments| Ok::<_, DynError>(instance.clone())))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Factory::AsyncFunction(_) | Factory::AsyncGenerator(_))
    }

    pub fn is_generator(&self) -> bool {
        matches!(self, Factory::SyncGenerator(_) | Factory::AsyncGenerator(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Factory::Constructor(_) => "constructor",
            Factory::SyncFunction(_) => "function",
            Factory::AsyncFunction(_) => "async function",
            Factory::SyncGenerator(_) => "generator",
            Factory::AsyncGenerator(_) => "async generator",
        }
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

fn erase_sync<T, F, E>(factory: F) -> SyncFactoryFn
where
    T: Injectable,
    F: Fn(Arguments) -> Result<T, E> + Send + Sync + 'static,
    E: Into<DynError>,
{
    Arc::new(move |arguments| {
        factory(arguments)
            .map(Instance::new)
            .map_err(Into::<DynError>::into)
    })
}
