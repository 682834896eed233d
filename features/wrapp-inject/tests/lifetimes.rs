//! Identity and ownership of singleton, scoped and transient instances

use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use rstest::*;
use wrapp_inject::{
    ArgumentError, Container, ContainerBuilder, InjectableDeclaration, Lifetime, ResolveError,
    ScopeOptions,
};

struct A;

struct B {
    a: Arc<A>,
}

struct Request(usize);

/// `A` singleton, `B` scoped on `A`, `Request` transient
#[fixture]
fn container() -> Container {
    let counter = Arc::new(AtomicUsize::new(0));
    ContainerBuilder::new()
        .register(InjectableDeclaration::singleton::<A>().constructor(|_| Ok::<_, Infallible>(A)))
        .register(
            InjectableDeclaration::scoped::<B>()
                .depends_on::<A>()
                .constructor(|args| Ok::<_, ArgumentError>(B { a: args.service(0)? })),
        )
        .register(
            InjectableDeclaration::transient::<Request>().function(move |_| {
                Ok::<_, Infallible>(Request(counter.fetch_add(1, Ordering::SeqCst)))
            }),
        )
        .build()
        .unwrap()
}

#[rstest]
fn singleton_is_identical_across_calls(container: Container) {
    // Act
    let first = container.get::<A>().unwrap();
    let second = container.get::<A>().unwrap();

    // Assert
    assert!(Arc::ptr_eq(&first, &second));
}

#[rstest]
fn scoped_and_singleton_scenario(container: Container) {
    // Arrange
    let scope1 = container.enter_scope();
    let scope2 = container.enter_scope();

    // Act
    let b1 = scope1.get::<B>().unwrap();
    let b1_again = scope1.get::<B>().unwrap();
    let b2 = scope2.get::<B>().unwrap();

    // Assert
    assert!(Arc::ptr_eq(&b1, &b1_again));
    assert!(!Arc::ptr_eq(&b1, &b2));
    assert!(Arc::ptr_eq(
        &scope1.get::<A>().unwrap(),
        &scope2.get::<A>().unwrap()
    ));
    assert!(Arc::ptr_eq(&b1.a, &b2.a));
    assert!(Arc::ptr_eq(&b1.a, &container.get::<A>().unwrap()));
}

#[rstest]
fn transient_is_fresh_per_resolution(container: Container) {
    // Arrange
    let scope = container.enter_scope();

    // Act
    let first = scope.get::<Request>().unwrap();
    let second = scope.get::<Request>().unwrap();

    // Assert
    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.0, second.0);
}

#[rstest]
fn scope_is_required_outside_singletons(container: Container) {
    // Act
    let scoped = container.get::<B>().map(|_| ()).unwrap_err();
    let transient = container.get::<Request>().map(|_| ()).unwrap_err();

    // Assert
    assert!(matches!(
        scoped,
        ResolveError::ScopeRequired { lifetime: Lifetime::Scoped, .. }
    ));
    assert!(matches!(
        transient,
        ResolveError::ScopeRequired { lifetime: Lifetime::Transient, .. }
    ));
}

#[rstest]
fn closed_scope_is_inert(container: Container) {
    // Arrange
    let scope = container.enter_scope();
    scope.get::<B>().unwrap();

    // Act
    scope.close().unwrap();

    // Assert
    assert!(scope.is_closed());
    assert!(matches!(
        scope.get::<B>(),
        Err(ResolveError::ScopeClosed(id)) if id == scope.id()
    ));
    assert!(scope.close().is_ok());
}

#[rstest]
fn closed_container_refuses_singletons(container: Container) {
    // Arrange
    let scope = container.enter_scope();

    // Act
    container.close().unwrap();

    // Assert
    assert!(container.is_closed());
    assert!(matches!(container.get::<A>(), Err(ResolveError::ContainerClosed)));
    assert!(matches!(scope.get::<B>(), Err(ResolveError::ContainerClosed)));
    assert!(scope.get::<Request>().is_ok());
    assert!(container.close().is_ok());
}

#[rstest]
fn nested_scope_starts_empty(container: Container) {
    // Arrange
    let parent = container.enter_scope();
    let parent_b = parent.get::<B>().unwrap();

    // Act
    let child = parent.enter_scope();
    let child_b = child.get::<B>().unwrap();

    // Assert
    assert_eq!(child.parent().map(|scope| scope.id()), Some(parent.id()));
    assert!(!Arc::ptr_eq(&parent_b, &child_b));
    child.close().unwrap();
    assert!(!parent.is_closed());
}

#[rstest]
fn shared_scope_hands_out_one_instance_across_threads(container: Container) {
    // Arrange
    let scope = container.enter_scope_with(ScopeOptions { shared: true });

    // Act
    let instances: Vec<Arc<B>> = std::thread::scope(|threads| {
        let handles: Vec<_> = (0..4)
            .map(|_| threads.spawn(|| scope.get::<B>().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Assert
    for instance in &instances {
        assert!(Arc::ptr_eq(instance, &instances[0]));
    }
}

#[rstest]
fn unknown_types_are_rejected_at_runtime(container: Container) {
    // Act
    let error = container.get::<String>().map(|_| ()).unwrap_err();

    // Assert
    assert!(matches!(error, ResolveError::UnknownInjectable(key) if key.type_info.type_name == "alloc::string::String"));
}
