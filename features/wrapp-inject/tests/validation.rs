//! Problems of the declaration graph are all reported when building

use std::{convert::Infallible, sync::Arc};

use rstest::*;
use wrapp_config::ConfigStore;
use wrapp_inject::{
    AbstractBinding, ArgumentError, BuildError, ContainerBuilder, GraphError, InjectableDeclaration,
    InjectionKey, Lifetime, ResolveError,
};

struct A;
struct B;

trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
}

struct Mail;
impl Notifier for Mail {
    fn channel(&self) -> &'static str {
        "mail"
    }
}

struct Sms;
impl Notifier for Sms {
    fn channel(&self) -> &'static str {
        "sms"
    }
}

fn graph_errors(result: Result<wrapp_inject::Container, BuildError>) -> Vec<GraphError> {
    match result {
        Ok(_) => panic!("build must fail"),
        Err(BuildError::Graph(errors)) => errors.errors,
    }
}

#[rstest]
fn cycle_is_rejected_at_build() {
    // Arrange
    let builder = ContainerBuilder::new()
        .register(
            InjectableDeclaration::singleton::<A>()
                .depends_on::<B>()
                .constructor(|_| Ok::<_, Infallible>(A)),
        )
        .register(
            InjectableDeclaration::singleton::<B>()
                .depends_on::<A>()
                .constructor(|_| Ok::<_, Infallible>(B)),
        );

    // Act
    let errors = graph_errors(builder.build());

    // Assert
    let [GraphError::CircularDependency { chain }] = errors.as_slice() else {
        panic!("expected a single cycle, got {errors:?}");
    };
    assert!(chain.contains(&InjectionKey::of::<A>()));
    assert!(chain.contains(&InjectionKey::of::<B>()));
}

#[rstest]
fn self_dependency_is_rejected_at_build() {
    // Arrange
    let builder = ContainerBuilder::new().register(
        InjectableDeclaration::scoped::<A>()
            .depends_on::<A>()
            .constructor(|_| Ok::<_, Infallible>(A)),
    );

    // Act
    let errors = graph_errors(builder.build());

    // Assert
    assert!(matches!(
        errors.as_slice(),
        [GraphError::CircularDependency { chain }]
            if *chain == [InjectionKey::of::<A>(), InjectionKey::of::<A>()]
    ));
}

#[rstest]
fn singleton_on_scoped_is_rejected_even_if_never_resolved() {
    // Arrange
    let builder = ContainerBuilder::new()
        .register(
            InjectableDeclaration::singleton::<A>()
                .depends_on::<B>()
                .constructor(|_| Ok::<_, Infallible>(A)),
        )
        .register(InjectableDeclaration::scoped::<B>().constructor(|_| Ok::<_, Infallible>(B)));

    // Act
    let errors = graph_errors(builder.build());

    // Assert
    let [GraphError::LifetimeMismatch {
        declaration,
        lifetime,
        dependency,
        dependency_lifetime,
        ..
    }] = errors.as_slice()
    else {
        panic!("expected a lifetime mismatch, got {errors:?}");
    };
    assert_eq!(*declaration, InjectionKey::of::<A>());
    assert_eq!(*lifetime, Lifetime::Singleton);
    assert_eq!(*dependency, InjectionKey::of::<B>());
    assert_eq!(*dependency_lifetime, Lifetime::Scoped);
}

#[rstest]
fn unknown_dependency_names_the_requester() {
    // Arrange
    let builder = ContainerBuilder::new().register(
        InjectableDeclaration::singleton::<A>()
            .depends_on_qualified::<B>("primary")
            .constructor(|_| Ok::<_, Infallible>(A)),
    );

    // Act
    let errors = graph_errors(builder.build());

    // Assert
    assert!(matches!(
        errors.as_slice(),
        [GraphError::UnknownInjectable { dependency, required_by, parameter: Some(0), .. }]
            if *dependency == InjectionKey::qualified::<B>("primary")
                && *required_by == InjectionKey::of::<A>()
    ));
    assert!(errors[0].to_string().contains("B[primary]"));
}

#[rstest]
fn expression_is_interpolated_from_config() {
    // Arrange
    let config: ConfigStore = [("x", 1), ("y", 2)].into_iter().collect();
    let container = ContainerBuilder::new()
        .with_config(config)
        .register(
            InjectableDeclaration::singleton::<String>()
                .expression("${x}-${y}")
                .constructor(|args| Ok::<_, ArgumentError>(args.text(0)?.to_string())),
        )
        .build()
        .unwrap();

    // Act
    let value = container.get::<String>().unwrap();

    // Assert
    assert_eq!(*value, "1-2");
}

#[rstest]
#[case::plain_config(InjectableDeclaration::singleton::<A>().config("db.port"))]
#[case::expression(InjectableDeclaration::singleton::<A>().expression("${db.port}/x"))]
fn missing_config_key_is_rejected(#[case] declaration: wrapp_inject::DeclarationBuilder<A>) {
    // Arrange
    let builder = ContainerBuilder::new()
        .register(declaration.constructor(|_| Ok::<_, Infallible>(A)));

    // Act
    let errors = graph_errors(builder.build());

    // Assert
    assert!(matches!(
        errors.as_slice(),
        [GraphError::UnknownConfigKey { key, .. }] if key == "db.port"
    ));
}

#[rstest]
fn structured_config_is_deserialized() {
    // Arrange
    #[derive(serde::Deserialize)]
    struct Limits {
        max: u32,
    }
    let mut config = ConfigStore::new();
    config
        .add_config("limits", serde_json::json!({ "max": 10 }))
        .unwrap();
    let container = ContainerBuilder::new()
        .with_config(config)
        .register(
            InjectableDeclaration::singleton::<u32>()
                .config("limits")
                .constructor(|args| Ok::<_, ArgumentError>(args.config::<Limits>(0)?.max)),
        )
        .build()
        .unwrap();

    // Act
    let max = container.get::<u32>().unwrap();

    // Assert
    assert_eq!(*max, 10);
}

#[rstest]
fn single_implementation_is_selected_for_an_abstract_type() {
    // Arrange
    let container = ContainerBuilder::new()
        .register_abstract(AbstractBinding::of::<dyn Notifier>())
        .register(
            InjectableDeclaration::singleton::<Mail>()
                .implements::<dyn Notifier>(|mail| mail)
                .constructor(|_| Ok::<_, Infallible>(Mail)),
        )
        .build()
        .unwrap();

    // Act
    let notifier = container.get::<dyn Notifier>().unwrap();
    let mail = container.get::<Mail>().unwrap();

    // Assert
    assert_eq!(notifier.channel(), "mail");
    assert!(std::ptr::addr_eq(Arc::as_ptr(&notifier), Arc::as_ptr(&mail)));
}

#[rstest]
fn several_implementations_need_a_qualifier() {
    // Arrange
    let mail = InjectableDeclaration::singleton::<Mail>()
        .qualifier("mail")
        .implements::<dyn Notifier>(|mail| mail)
        .constructor(|_| Ok::<_, Infallible>(Mail));
    let sms = InjectableDeclaration::singleton::<Sms>()
        .qualifier("sms")
        .implements::<dyn Notifier>(|sms| sms)
        .constructor(|_| Ok::<_, Infallible>(Sms));
    let consumer = InjectableDeclaration::singleton::<A>()
        .depends_on::<dyn Notifier>()
        .constructor(|_| Ok::<_, Infallible>(A));

    // Act
    let container = ContainerBuilder::new()
        .register_abstract(AbstractBinding::of::<dyn Notifier>())
        .register(mail.clone())
        .register(sms.clone())
        .build()
        .unwrap();
    let errors = graph_errors(
        ContainerBuilder::new()
            .register_abstract(AbstractBinding::of::<dyn Notifier>())
            .register(mail)
            .register(sms)
            .register(consumer)
            .build(),
    );

    // Assert
    assert_eq!(
        container.get_qualified::<dyn Notifier>("sms").unwrap().channel(),
        "sms"
    );
    assert!(matches!(
        container.get::<dyn Notifier>(),
        Err(ResolveError::Ambiguous { candidates: 2, .. })
    ));
    assert!(matches!(
        errors.as_slice(),
        [GraphError::UnknownInjectable { candidates: 2, .. }]
    ));
}

#[rstest]
fn every_problem_is_reported_together() {
    // Arrange
    let builder = ContainerBuilder::new()
        .add_instance(A)
        .add_instance(A)
        .register(
            InjectableDeclaration::singleton::<B>()
                .depends_on::<String>()
                .config("missing")
                .constructor(|_| Ok::<_, Infallible>(B)),
        );

    // Act
    let Err(error) = builder.build() else {
        panic!("build must fail");
    };

    // Assert
    let BuildError::Graph(errors) = &error;
    assert_eq!(errors.errors.len(), 3);
    let message = error.to_string();
    assert!(message.starts_with("The dependency graph had one or more errors:"));
    assert_eq!(message.lines().filter(|line| line.starts_with("- ")).count(), 3);
}
