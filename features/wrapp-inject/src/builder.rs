use wrapp_config::ConfigStore;

use crate::{
    container::Container,
    declaration::{AbstractBinding, InjectableDeclaration},
    dependency_graph::{DependencyGraph, GraphError, GraphErrors},
    errors::BuildError,
    factories::Factory,
    registry::Registry,
    types::{Injectable, InjectionKey, Instance, Lifetime, Qualifier, TypeInfo},
};

/// Collects declarations and config, then validates everything at once
///
/// Registration never fails on its own. Duplicates are reported by [`ContainerBuilder::build`]
/// together with every other problem of the graph.
#[derive(Default)]
pub struct ContainerBuilder {
    registry: Registry,
    config: ConfigStore,
    errors: Vec<GraphError>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, declaration: InjectableDeclaration) -> Self {
        if let Err(error) = self.registry.register(declaration) {
            self.errors.push(error);
        }
        self
    }

    pub fn register_abstract(mut self, binding: AbstractBinding) -> Self {
        if let Err(error) = self.registry.register_abstract(binding) {
            self.errors.push(error);
        }
        self
    }

    /// Registers an already constructed singleton
    pub fn add_instance<T: Injectable>(self, instance: T) -> Self {
        self.add_existing(InjectionKey::of::<T>(), Instance::new(instance))
    }

    pub fn add_qualified_instance<T: Injectable>(
        self,
        qualifier: impl Into<Qualifier>,
        instance: T,
    ) -> Self {
        self.add_existing(InjectionKey::qualified::<T>(qualifier), Instance::new(instance))
    }

    fn add_existing(self, key: InjectionKey, instance: Instance) -> Self {
        self.register(InjectableDeclaration {
            key,
            lifetime: Lifetime::Singleton,
            factory: Factory::existing(instance),
            params: Vec::new(),
            implements: None,
        })
    }

    pub fn with_config(mut self, config: ConfigStore) -> Self {
        self.config = config;
        self
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    /// Validates all declarations and creates the container
    ///
    /// Nothing is constructed here, instances are created on first use.
    pub fn build(self) -> Result<Container, BuildError> {
        let Self {
            registry,
            config,
            mut errors,
        } = self;

        let graph = match DependencyGraph::new(&registry, &config) {
            Ok(graph) if errors.is_empty() => graph,
            Ok(_) => {
                for error in &errors {
                    tracing::error!("{error}");
                }
                return Err(GraphErrors { errors }.into());
            }
            Err(graph_errors) => {
                for error in &errors {
                    tracing::error!("{error}");
                }
                errors.extend(graph_errors.errors);
                return Err(GraphErrors { errors }.into());
            }
        };

        tracing::debug!("Built container with {} declarations", registry.len());
        Ok(Container::new(registry, graph, config))
    }
}

impl std::fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let declarations: Vec<String> = self
            .registry
            .declarations()
            .iter()
            .map(|declaration| format!("{} {}", declaration.lifetime, declaration.key))
            .collect();
        let abstracts: Vec<TypeInfo> = self.registry.abstracts().map(|entry| entry.info).collect();
        f.debug_struct("ContainerBuilder")
            .field("declarations", &declarations)
            .field("abstracts", &abstracts)
            .field("config_keys", &self.config.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}
