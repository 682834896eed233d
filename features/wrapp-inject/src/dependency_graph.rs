use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;
use wrapp_config::{ConfigStore, Expression};

use crate::{
    declaration::{InjectableDeclaration, ParamSpec},
    registry::{Lookup, Registry},
    types::{InjectionKey, Lifetime},
};

/// Graph of all declarations
///
/// Built once when the container is built, used to reject missing, circular and
/// lifetime incompatible dependencies before anything is resolved.
#[derive(Debug)]
pub struct DependencyGraph {
    map: BTreeMap<InjectionKey, DependencyGraphEntry>,
    /// Keys whose construction awaits an async factory somewhere below them
    asynchronous: HashSet<InjectionKey>,
}

#[derive(Debug)]
struct DependencyGraphEntry {
    lifetime: Lifetime,
    is_async: bool,
    /// Concrete keys of resolved service parameters
    edges: Vec<Edge>,
}

#[derive(Debug)]
struct Edge {
    target: InjectionKey,
    parameter: usize,
}

impl DependencyGraph {
    /// Builds and validates the graph of the registry
    ///
    /// Returns a list of all issues
    pub fn new(registry: &Registry, config: &ConfigStore) -> Result<Self, GraphErrors> {
        let mut errors = Vec::new();
        let mut graph = Self {
            map: BTreeMap::new(),
            asynchronous: HashSet::new(),
        };

        for entry in registry.abstracts().filter(|entry| !entry.declared) {
            for position in &entry.implementations {
                errors.push(GraphError::UnknownInjectable {
                    dependency: InjectionKey::with_qualifier(entry.info, None),
                    required_by: registry.declaration(*position).key.clone(),
                    parameter: None,
                    candidates: 0,
                });
            }
        }

        for declaration in registry.declarations() {
            let edges = collect_edges(registry, config, declaration, &mut errors);
            graph.map.insert(
                declaration.key.clone(),
                DependencyGraphEntry {
                    lifetime: declaration.lifetime,
                    is_async: declaration.is_async(),
                    edges,
                },
            );
        }

        graph.check(&mut errors);

        if !errors.is_empty() {
            for error in &errors {
                tracing::error!("{error}");
            }
            return Err(GraphErrors { errors });
        }

        graph.asynchronous = graph.collect_asynchronous();
        tracing::debug!("Dependency graph of {} declarations is valid", graph.len());
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &InjectionKey> {
        self.map.keys()
    }

    /// Concrete keys the declaration of `key` depends on
    pub fn dependencies_of(&self, key: &InjectionKey) -> Option<Vec<&InjectionKey>> {
        self.map
            .get(key)
            .map(|entry| entry.edges.iter().map(|edge| &edge.target).collect())
    }

    /// Whether constructing `key` needs the async API
    ///
    /// True if its own factory or the factory of any transitive dependency is async.
    pub fn requires_async(&self, key: &InjectionKey) -> bool {
        self.asynchronous.contains(key)
    }

    /// Marks every entry that awaits an async factory, only valid on an acyclic graph
    fn collect_asynchronous(&self) -> HashSet<InjectionKey> {
        let mut memo = HashMap::new();
        for key in self.map.keys() {
            visit(self, &mut memo, key);
        }
        return memo
            .into_iter()
            .filter_map(|(key, is_async)| is_async.then(|| key.clone()))
            .collect();

        fn visit<'a>(
            graph: &'a DependencyGraph,
            memo: &mut HashMap<&'a InjectionKey, bool>,
            key: &'a InjectionKey,
        ) -> bool {
            if let Some(is_async) = memo.get(key) {
                return *is_async;
            }
            let Some(entry) = graph.map.get(key) else {
                return false;
            };
            let mut is_async = entry.is_async;
            for edge in &entry.edges {
                is_async |= visit(graph, memo, &edge.target);
            }
            memo.insert(key, is_async);
            is_async
        }
    }

    /// Checks lifetimes and cycles of all entries
    fn check(&self, errors: &mut Vec<GraphError>) {
        let mut checked = HashSet::new();
        for key in self.map.keys() {
            let mut dependency_chain = Vec::new();
            check_recurse(self, &mut checked, errors, &mut dependency_chain, key);
        }

        fn check_recurse<'a>(
            graph: &'a DependencyGraph,
            checked: &mut HashSet<&'a InjectionKey>,
            errors: &mut Vec<GraphError>,
            dependency_chain: &mut Vec<&'a InjectionKey>,
            key: &'a InjectionKey,
        ) {
            // Circular Dependency Check
            if let Some(start) = dependency_chain.iter().position(|entry| *entry == key) {
                let mut chain: Vec<InjectionKey> = dependency_chain[start..]
                    .iter()
                    .map(|entry| (*entry).clone())
                    .collect();
                chain.push(key.clone()); // Close the cycle

                errors.push(GraphError::CircularDependency { chain });
                return;
            }

            // Skip other checks if already checked
            if !checked.insert(key) {
                return;
            }

            let Some(entry) = graph.map.get(key) else {
                return;
            };

            dependency_chain.push(key);

            for edge in &entry.edges {
                let Some(next_entry) = graph.map.get(&edge.target) else {
                    continue;
                };

                if !entry.lifetime.can_depend_on(next_entry.lifetime) {
                    errors.push(GraphError::LifetimeMismatch {
                        declaration: key.clone(),
                        lifetime: entry.lifetime,
                        dependency: edge.target.clone(),
                        dependency_lifetime: next_entry.lifetime,
                        parameter: edge.parameter,
                    });
                }

                check_recurse(graph, checked, errors, dependency_chain, &edge.target);
            }

            dependency_chain.pop();
        }
    }
}

/// Resolves the parameters of a declaration into edges, reporting missing targets and config keys
fn collect_edges(
    registry: &Registry,
    config: &ConfigStore,
    declaration: &InjectableDeclaration,
    errors: &mut Vec<GraphError>,
) -> Vec<Edge> {
    let required_by = &declaration.key;
    let mut edges = Vec::new();

    for (parameter, param) in declaration.params.iter().enumerate() {
        match param {
            ParamSpec::Service { key, optional } => match registry.lookup(key) {
                Lookup::Concrete(position) | Lookup::Implementation(position) => {
                    edges.push(Edge {
                        target: registry.declaration(position).key.clone(),
                        parameter,
                    });
                }
                Lookup::Missing if *optional => {}
                Lookup::Missing => errors.push(GraphError::UnknownInjectable {
                    dependency: key.clone(),
                    required_by: required_by.clone(),
                    parameter: Some(parameter),
                    candidates: 0,
                }),
                Lookup::Ambiguous(candidates) => errors.push(GraphError::UnknownInjectable {
                    dependency: key.clone(),
                    required_by: required_by.clone(),
                    parameter: Some(parameter),
                    candidates,
                }),
            },
            ParamSpec::Config { key } => {
                if !config.contains(key) {
                    errors.push(GraphError::UnknownConfigKey {
                        key: key.clone(),
                        required_by: required_by.clone(),
                        parameter,
                    });
                }
            }
            ParamSpec::Expression { template } => match Expression::parse(template) {
                Ok(expression) => {
                    for key in expression.placeholders().filter(|key| !config.contains(key)) {
                        errors.push(GraphError::UnknownConfigKey {
                            key: key.to_string(),
                            required_by: required_by.clone(),
                            parameter,
                        });
                    }
                }
                Err(error) => errors.push(GraphError::InvalidExpression {
                    required_by: required_by.clone(),
                    parameter,
                    message: error.to_string(),
                }),
            },
        }
    }

    edges
}

#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("'{0}' has been registered twice")]
    Duplicate(InjectionKey),
    #[error("'{required_by}' needs '{dependency}'{} but it is {}", parameter_suffix(.parameter), missing_reason(.candidates))]
    UnknownInjectable {
        dependency: InjectionKey,
        required_by: InjectionKey,
        parameter: Option<usize>,
        /// Number of implementations when the dependency is an ambiguous abstract type
        candidates: usize,
    },
    #[error("'{required_by}' needs config key '{key}' (parameter {parameter}) but it is missing")]
    UnknownConfigKey {
        key: String,
        required_by: InjectionKey,
        parameter: usize,
    },
    #[error("A Circular Dependency exists through {}", display_chain(.chain))]
    CircularDependency { chain: Vec<InjectionKey> },
    #[error("'{declaration}' is {lifetime} but depends on {dependency_lifetime} '{dependency}' (parameter {parameter})")]
    LifetimeMismatch {
        declaration: InjectionKey,
        lifetime: Lifetime,
        dependency: InjectionKey,
        dependency_lifetime: Lifetime,
        parameter: usize,
    },
    #[error("'{required_by}' has an invalid expression (parameter {parameter}): {message}")]
    InvalidExpression {
        required_by: InjectionKey,
        parameter: usize,
        message: String,
    },
}

fn parameter_suffix(parameter: &Option<usize>) -> String {
    match parameter {
        Some(parameter) => format!(" (parameter {parameter})"),
        None => String::new(),
    }
}

fn missing_reason(candidates: &usize) -> String {
    match *candidates {
        0 => "missing".to_string(),
        n => format!("ambiguous between {n} implementations - add a qualifier"),
    }
}

fn display_chain(chain: &[InjectionKey]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl std::fmt::Display for GraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[derive(Error, Debug, Clone)]
pub struct GraphErrors {
    pub errors: Vec<GraphError>,
}
