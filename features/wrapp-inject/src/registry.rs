use std::{
    any::TypeId,
    collections::{hash_map::Entry, HashMap},
};

use crate::{
    declaration::{AbstractBinding, InjectableDeclaration},
    dependency_graph::GraphError,
    types::{InjectionKey, TypeInfo},
};

/// Holds one declaration per concrete key and the implementations of each abstract type
///
/// Read only once the container is built.
#[derive(Default)]
pub struct Registry {
    declarations: Vec<InjectableDeclaration>,
    index: HashMap<InjectionKey, usize>,
    abstracts: HashMap<TypeId, AbstractEntry>,
}

pub(crate) struct AbstractEntry {
    pub info: TypeInfo,
    /// False if only implementations reference the type, but it was never registered itself
    pub declared: bool,
    pub implementations: Vec<usize>,
}

/// Where a requested key leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// A concrete declaration
    Concrete(usize),
    /// An implementation of the requested abstract type
    Implementation(usize),
    /// An abstract type with several implementations and no qualifier
    Ambiguous(usize),
    Missing,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, declaration: InjectableDeclaration) -> Result<(), GraphError> {
        let key = declaration.key.clone();
        if self.index.contains_key(&key) || self.abstracts.contains_key(&key.type_info.type_id) {
            return Err(GraphError::Duplicate(key));
        }

        let position = self.declarations.len();
        if let Some(implements) = &declaration.implements {
            let entry = self
                .abstracts
                .entry(implements.abstract_type.type_id)
                .or_insert_with(|| AbstractEntry {
                    info: implements.abstract_type,
                    declared: false,
                    implementations: Vec::new(),
                });

            let abstract_key =
                InjectionKey::with_qualifier(implements.abstract_type, key.qualifier.clone());
            let clashes = entry
                .implementations
                .iter()
                .any(|existing| self.declarations[*existing].key.qualifier == key.qualifier);
            if clashes {
                return Err(GraphError::Duplicate(abstract_key));
            }
            entry.implementations.push(position);
        }

        tracing::debug!(
            "Registered {} {} ({})",
            declaration.lifetime,
            key,
            declaration.factory.kind()
        );
        self.index.insert(key, position);
        self.declarations.push(declaration);
        Ok(())
    }

    pub fn register_abstract(&mut self, binding: AbstractBinding) -> Result<(), GraphError> {
        let info = binding.type_info;
        let concrete_exists = self
            .index
            .keys()
            .any(|key| key.type_info.type_id == info.type_id);
        if concrete_exists {
            return Err(GraphError::Duplicate(InjectionKey::with_qualifier(info, None)));
        }

        match self.abstracts.entry(info.type_id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().declared {
                    return Err(GraphError::Duplicate(InjectionKey::with_qualifier(info, None)));
                }
                occupied.get_mut().declared = true;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(AbstractEntry {
                    info,
                    declared: true,
                    implementations: Vec::new(),
                });
            }
        }

        tracing::debug!("Registered abstract {info}");
        Ok(())
    }

    pub fn declarations(&self) -> &[InjectableDeclaration] {
        &self.declarations
    }

    pub fn declaration(&self, position: usize) -> &InjectableDeclaration {
        &self.declarations[position]
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub(crate) fn abstracts(&self) -> impl Iterator<Item = &AbstractEntry> {
        self.abstracts.values()
    }

    pub(crate) fn lookup(&self, key: &InjectionKey) -> Lookup {
        if let Some(position) = self.index.get(key) {
            return Lookup::Concrete(*position);
        }

        let Some(entry) = self.abstracts.get(&key.type_info.type_id) else {
            return Lookup::Missing;
        };

        match &key.qualifier {
            Some(_) => entry
                .implementations
                .iter()
                .find(|position| self.declarations[**position].key.qualifier == key.qualifier)
                .map_or(Lookup::Missing, |position| Lookup::Implementation(*position)),
            None => match entry.implementations.as_slice() {
                [] => Lookup::Missing,
                [only] => Lookup::Implementation(*only),
                many => Lookup::Ambiguous(many.len()),
            },
        }
    }
}
