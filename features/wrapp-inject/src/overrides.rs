use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError, Weak,
    },
};

use crate::{
    container::ContainerInner,
    types::{InjectionKey, Instance},
};

/// Stacks of substitutions, one stack per key
///
/// Consulted before any declaration. Entries are identified, so dropping a guard
/// removes exactly the entry it pushed even if guards are dropped out of order.
#[derive(Default)]
pub(crate) struct OverrideStack {
    entries: Mutex<HashMap<InjectionKey, Vec<(u64, Instance)>>>,
    next_id: AtomicU64,
}

impl OverrideStack {
    fn entries(&self) -> MutexGuard<'_, HashMap<InjectionKey, Vec<(u64, Instance)>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, key: InjectionKey, instance: Instance) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Overriding {key}");
        self.entries().entry(key).or_default().push((id, instance));
        id
    }

    pub(crate) fn remove(&self, key: &InjectionKey, id: u64) {
        let mut entries = self.entries();
        let Some(stack) = entries.get_mut(key) else {
            return;
        };
        stack.retain(|(entry_id, _)| *entry_id != id);
        if stack.is_empty() {
            entries.remove(key);
        }
        tracing::debug!("Removed override of {key}");
    }

    /// The most recently pushed replacement of `key`
    pub(crate) fn top(&self, key: &InjectionKey) -> Option<Instance> {
        self.entries()
            .get(key)
            .and_then(|stack| stack.last())
            .map(|(_, instance)| instance.clone())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries().values().map(Vec::len).sum()
    }
}

/// Keeps an override active until dropped
///
/// Dropping the guard restores whatever was visible before it was created.
#[must_use = "the override is removed as soon as the guard is dropped"]
pub struct OverrideGuard {
    container: Weak<ContainerInner>,
    key: InjectionKey,
    id: u64,
}

impl OverrideGuard {
    pub(crate) fn new(container: Weak<ContainerInner>, key: InjectionKey, id: u64) -> Self {
        Self { container, key, id }
    }

    pub fn key(&self) -> &InjectionKey {
        &self.key
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if let Some(container) = self.container.upgrade() {
            container.overrides.remove(&self.key, self.id);
        }
    }
}

impl std::fmt::Debug for OverrideGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideGuard")
            .field("key", &self.key.to_string())
            .field("id", &self.id)
            .finish()
    }
}
