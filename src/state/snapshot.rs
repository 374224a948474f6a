use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::logger::LogLevel;
use crate::state::logger::OBSERVER_LOGGER;
use crate::state::model::Entity;

/// Immutable, identity-unique, sorted sequence of entities.
///
/// Cloning is cheap; the items are shared.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T: Entity> {
    items: Arc<Vec<T>>,
}

impl<T: Entity> Default for Snapshot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Entity> Snapshot<T> {
    pub fn empty() -> Self {
        Self {
            items: Arc::new(Vec::new()),
        }
    }

    /// Sorts `items` with `compare` (identity breaking ties) and drops repeated identities,
    /// keeping the first occurrence.
    pub fn from_items<F>(mut items: Vec<T>, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering,
    {
        items.sort_by(|lhs, rhs| compare(lhs, rhs).then_with(|| lhs.id().cmp(&rhs.id())));
        let before = items.len();
        let mut seen = BTreeSet::new();
        items.retain(|item| seen.insert(item.id()));
        if items.len() != before {
            OBSERVER_LOGGER.log_with(
                LogLevel::Warn,
                vec![format!(
                    "Dropped {} duplicate {} record(s) while building a snapshot",
                    before - items.len(),
                    T::KIND.as_str()
                )],
            );
        }
        Self {
            items: Arc::new(items),
        }
    }

    /// Wraps items already known to be ordered and unique.
    pub(crate) fn from_sorted(items: Vec<T>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.as_ref().clone()
    }

    pub fn ids(&self) -> Vec<T::Id> {
        self.items.iter().map(Entity::id).collect()
    }

    pub fn index_of(&self, id: &T::Id) -> Option<usize> {
        self.items.iter().position(|item| &item.id() == id)
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.index_of(id).is_some()
    }

    /// Whether the items are strictly increasing under `compare` with identity tie-break.
    pub fn is_sorted_by<F>(&self, compare: F) -> bool
    where
        F: Fn(&T, &T) -> Ordering,
    {
        self.items.windows(2).all(|pair| {
            compare(&pair[0], &pair[1])
                .then_with(|| pair[0].id().cmp(&pair[1].id()))
                .is_lt()
        })
    }
}

impl<'a, T: Entity> IntoIterator for &'a Snapshot<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
