use std::cmp::Ordering;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::state::model::Entity;
use crate::state::query::{compare_entities, Filter, Sorting};

/// Names a set of link records in the store, i.e. the membership of one list.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListKey(String);

impl ListKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key built from a prefix and a serializable descriptor (filter, sorting, ...).
    pub(crate) fn derived<D: Serialize>(prefix: &str, descriptor: &D) -> Self {
        let encoded = serde_json::to_string(descriptor).unwrap_or_default();
        Self(format!("{prefix}:{encoded}"))
    }
}

impl Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live query over the store: which records (all of a kind, or those linked
/// to `list`), which of them (`filter`), in which order (`sort`), how many (`limit`).
#[derive(Clone, Debug, PartialEq)]
pub struct FetchSpecification<T: Entity> {
    pub list: Option<ListKey>,
    pub filter: Filter,
    pub sort: Vec<Sorting<T::SortKey>>,
    pub limit: Option<usize>,
}

impl<T: Entity> FetchSpecification<T> {
    pub fn new(filter: Filter, sort: Vec<Sorting<T::SortKey>>) -> Self {
        Self {
            list: None,
            filter,
            sort,
            limit: None,
        }
    }

    /// Restricts the specification to the records linked to `list`.
    pub fn linked(list: ListKey, sort: Vec<Sorting<T::SortKey>>) -> Self {
        Self {
            list: Some(list),
            filter: Filter::All,
            sort,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether both specifications describe the same live query. The page window
    /// (`limit`) is state layered on top and is ignored.
    pub fn same_subscription(&self, other: &Self) -> bool {
        self.list == other.list && self.filter == other.filter && self.sort == other.sort
    }

    pub fn matches(&self, entity: &T) -> bool {
        self.filter.matches_entity(entity)
    }

    pub fn compare(&self, lhs: &T, rhs: &T) -> Ordering {
        compare_entities(&self.sort, lhs, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::{ChatChannel, ChannelListSortingKey};

    #[test]
    fn same_subscription_ignores_limit() {
        let list = ListKey::new("channels:a");
        let sort = vec![Sorting::descending(ChannelListSortingKey::UpdatedAt)];
        let lhs = FetchSpecification::<ChatChannel>::linked(list.clone(), sort.clone());
        let rhs = FetchSpecification::<ChatChannel>::linked(list, sort).with_limit(20);
        assert!(lhs.same_subscription(&rhs));
        assert_ne!(lhs, rhs);

        let other = lhs.clone().with_filter(Filter::equal("is_hidden", false));
        assert!(!lhs.same_subscription(&other));
    }

    #[test]
    fn derived_keys_are_stable() {
        let filter = Filter::equal("team", "red");
        assert_eq!(
            ListKey::derived("channels", &filter),
            ListKey::derived("channels", &filter.clone())
        );
        assert_ne!(
            ListKey::derived("channels", &filter),
            ListKey::derived("users", &filter)
        );
    }
}
