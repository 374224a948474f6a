use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::state::model::{Entity, EntityId};

/// A typed sort field with a total comparator over `T`.
pub trait SortKey<T>: Copy + Debug + Eq + Hash + Serialize + Send + Sync + 'static {
    fn compare(&self, lhs: &T, rhs: &T) -> Ordering;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sorting<K> {
    pub key: K,
    pub direction: SortDirection,
}

impl<K> Sorting<K> {
    pub fn ascending(key: K) -> Self {
        Self {
            key,
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(key: K) -> Self {
        Self {
            key,
            direction: SortDirection::Descending,
        }
    }

    pub fn is_ascending(&self) -> bool {
        self.direction == SortDirection::Ascending
    }
}

/// Chains the sortings in order and breaks remaining ties by ascending identity.
pub fn compare_entities<T: Entity>(sorting: &[Sorting<T::SortKey>], lhs: &T, rhs: &T) -> Ordering {
    sorting
        .iter()
        .map(|sort| {
            let ordering = sort.key.compare(lhs, rhs);
            match sort.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| lhs.id().as_key().cmp(rhs.id().as_key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::timestamps::from_millis;
    use crate::state::model::{ChannelId, ChannelListSortingKey, ChatChannel};

    fn channel(id: &str, updated: i64, members: u32) -> ChatChannel {
        let mut channel = ChatChannel::new(ChannelId::from_parts("messaging", id), from_millis(0));
        channel.updated_at = from_millis(updated);
        channel.member_count = members;
        channel
    }

    #[test]
    fn sortings_chain_then_fall_back_to_identity() {
        let sorting = vec![
            Sorting::descending(ChannelListSortingKey::MemberCount),
            Sorting::ascending(ChannelListSortingKey::UpdatedAt),
        ];
        let mut channels = vec![
            channel("b", 5, 3),
            channel("a", 5, 3),
            channel("c", 1, 3),
            channel("d", 9, 10),
        ];
        channels.sort_by(|lhs, rhs| compare_entities(&sorting, lhs, rhs));
        let ids: Vec<_> = channels.iter().map(|c| c.cid.id().to_owned()).collect();
        assert_eq!(ids, ["d", "c", "a", "b"]);
    }

    #[test]
    fn empty_sorting_orders_by_identity() {
        let lhs = channel("a", 0, 0);
        let rhs = channel("b", 0, 0);
        assert_eq!(compare_entities(&[], &lhs, &rhs), Ordering::Less);
    }
}
