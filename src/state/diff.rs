use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::state::constants::{DEFAULT_FULL_REPLACE_MIN_LEN, DEFAULT_FULL_REPLACE_RATIO};
use crate::state::model::Entity;

/// One edit in a batch transforming an old list into a new one.
///
/// Indices follow batch-update conventions: `Remove::index` and `Move::from` refer
/// to the old list, `Insert::index`, `Move::to` and `Update::index` to the new one.
#[derive(Clone, Debug, PartialEq)]
pub enum ListChange<T> {
    Insert { item: T, index: usize },
    Remove { item: T, index: usize },
    Update { item: T, index: usize },
    Move { item: T, from: usize, to: usize },
}

impl<T> ListChange<T> {
    pub fn item(&self) -> &T {
        match self {
            ListChange::Insert { item, .. }
            | ListChange::Remove { item, .. }
            | ListChange::Update { item, .. }
            | ListChange::Move { item, .. } => item,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, ListChange::Insert { .. })
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, ListChange::Remove { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffOptions {
    /// Share of structurally changed rows above which positional diffing is abandoned.
    pub full_replace_ratio: f64,
    pub full_replace_min_len: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            full_replace_ratio: DEFAULT_FULL_REPLACE_RATIO,
            full_replace_min_len: DEFAULT_FULL_REPLACE_MIN_LEN,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diff<T> {
    pub changes: Vec<ListChange<T>>,
    /// Set when the diff is remove-all + insert-all.
    pub full_replace: bool,
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl<T: Clone> Diff<T> {
    pub fn replace_all(old: &[T], new: &[T]) -> Self {
        let removes = old.iter().enumerate().map(|(index, item)| ListChange::Remove {
            item: item.clone(),
            index,
        });
        let inserts = new.iter().enumerate().map(|(index, item)| ListChange::Insert {
            item: item.clone(),
            index,
        });
        Self {
            changes: removes.chain(inserts).collect(),
            full_replace: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffError {
    OutOfBounds { index: usize, len: usize },
    IndexCollision { index: usize },
    UpdateCollision { index: usize },
}

impl Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffError::OutOfBounds { index, len } => {
                write!(f, "change index {index} is out of bounds for length {len}")
            }
            DiffError::IndexCollision { index } => {
                write!(f, "two changes claim index {index}")
            }
            DiffError::UpdateCollision { index } => {
                write!(f, "update at index {index} collides with an insert or move")
            }
        }
    }
}

impl std::error::Error for DiffError {}

/// Computes the edit script from `old` to `new`.
///
/// Both slices must be identity-unique. Items whose relative order is preserved form
/// the longest increasing run of old positions; every other surviving item is a move.
pub fn compute_changes<T: Entity>(old: &[T], new: &[T], options: &DiffOptions) -> Diff<T> {
    let old_positions: HashMap<T::Id, usize> = old
        .iter()
        .enumerate()
        .map(|(index, item)| (item.id(), index))
        .collect();
    let new_ids: BTreeSet<T::Id> = new.iter().map(Entity::id).collect();

    let mut removes = Vec::new();
    for (index, item) in old.iter().enumerate() {
        if !new_ids.contains(&item.id()) {
            removes.push(ListChange::Remove {
                item: item.clone(),
                index,
            });
        }
    }

    let mut inserts = Vec::new();
    let mut common = Vec::new();
    for (index, item) in new.iter().enumerate() {
        match old_positions.get(&item.id()) {
            Some(&from) => common.push((index, from)),
            None => inserts.push(ListChange::Insert {
                item: item.clone(),
                index,
            }),
        }
    }

    let old_order: Vec<usize> = common.iter().map(|&(_, from)| from).collect();
    let stable = longest_increasing_run(&old_order);
    let mut moves = Vec::new();
    let mut updates = Vec::new();
    for (&(to, from), keep) in common.iter().zip(stable) {
        if !keep {
            moves.push(ListChange::Move {
                item: new[to].clone(),
                from,
                to,
            });
        } else if old[from] != new[to] {
            updates.push(ListChange::Update {
                item: new[to].clone(),
                index: to,
            });
        }
    }

    let structural = removes.len() + inserts.len() + moves.len();
    let longest = old.len().max(new.len());
    if longest >= options.full_replace_min_len
        && structural as f64 / longest as f64 > options.full_replace_ratio
    {
        return Diff::replace_all(old, new);
    }

    let mut changes = removes;
    changes.extend(inserts);
    changes.extend(moves);
    changes.extend(updates);
    Diff {
        changes,
        full_replace: false,
    }
}

/// Flags the members of one longest strictly increasing subsequence of `values`.
fn longest_increasing_run(values: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];
    for (position, &value) in values.iter().enumerate() {
        let slot = tails.partition_point(|&tail| values[tail] < value);
        if slot > 0 {
            previous[position] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(position);
        } else {
            tails[slot] = position;
        }
    }

    let mut keep = vec![false; values.len()];
    let mut cursor = tails.last().copied();
    while let Some(position) = cursor {
        keep[position] = true;
        cursor = previous[position];
    }
    keep
}

/// Checks that `changes` can be applied to a list of `old_len` items without two
/// changes claiming the same slot. Returns the resulting length.
pub fn validate_changes<T>(old_len: usize, changes: &[ListChange<T>]) -> Result<usize, DiffError> {
    let mut vacated = BTreeSet::new();
    let mut filled = BTreeSet::new();
    let mut updated = BTreeSet::new();
    for change in changes {
        match change {
            ListChange::Remove { index, .. } => claim(&mut vacated, *index)?,
            ListChange::Insert { index, .. } => claim(&mut filled, *index)?,
            ListChange::Move { from, to, .. } => {
                claim(&mut vacated, *from)?;
                claim(&mut filled, *to)?;
            }
            ListChange::Update { index, .. } => claim(&mut updated, *index)?,
        }
    }

    if let Some(&index) = vacated.last() {
        if index >= old_len {
            return Err(DiffError::OutOfBounds {
                index,
                len: old_len,
            });
        }
    }
    let new_len = old_len - vacated.len() + filled.len();
    if let Some(&index) = filled.last().max(updated.last()) {
        if index >= new_len {
            return Err(DiffError::OutOfBounds {
                index,
                len: new_len,
            });
        }
    }
    if let Some(&index) = updated.intersection(&filled).next() {
        return Err(DiffError::UpdateCollision { index });
    }
    Ok(new_len)
}

fn claim(indices: &mut BTreeSet<usize>, index: usize) -> Result<(), DiffError> {
    if indices.insert(index) {
        Ok(())
    } else {
        Err(DiffError::IndexCollision { index })
    }
}

/// Replays `changes` on `old`. Invalid batches are rejected whole, never partially applied.
pub fn apply_changes<T: Clone>(old: &[T], changes: &[ListChange<T>]) -> Result<Vec<T>, DiffError> {
    let new_len = validate_changes(old.len(), changes)?;

    let mut vacated = BTreeSet::new();
    let mut slots: Vec<Option<T>> = vec![None; new_len];
    for change in changes {
        match change {
            ListChange::Remove { index, .. } => {
                vacated.insert(*index);
            }
            ListChange::Insert { item, index } => slots[*index] = Some(item.clone()),
            ListChange::Move { item, from, to } => {
                vacated.insert(*from);
                slots[*to] = Some(item.clone());
            }
            ListChange::Update { .. } => {}
        }
    }

    let mut survivors = old
        .iter()
        .enumerate()
        .filter(|(index, _)| !vacated.contains(index))
        .map(|(_, item)| item.clone());
    for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
        *slot = survivors.next();
    }

    for change in changes {
        if let ListChange::Update { item, index } = change {
            slots[*index] = Some(item.clone());
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::timestamps::from_millis;
    use crate::state::model::{ChatUser, UserId};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn user(id: &str, name: &str) -> ChatUser {
        let mut user = ChatUser::new(UserId::new(id), from_millis(0));
        user.name = Some(name.to_owned());
        user
    }

    fn users(ids: &[&str]) -> Vec<ChatUser> {
        ids.iter().map(|id| user(id, id)).collect()
    }

    fn positional() -> DiffOptions {
        DiffOptions {
            full_replace_ratio: 1.0,
            full_replace_min_len: usize::MAX,
        }
    }

    #[test]
    fn single_insert() {
        let old = users(&["a", "b", "d"]);
        let new = users(&["a", "b", "c", "d"]);
        let diff = compute_changes(&old, &new, &DiffOptions::default());
        assert_eq!(
            diff.changes,
            vec![ListChange::Insert {
                item: user("c", "c"),
                index: 2
            }]
        );
    }

    #[test]
    fn payload_change_in_place_is_update() {
        let old = users(&["a", "b"]);
        let mut new = old.clone();
        new[1].name = Some("renamed".into());
        let diff = compute_changes(&old, &new, &DiffOptions::default());
        assert_eq!(
            diff.changes,
            vec![ListChange::Update {
                item: new[1].clone(),
                index: 1
            }]
        );
    }

    #[test]
    fn reorder_produces_single_move() {
        let old = users(&["a", "b", "c", "d"]);
        let new = users(&["d", "a", "b", "c"]);
        let diff = compute_changes(&old, &new, &positional());
        assert_eq!(
            diff.changes,
            vec![ListChange::Move {
                item: user("d", "d"),
                from: 3,
                to: 0
            }]
        );
        assert_eq!(apply_changes(&old, &diff.changes).unwrap(), new);
    }

    #[test]
    fn large_turnover_degrades_to_full_replace() {
        let old: Vec<_> = (0..20).map(|i| user(&format!("o{i:02}"), "x")).collect();
        let new: Vec<_> = (0..20).map(|i| user(&format!("n{i:02}"), "x")).collect();
        let diff = compute_changes(&old, &new, &DiffOptions::default());
        assert!(diff.full_replace);
        assert_eq!(diff.changes.iter().filter(|c| c.is_remove()).count(), 20);
        assert_eq!(apply_changes(&old, &diff.changes).unwrap(), new);
    }

    #[test]
    fn colliding_changes_are_rejected() {
        let old = users(&["a", "b"]);
        let changes = vec![
            ListChange::Insert {
                item: user("x", "x"),
                index: 0,
            },
            ListChange::Insert {
                item: user("y", "y"),
                index: 0,
            },
        ];
        assert_eq!(
            apply_changes(&old, &changes),
            Err(DiffError::IndexCollision { index: 0 })
        );

        let update_on_insert = vec![
            ListChange::Insert {
                item: user("x", "x"),
                index: 0,
            },
            ListChange::Update {
                item: user("a", "a2"),
                index: 0,
            },
        ];
        assert_eq!(
            validate_changes(old.len(), &update_on_insert),
            Err(DiffError::UpdateCollision { index: 0 })
        );

        let out_of_bounds = vec![ListChange::Remove {
            item: user("a", "a"),
            index: 5,
        }];
        assert!(matches!(
            validate_changes(old.len(), &out_of_bounds),
            Err(DiffError::OutOfBounds { index: 5, .. })
        ));
    }

    #[test]
    fn replaying_diffs_reproduces_the_new_list() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for round in 0..300 {
            let universe: Vec<String> = (0..30).map(|i| format!("u{i:02}")).collect();
            let mut old: Vec<ChatUser> = Vec::new();
            let mut new: Vec<ChatUser> = Vec::new();
            for id in &universe {
                if rng.gen_bool(0.6) {
                    old.push(user(id, "v0"));
                }
                if rng.gen_bool(0.6) {
                    let version = if rng.gen_bool(0.3) { "v1" } else { "v0" };
                    new.push(user(id, version));
                }
            }
            old.shuffle(&mut rng);
            new.shuffle(&mut rng);

            let options = if round % 2 == 0 {
                positional()
            } else {
                DiffOptions::default()
            };
            let diff = compute_changes(&old, &new, &options);
            let replayed = apply_changes(&old, &diff.changes).unwrap();
            assert_eq!(replayed, new, "round {round}");
        }
    }

    #[test]
    fn moves_are_minimal_for_preserved_runs() {
        assert_eq!(
            longest_increasing_run(&[2, 0, 1, 3]),
            vec![false, true, true, true]
        );
        assert!(longest_increasing_run(&[]).is_empty());
    }
}
