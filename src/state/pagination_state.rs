use std::cmp::Ordering;
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};

use crate::state::logger::PAGINATION_LOGGER;
use crate::state::model::{ChatMessage, MessageId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadDirection {
    FirstPage,
    Older,
    Newer,
    Around,
}

impl LoadDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadDirection::FirstPage => "first-page",
            LoadDirection::Older => "older",
            LoadDirection::Newer => "newer",
            LoadDirection::Around => "around",
        }
    }
}

/// How a list is presented, which decides where older pages are merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
    Prepend,
    Append,
    Replace,
}

/// Why a load request was turned away without touching the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadRejection {
    InFlight,
    Exhausted,
}

impl Display for LoadRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadRejection::InFlight => f.write_str("a load in this direction is already in flight"),
            LoadRejection::Exhausted => f.write_str("every page in this direction is loaded"),
        }
    }
}

/// Server hints that a page touches one end of the collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageEdges {
    pub reached_oldest: bool,
    pub reached_newest: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaginationState<K> {
    pub oldest_loaded_key: Option<K>,
    pub newest_loaded_key: Option<K>,
    pub has_loaded_all_older: bool,
    pub has_loaded_all_newer: bool,
    pub is_loading_older: bool,
    pub is_loading_newer: bool,
    pub is_loading_around: bool,
    pub is_loading_first_page: bool,
    /// Items received since the window was last replaced; the next offset for offset lists.
    pub loaded_count: usize,
}

impl<K> Default for PaginationState<K> {
    fn default() -> Self {
        Self {
            oldest_loaded_key: None,
            newest_loaded_key: None,
            has_loaded_all_older: false,
            has_loaded_all_newer: false,
            is_loading_older: false,
            is_loading_newer: false,
            is_loading_around: false,
            is_loading_first_page: false,
            loaded_count: 0,
        }
    }
}

impl<K> PaginationState<K> {
    pub fn is_loading(&self) -> bool {
        self.is_loading_older
            || self.is_loading_newer
            || self.is_loading_around
            || self.is_loading_first_page
    }

    fn is_replacing(&self) -> bool {
        self.is_loading_around || self.is_loading_first_page
    }
}

/// Tracks the loaded window of a paginated collection and the loads in flight.
///
/// `K` orders items from oldest to newest. Only one load per direction may be in
/// flight; first-page and around loads replace the whole window and exclude every
/// other load while they run.
#[derive(Clone, Debug)]
pub struct PaginationStateMachine<K> {
    state: PaginationState<K>,
    order: DisplayOrder,
}

impl<K: Ord + Clone> PaginationStateMachine<K> {
    pub fn new(order: DisplayOrder) -> Self {
        Self {
            state: PaginationState::default(),
            order,
        }
    }

    pub fn state(&self) -> &PaginationState<K> {
        &self.state
    }

    pub fn order(&self) -> DisplayOrder {
        self.order
    }

    pub fn merge_policy(&self, direction: LoadDirection) -> MergePolicy {
        match (direction, self.order) {
            (LoadDirection::FirstPage | LoadDirection::Around, _) => MergePolicy::Replace,
            (LoadDirection::Older, DisplayOrder::OldestFirst)
            | (LoadDirection::Newer, DisplayOrder::NewestFirst) => MergePolicy::Prepend,
            (LoadDirection::Older, DisplayOrder::NewestFirst)
            | (LoadDirection::Newer, DisplayOrder::OldestFirst) => MergePolicy::Append,
        }
    }

    /// Marks a load as in flight, or explains why it must not start.
    pub fn begin(&mut self, direction: LoadDirection) -> Result<(), LoadRejection> {
        self.start(direction, true)
    }

    /// Like [`begin`](Self::begin) for a page anchored inside the window: an
    /// exhausted direction does not stop it, only a load in flight does.
    pub fn begin_anchored(&mut self, direction: LoadDirection) -> Result<(), LoadRejection> {
        self.start(direction, false)
    }

    fn start(
        &mut self,
        direction: LoadDirection,
        respect_exhaustion: bool,
    ) -> Result<(), LoadRejection> {
        let state = &mut self.state;
        let verdict = match direction {
            LoadDirection::FirstPage | LoadDirection::Around if state.is_loading() => {
                Err(LoadRejection::InFlight)
            }
            LoadDirection::FirstPage => {
                state.is_loading_first_page = true;
                Ok(())
            }
            LoadDirection::Around => {
                state.is_loading_around = true;
                Ok(())
            }
            LoadDirection::Older if respect_exhaustion && state.has_loaded_all_older => {
                Err(LoadRejection::Exhausted)
            }
            LoadDirection::Older if state.is_loading_older || state.is_replacing() => {
                Err(LoadRejection::InFlight)
            }
            LoadDirection::Older => {
                state.is_loading_older = true;
                Ok(())
            }
            LoadDirection::Newer if respect_exhaustion && state.has_loaded_all_newer => {
                Err(LoadRejection::Exhausted)
            }
            LoadDirection::Newer if state.is_loading_newer || state.is_replacing() => {
                Err(LoadRejection::InFlight)
            }
            LoadDirection::Newer => {
                state.is_loading_newer = true;
                Ok(())
            }
        };
        if let Err(rejection) = verdict {
            PAGINATION_LOGGER.debug(format!(
                "Rejected {} load: {rejection}",
                direction.as_str()
            ));
        }
        verdict
    }

    /// Records a successful page and returns how it merges into the window.
    ///
    /// `keys` are the page's item keys in any order; a page shorter than `requested`
    /// means the collection ends in that direction.
    pub fn complete(
        &mut self,
        direction: LoadDirection,
        keys: Vec<K>,
        requested: usize,
        edges: PageEdges,
    ) -> MergePolicy {
        self.clear_flag(direction);
        let short = keys.len() < requested;
        let received = keys.len();
        let page_oldest = keys.iter().min().cloned();
        let page_newest = keys.into_iter().max();
        let state = &mut self.state;

        match direction {
            LoadDirection::Older => {
                // A page anchored inside the window says nothing about the edge.
                let extends = is_beyond(&page_oldest, &state.oldest_loaded_key, Ordering::Less);
                state.oldest_loaded_key = min_key(state.oldest_loaded_key.take(), page_oldest);
                if state.newest_loaded_key.is_none() {
                    state.newest_loaded_key = page_newest;
                }
                if extends {
                    state.has_loaded_all_older = short || edges.reached_oldest;
                }
                state.loaded_count += received;
            }
            LoadDirection::Newer => {
                let extends = is_beyond(&page_newest, &state.newest_loaded_key, Ordering::Greater);
                state.newest_loaded_key = max_key(state.newest_loaded_key.take(), page_newest);
                if state.oldest_loaded_key.is_none() {
                    state.oldest_loaded_key = page_oldest;
                }
                if extends {
                    state.has_loaded_all_newer = short || edges.reached_newest;
                }
                state.loaded_count += received;
            }
            LoadDirection::FirstPage => {
                state.oldest_loaded_key = page_oldest;
                state.newest_loaded_key = page_newest;
                state.has_loaded_all_older = short || edges.reached_oldest;
                state.has_loaded_all_newer = true;
                state.loaded_count = received;
            }
            LoadDirection::Around => {
                state.oldest_loaded_key = page_oldest;
                state.newest_loaded_key = page_newest;
                state.has_loaded_all_older = edges.reached_oldest;
                state.has_loaded_all_newer = edges.reached_newest;
                state.loaded_count = received;
            }
        }

        PAGINATION_LOGGER.debug(format!(
            "Merged {received} item(s) from {} load",
            direction.as_str()
        ));
        self.merge_policy(direction)
    }

    /// Returns to idle for `direction` without touching the window.
    pub fn fail(&mut self, direction: LoadDirection) {
        self.clear_flag(direction);
    }

    /// Forgets the window, e.g. after the local data was wiped.
    pub fn reset(&mut self) {
        self.state = PaginationState::default();
    }

    fn clear_flag(&mut self, direction: LoadDirection) {
        let state = &mut self.state;
        match direction {
            LoadDirection::FirstPage => state.is_loading_first_page = false,
            LoadDirection::Older => state.is_loading_older = false,
            LoadDirection::Newer => state.is_loading_newer = false,
            LoadDirection::Around => state.is_loading_around = false,
        }
    }
}

/// Whether a page boundary lies past the window boundary in direction `past`.
/// Empty pages and empty windows count as reaching the edge.
fn is_beyond<K: Ord>(page: &Option<K>, window: &Option<K>, past: Ordering) -> bool {
    match (page, window) {
        (Some(page), Some(window)) => page.cmp(window) == past,
        _ => true,
    }
}

fn min_key<K: Ord>(current: Option<K>, candidate: Option<K>) -> Option<K> {
    match (current, candidate) {
        (Some(current), Some(candidate)) => Some(current.min(candidate)),
        (current, candidate) => current.or(candidate),
    }
}

fn max_key<K: Ord>(current: Option<K>, candidate: Option<K>) -> Option<K> {
    match (current, candidate) {
        (Some(current), Some(candidate)) => Some(current.max(candidate)),
        (current, candidate) => current.or(candidate),
    }
}

/// Position in an offset-paginated list. Later positions count as older, so the
/// oldest loaded key is the furthest position loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListPosition(pub usize);

impl Ord for ListPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for ListPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Boundary key of a message timeline: creation time, then id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
    pub created_at: DateTime<Utc>,
    pub id: MessageId,
}

impl From<&ChatMessage> for MessageKey {
    fn from(message: &ChatMessage) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> PaginationStateMachine<u32> {
        PaginationStateMachine::new(DisplayOrder::OldestFirst)
    }

    #[test]
    fn second_request_in_same_direction_is_rejected() {
        let mut machine = machine();
        machine.begin(LoadDirection::Older).unwrap();
        assert_eq!(
            machine.begin(LoadDirection::Older),
            Err(LoadRejection::InFlight)
        );
        // The opposite direction is independent.
        assert!(machine.begin(LoadDirection::Newer).is_ok());
        assert_eq!(
            machine.begin(LoadDirection::Around),
            Err(LoadRejection::InFlight)
        );
    }

    #[test]
    fn replacing_loads_exclude_directional_loads() {
        let mut machine = machine();
        machine.begin(LoadDirection::FirstPage).unwrap();
        assert_eq!(
            machine.begin(LoadDirection::Older),
            Err(LoadRejection::InFlight)
        );
        machine.complete(LoadDirection::FirstPage, vec![10, 11], 2, PageEdges::default());
        assert!(machine.begin(LoadDirection::Older).is_ok());
    }

    #[test]
    fn older_pages_move_the_boundary_strictly_older() {
        let mut machine = machine();
        machine.begin(LoadDirection::FirstPage).unwrap();
        let policy = machine.complete(
            LoadDirection::FirstPage,
            (90..100).collect(),
            10,
            PageEdges::default(),
        );
        assert_eq!(policy, MergePolicy::Replace);
        assert!(machine.state().has_loaded_all_newer);

        let mut last_oldest = machine.state().oldest_loaded_key;
        for page in 0..8u32 {
            let top = 90 - page * 10;
            machine.begin(LoadDirection::Older).unwrap();
            let policy = machine.complete(
                LoadDirection::Older,
                (top - 10..top).collect(),
                10,
                PageEdges::default(),
            );
            assert_eq!(policy, MergePolicy::Prepend);
            let oldest = machine.state().oldest_loaded_key;
            assert!(oldest < last_oldest);
            last_oldest = oldest;
        }
        assert_eq!(machine.state().loaded_count, 90);
        assert!(!machine.state().has_loaded_all_older);

        machine.begin(LoadDirection::Older).unwrap();
        machine.complete(LoadDirection::Older, vec![5, 6, 7], 10, PageEdges::default());
        assert!(machine.state().has_loaded_all_older);
        assert_eq!(
            machine.begin(LoadDirection::Older),
            Err(LoadRejection::Exhausted)
        );
    }

    #[test]
    fn anchored_loads_inside_an_exhausted_window_keep_the_edge() {
        let mut machine = machine();
        machine.begin(LoadDirection::FirstPage).unwrap();
        machine.complete(LoadDirection::FirstPage, (1..10).collect(), 20, PageEdges::default());
        assert_eq!(
            machine.begin(LoadDirection::Older),
            Err(LoadRejection::Exhausted)
        );

        machine.begin_anchored(LoadDirection::Older).unwrap();
        assert_eq!(
            machine.begin_anchored(LoadDirection::Older),
            Err(LoadRejection::InFlight)
        );
        // A full page before message 6 stays inside the loaded window.
        machine.complete(LoadDirection::Older, vec![4, 5], 2, PageEdges::default());
        assert!(machine.state().has_loaded_all_older);
        assert_eq!(machine.state().oldest_loaded_key, Some(1));
    }

    #[test]
    fn failure_returns_to_idle_without_touching_keys() {
        let mut machine = machine();
        machine.begin(LoadDirection::FirstPage).unwrap();
        machine.complete(LoadDirection::FirstPage, vec![4, 5], 2, PageEdges::default());
        let before = machine.state().clone();

        machine.begin(LoadDirection::Older).unwrap();
        machine.fail(LoadDirection::Older);
        assert_eq!(machine.state(), &before);
        assert!(!machine.state().is_loading());
    }

    #[test]
    fn around_replaces_window_and_trusts_only_edge_hints() {
        let mut machine = machine();
        machine.begin(LoadDirection::FirstPage).unwrap();
        machine.complete(LoadDirection::FirstPage, vec![98, 99], 25, PageEdges::default());
        assert!(machine.state().has_loaded_all_older);

        machine.begin(LoadDirection::Around).unwrap();
        let policy = machine.complete(LoadDirection::Around, vec![30, 31], 25, PageEdges::default());
        assert_eq!(policy, MergePolicy::Replace);
        let state = machine.state();
        assert_eq!(state.oldest_loaded_key, Some(30));
        assert_eq!(state.newest_loaded_key, Some(31));
        assert!(!state.has_loaded_all_older);
        assert!(!state.has_loaded_all_newer);

        machine.begin(LoadDirection::Around).unwrap();
        machine.complete(
            LoadDirection::Around,
            vec![0, 1],
            25,
            PageEdges {
                reached_oldest: true,
                reached_newest: false,
            },
        );
        assert!(machine.state().has_loaded_all_older);
    }

    #[test]
    fn newest_first_lists_append_older_pages() {
        let machine = PaginationStateMachine::<u32>::new(DisplayOrder::NewestFirst);
        assert_eq!(machine.merge_policy(LoadDirection::Older), MergePolicy::Append);
        assert_eq!(machine.merge_policy(LoadDirection::Newer), MergePolicy::Prepend);
    }

    #[test]
    fn list_positions_count_later_as_older() {
        let mut machine = PaginationStateMachine::<ListPosition>::new(DisplayOrder::NewestFirst);
        machine.begin(LoadDirection::FirstPage).unwrap();
        machine.complete(
            LoadDirection::FirstPage,
            (0..20).map(ListPosition).collect(),
            20,
            PageEdges::default(),
        );
        machine.begin(LoadDirection::Older).unwrap();
        machine.complete(
            LoadDirection::Older,
            (20..40).map(ListPosition).collect(),
            20,
            PageEdges::default(),
        );
        assert_eq!(machine.state().oldest_loaded_key, Some(ListPosition(39)));
        assert_eq!(machine.state().newest_loaded_key, Some(ListPosition(0)));
        assert_eq!(machine.state().loaded_count, 40);
    }
}
