use crate::state::model::EntityKind;
use crate::state::query::ListKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordChange {
    pub kind: EntityKind,
    pub key: String,
    pub change: RecordChangeKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkChange {
    pub list: ListKey,
    pub key: String,
    pub linked: bool,
}

/// Net effect of one committed transaction, delivered to store subscribers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Monotonic commit sequence number.
    pub transaction: u64,
    pub entities: Vec<RecordChange>,
    pub links: Vec<LinkChange>,
    /// Every record was dropped at once; observers must rebuild from scratch.
    pub reset: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.links.is_empty() && !self.reset
    }

    pub fn affects_kind(&self, kind: EntityKind) -> bool {
        self.entities.iter().any(|change| change.kind == kind)
    }

    pub fn affects_list(&self, list: &ListKey) -> bool {
        self.links.iter().any(|change| &change.list == list)
    }

    /// Whether a live query over `kind` (restricted to `list`, if any) may have changed.
    pub fn affects(&self, kind: EntityKind, list: Option<&ListKey>) -> bool {
        self.reset || self.affects_kind(kind) || list.is_some_and(|list| self.affects_list(list))
    }

    pub fn change_for(&self, kind: EntityKind, key: &str) -> Option<RecordChangeKind> {
        self.entities
            .iter()
            .find(|change| change.kind == kind && change.key == key)
            .map(|change| change.change)
    }
}
