pub(crate) const DEFAULT_CHANNELS_PAGE_SIZE: usize = 20;
pub(crate) const DEFAULT_MESSAGES_PAGE_SIZE: usize = 25;
pub(crate) const DEFAULT_MEMBERS_PAGE_SIZE: usize = 30;
pub(crate) const DEFAULT_REACTIONS_PAGE_SIZE: usize = 25;
pub(crate) const DEFAULT_USERS_PAGE_SIZE: usize = 30;
pub(crate) const DEFAULT_SEARCH_PAGE_SIZE: usize = 25;

/// Fraction of changed rows above which a diff degrades to remove-all + insert-all.
pub(crate) const DEFAULT_FULL_REPLACE_RATIO: f64 = 0.5;
/// Lists shorter than this are always diffed positionally.
pub(crate) const DEFAULT_FULL_REPLACE_MIN_LEN: usize = 16;
