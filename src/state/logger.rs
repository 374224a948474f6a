use std::sync::LazyLock;

use crate::logger::Logger;

pub(crate) static STORE_LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@chat-state/store"));
pub(crate) static OBSERVER_LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@chat-state/observer"));
pub(crate) static PAGINATION_LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@chat-state/pagination"));
pub(crate) static EVENTS_LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@chat-state/events"));
pub(crate) static SEARCH_LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@chat-state/search"));
