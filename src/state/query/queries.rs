use serde::{Deserialize, Serialize};

use crate::state::model::{
    ChannelId, ChannelListSortingKey, ChannelMemberListSortingKey, MessageId, MessageSortingKey,
    ReactionSortingKey, UserListSortingKey,
};
use crate::state::query::{Filter, ListKey, Sorting};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelListQuery {
    pub filter: Filter,
    pub sort: Vec<Sorting<ChannelListSortingKey>>,
    /// Falls back to the client configuration when unset.
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl ChannelListQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: vec![Sorting::descending(ChannelListSortingKey::Default)],
            page_size: None,
        }
    }

    pub fn with_sort(mut self, sort: Vec<Sorting<ChannelListSortingKey>>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn list_key(&self) -> ListKey {
        ListKey::derived("channels", &(&self.filter, &self.sort))
    }
}

/// Which message timeline a query addresses.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageQuery {
    Channel(ChannelId),
    Thread {
        cid: ChannelId,
        parent_id: MessageId,
    },
}

impl MessageQuery {
    pub fn cid(&self) -> &ChannelId {
        match self {
            MessageQuery::Channel(cid) | MessageQuery::Thread { cid, .. } => cid,
        }
    }

    pub fn list_key(&self) -> ListKey {
        match self {
            MessageQuery::Channel(cid) => ListKey::new(format!("chat:{cid}:messages")),
            MessageQuery::Thread { parent_id, .. } => {
                ListKey::new(format!("thread:{parent_id}:replies"))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelMemberListQuery {
    pub cid: ChannelId,
    pub filter: Filter,
    pub sort: Vec<Sorting<ChannelMemberListSortingKey>>,
    /// Falls back to the client configuration when unset.
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl ChannelMemberListQuery {
    pub fn new(cid: ChannelId) -> Self {
        Self {
            cid,
            filter: Filter::All,
            sort: vec![Sorting::ascending(ChannelMemberListSortingKey::CreatedAt)],
            page_size: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: Vec<Sorting<ChannelMemberListSortingKey>>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn list_key(&self) -> ListKey {
        ListKey::derived(
            &format!("members:{}", self.cid),
            &(&self.filter, &self.sort),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReactionListQuery {
    pub message_id: MessageId,
    pub filter: Filter,
    pub sort: Vec<Sorting<ReactionSortingKey>>,
    /// Falls back to the client configuration when unset.
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl ReactionListQuery {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            filter: Filter::All,
            sort: vec![Sorting::descending(ReactionSortingKey::CreatedAt)],
            page_size: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn list_key(&self) -> ListKey {
        ListKey::derived(
            &format!("reactions:{}", self.message_id),
            &(&self.filter, &self.sort),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserListQuery {
    pub filter: Filter,
    pub sort: Vec<Sorting<UserListSortingKey>>,
    /// Falls back to the client configuration when unset.
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl UserListQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: vec![Sorting::ascending(UserListSortingKey::Name)],
            page_size: None,
        }
    }

    pub fn with_sort(mut self, sort: Vec<Sorting<UserListSortingKey>>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn list_key(&self) -> ListKey {
        ListKey::derived("users", &(&self.filter, &self.sort))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageSearchQuery {
    pub channel_filter: Filter,
    pub message_filter: Filter,
    pub sort: Vec<Sorting<MessageSortingKey>>,
    /// Falls back to the client configuration when unset.
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl MessageSearchQuery {
    pub fn new(channel_filter: Filter, message_filter: Filter) -> Self {
        Self {
            channel_filter,
            message_filter,
            sort: vec![Sorting::descending(MessageSortingKey::CreatedAt)],
            page_size: None,
        }
    }

    /// Full-text style search: messages whose text has a word starting with `text`.
    pub fn text(channel_filter: Filter, text: &str) -> Self {
        Self::new(channel_filter, Filter::autocomplete("text", text))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSearchQuery {
    pub term: String,
    pub filter: Filter,
    pub sort: Vec<Sorting<UserListSortingKey>>,
    /// Falls back to the client configuration when unset.
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl UserSearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            filter: Filter::All,
            sort: vec![Sorting::ascending(UserListSortingKey::Name)],
            page_size: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// The term matches users by name or id prefix, on top of `filter`.
    pub fn effective_filter(&self) -> Filter {
        if self.term.trim().is_empty() {
            return self.filter.clone();
        }
        let term_filter = Filter::or(vec![
            Filter::autocomplete("name", self.term.trim()),
            Filter::autocomplete("id", self.term.trim()),
        ]);
        match &self.filter {
            Filter::All => term_filter,
            other => Filter::and(vec![term_filter, other.clone()]),
        }
    }
}
