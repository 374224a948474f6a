use serde::{Deserialize, Serialize};

use crate::state::model::MessageId;

/// Offset-based page request used by channel, member, reaction and user lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    pub page_size: usize,
    pub offset: usize,
}

impl Pagination {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Anchor for a cursor-based message page.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationParameter {
    /// Messages strictly older than the anchor.
    LessThan(MessageId),
    /// Messages strictly newer than the anchor.
    GreaterThan(MessageId),
    /// A page centered on the anchor, the anchor included.
    Around(MessageId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessagesPagination {
    pub page_size: usize,
    #[serde(default)]
    pub parameter: Option<PaginationParameter>,
}

impl MessagesPagination {
    /// The newest page of a timeline.
    pub fn first_page(page_size: usize) -> Self {
        Self {
            page_size,
            parameter: None,
        }
    }

    pub fn before(id: MessageId, page_size: usize) -> Self {
        Self {
            page_size,
            parameter: Some(PaginationParameter::LessThan(id)),
        }
    }

    pub fn after(id: MessageId, page_size: usize) -> Self {
        Self {
            page_size,
            parameter: Some(PaginationParameter::GreaterThan(id)),
        }
    }

    pub fn around(id: MessageId, page_size: usize) -> Self {
        Self {
            page_size,
            parameter: Some(PaginationParameter::Around(id)),
        }
    }

    pub fn is_jumping(&self) -> bool {
        matches!(self.parameter, Some(PaginationParameter::Around(_)))
    }
}
