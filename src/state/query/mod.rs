//! Filters, sortings, pagination parameters and the live-query descriptions built from them.

mod filter;
mod pagination;
mod queries;
mod sorting;
mod specification;

pub use filter::Filter;
pub use pagination::{MessagesPagination, Pagination, PaginationParameter};
pub use queries::{
    ChannelListQuery, ChannelMemberListQuery, MessageQuery, MessageSearchQuery,
    ReactionListQuery, UserListQuery, UserSearchQuery,
};
pub use sorting::{compare_entities, SortDirection, SortKey, Sorting};
pub use specification::{FetchSpecification, ListKey};
