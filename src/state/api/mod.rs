//! Facades composing orchestrators, observers and published state for consumers.

mod channel_list;
mod chat;
mod environment;
mod member_list;
mod message_state;
mod message_window;
mod offset_list;
mod reaction_list;
mod search;
mod user_list;

pub use channel_list::{ChannelList, ChannelListState};
pub use chat::{Chat, ChatState};
pub(crate) use environment::Environment;
pub use member_list::{MemberList, MemberListState};
pub use message_state::{MessageState, MessageThreadState};
pub use message_window::MessagePaginationFlags;
pub use offset_list::ListState;
pub use reaction_list::{ReactionList, ReactionListState};
pub use search::{MessageSearch, MessageSearchState, SearchState, UserSearch, UserSearchState};
pub use user_list::{UserList, UserListState};
