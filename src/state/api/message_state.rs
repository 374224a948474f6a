use crate::state::api::environment::Environment;
use crate::state::api::message_window::{MessagePaginationFlags, MessageWindow, MessageWindowState};
use crate::state::error::StateResult;
use crate::state::model::{ChatMessage, MessageId};
use crate::state::observer::{ChangeStream, EntityChange, EntityObserver};
use crate::state::orchestrator::PageLoaded;
use crate::state::published::Published;
use crate::state::query::MessageQuery;
use crate::state::snapshot::Snapshot;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageThreadState {
    /// The parent message; `None` once it was hard-deleted.
    pub message: Option<ChatMessage>,
    pub replies: Snapshot<ChatMessage>,
    pub pagination: MessagePaginationFlags,
}

impl MessageWindowState for MessageThreadState {
    fn set_messages(&mut self, messages: Snapshot<ChatMessage>) {
        self.replies = messages;
    }

    fn set_pagination(&mut self, pagination: MessagePaginationFlags) {
        self.pagination = pagination;
    }
}

/// A message and its reply thread, paginated independently of the channel.
pub struct MessageState {
    message_id: MessageId,
    window: MessageWindow<MessageThreadState>,
    message: EntityObserver<ChatMessage>,
}

impl MessageState {
    pub(crate) fn new(env: &Environment, parent: ChatMessage) -> Self {
        let state = Published::new(MessageThreadState::default());
        let message =
            EntityObserver::<ChatMessage>::new(&env.store, parent.id.clone(), env.context.clone())
                .tracked_fields(["reply_count", "reaction_counts", "text"]);
        let published = state.clone();
        message.on_change(move |change| {
            let message = match change {
                EntityChange::Remove(_) => None,
                other => Some(other.item().clone()),
            };
            published.update(|state| state.message = message);
        });
        let current = message.start_observing();
        state.update(|state| state.message = current);

        let query = MessageQuery::Thread {
            cid: parent.cid.clone(),
            parent_id: parent.id.clone(),
        };
        Self {
            message_id: parent.id,
            window: MessageWindow::new(env, query, state),
            message,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn message(&self) -> Option<ChatMessage> {
        self.message.current()
    }

    pub fn state(&self) -> &Published<MessageThreadState> {
        self.window.state()
    }

    pub fn replies(&self) -> Snapshot<ChatMessage> {
        self.window.messages()
    }

    pub fn page_events(&self) -> ChangeStream<PageLoaded<ChatMessage>> {
        self.window.page_events()
    }

    pub async fn load_replies_first_page(&self) -> StateResult<Vec<ChatMessage>> {
        self.window.load_first_page().await
    }

    pub async fn load_previous_replies(
        &self,
        before: Option<MessageId>,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        self.window.load_previous(before, limit).await
    }

    pub async fn load_next_replies(
        &self,
        after: Option<MessageId>,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        self.window.load_next(after, limit).await
    }

    pub async fn load_replies_around(
        &self,
        id: MessageId,
        limit: Option<usize>,
    ) -> StateResult<Vec<ChatMessage>> {
        self.window.load_around(id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::events::ChatEvent;
    use crate::test_support::{environment, message, remote_service, reply};

    #[tokio::test]
    async fn replies_page_and_follow_new_replies() {
        let remote = remote_service();
        let parent = message("general", "p1", 100);
        remote.seed_messages([parent.clone()]);
        remote.seed_messages((0..3).map(|index| reply(&parent, &format!("r{index}"), 200 + index)));
        let env = environment(remote);
        env.store.write(|session| session.save(&parent)).await.unwrap();

        let thread = MessageState::new(&env, parent.clone());
        assert_eq!(thread.load_replies_first_page().await.unwrap().len(), 3);
        assert!(thread.state().get().pagination.has_loaded_all_previous);

        env.events
            .publish(ChatEvent::MessageNew {
                message: reply(&parent, "r9", 900),
            })
            .await
            .unwrap();
        env.events
            .publish(ChatEvent::MessageNew {
                message: message("general", "other", 901),
            })
            .await
            .unwrap();

        let state = thread.state().get();
        assert_eq!(state.replies.len(), 4);
        assert_eq!(state.replies.last().unwrap().id.as_str(), "r9");
        assert_eq!(state.message.unwrap().reply_count, 1);
    }
}
